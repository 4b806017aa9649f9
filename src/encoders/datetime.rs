//! Calendar-component encoding for date and timestamp columns

use super::{
    ensure_fitted, ensure_unfitted, stack_codes, string_values, EncoderKind, FeatureEncoder,
    FIRST_VALUE_INDEX, MISSING_INDEX, RESERVED_CODES,
};
use crate::error::{TabError, Result};
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Timelike};
use ndarray::Array2;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y/%m/%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d.%m.%Y"];

/// Parse the timestamp formats commonly found in tabular exports
pub fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    let s = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// A calendar field extracted as its own categorical sub-column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum DateComponent {
    /// Years seen during fit, ascending
    Year(Vec<i32>),
    Month,
    Day,
    Weekday,
    Hour,
}

impl DateComponent {
    fn raw(&self, dt: &NaiveDateTime) -> i64 {
        match self {
            DateComponent::Year(_) => dt.year() as i64,
            DateComponent::Month => dt.month0() as i64,
            DateComponent::Day => dt.day0() as i64,
            DateComponent::Weekday => dt.weekday().num_days_from_monday() as i64,
            DateComponent::Hour => dt.hour() as i64,
        }
    }

    fn code(&self, dt: &NaiveDateTime) -> i64 {
        match self {
            DateComponent::Year(years) => years
                .binary_search(&dt.year())
                .map_or(MISSING_INDEX, |i| FIRST_VALUE_INDEX + i as i64),
            _ => FIRST_VALUE_INDEX + self.raw(dt),
        }
    }

    fn cardinality(&self) -> usize {
        let n_values = match self {
            DateComponent::Year(years) => years.len(),
            DateComponent::Month => 12,
            DateComponent::Day => 31,
            DateComponent::Weekday => 7,
            DateComponent::Hour => 24,
        };
        n_values + RESERVED_CODES
    }
}

/// Splits timestamps into year, month, day, weekday and hour codes.
///
/// Only components that vary across the fit data are emitted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatetimeOrdinalEnc {
    components: Vec<DateComponent>,
    cat_cards: Vec<usize>,
    is_fitted: bool,
}

impl DatetimeOrdinalEnc {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of calendar components kept after fit
    pub fn n_components(&self) -> usize {
        self.components.len()
    }
}

impl FeatureEncoder for DatetimeOrdinalEnc {
    fn kind(&self) -> EncoderKind {
        EncoderKind::DatetimeOrdinal
    }

    fn fit(&mut self, column: &Series) -> Result<()> {
        ensure_unfitted(self.is_fitted, self.kind())?;

        let parsed: Vec<NaiveDateTime> = string_values(column)?
            .iter()
            .filter_map(|v| v.as_deref().and_then(parse_datetime))
            .collect();
        if parsed.is_empty() {
            return Err(TabError::WontEncode("no parseable timestamps".to_string()));
        }

        let years: BTreeSet<i32> = parsed.iter().map(|dt| dt.year()).collect();
        let candidates = [
            DateComponent::Year(years.into_iter().collect()),
            DateComponent::Month,
            DateComponent::Day,
            DateComponent::Weekday,
            DateComponent::Hour,
        ];

        let components: Vec<DateComponent> = candidates
            .into_iter()
            .filter(|c| {
                let first = c.raw(&parsed[0]);
                parsed.iter().any(|dt| c.raw(dt) != first)
            })
            .collect();
        if components.is_empty() {
            return Err(TabError::WontEncode("timestamps are constant".to_string()));
        }

        self.cat_cards = components.iter().map(|c| c.cardinality()).collect();
        self.components = components;
        self.is_fitted = true;
        Ok(())
    }

    fn is_fitted(&self) -> bool {
        self.is_fitted
    }

    fn enc_cat(&self, column: &Series) -> Result<Option<Array2<i64>>> {
        ensure_fitted(self.is_fitted, self.kind())?;
        let parsed: Vec<Option<NaiveDateTime>> = string_values(column)?
            .iter()
            .map(|v| v.as_deref().and_then(parse_datetime))
            .collect();

        let sub_columns: Vec<Vec<i64>> = self
            .components
            .iter()
            .map(|c| {
                parsed
                    .iter()
                    .map(|dt| dt.as_ref().map_or(MISSING_INDEX, |dt| c.code(dt)))
                    .collect()
            })
            .collect();
        Ok(Some(stack_codes(parsed.len(), &sub_columns)))
    }

    fn enc_cont(&self, _column: &Series) -> Result<Option<Array2<f32>>> {
        ensure_fitted(self.is_fitted, self.kind())?;
        Ok(None)
    }

    fn cat_cards(&self) -> &[usize] {
        &self.cat_cards
    }

    fn cont_dim(&self) -> usize {
        0
    }
}
