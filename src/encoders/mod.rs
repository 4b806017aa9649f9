//! Per-column feature encoders
//!
//! Each encoder is fit once on one raw column and then turns that column into
//! categorical index sub-columns, continuous sub-columns, or both:
//! - [`CategoricalOrdinalEnc`] - frequency-ordered ordinal codes
//! - [`ScalarQuantileOrdinalEnc`] / [`ScalarRescaleEnc`] - numeric columns
//! - [`DatetimeOrdinalEnc`] - calendar components
//! - [`LatLongQuantileOrdinalEnc`] - binned coordinates
//! - [`TextSummaryScalarEnc`] - text length statistics
//! - [`NullEnc`] - fallback that produces nothing
//!
//! Categorical codes share a layout: `0` is the mask token written by
//! augmentation, `1` is missing or unseen, real values start at `2`.

mod categorical;
mod datetime;
mod latlong;
mod null;
mod quantile;
mod registry;
mod scalar;
mod text;

pub use categorical::CategoricalOrdinalEnc;
pub use datetime::{parse_datetime, DatetimeOrdinalEnc};
pub use latlong::{parse_latlong, LatLongQuantileOrdinalEnc};
pub use null::NullEnc;
pub use quantile::QuantileBins;
pub use registry::{EncoderKind, FeatureEncoders, FittedColumn};
pub use scalar::{ScalarQuantileOrdinalEnc, ScalarRescaleEnc};
pub use text::{text_summary, TextSummaryScalarEnc, TEXT_SUMMARY_DIM};

use crate::error::{TabError, Result};
use ndarray::Array2;
use polars::prelude::*;
use std::fmt;

/// Code written over masked categorical inputs
pub const MASK_INDEX: i64 = 0;
/// Code for missing values and values not seen during fit
pub const MISSING_INDEX: i64 = 1;
/// First code assigned to a real value
pub const FIRST_VALUE_INDEX: i64 = 2;
/// Codes reserved below [`FIRST_VALUE_INDEX`], included in every cardinality
pub const RESERVED_CODES: usize = 2;

/// Stateful transform from one raw column to encoded sub-columns
pub trait FeatureEncoder: fmt::Debug + Send + Sync {
    /// Registry entry this encoder was built from
    fn kind(&self) -> EncoderKind;

    /// Learn encoder state from a column.
    ///
    /// Returns [`TabError::WontEncode`] when the column's values cannot be
    /// represented by this encoder, and [`TabError::AlreadyFitted`] when called
    /// a second time.
    fn fit(&mut self, column: &Series) -> Result<()>;

    fn is_fitted(&self) -> bool;

    /// Categorical sub-columns, one row per input value, or `None` when this
    /// encoder has no categorical output
    fn enc_cat(&self, column: &Series) -> Result<Option<Array2<i64>>>;

    /// Continuous sub-columns, or `None` when this encoder has no continuous output
    fn enc_cont(&self, column: &Series) -> Result<Option<Array2<f32>>>;

    /// Cardinality of each categorical sub-column
    fn cat_cards(&self) -> &[usize];

    /// Number of continuous sub-columns
    fn cont_dim(&self) -> usize;
}

pub(crate) fn ensure_unfitted(fitted: bool, kind: EncoderKind) -> Result<()> {
    if fitted {
        return Err(TabError::AlreadyFitted(kind.name().to_string()));
    }
    Ok(())
}

pub(crate) fn ensure_fitted(fitted: bool, kind: EncoderKind) -> Result<()> {
    if !fitted {
        return Err(TabError::NotFitted(kind.name().to_string()));
    }
    Ok(())
}

/// Column values rendered as strings; nulls and float NaN become `None`
pub(crate) fn string_values(column: &Series) -> Result<Vec<Option<String>>> {
    let nan: Vec<bool> = if column.dtype().is_float() {
        let as_f64 = column.cast(&DataType::Float64)?;
        as_f64.f64()?.into_iter().map(|v| v.is_some_and(f64::is_nan)).collect()
    } else {
        vec![false; column.len()]
    };
    let as_str = column.cast(&DataType::String)?;
    let values = as_str
        .str()?
        .into_iter()
        .zip(nan)
        .map(|(v, is_nan)| if is_nan { None } else { v.map(|s| s.to_string()) })
        .collect();
    Ok(values)
}

/// Distinct non-missing values; NaN counts as missing
pub(crate) fn n_distinct(column: &Series) -> Result<usize> {
    let present = column.drop_nulls();
    if present.dtype().is_float() {
        let not_nan = present.is_not_nan()?;
        return Ok(present.filter(&not_nan)?.n_unique()?);
    }
    Ok(present.n_unique()?)
}

/// Column values as finite floats; nulls, unparseable and non-finite values become `None`
pub(crate) fn float_values(column: &Series) -> Result<Vec<Option<f64>>> {
    let as_f64 = column.cast(&DataType::Float64)?;
    let values = as_f64
        .f64()?
        .into_iter()
        .map(|v| v.filter(|x| x.is_finite()))
        .collect();
    Ok(values)
}

/// Stack per-sub-column code vectors into an `(n_rows, n_sub)` block
pub(crate) fn stack_codes(n_rows: usize, sub_columns: &[Vec<i64>]) -> Array2<i64> {
    Array2::from_shape_fn((n_rows, sub_columns.len()), |(r, c)| sub_columns[c][r])
}

/// Stack per-sub-column float vectors into an `(n_rows, n_sub)` block
pub(crate) fn stack_floats(n_rows: usize, sub_columns: &[Vec<f32>]) -> Array2<f32> {
    Array2::from_shape_fn((n_rows, sub_columns.len()), |(r, c)| sub_columns[c][r])
}

/// Mean and standard deviation used for z-scoring; `None` for degenerate input
pub(crate) fn mean_std(values: &[f64]) -> Option<(f64, f64)> {
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let std = var.sqrt();
    if std < 1e-12 {
        return None;
    }
    Some((mean, std))
}
