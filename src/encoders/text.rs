//! Summary statistics for free-text columns

use super::{
    ensure_fitted, ensure_unfitted, stack_floats, string_values, EncoderKind, FeatureEncoder,
};
use crate::error::{TabError, Result};
use ndarray::Array2;
use polars::prelude::*;
use serde::{Deserialize, Serialize};

/// Number of summary statistics emitted per text value
pub const TEXT_SUMMARY_DIM: usize = 4;

/// `[log1p(chars), log1p(words), digit ratio, uppercase ratio]` for one string
pub fn text_summary(text: &str) -> [f64; TEXT_SUMMARY_DIM] {
    let n_chars = text.chars().count();
    let n_words = text.split_whitespace().count();
    let (digits, upper) = text.chars().fold((0usize, 0usize), |(d, u), c| {
        (d + c.is_ascii_digit() as usize, u + c.is_uppercase() as usize)
    });
    let denom = n_chars.max(1) as f64;
    [
        (n_chars as f64).ln_1p(),
        (n_words as f64).ln_1p(),
        digits as f64 / denom,
        upper as f64 / denom,
    ]
}

/// Turns text into standardised length and composition statistics.
///
/// Statistics with no spread in the fit data are emitted as zeros.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TextSummaryScalarEnc {
    stats: Option<Vec<(f64, f64)>>,
}

impl TextSummaryScalarEnc {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FeatureEncoder for TextSummaryScalarEnc {
    fn kind(&self) -> EncoderKind {
        EncoderKind::TextSummaryScalar
    }

    fn fit(&mut self, column: &Series) -> Result<()> {
        ensure_unfitted(self.stats.is_some(), self.kind())?;
        let summaries: Vec<[f64; TEXT_SUMMARY_DIM]> = string_values(column)?
            .iter()
            .flatten()
            .map(|s| text_summary(s))
            .collect();
        if summaries.is_empty() {
            return Err(TabError::WontEncode("column has no text".to_string()));
        }

        let n = summaries.len() as f64;
        let stats: Vec<(f64, f64)> = (0..TEXT_SUMMARY_DIM)
            .map(|d| {
                let mean = summaries.iter().map(|s| s[d]).sum::<f64>() / n;
                let var = summaries.iter().map(|s| (s[d] - mean).powi(2)).sum::<f64>() / n;
                (mean, var.sqrt())
            })
            .collect();
        if stats.iter().all(|&(_, std)| std < 1e-12) {
            return Err(TabError::WontEncode("text summaries are constant".to_string()));
        }

        self.stats = Some(stats);
        Ok(())
    }

    fn is_fitted(&self) -> bool {
        self.stats.is_some()
    }

    fn enc_cat(&self, _column: &Series) -> Result<Option<Array2<i64>>> {
        ensure_fitted(self.is_fitted(), self.kind())?;
        Ok(None)
    }

    fn enc_cont(&self, column: &Series) -> Result<Option<Array2<f32>>> {
        let stats = self
            .stats
            .as_ref()
            .ok_or_else(|| TabError::NotFitted(self.kind().name().to_string()))?;
        let values = string_values(column)?;

        let sub_columns: Vec<Vec<f32>> = stats
            .iter()
            .enumerate()
            .map(|(d, &(mean, std))| {
                values
                    .iter()
                    .map(|v| match v {
                        Some(s) if std >= 1e-12 => ((text_summary(s)[d] - mean) / std) as f32,
                        _ => 0.0,
                    })
                    .collect()
            })
            .collect();
        Ok(Some(stack_floats(values.len(), &sub_columns)))
    }

    fn cat_cards(&self) -> &[usize] {
        &[]
    }

    fn cont_dim(&self) -> usize {
        TEXT_SUMMARY_DIM
    }
}
