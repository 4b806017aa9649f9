//! Encoders for numeric columns

use super::quantile::{QuantileBins, DEFAULT_NUM_BINS};
use super::{
    ensure_fitted, ensure_unfitted, float_values, mean_std, stack_codes, stack_floats,
    EncoderKind, FeatureEncoder, FIRST_VALUE_INDEX, MISSING_INDEX, RESERVED_CODES,
};
use crate::error::{TabError, Result};
use ndarray::Array2;
use polars::prelude::*;
use serde::{Deserialize, Serialize};

/// Replaces each number with the index of its quantile bin
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalarQuantileOrdinalEnc {
    max_bins: usize,
    bins: Option<QuantileBins>,
    cat_cards: Vec<usize>,
}

impl Default for ScalarQuantileOrdinalEnc {
    fn default() -> Self {
        Self::new()
    }
}

impl ScalarQuantileOrdinalEnc {
    pub fn new() -> Self {
        Self::with_max_bins(DEFAULT_NUM_BINS)
    }

    pub fn with_max_bins(max_bins: usize) -> Self {
        Self {
            max_bins,
            bins: None,
            cat_cards: Vec::new(),
        }
    }

    pub fn bins(&self) -> Option<&QuantileBins> {
        self.bins.as_ref()
    }
}

impl FeatureEncoder for ScalarQuantileOrdinalEnc {
    fn kind(&self) -> EncoderKind {
        EncoderKind::ScalarQuantileOrdinal
    }

    fn fit(&mut self, column: &Series) -> Result<()> {
        ensure_unfitted(self.bins.is_some(), self.kind())?;
        let values: Vec<f64> = float_values(column)?.into_iter().flatten().collect();
        let bins = QuantileBins::fit(&values, self.max_bins)?;
        self.cat_cards = vec![bins.n_bins() + RESERVED_CODES];
        self.bins = Some(bins);
        Ok(())
    }

    fn is_fitted(&self) -> bool {
        self.bins.is_some()
    }

    fn enc_cat(&self, column: &Series) -> Result<Option<Array2<i64>>> {
        let bins = self
            .bins
            .as_ref()
            .ok_or_else(|| TabError::NotFitted(self.kind().name().to_string()))?;
        let codes: Vec<i64> = float_values(column)?
            .into_iter()
            .map(|v| v.map_or(MISSING_INDEX, |x| FIRST_VALUE_INDEX + bins.bin_of(x) as i64))
            .collect();
        Ok(Some(stack_codes(codes.len(), &[codes])))
    }

    fn enc_cont(&self, _column: &Series) -> Result<Option<Array2<f32>>> {
        ensure_fitted(self.is_fitted(), self.kind())?;
        Ok(None)
    }

    fn cat_cards(&self) -> &[usize] {
        &self.cat_cards
    }

    fn cont_dim(&self) -> usize {
        0
    }
}

/// Standardises a number to zero mean and unit variance
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScalarRescaleEnc {
    stats: Option<(f64, f64)>,
}

impl ScalarRescaleEnc {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FeatureEncoder for ScalarRescaleEnc {
    fn kind(&self) -> EncoderKind {
        EncoderKind::ScalarRescale
    }

    fn fit(&mut self, column: &Series) -> Result<()> {
        ensure_unfitted(self.stats.is_some(), self.kind())?;
        let values: Vec<f64> = float_values(column)?.into_iter().flatten().collect();
        let stats = mean_std(&values)
            .ok_or_else(|| TabError::WontEncode("column has no numeric variance".to_string()))?;
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
        let (mean, std) = self
            .stats
            .ok_or_else(|| TabError::NotFitted(self.kind().name().to_string()))?;
        let scaled: Vec<f32> = float_values(column)?
            .into_iter()
            .map(|v| v.map_or(0.0, |x| ((x - mean) / std) as f32))
            .collect();
        Ok(Some(stack_floats(scaled.len(), &[scaled])))
    }

    fn cat_cards(&self) -> &[usize] {
        &[]
    }

    fn cont_dim(&self) -> usize {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wide_column(n: usize) -> Series {
        let values: Vec<f64> = (0..n).map(|i| i as f64 * 0.5).collect();
        Series::new("x".into(), values)
    }

    #[test]
    fn test_quantile_ordinal_codes_in_range() {
        let s = wide_column(200);
        let mut enc = ScalarQuantileOrdinalEnc::new();
        enc.fit(&s).unwrap();

        let card = enc.cat_cards()[0] as i64;
        assert_eq!(card, DEFAULT_NUM_BINS as i64 + 2);
        let block = enc.enc_cat(&s).unwrap().unwrap();
        assert_eq!(block.nrows(), 200);
        assert!(block.iter().all(|&c| c >= FIRST_VALUE_INDEX && c < card));
        assert!(enc.enc_cont(&s).unwrap().is_none());
    }

    #[test]
    fn test_quantile_ordinal_missing() {
        let mut enc = ScalarQuantileOrdinalEnc::with_max_bins(4);
        enc.fit(&wide_column(50)).unwrap();
        let s = Series::new("x".into(), &[Some(1.0), None, Some(f64::NAN)]);
        let block = enc.enc_cat(&s).unwrap().unwrap();
        assert_eq!(block[[1, 0]], MISSING_INDEX);
        assert_eq!(block[[2, 0]], MISSING_INDEX);
    }

    #[test]
    fn test_quantile_ordinal_constant_wont_encode() {
        let s = Series::new("x".into(), &[2.0, 2.0, 2.0]);
        let mut enc = ScalarQuantileOrdinalEnc::new();
        assert!(enc.fit(&s).unwrap_err().is_wont_encode());
    }

    #[test]
    fn test_rescale_standardises() {
        let s = Series::new("x".into(), &[1.0, 2.0, 3.0]);
        let mut enc = ScalarRescaleEnc::new();
        enc.fit(&s).unwrap();
        let block = enc.enc_cont(&s).unwrap().unwrap();
        assert_eq!(block.shape(), &[3, 1]);
        assert!(block[[1, 0]].abs() < 1e-6);
        assert!(block[[0, 0]] < 0.0 && block[[2, 0]] > 0.0);
        assert!(enc.enc_cat(&s).unwrap().is_none());
        assert_eq!(enc.cont_dim(), 1);
    }
}
