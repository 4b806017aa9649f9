//! Ordinal encoding for categorical columns

use super::{
    ensure_fitted, ensure_unfitted, stack_codes, string_values, EncoderKind, FeatureEncoder,
    FIRST_VALUE_INDEX, MISSING_INDEX, RESERVED_CODES,
};
use crate::error::{TabError, Result};
use ndarray::Array2;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Maps each distinct value to a code ordered by descending frequency.
///
/// Ties are broken lexically so that fitting is deterministic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CategoricalOrdinalEnc {
    codes: HashMap<String, i64>,
    cat_cards: Vec<usize>,
    is_fitted: bool,
}

impl CategoricalOrdinalEnc {
    pub fn new() -> Self {
        Self::default()
    }

    /// Code assigned to `value`, [`MISSING_INDEX`] if it was not seen during fit
    pub fn code_of(&self, value: &str) -> i64 {
        self.codes.get(value).copied().unwrap_or(MISSING_INDEX)
    }

    /// Number of distinct values learned during fit
    pub fn n_values(&self) -> usize {
        self.codes.len()
    }
}

impl FeatureEncoder for CategoricalOrdinalEnc {
    fn kind(&self) -> EncoderKind {
        EncoderKind::CategoricalOrdinal
    }

    fn fit(&mut self, column: &Series) -> Result<()> {
        ensure_unfitted(self.is_fitted, self.kind())?;

        let values = string_values(column)?;
        let n_missing = values.iter().filter(|v| v.is_none()).count();

        let mut counts: HashMap<String, usize> = HashMap::new();
        for v in values.into_iter().flatten() {
            *counts.entry(v).or_insert(0) += 1;
        }

        if counts.is_empty() {
            return Err(TabError::WontEncode("column has no values".to_string()));
        }
        if counts.len() == 1 && n_missing == 0 {
            return Err(TabError::WontEncode("column is constant".to_string()));
        }

        let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
        ranked.sort_by(|(va, ca), (vb, cb)| cb.cmp(ca).then_with(|| va.cmp(vb)));

        self.codes = ranked
            .into_iter()
            .enumerate()
            .map(|(i, (value, _))| (value, FIRST_VALUE_INDEX + i as i64))
            .collect();
        self.cat_cards = vec![self.codes.len() + RESERVED_CODES];
        self.is_fitted = true;
        Ok(())
    }

    fn is_fitted(&self) -> bool {
        self.is_fitted
    }

    fn enc_cat(&self, column: &Series) -> Result<Option<Array2<i64>>> {
        ensure_fitted(self.is_fitted, self.kind())?;
        let codes: Vec<i64> = string_values(column)?
            .iter()
            .map(|v| v.as_deref().map_or(MISSING_INDEX, |s| self.code_of(s)))
            .collect();
        Ok(Some(stack_codes(codes.len(), &[codes])))
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frequency_order() {
        let s = Series::new("c".into(), &["b", "a", "b", "c", "b", "a"]);
        let mut enc = CategoricalOrdinalEnc::new();
        enc.fit(&s).unwrap();

        assert_eq!(enc.code_of("b"), 2);
        assert_eq!(enc.code_of("a"), 3);
        assert_eq!(enc.code_of("c"), 4);
        assert_eq!(enc.cat_cards(), &[5]);
    }

    #[test]
    fn test_unseen_and_missing_map_to_missing_code() {
        let train = Series::new("c".into(), &["x", "y", "x"]);
        let mut enc = CategoricalOrdinalEnc::new();
        enc.fit(&train).unwrap();

        let test = Series::new("c".into(), &[Some("x"), None, Some("z")]);
        let block = enc.enc_cat(&test).unwrap().unwrap();
        assert_eq!(block.shape(), &[3, 1]);
        assert_eq!(block[[0, 0]], 2);
        assert_eq!(block[[1, 0]], MISSING_INDEX);
        assert_eq!(block[[2, 0]], MISSING_INDEX);
        assert!(enc.enc_cont(&test).unwrap().is_none());
    }

    #[test]
    fn test_constant_column_wont_encode() {
        let s = Series::new("c".into(), &["k", "k", "k"]);
        let mut enc = CategoricalOrdinalEnc::new();
        let err = enc.fit(&s).unwrap_err();
        assert!(err.is_wont_encode());
        assert!(!enc.is_fitted());
    }

    #[test]
    fn test_constant_with_missing_is_encodable() {
        let s = Series::new("c".into(), &[Some("k"), None, Some("k")]);
        let mut enc = CategoricalOrdinalEnc::new();
        enc.fit(&s).unwrap();
        assert_eq!(enc.cat_cards(), &[3]);
    }

    #[test]
    fn test_numeric_column_is_encoded_by_value() {
        let s = Series::new("n".into(), &[1i64, 2, 2, 3]);
        let mut enc = CategoricalOrdinalEnc::new();
        enc.fit(&s).unwrap();
        assert_eq!(enc.n_values(), 3);
        let block = enc.enc_cat(&s).unwrap().unwrap();
        assert_eq!(block[[1, 0]], 2);
    }

    #[test]
    fn test_fit_twice_rejected() {
        let s = Series::new("c".into(), &["a", "b"]);
        let mut enc = CategoricalOrdinalEnc::new();
        enc.fit(&s).unwrap();
        assert!(matches!(enc.fit(&s), Err(TabError::AlreadyFitted(_))));
    }

    #[test]
    fn test_encode_before_fit_rejected() {
        let s = Series::new("c".into(), &["a", "b"]);
        let enc = CategoricalOrdinalEnc::new();
        assert!(matches!(enc.enc_cat(&s), Err(TabError::NotFitted(_))));
    }
}
