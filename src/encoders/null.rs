//! Fallback encoder for columns that cannot be encoded

use super::{EncoderKind, FeatureEncoder};
use crate::error::Result;
use ndarray::Array2;
use polars::prelude::*;
use serde::{Deserialize, Serialize};

/// Contributes no categorical and no continuous output
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct NullEnc;

impl FeatureEncoder for NullEnc {
    fn kind(&self) -> EncoderKind {
        EncoderKind::Null
    }

    fn fit(&mut self, _column: &Series) -> Result<()> {
        Ok(())
    }

    fn is_fitted(&self) -> bool {
        true
    }

    fn enc_cat(&self, _column: &Series) -> Result<Option<Array2<i64>>> {
        Ok(None)
    }

    fn enc_cont(&self, _column: &Series) -> Result<Option<Array2<f32>>> {
        Ok(None)
    }

    fn cat_cards(&self) -> &[usize] {
        &[]
    }

    fn cont_dim(&self) -> usize {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_encoder_produces_nothing() {
        let s = Series::new("x".into(), &[1.0, 2.0]);
        let mut enc = NullEnc;
        enc.fit(&s).unwrap();
        assert!(enc.enc_cat(&s).unwrap().is_none());
        assert!(enc.enc_cont(&s).unwrap().is_none());
        assert_eq!(enc.cont_dim(), 0);
        assert!(enc.cat_cards().is_empty());
    }
}
