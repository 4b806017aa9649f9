//! Quantile-binned latitude/longitude encoding

use super::quantile::{QuantileBins, DEFAULT_NUM_BINS};
use super::{
    ensure_fitted, ensure_unfitted, stack_codes, string_values, EncoderKind, FeatureEncoder, FIRST_VALUE_INDEX,
    MISSING_INDEX, RESERVED_CODES,
};
use crate::error::{TabError, Result};
use ndarray::Array2;
use polars::prelude::*;
use serde::{Deserialize, Serialize};

/// Parse `"lat,lon"`, `"(lat, lon)"` or `"lat lon"` into a coordinate pair
pub fn parse_latlong(raw: &str) -> Option<(f64, f64)> {
    let trimmed = raw
        .trim()
        .trim_start_matches(['(', '['])
        .trim_end_matches([')', ']']);
    let mut parts = trimmed
        .split(|c: char| c == ',' || c == ';' || c.is_whitespace())
        .filter(|p| !p.is_empty());
    let lat: f64 = parts.next()?.parse().ok()?;
    let lon: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return None;
    }
    Some((lat, lon))
}

/// Bins latitude and longitude independently into two categorical sub-columns
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatLongQuantileOrdinalEnc {
    max_bins: usize,
    bins: Option<(QuantileBins, QuantileBins)>,
    cat_cards: Vec<usize>,
}

impl Default for LatLongQuantileOrdinalEnc {
    fn default() -> Self {
        Self::new()
    }
}

impl LatLongQuantileOrdinalEnc {
    pub fn new() -> Self {
        Self {
            max_bins: DEFAULT_NUM_BINS,
            bins: None,
            cat_cards: Vec::new(),
        }
    }

    pub fn with_max_bins(mut self, max_bins: usize) -> Self {
        self.max_bins = max_bins;
        self
    }
}

impl FeatureEncoder for LatLongQuantileOrdinalEnc {
    fn kind(&self) -> EncoderKind {
        EncoderKind::LatLongQuantileOrdinal
    }

    fn fit(&mut self, column: &Series) -> Result<()> {
        ensure_unfitted(self.bins.is_some(), self.kind())?;
        let coords: Vec<(f64, f64)> = string_values(column)?
            .iter()
            .filter_map(|v| v.as_deref().and_then(parse_latlong))
            .collect();
        if coords.is_empty() {
            return Err(TabError::WontEncode("no parseable coordinates".to_string()));
        }
        let lats: Vec<f64> = coords.iter().map(|c| c.0).collect();
        let lons: Vec<f64> = coords.iter().map(|c| c.1).collect();
        let lat_bins = QuantileBins::fit(&lats, self.max_bins)?;
        let lon_bins = QuantileBins::fit(&lons, self.max_bins)?;

        self.cat_cards = vec![
            lat_bins.n_bins() + RESERVED_CODES,
            lon_bins.n_bins() + RESERVED_CODES,
        ];
        self.bins = Some((lat_bins, lon_bins));
        Ok(())
    }

    fn is_fitted(&self) -> bool {
        self.bins.is_some()
    }

    fn enc_cat(&self, column: &Series) -> Result<Option<Array2<i64>>> {
        let (lat_bins, lon_bins) = self
            .bins
            .as_ref()
            .ok_or_else(|| TabError::NotFitted(self.kind().name().to_string()))?;
        let coords: Vec<Option<(f64, f64)>> = string_values(column)?
            .iter()
            .map(|v| v.as_deref().and_then(parse_latlong))
            .collect();

        let lat_codes = coords
            .iter()
            .map(|c| c.map_or(MISSING_INDEX, |(lat, _)| FIRST_VALUE_INDEX + lat_bins.bin_of(lat) as i64))
            .collect();
        let lon_codes = coords
            .iter()
            .map(|c| c.map_or(MISSING_INDEX, |(_, lon)| FIRST_VALUE_INDEX + lon_bins.bin_of(lon) as i64))
            .collect();
        Ok(Some(stack_codes(coords.len(), &[lat_codes, lon_codes])))
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_variants() {
        assert_eq!(parse_latlong("40.7,-74.0"), Some((40.7, -74.0)));
        assert_eq!(parse_latlong("(40.7, -74.0)"), Some((40.7, -74.0)));
        assert_eq!(parse_latlong("40.7 -74.0"), Some((40.7, -74.0)));
        assert_eq!(parse_latlong("100.0,0.0"), None);
        assert_eq!(parse_latlong("1,2,3"), None);
        assert_eq!(parse_latlong("north"), None);
    }

    #[test]
    fn test_two_sub_columns() {
        let s = Series::new(
            "loc".into(),
            &["10.0,20.0", "11.0,21.0", "12.0,22.0", "13.0,23.0", "bad"],
        );
        let mut enc = LatLongQuantileOrdinalEnc::new().with_max_bins(2);
        enc.fit(&s).unwrap();
        assert_eq!(enc.cat_cards().len(), 2);

        let block = enc.enc_cat(&s).unwrap().unwrap();
        assert_eq!(block.shape(), &[5, 2]);
        assert_eq!(block[[0, 0]], FIRST_VALUE_INDEX);
        assert_eq!(block[[3, 1]], FIRST_VALUE_INDEX + 1);
        assert_eq!(block.row(4).to_vec(), vec![MISSING_INDEX, MISSING_INDEX]);
        assert!(matches!(enc.fit(&s), Err(TabError::AlreadyFitted(_))));
    }

    #[test]
    fn test_single_location_wont_encode() {
        let s = Series::new("loc".into(), &["1.0,2.0", "1.0,2.0"]);
        let mut enc = LatLongQuantileOrdinalEnc::new();
        assert!(enc.fit(&s).unwrap_err().is_wont_encode());
    }
}
