//! Equal-frequency binning shared by the numeric encoders

use crate::error::{TabError, Result};
use serde::{Deserialize, Serialize};

/// Default upper bound on the number of quantile bins
pub const DEFAULT_NUM_BINS: usize = 16;

/// Quantile bin edges learned from a sample of values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantileBins {
    edges: Vec<f64>,
}

impl QuantileBins {
    /// Fit at most `max_bins` equal-frequency bins.
    ///
    /// Duplicate edges collapse, so heavily repeated values yield fewer bins.
    /// Fails with [`TabError::WontEncode`] when fewer than two distinct values exist.
    pub fn fit(values: &[f64], max_bins: usize) -> Result<Self> {
        if max_bins < 1 {
            return Err(TabError::invalid_parameter("max_bins", max_bins, "must be at least 1"));
        }
        let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        if sorted.is_empty() {
            return Err(TabError::WontEncode("column has no numeric values".to_string()));
        }
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let min_val = sorted[0];
        let max_val = sorted[sorted.len() - 1];
        if min_val == max_val {
            return Err(TabError::WontEncode("column is constant".to_string()));
        }

        let mut edges = Vec::with_capacity(max_bins + 1);
        edges.push(min_val);
        for i in 1..max_bins {
            let q = i as f64 / max_bins as f64;
            let idx = (q * (sorted.len() - 1) as f64) as usize;
            edges.push(sorted[idx]);
        }
        edges.push(max_val);
        edges.dedup();

        Ok(Self { edges })
    }

    pub fn n_bins(&self) -> usize {
        self.edges.len() - 1
    }

    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    /// Bin containing `value`; values outside the fitted range clamp to the
    /// first or last bin
    pub fn bin_of(&self, value: f64) -> usize {
        let last = self.n_bins() - 1;
        if value <= self.edges[0] {
            return 0;
        }
        // Interior edges split bins; a value equal to an edge belongs to the upper bin
        let upper = self.edges[1..self.edges.len() - 1].partition_point(|&e| e <= value);
        upper.min(last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantile_bins_balanced() {
        let values: Vec<f64> = (1..=100).map(|v| v as f64).collect();
        let bins = QuantileBins::fit(&values, 4).unwrap();
        assert_eq!(bins.n_bins(), 4);

        let mut counts = [0usize; 4];
        for v in &values {
            counts[bins.bin_of(*v)] += 1;
        }
        assert!(counts.iter().all(|&c| c >= 20), "{:?}", counts);
    }

    #[test]
    fn test_duplicate_edges_collapse() {
        let mut values = vec![0.0; 90];
        values.extend((1..=10).map(|v| v as f64));
        let bins = QuantileBins::fit(&values, 10).unwrap();
        assert!(bins.n_bins() < 10);
        assert_eq!(bins.bin_of(0.0), 0);
    }

    #[test]
    fn test_out_of_range_clamps() {
        let bins = QuantileBins::fit(&[1.0, 2.0, 3.0, 4.0], 2).unwrap();
        assert_eq!(bins.bin_of(-100.0), 0);
        assert_eq!(bins.bin_of(100.0), bins.n_bins() - 1);
    }

    #[test]
    fn test_constant_wont_encode() {
        let err = QuantileBins::fit(&[5.0, 5.0, 5.0], 4).unwrap_err();
        assert!(err.is_wont_encode());
    }

    #[test]
    fn test_tightly_spaced_values_are_not_constant() {
        let values: Vec<f64> = (0..40).map(|i| i as f64 * 1e-18).collect();
        let bins = QuantileBins::fit(&values, 4).unwrap();
        assert_eq!(bins.n_bins(), 4);
        assert_eq!(bins.bin_of(0.0), 0);
        assert_eq!(bins.bin_of(39e-18), 3);
    }
}
