//! Label arrays

use crate::config::ProblemType;
use crate::error::{TabError, Result};
use ndarray::{Array1, Axis};
use polars::prelude::*;

/// A single label
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TargetValue {
    Regression(f32),
    Class(i64),
}

/// Label array aligned with dataset rows
#[derive(Debug, Clone, PartialEq)]
pub enum Targets {
    /// Float targets for regression
    Regression(Array1<f32>),
    /// Integer class ids for binary and multiclass problems
    Classes(Array1<i64>),
}

impl Targets {
    /// Convert a label series according to the problem type.
    ///
    /// Missing labels are rejected.
    pub fn from_series(labels: &Series, problem_type: ProblemType) -> Result<Self> {
        if labels.null_count() > 0 {
            return Err(TabError::DataError(format!(
                "label column '{}' has {} missing values",
                labels.name(),
                labels.null_count()
            )));
        }
        match problem_type {
            ProblemType::Regression => {
                let cast = labels.cast(&DataType::Float64)?;
                let values: Option<Vec<f32>> =
                    cast.f64()?.into_iter().map(|v| v.map(|x| x as f32)).collect();
                values
                    .map(|v| Targets::Regression(Array1::from(v)))
                    .ok_or_else(|| TabError::DataError("labels are not numeric".to_string()))
            }
            ProblemType::Binary | ProblemType::Multiclass => {
                let cast = labels.cast(&DataType::Int64)?;
                let values: Option<Vec<i64>> = cast.i64()?.into_iter().collect();
                let values = values
                    .ok_or_else(|| TabError::DataError("labels are not class ids".to_string()))?;
                if values.iter().any(|&v| v < 0) {
                    return Err(TabError::DataError("class ids must be non-negative".to_string()));
                }
                Ok(Targets::Classes(Array1::from(values)))
            }
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Targets::Regression(t) => t.len(),
            Targets::Classes(t) => t.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, idx: usize) -> Option<TargetValue> {
        match self {
            Targets::Regression(t) => t.get(idx).map(|&v| TargetValue::Regression(v)),
            Targets::Classes(t) => t.get(idx).map(|&v| TargetValue::Class(v)),
        }
    }

    /// Rows at `indices`, in order
    pub fn select(&self, indices: &[usize]) -> Self {
        match self {
            Targets::Regression(t) => Targets::Regression(t.select(Axis(0), indices)),
            Targets::Classes(t) => Targets::Classes(t.select(Axis(0), indices)),
        }
    }

    /// The whole array concatenated `times` times
    pub fn repeat(&self, times: usize) -> Self {
        fn tile<T: Clone>(t: &Array1<T>, times: usize) -> Array1<T> {
            t.iter().cycle().take(t.len() * times).cloned().collect()
        }
        match self {
            Targets::Regression(t) => Targets::Regression(tile(t, times)),
            Targets::Classes(t) => Targets::Classes(tile(t, times)),
        }
    }

    /// Largest class id plus one; `None` for regression
    pub fn n_classes_seen(&self) -> Option<usize> {
        match self {
            Targets::Regression(_) => None,
            Targets::Classes(t) => Some(t.iter().copied().max().map_or(0, |m| m as usize + 1)),
        }
    }
}
