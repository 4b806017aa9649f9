//! Column descriptors
//!
//! Pairs each column name with the semantic type that selects its encoder.

use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Semantic column type used to pick a feature encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColumnType {
    Categorical,
    Datetime,
    Latlong,
    Scalar,
    Text,
    /// No type information was supplied for this column. Encoded with the
    /// categorical encoder, but kept distinct so callers can tell.
    Unknown,
}

impl ColumnType {
    /// Upper-case tag used in feature origin names (`col_0_CATEGORICAL`)
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Categorical => "CATEGORICAL",
            ColumnType::Datetime => "DATETIME",
            ColumnType::Latlong => "LATLONG",
            ColumnType::Scalar => "SCALAR",
            ColumnType::Text => "TEXT",
            ColumnType::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Name/type pair for one column of the source table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }

    pub fn categorical(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Categorical)
    }

    pub fn scalar(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Scalar)
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Text)
    }

    pub fn datetime(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Datetime)
    }

    pub fn latlong(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Latlong)
    }
}

/// Where the descriptors of a dataset came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnSource {
    /// Supplied by the caller
    Declared,
    /// Not supplied; every column is marked [`ColumnType::Unknown`]
    Untyped,
}

/// One `Unknown` descriptor per column of `df`, in frame order
pub fn untyped_columns(df: &DataFrame) -> Vec<ColumnDescriptor> {
    df.get_column_names()
        .into_iter()
        .map(|name| ColumnDescriptor::new(name.to_string(), ColumnType::Unknown))
        .collect()
}
