//! Encoder registry
//!
//! Encoder names from configuration resolve to an [`EncoderKind`] when the
//! configuration is deserialised, so an unknown name is rejected up front.

use super::{
    CategoricalOrdinalEnc, DatetimeOrdinalEnc, FeatureEncoder, LatLongQuantileOrdinalEnc,
    NullEnc, ScalarQuantileOrdinalEnc, ScalarRescaleEnc, TextSummaryScalarEnc,
};
use crate::columns::ColumnType;
use crate::error::{TabError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Every encoder that can be named in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EncoderKind {
    #[serde(rename = "CategoricalOrdinalEnc")]
    CategoricalOrdinal,
    #[serde(rename = "DatetimeOrdinalEnc")]
    DatetimeOrdinal,
    #[serde(rename = "LatLongQuantileOrdinalEnc")]
    LatLongQuantileOrdinal,
    #[serde(rename = "ScalarQuantileOrdinalEnc")]
    ScalarQuantileOrdinal,
    #[serde(rename = "ScalarRescaleEnc")]
    ScalarRescale,
    #[serde(rename = "TextSummaryScalarEnc")]
    TextSummaryScalar,
    #[serde(rename = "NullEnc")]
    Null,
}

impl EncoderKind {
    pub const ALL: [EncoderKind; 7] = [
        EncoderKind::CategoricalOrdinal,
        EncoderKind::DatetimeOrdinal,
        EncoderKind::LatLongQuantileOrdinal,
        EncoderKind::ScalarQuantileOrdinal,
        EncoderKind::ScalarRescale,
        EncoderKind::TextSummaryScalar,
        EncoderKind::Null,
    ];

    /// Configuration name of this encoder
    pub fn name(&self) -> &'static str {
        match self {
            EncoderKind::CategoricalOrdinal => "CategoricalOrdinalEnc",
            EncoderKind::DatetimeOrdinal => "DatetimeOrdinalEnc",
            EncoderKind::LatLongQuantileOrdinal => "LatLongQuantileOrdinalEnc",
            EncoderKind::ScalarQuantileOrdinal => "ScalarQuantileOrdinalEnc",
            EncoderKind::ScalarRescale => "ScalarRescaleEnc",
            EncoderKind::TextSummaryScalar => "TextSummaryScalarEnc",
            EncoderKind::Null => "NullEnc",
        }
    }

    /// Fresh, unfitted encoder of this kind
    pub fn build(&self) -> Box<dyn FeatureEncoder> {
        match self {
            EncoderKind::CategoricalOrdinal => Box::new(CategoricalOrdinalEnc::new()),
            EncoderKind::DatetimeOrdinal => Box::new(DatetimeOrdinalEnc::new()),
            EncoderKind::LatLongQuantileOrdinal => Box::new(LatLongQuantileOrdinalEnc::new()),
            EncoderKind::ScalarQuantileOrdinal => Box::new(ScalarQuantileOrdinalEnc::new()),
            EncoderKind::ScalarRescale => Box::new(ScalarRescaleEnc::new()),
            EncoderKind::TextSummaryScalar => Box::new(TextSummaryScalarEnc::new()),
            EncoderKind::Null => Box::new(NullEnc),
        }
    }
}

impl fmt::Display for EncoderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EncoderKind {
    type Err = TabError;

    fn from_str(s: &str) -> Result<Self> {
        EncoderKind::ALL
            .iter()
            .copied()
            .find(|k| k.name() == s)
            .ok_or_else(|| TabError::ConfigError(format!("unknown encoder '{}'", s)))
    }
}

/// A fitted encoder together with the type the column was encoded as
#[derive(Debug)]
pub struct FittedColumn {
    pub encoder: Box<dyn FeatureEncoder>,
    /// Type after redirections (e.g. a low-cardinality SCALAR becomes CATEGORICAL)
    pub encoded_as: ColumnType,
}

/// Fitted encoders keyed by column name.
///
/// Cheap to clone; a training dataset's encoders are shared with its
/// validation dataset.
#[derive(Debug, Clone, Default)]
pub struct FeatureEncoders {
    columns: Arc<HashMap<String, FittedColumn>>,
}

impl FeatureEncoders {
    pub fn new(columns: HashMap<String, FittedColumn>) -> Self {
        Self {
            columns: Arc::new(columns),
        }
    }

    pub fn get(&self, column: &str) -> Option<&FittedColumn> {
        self.columns.get(column)
    }

    pub fn encoder(&self, column: &str) -> Result<&dyn FeatureEncoder> {
        self.get(column)
            .map(|c| c.encoder.as_ref())
            .ok_or_else(|| TabError::FeatureNotFound(column.to_string()))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Names of columns whose encoder fell back to [`NullEnc`]
    pub fn null_encoded(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .columns
            .iter()
            .filter(|(_, c)| c.encoder.kind() == EncoderKind::Null)
            .map(|(name, _)| name.as_str())
            .collect();
        names.sort_unstable();
        names
    }
}
