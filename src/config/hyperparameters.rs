//! Hyperparameter defaults per problem type

use crate::columns::ColumnType;
use crate::encoders::EncoderKind;
use crate::error::{TabError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// SCALAR columns with fewer distinct values are encoded as CATEGORICAL
pub const MIN_SCALAR_UNIQUE: usize = 32;

/// Kind of supervised target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProblemType {
    Regression,
    Binary,
    Multiclass,
}

impl ProblemType {
    pub fn is_classification(&self) -> bool {
        !matches!(self, ProblemType::Regression)
    }
}

impl std::str::FromStr for ProblemType {
    type Err = TabError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "regression" => Ok(ProblemType::Regression),
            "binary" => Ok(ProblemType::Binary),
            "multiclass" => Ok(ProblemType::Multiclass),
            other => Err(TabError::ConfigError(format!("unknown problem type '{}'", other))),
        }
    }
}

/// Self-supervised objective used during pretraining
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PretextKind {
    /// Replaced-token detection over categorical positions
    #[serde(rename = "BERT_pretext")]
    Bert,
    /// Plain supervised loss on the labels
    #[serde(rename = "SUPERVISED_pretext")]
    Supervised,
}

/// Model-shape and optimiser settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TabKwargs {
    pub n_cont_embeddings: usize,
    pub n_layers: usize,
    pub n_heads: usize,
    pub hidden_dim: usize,
    pub norm_class_name: String,
    pub tab_readout: String,
    pub column_embedding: bool,
    pub shared_embedding: bool,
    pub p_dropout: f64,
    pub orig_emb_resid: bool,
    pub one_hot_embeddings: bool,
    pub drop_whole_embeddings: bool,
    pub max_emb_dim: usize,
    pub lr: f64,
    pub weight_decay: f64,
    /// Per-epoch multiplicative learning-rate decay
    pub base_exp_decay: f64,
}

impl Default for TabKwargs {
    fn default() -> Self {
        Self {
            n_cont_embeddings: 0,
            n_layers: 1,
            n_heads: 8,
            hidden_dim: 128,
            norm_class_name: "LayerNorm".to_string(),
            tab_readout: "none".to_string(),
            column_embedding: true,
            shared_embedding: false,
            p_dropout: 0.1,
            orig_emb_resid: false,
            one_hot_embeddings: false,
            drop_whole_embeddings: false,
            max_emb_dim: 8,
            lr: 1e-3,
            weight_decay: 1e-6,
            base_exp_decay: 0.95,
        }
    }
}

/// Encoder chosen for each column type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderMap {
    #[serde(rename = "CATEGORICAL")]
    pub categorical: EncoderKind,
    #[serde(rename = "DATETIME")]
    pub datetime: EncoderKind,
    #[serde(rename = "LATLONG")]
    pub latlong: EncoderKind,
    #[serde(rename = "SCALAR")]
    pub scalar: EncoderKind,
    #[serde(rename = "TEXT")]
    pub text: EncoderKind,
}

impl Default for EncoderMap {
    fn default() -> Self {
        Self {
            categorical: EncoderKind::CategoricalOrdinal,
            datetime: EncoderKind::DatetimeOrdinal,
            latlong: EncoderKind::LatLongQuantileOrdinal,
            scalar: EncoderKind::ScalarQuantileOrdinal,
            text: EncoderKind::TextSummaryScalar,
        }
    }
}

impl EncoderMap {
    /// Encoder for a column type; untyped columns use the categorical encoder
    pub fn for_type(&self, column_type: ColumnType) -> EncoderKind {
        match column_type {
            ColumnType::Categorical | ColumnType::Unknown => self.categorical,
            ColumnType::Datetime => self.datetime,
            ColumnType::Latlong => self.latlong,
            ColumnType::Scalar => self.scalar,
            ColumnType::Text => self.text,
        }
    }

    pub fn set(&mut self, column_type: ColumnType, kind: EncoderKind) {
        match column_type {
            ColumnType::Categorical | ColumnType::Unknown => self.categorical = kind,
            ColumnType::Datetime => self.datetime = kind,
            ColumnType::Latlong => self.latlong = kind,
            ColumnType::Scalar => self.scalar = kind,
            ColumnType::Text => self.text = kind,
        }
    }
}

/// Masking strength and replication used by training-time augmentation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentationParams {
    pub mask_prob: f64,
    pub num_augs: usize,
}

impl Default for AugmentationParams {
    fn default() -> Self {
        Self {
            mask_prob: 0.4,
            num_augs: 1,
        }
    }
}

/// Complete hyperparameter record for one training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HyperParameters {
    pub batch_size: usize,
    pub tab_kwargs: TabKwargs,
    pub encoders: EncoderMap,
    pub augmentation: AugmentationParams,
    pub pretext: PretextKind,
    pub n_cont_features: usize,
    pub fix_attention: bool,
    /// Validate every `freq` finetuning epochs
    pub freq: usize,
    /// Log every `pretrain_freq` pretraining epochs
    pub pretrain_freq: usize,
    pub feature_dim: usize,
    pub epochs: usize,
    pub pretrain_epochs: usize,
    /// Early-stopping patience, counted in validation rounds
    pub epochs_wo_improve: usize,
    /// Background loader threads; `0` loads batches on the calling thread
    pub num_workers: usize,
    pub seed: Option<u64>,
    pub problem_type: Option<ProblemType>,
    /// Populated for classification only
    pub n_classes: Option<usize>,
}

impl Default for HyperParameters {
    fn default() -> Self {
        Self::fixed()
    }
}

impl HyperParameters {
    /// Parameters that do not depend on the problem type
    pub fn fixed() -> Self {
        Self {
            batch_size: 512,
            tab_kwargs: TabKwargs::default(),
            encoders: EncoderMap::default(),
            augmentation: AugmentationParams::default(),
            pretext: PretextKind::Bert,
            n_cont_features: 8,
            fix_attention: false,
            freq: 1,
            pretrain_freq: 100,
            feature_dim: 64,
            epochs: 100,
            pretrain_epochs: 200,
            epochs_wo_improve: 10,
            num_workers: 4,
            seed: None,
            problem_type: None,
            n_classes: None,
        }
    }

    /// Defaults for a problem type; `nunique` is the class count and is
    /// required for multiclass problems
    pub fn default_for(problem_type: ProblemType, nunique: Option<usize>) -> Result<Self> {
        let mut params = Self::fixed();
        params.problem_type = Some(problem_type);
        params.n_classes = match problem_type {
            ProblemType::Regression => None,
            ProblemType::Binary => Some(2),
            ProblemType::Multiclass => Some(nunique.ok_or_else(|| {
                TabError::ConfigError("multiclass problems need the number of classes".to_string())
            })?),
        };
        params.validate()?;
        Ok(params)
    }

    /// Parse and validate a JSON document; missing keys take the fixed defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let params: Self = serde_json::from_str(json)
            .map_err(|e| TabError::ConfigError(format!("invalid hyperparameters: {}", e)))?;
        params.validate()?;
        Ok(params)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Width of the model's primary output
    pub fn output_dim(&self) -> usize {
        self.n_classes.unwrap_or(1)
    }

    /// Check ranges and the problem-type / class-count pairing
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(TabError::invalid_parameter("batch_size", 0, "must be positive"));
        }
        let mask_prob = self.augmentation.mask_prob;
        if !(0.0..=1.0).contains(&mask_prob) {
            return Err(TabError::invalid_parameter(
                "augmentation.mask_prob",
                mask_prob,
                "must be within [0, 1]",
            ));
        }
        if self.augmentation.num_augs == 0 {
            return Err(TabError::invalid_parameter("augmentation.num_augs", 0, "must be at least 1"));
        }

        let kw = &self.tab_kwargs;
        if !(kw.lr > 0.0) {
            return Err(TabError::invalid_parameter("tab_kwargs.lr", kw.lr, "must be positive"));
        }
        if kw.weight_decay < 0.0 {
            return Err(TabError::invalid_parameter(
                "tab_kwargs.weight_decay",
                kw.weight_decay,
                "must not be negative",
            ));
        }
        if !(kw.base_exp_decay > 0.0 && kw.base_exp_decay <= 1.0) {
            return Err(TabError::invalid_parameter(
                "tab_kwargs.base_exp_decay",
                kw.base_exp_decay,
                "must be within (0, 1]",
            ));
        }
        if !(0.0..1.0).contains(&kw.p_dropout) {
            return Err(TabError::invalid_parameter(
                "tab_kwargs.p_dropout",
                kw.p_dropout,
                "must be within [0, 1)",
            ));
        }
        if kw.hidden_dim == 0 || kw.max_emb_dim == 0 || self.feature_dim == 0 {
            return Err(TabError::ConfigError(
                "hidden_dim, max_emb_dim and feature_dim must be positive".to_string(),
            ));
        }
        if self.freq == 0 || self.pretrain_freq == 0 {
            return Err(TabError::ConfigError("freq and pretrain_freq must be positive".to_string()));
        }

        match (self.problem_type, self.n_classes) {
            (Some(ProblemType::Regression), Some(n)) => Err(TabError::invalid_parameter(
                "n_classes",
                n,
                "must be unset for regression",
            )),
            (Some(ProblemType::Binary), n) if n != Some(2) => Err(TabError::invalid_parameter(
                "n_classes",
                format!("{:?}", n),
                "binary problems have exactly 2 classes",
            )),
            (Some(ProblemType::Multiclass), None) => Err(TabError::ConfigError(
                "multiclass problems need n_classes".to_string(),
            )),
            (Some(ProblemType::Multiclass), Some(n)) if n < 3 => Err(TabError::invalid_parameter(
                "n_classes",
                n,
                "multiclass problems need at least 3 classes",
            )),
            _ => Ok(()),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn with_pretrain_epochs(mut self, pretrain_epochs: usize) -> Self {
        self.pretrain_epochs = pretrain_epochs;
        self
    }

    pub fn with_encoder(mut self, column_type: ColumnType, kind: EncoderKind) -> Self {
        self.encoders.set(column_type, kind);
        self
    }

    pub fn with_augmentation(mut self, mask_prob: f64, num_augs: usize) -> Self {
        self.augmentation = AugmentationParams { mask_prob, num_augs };
        self
    }

    pub fn with_num_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_learning_rate(mut self, lr: f64) -> Self {
        self.tab_kwargs.lr = lr;
        self
    }
}
