//! TabTransformer - tabular feature encoding and training pipeline
//!
//! This crate turns a polars `DataFrame` into model-ready tensors and drives
//! training of an embedding model over them:
//! - Per-column feature encoders chosen by column type
//! - Dataset construction with shared encoders and batch loaders
//! - Masking augmentation of categorical inputs
//! - An epoch runner with pluggable pretext objectives
//!
//! # Modules
//!
//! ## Data
//! - [`columns`] - Column descriptors and semantic types
//! - [`encoders`] - Per-column feature encoders and the encoder registry
//! - [`dataset`] - Dataset builder and batch loader
//! - [`augmentation`] - Random masking of categorical inputs
//!
//! ## Training
//! - [`config`] - Hyperparameter records
//! - [`training`] - Model interface, optimisers, epoch runner, trainer
//!
//! ## Tooling
//! - [`utils`] - CSV loading and column type suggestions
//! - [`cli`] - Command-line interface

// Core error handling
pub mod error;

// Data
pub mod augmentation;
pub mod columns;
pub mod dataset;
pub mod encoders;

// Training
pub mod config;
pub mod training;

// Tooling
pub mod cli;
pub mod utils;

pub use error::{Result, TabError};

/// Re-export commonly used types
pub mod prelude {
    // Error handling
    pub use crate::error::{Result, TabError};

    // Columns and encoders
    pub use crate::columns::{ColumnDescriptor, ColumnSource, ColumnType};
    pub use crate::encoders::{EncoderKind, FeatureEncoder, FeatureEncoders};

    // Configuration
    pub use crate::config::{HyperParameters, PretextKind, ProblemType};

    // Datasets
    pub use crate::augmentation::augmentation;
    pub use crate::dataset::{Batch, LoaderConfig, TabDataLoader, TabDataset, Targets};

    // Training
    pub use crate::training::{
        AdamW, EpochMetrics, EpochRunner, ExponentialLr, FitReport, LrScheduler, Optimizer,
        Pretext, TabEmbeddingModel, TabModel, TabTrainer,
    };
}
