//! Training configuration
//!
//! The hyperparameter record is a nested serde structure whose keys match the
//! configuration files accepted by the CLI (`batch_size`, `tab_kwargs`,
//! `encoders`, `augmentation`, `pretext`, ...).

mod hyperparameters;

pub use hyperparameters::{
    AugmentationParams, EncoderMap, HyperParameters, ProblemType, PretextKind, TabKwargs,
    MIN_SCALAR_UNIQUE,
};
