//! Model training
//!
//! Provides the pieces the training loop is assembled from:
//! - [`TabModel`] and the reference [`TabEmbeddingModel`]
//! - Pretext objectives ([`SupervisedPretext`], [`BertPretext`])
//! - Optimisers and learning-rate schedules
//! - [`EpochRunner`] for a single train or eval pass
//! - [`TabTrainer`] for pretraining, finetuning and prediction

mod embedding_model;
mod epoch;
mod model;
mod optim;
mod pretext;
mod trainer;

pub use embedding_model::{embedding_dim, EmbeddingModelConfig, TabEmbeddingModel};
pub use epoch::{EpochMetrics, EpochRunner, EpochState};
pub use model::{Param, TabModel};
pub use optim::{AdamW, ExponentialLr, LrScheduler, Optimizer, Sgd};
pub use pretext::{
    BertPretext, Correct, LossOutput, Pretext, PretextBatch, PretextTarget, SupervisedPretext,
    DEFAULT_REPLACE_PROB,
};
pub use trainer::{EpochRecord, FitReport, TabTrainer};
