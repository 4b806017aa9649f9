//! One pass of training or evaluation over a loader

use super::model::TabModel;
use super::optim::{LrScheduler, Optimizer};
use super::pretext::{Correct, Pretext, PretextBatch, PretextTarget};
use crate::augmentation::{augmentation, tile_rows};
use crate::config::AugmentationParams;
use crate::dataset::TabDataLoader;
use crate::error::{Result, TabError};
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, trace};

/// Which head an epoch drives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpochState {
    /// Secondary head on pretext targets
    Pretrain,
    /// Primary head on labels, with masking augmentation while training
    Finetune,
}

impl EpochState {
    /// `None` means finetune
    pub fn parse(state: Option<&str>) -> Result<Self> {
        state.map_or(Ok(EpochState::Finetune), |s| s.parse())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EpochState::Pretrain => "pretrain",
            EpochState::Finetune => "finetune",
        }
    }
}

impl FromStr for EpochState {
    type Err = TabError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pretrain" => Ok(EpochState::Pretrain),
            "finetune" => Ok(EpochState::Finetune),
            other => Err(TabError::ConfigError(format!("unknown epoch state '{}'", other))),
        }
    }
}

impl fmt::Display for EpochState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Averages over one epoch
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochMetrics {
    /// Mean per-batch loss
    pub loss: f64,
    /// Percentage of correct units, when the pretext reports correctness
    pub accuracy: Option<f64>,
    pub n_batches: usize,
}

/// Runs epochs with a fixed augmentation setting
#[derive(Debug)]
pub struct EpochRunner {
    augmentation: AugmentationParams,
    rng: Xoshiro256PlusPlus,
}

impl EpochRunner {
    pub fn new(augmentation: AugmentationParams, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => Xoshiro256PlusPlus::seed_from_u64(seed),
            None => Xoshiro256PlusPlus::from_entropy(),
        };
        Self { augmentation, rng }
    }

    pub fn augmentation(&self) -> &AugmentationParams {
        &self.augmentation
    }

    /// Run one epoch.
    ///
    /// With a non-empty `optimizers` list every batch is backpropagated and
    /// each optimiser steps in list order, then `scheduler` steps once. With
    /// no optimisers the model parameters are left untouched. `state` must be
    /// `"pretrain"`, `"finetune"` or `None`.
    pub fn run(
        &mut self,
        model: &mut dyn TabModel,
        pretext: &mut dyn Pretext,
        loader: &TabDataLoader,
        optimizers: &mut [&mut dyn Optimizer],
        scheduler: Option<&mut dyn LrScheduler>,
        state: Option<&str>,
    ) -> Result<EpochMetrics> {
        let state = EpochState::parse(state)?;
        let training = !optimizers.is_empty();
        let cat_cards: Vec<usize> = loader.cat_feat_origin_cards().iter().map(|(_, c)| *c).collect();

        let mut loss_sum = 0.0;
        let mut n_batches = 0usize;
        let mut correct: Option<Correct> = None;

        for batch in loader.iter() {
            let mut data = pretext.transform(batch, &cat_cards)?;

            let output = match state {
                EpochState::Pretrain => {
                    model.forward_pretext(data.cat.as_ref(), data.cont.as_ref())?
                }
                EpochState::Finetune => {
                    if training {
                        data = self.augment(data)?;
                    }
                    model.forward(data.cat.as_ref(), data.cont.as_ref())?
                }
            };

            let out = pretext.loss(&output, &data.target)?;
            if !out.loss.is_finite() {
                return Err(TabError::TrainingError(format!(
                    "loss became {} in {} epoch",
                    out.loss, state
                )));
            }

            if training {
                model.zero_grad();
                model.backward(&out.grad)?;
                for opt in optimizers.iter_mut() {
                    let mut params = model.params_mut();
                    opt.step(&mut params);
                }
            }

            trace!(batch = n_batches, loss = out.loss, "Batch done");
            loss_sum += out.loss;
            n_batches += 1;
            if let Some(c) = out.correct {
                let acc = correct.get_or_insert_with(Correct::default);
                acc.hits += c.hits;
                acc.total += c.total;
            }
        }

        if n_batches == 0 {
            return Err(TabError::DataError("loader yielded no batches".to_string()));
        }

        if training {
            if let Some(scheduler) = scheduler {
                scheduler.step(optimizers);
                debug!(lr = scheduler.last_lr(), "Learning rate updated");
            }
        }

        let metrics = EpochMetrics {
            loss: loss_sum / n_batches as f64,
            accuracy: correct
                .filter(|c| c.total > 0)
                .map(|c| 100.0 * c.hits as f64 / c.total as f64),
            n_batches,
        };
        debug!(
            state = %state,
            training,
            loss = metrics.loss,
            accuracy = ?metrics.accuracy,
            "Epoch done"
        );
        Ok(metrics)
    }

    fn augment(&mut self, data: PretextBatch) -> Result<PretextBatch> {
        let AugmentationParams { mask_prob, num_augs } = self.augmentation;
        let (cat, target) = match (data.cat, data.target) {
            (Some(cat), PretextTarget::Labels(target)) => {
                let (cat, target) = augmentation(&cat, &target, mask_prob, num_augs, &mut self.rng)?;
                (Some(cat), PretextTarget::Labels(target))
            }
            (Some(_), PretextTarget::Replaced(_)) => {
                return Err(TabError::TrainingError(
                    "finetuning needs label targets to augment categorical features".to_string(),
                ))
            }
            (None, target) => {
                return Ok(PretextBatch {
                    cat: None,
                    cont: data.cont,
                    target,
                })
            }
        };
        let cont = data.cont.map(|c| tile_rows(&c, num_augs)).transpose()?;
        Ok(PretextBatch { cat, cont, target })
    }
}
