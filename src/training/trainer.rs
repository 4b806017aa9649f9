//! End-to-end training driver
//!
//! Builds datasets and loaders, optionally pretrains the model on a
//! self-supervised objective, then finetunes on the labels with early stopping
//! on validation loss.

use super::embedding_model::TabEmbeddingModel;
use super::epoch::{EpochMetrics, EpochRunner, EpochState};
use super::model::TabModel;
use super::optim::{AdamW, ExponentialLr, LrScheduler, Optimizer};
use super::pretext::argmax;
use crate::columns::ColumnDescriptor;
use crate::config::{HyperParameters, PretextKind, ProblemType};
use crate::dataset::{TabDataLoader, TabDataset, Targets};
use crate::encoders::FeatureEncoders;
use crate::error::{Result, TabError};
use ndarray::{Array1, Array2, Axis};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info};

/// Metrics of one epoch in the fit history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub pretrain: bool,
    pub train_loss: f64,
    pub train_accuracy: Option<f64>,
    pub val_loss: Option<f64>,
    pub val_accuracy: Option<f64>,
}

/// Summary returned by [`TabTrainer::fit`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitReport {
    pub history: Vec<EpochRecord>,
    /// Finetuning epoch whose parameters were kept
    pub best_epoch: Option<usize>,
    pub best_val_loss: Option<f64>,
    pub stopped_early: bool,
    pub n_parameters: usize,
    pub null_encoded_columns: Vec<String>,
    pub training_time_secs: f64,
}

impl FitReport {
    pub fn finetune_epochs(&self) -> usize {
        self.history.iter().filter(|r| !r.pretrain).count()
    }

    pub fn pretrain_epochs(&self) -> usize {
        self.history.iter().filter(|r| r.pretrain).count()
    }
}

/// Fits encoders and a [`TabEmbeddingModel`] from frames
#[derive(Debug)]
pub struct TabTrainer {
    params: HyperParameters,
    columns: Option<Vec<ColumnDescriptor>>,
    encoders: Option<FeatureEncoders>,
    model: Option<TabEmbeddingModel>,
}

impl TabTrainer {
    /// `params.problem_type` must be set
    pub fn new(params: HyperParameters) -> Result<Self> {
        params.validate()?;
        if params.problem_type.is_none() {
            return Err(TabError::ConfigError("trainer needs a problem type".to_string()));
        }
        Ok(Self {
            params,
            columns: None,
            encoders: None,
            model: None,
        })
    }

    pub fn params(&self) -> &HyperParameters {
        &self.params
    }

    pub fn is_fitted(&self) -> bool {
        self.model.is_some()
    }

    pub fn model(&self) -> Option<&TabEmbeddingModel> {
        self.model.as_ref()
    }

    pub fn feature_encoders(&self) -> Option<&FeatureEncoders> {
        self.encoders.as_ref()
    }

    fn problem_type(&self) -> Result<ProblemType> {
        self.params
            .problem_type
            .ok_or_else(|| TabError::ConfigError("trainer needs a problem type".to_string()))
    }

    /// Class ids must fit the configured output width
    fn check_class_ids(&self, ds: &TabDataset) -> Result<()> {
        let seen = ds.targets().and_then(Targets::n_classes_seen);
        if let Some(seen) = seen {
            let width = self.params.output_dim();
            if seen > width {
                return Err(TabError::DataError(format!(
                    "labels contain class id {} but the model predicts {} classes",
                    seen - 1,
                    width
                )));
            }
        }
        Ok(())
    }

    /// Train on `train`/`labels`, validating on `val` when given.
    ///
    /// Validation data is encoded with the encoders fitted on `train`.
    pub fn fit(
        &mut self,
        train: DataFrame,
        labels: &Series,
        val: Option<(DataFrame, &Series)>,
        columns: Option<Vec<ColumnDescriptor>>,
    ) -> Result<FitReport> {
        let start = Instant::now();
        let problem_type = self.problem_type()?;

        let mut train_ds = TabDataset::new(train, Some(labels), columns.clone(), &self.params)?;
        self.check_class_ids(&train_ds)?;
        let encoders = train_ds.fit_and_encode()?;
        let train_loader = train_ds.build_loader(true)?;

        let val_loader = match val {
            Some((val_df, val_labels)) => {
                let mut val_ds = TabDataset::new(val_df, Some(val_labels), columns.clone(), &self.params)?;
                val_ds.encode(&encoders)?;
                Some(val_ds.build_loader(false)?)
            }
            None => None,
        };

        let mut model = TabEmbeddingModel::from_cards(
            train_loader.cat_feat_origin_cards(),
            train_loader.n_cont_features(),
            &self.params,
        )?;
        info!(
            rows = train_ds.len(),
            n_cat = train_loader.cat_feat_origin_cards().len(),
            n_cont = train_loader.n_cont_features(),
            n_parameters = model.n_parameters(),
            problem_type = ?problem_type,
            "Starting training"
        );

        let mut runner = EpochRunner::new(self.params.augmentation, self.params.seed);
        let mut history = Vec::new();

        self.pretrain(&mut model, &mut runner, &train_loader, &mut history)?;
        let outcome = self.finetune(
            &mut model,
            &mut runner,
            &train_loader,
            val_loader.as_ref(),
            problem_type,
            &mut history,
        )?;

        let report = FitReport {
            history,
            best_epoch: outcome.best_epoch,
            best_val_loss: outcome.best_val_loss,
            stopped_early: outcome.stopped_early,
            n_parameters: model.n_parameters(),
            null_encoded_columns: encoders.null_encoded().iter().map(|s| s.to_string()).collect(),
            training_time_secs: start.elapsed().as_secs_f64(),
        };
        info!(
            epochs = report.finetune_epochs(),
            best_epoch = ?report.best_epoch,
            best_val_loss = ?report.best_val_loss,
            secs = report.training_time_secs,
            "Training finished"
        );

        self.columns = columns;
        self.encoders = Some(encoders);
        self.model = Some(model);
        Ok(report)
    }

    fn optimizer_and_scheduler(&self) -> (AdamW, ExponentialLr) {
        let kw = &self.params.tab_kwargs;
        (
            AdamW::new(kw.lr, kw.weight_decay),
            ExponentialLr::new(kw.lr, kw.base_exp_decay),
        )
    }

    fn pretrain(
        &self,
        model: &mut TabEmbeddingModel,
        runner: &mut EpochRunner,
        loader: &TabDataLoader,
        history: &mut Vec<EpochRecord>,
    ) -> Result<()> {
        let epochs = self.params.pretrain_epochs;
        if epochs == 0 {
            return Ok(());
        }
        if self.params.pretext != PretextKind::Bert || model.cat_cards().is_empty() {
            info!(
                pretext = self.params.pretext.name(),
                "Skipping pretraining, it needs BERT_pretext and categorical features"
            );
            return Ok(());
        }

        let problem_type = self.problem_type()?;
        let mut pretext = self.params.pretext.build(problem_type, self.params.seed);
        let (mut opt, mut sched) = self.optimizer_and_scheduler();

        for epoch in 1..=epochs {
            let metrics = {
                let mut optimizers: [&mut dyn Optimizer; 1] = [&mut opt];
                runner.run(
                    model,
                    pretext.as_mut(),
                    loader,
                    &mut optimizers,
                    Some(&mut sched as &mut dyn LrScheduler),
                    Some(EpochState::Pretrain.as_str()),
                )?
            };
            if epoch % self.params.pretrain_freq == 0 || epoch == epochs {
                info!(epoch, loss = metrics.loss, accuracy = ?metrics.accuracy, "Pretrain epoch");
            }
            history.push(record(epoch, true, &metrics, None));
        }
        Ok(())
    }

    fn finetune(
        &self,
        model: &mut TabEmbeddingModel,
        runner: &mut EpochRunner,
        train_loader: &TabDataLoader,
        val_loader: Option<&TabDataLoader>,
        problem_type: ProblemType,
        history: &mut Vec<EpochRecord>,
    ) -> Result<FinetuneOutcome> {
        let mut pretext = PretextKind::Supervised.build(problem_type, self.params.seed);
        let (mut opt, mut sched) = self.optimizer_and_scheduler();

        let mut best: Option<(usize, f64, Vec<Array2<f32>>)> = None;
        let mut rounds_wo_improve = 0;
        let mut stopped_early = false;

        for epoch in 1..=self.params.epochs {
            let train = {
                let mut optimizers: [&mut dyn Optimizer; 1] = [&mut opt];
                runner.run(
                    model,
                    pretext.as_mut(),
                    train_loader,
                    &mut optimizers,
                    Some(&mut sched as &mut dyn LrScheduler),
                    None,
                )?
            };

            let val = match val_loader {
                Some(loader) if epoch % self.params.freq == 0 => {
                    Some(runner.run(model, pretext.as_mut(), loader, &mut [], None, None)?)
                }
                _ => None,
            };
            debug!(
                epoch,
                train_loss = train.loss,
                val_loss = ?val.map(|v| v.loss),
                val_accuracy = ?val.and_then(|v| v.accuracy),
                "Finetune epoch"
            );
            history.push(record(epoch, false, &train, val.as_ref()));

            if let Some(val) = val {
                let improved = best.as_ref().map_or(true, |(_, loss, _)| val.loss < *loss);
                if improved {
                    best = Some((epoch, val.loss, model.snapshot()));
                    rounds_wo_improve = 0;
                } else {
                    rounds_wo_improve += 1;
                    if rounds_wo_improve >= self.params.epochs_wo_improve {
                        info!(epoch, patience = self.params.epochs_wo_improve, "Early stopping");
                        stopped_early = true;
                        break;
                    }
                }
            }
        }

        Ok(match best {
            Some((epoch, loss, snapshot)) => {
                model.restore(&snapshot);
                FinetuneOutcome {
                    best_epoch: Some(epoch),
                    best_val_loss: Some(loss),
                    stopped_early,
                }
            }
            None => FinetuneOutcome {
                best_epoch: None,
                best_val_loss: None,
                stopped_early,
            },
        })
    }

    /// Raw primary-head outputs for every row of `df`, in row order
    fn raw_outputs(&mut self, df: DataFrame) -> Result<Array2<f32>> {
        let encoders = self
            .encoders
            .as_ref()
            .ok_or_else(|| TabError::NotFitted("trainer".to_string()))?;
        let model = self
            .model
            .as_mut()
            .ok_or_else(|| TabError::NotFitted("trainer".to_string()))?;

        let mut ds = TabDataset::new(df, None, self.columns.clone(), &self.params)?;
        ds.encode(encoders)?;
        let loader = ds.build_loader(false)?;

        let mut outputs = Array2::zeros((ds.len(), model.output_dim()));
        for batch in loader.iter() {
            let out = model.forward(batch.cat.as_ref(), batch.cont.as_ref())?;
            for (row, &idx) in out.rows().into_iter().zip(&batch.indices) {
                outputs.row_mut(idx).assign(&row);
            }
        }
        Ok(outputs)
    }

    /// Class probabilities for classification, raw predictions for regression
    pub fn predict_proba(&mut self, df: DataFrame) -> Result<Array2<f32>> {
        let problem_type = self.problem_type()?;
        let mut outputs = self.raw_outputs(df)?;
        if problem_type.is_classification() {
            for mut row in outputs.rows_mut() {
                let max = row.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
                row.mapv_inplace(|v| (v - max).exp());
                let sum = row.sum();
                row.mapv_inplace(|v| v / sum);
            }
        }
        Ok(outputs)
    }

    /// Class ids for classification, values for regression
    pub fn predict(&mut self, df: DataFrame) -> Result<Targets> {
        let problem_type = self.problem_type()?;
        let outputs = self.raw_outputs(df)?;
        Ok(if problem_type.is_classification() {
            Targets::Classes(
                outputs
                    .axis_iter(Axis(0))
                    .map(|row| argmax(row.iter().copied()) as i64)
                    .collect::<Array1<i64>>(),
            )
        } else {
            Targets::Regression(outputs.column(0).to_owned())
        })
    }
}

struct FinetuneOutcome {
    best_epoch: Option<usize>,
    best_val_loss: Option<f64>,
    stopped_early: bool,
}

fn record(epoch: usize, pretrain: bool, train: &EpochMetrics, val: Option<&EpochMetrics>) -> EpochRecord {
    EpochRecord {
        epoch,
        pretrain,
        train_loss: train.loss,
        train_accuracy: train.accuracy,
        val_loss: val.map(|v| v.loss),
        val_accuracy: val.and_then(|v| v.accuracy),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_problem_type() {
        assert!(TabTrainer::new(HyperParameters::fixed()).is_err());
        let params = HyperParameters::default_for(ProblemType::Regression, None).unwrap();
        let trainer = TabTrainer::new(params).unwrap();
        assert!(!trainer.is_fitted());
    }

    #[test]
    fn test_predict_before_fit_fails() {
        let params = HyperParameters::default_for(ProblemType::Binary, None).unwrap();
        let mut trainer = TabTrainer::new(params).unwrap();
        let df = df!("a" => &["x", "y"]).unwrap();
        assert!(matches!(trainer.predict(df), Err(TabError::NotFitted(_))));
    }
}
