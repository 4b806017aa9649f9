//! Pretext objectives
//!
//! A pretext turns a loader batch into model inputs plus a training target,
//! then scores model output against that target.

use crate::config::{PretextKind, ProblemType};
use crate::dataset::{Batch, Targets};
use crate::encoders::FIRST_VALUE_INDEX;
use crate::error::{Result, TabError};
use ndarray::{Array2, Axis};
use rand::Rng;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

/// Fraction of categorical positions replaced by [`BertPretext`]
pub const DEFAULT_REPLACE_PROB: f64 = 0.3;

/// Target produced by a pretext transform
#[derive(Debug, Clone, PartialEq)]
pub enum PretextTarget {
    /// Dataset labels
    Labels(Targets),
    /// `1.0` where a categorical position was replaced, `0.0` elsewhere
    Replaced(Array2<f32>),
}

impl PretextTarget {
    pub fn len(&self) -> usize {
        match self {
            PretextTarget::Labels(t) => t.len(),
            PretextTarget::Replaced(t) => t.nrows(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Model-ready inputs and target for one batch
#[derive(Debug, Clone)]
pub struct PretextBatch {
    pub cat: Option<Array2<i64>>,
    pub cont: Option<Array2<f32>>,
    pub target: PretextTarget,
}

/// Correctly predicted units out of a total
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Correct {
    pub hits: usize,
    pub total: usize,
}

/// Loss value and its gradient with respect to the model output
#[derive(Debug, Clone)]
pub struct LossOutput {
    pub loss: f64,
    pub grad: Array2<f32>,
    /// `None` when the objective has no accuracy signal
    pub correct: Option<Correct>,
}

pub trait Pretext: Send {
    fn kind(&self) -> PretextKind;

    /// Build model inputs and target from a loader batch
    fn transform(&mut self, batch: Batch, cat_cards: &[usize]) -> Result<PretextBatch>;

    /// Score `output` against `target`
    fn loss(&self, output: &Array2<f32>, target: &PretextTarget) -> Result<LossOutput>;
}

impl PretextKind {
    pub fn name(&self) -> &'static str {
        match self {
            PretextKind::Bert => "BERT_pretext",
            PretextKind::Supervised => "SUPERVISED_pretext",
        }
    }

    pub fn build(&self, problem_type: ProblemType, seed: Option<u64>) -> Box<dyn Pretext> {
        match self {
            PretextKind::Bert => Box::new(BertPretext::new(DEFAULT_REPLACE_PROB, seed)),
            PretextKind::Supervised => Box::new(SupervisedPretext::new(problem_type)),
        }
    }
}

fn check_rows(output: &Array2<f32>, n: usize) -> Result<()> {
    if output.nrows() != n {
        return Err(TabError::ShapeError {
            expected: format!("{} output rows", n),
            actual: format!("{} output rows", output.nrows()),
        });
    }
    Ok(())
}

/// Uses the labels directly: MSE for regression, softmax cross-entropy otherwise
#[derive(Debug, Clone)]
pub struct SupervisedPretext {
    problem_type: ProblemType,
}

impl SupervisedPretext {
    pub fn new(problem_type: ProblemType) -> Self {
        Self { problem_type }
    }

    fn mse(output: &Array2<f32>, target: &ndarray::Array1<f32>) -> Result<LossOutput> {
        check_rows(output, target.len())?;
        if output.ncols() != 1 {
            return Err(TabError::ShapeError {
                expected: "1 output column".to_string(),
                actual: format!("{} output columns", output.ncols()),
            });
        }
        let n = target.len().max(1) as f32;
        let diff = &output.column(0) - target;
        let loss = diff.iter().map(|d| (d * d) as f64).sum::<f64>() / n as f64;
        let grad = diff.mapv(|d| 2.0 * d / n).insert_axis(Axis(1));
        Ok(LossOutput {
            loss,
            grad,
            correct: None,
        })
    }

    fn cross_entropy(output: &Array2<f32>, target: &ndarray::Array1<i64>) -> Result<LossOutput> {
        check_rows(output, target.len())?;
        let n_classes = output.ncols();
        let n = target.len().max(1) as f32;
        let mut grad = Array2::<f32>::zeros(output.raw_dim());
        let mut loss = 0.0f64;
        let mut hits = 0usize;

        for (i, (row, &class)) in output.rows().into_iter().zip(target.iter()).enumerate() {
            let class = usize::try_from(class)
                .ok()
                .filter(|&c| c < n_classes)
                .ok_or_else(|| {
                    TabError::TrainingError(format!(
                        "class id {} outside model output of width {}",
                        class, n_classes
                    ))
                })?;
            let max = row.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
            let exp: Vec<f32> = row.iter().map(|&v| (v - max).exp()).collect();
            let sum: f32 = exp.iter().sum();
            loss -= ((exp[class] / sum).max(1e-12) as f64).ln();

            for (k, e) in exp.iter().enumerate() {
                let onehot = if k == class { 1.0 } else { 0.0 };
                grad[[i, k]] = (e / sum - onehot) / n;
            }
            if argmax(row.iter().copied()) == class {
                hits += 1;
            }
        }

        Ok(LossOutput {
            loss: loss / n as f64,
            grad,
            correct: Some(Correct {
                hits,
                total: target.len(),
            }),
        })
    }
}

pub(crate) fn argmax(values: impl Iterator<Item = f32>) -> usize {
    values
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |(bi, bv), (i, v)| if v > bv { (i, v) } else { (bi, bv) })
        .0
}

impl Pretext for SupervisedPretext {
    fn kind(&self) -> PretextKind {
        PretextKind::Supervised
    }

    fn transform(&mut self, batch: Batch, _cat_cards: &[usize]) -> Result<PretextBatch> {
        let target = batch
            .target
            .ok_or_else(|| TabError::TrainingError("supervised pretext needs labels".to_string()))?;
        Ok(PretextBatch {
            cat: batch.cat,
            cont: batch.cont,
            target: PretextTarget::Labels(target),
        })
    }

    fn loss(&self, output: &Array2<f32>, target: &PretextTarget) -> Result<LossOutput> {
        match (self.problem_type, target) {
            (ProblemType::Regression, PretextTarget::Labels(Targets::Regression(t))) => {
                Self::mse(output, t)
            }
            (p, PretextTarget::Labels(Targets::Classes(t))) if p.is_classification() => {
                Self::cross_entropy(output, t)
            }
            _ => Err(TabError::TrainingError(format!(
                "target does not match a {:?} problem",
                self.problem_type
            ))),
        }
    }
}

/// Replaced-token detection over categorical positions.
///
/// A fraction of positions is swapped for another value code of the same
/// sub-column and the secondary head predicts which ones were swapped.
#[derive(Debug, Clone)]
pub struct BertPretext {
    replace_prob: f64,
    rng: Xoshiro256PlusPlus,
}

impl BertPretext {
    pub fn new(replace_prob: f64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => Xoshiro256PlusPlus::seed_from_u64(seed),
            None => Xoshiro256PlusPlus::from_entropy(),
        };
        Self { replace_prob, rng }
    }

    pub fn replace_prob(&self) -> f64 {
        self.replace_prob
    }
}

impl Pretext for BertPretext {
    fn kind(&self) -> PretextKind {
        PretextKind::Bert
    }

    fn transform(&mut self, batch: Batch, cat_cards: &[usize]) -> Result<PretextBatch> {
        let mut cat = batch.cat.ok_or_else(|| {
            TabError::TrainingError("BERT pretext needs categorical features".to_string())
        })?;
        if cat.ncols() != cat_cards.len() {
            return Err(TabError::ShapeError {
                expected: format!("{} categorical columns", cat_cards.len()),
                actual: format!("{} categorical columns", cat.ncols()),
            });
        }

        let mut replaced = Array2::<f32>::zeros(cat.raw_dim());
        for ((r, c), code) in cat.indexed_iter_mut() {
            // real value codes are FIRST_VALUE_INDEX..card
            let n_values = (cat_cards[c] as i64 - FIRST_VALUE_INDEX).max(0);
            if n_values < 2 || self.rng.gen::<f64>() >= self.replace_prob {
                continue;
            }
            let mut new_code = FIRST_VALUE_INDEX + self.rng.gen_range(0..n_values);
            if new_code == *code {
                new_code = FIRST_VALUE_INDEX + (new_code - FIRST_VALUE_INDEX + 1) % n_values;
            }
            *code = new_code;
            replaced[[r, c]] = 1.0;
        }

        Ok(PretextBatch {
            cat: Some(cat),
            cont: batch.cont,
            target: PretextTarget::Replaced(replaced),
        })
    }

    fn loss(&self, output: &Array2<f32>, target: &PretextTarget) -> Result<LossOutput> {
        let target = match target {
            PretextTarget::Replaced(t) => t,
            PretextTarget::Labels(_) => {
                return Err(TabError::TrainingError(
                    "BERT pretext scores replacement targets, not labels".to_string(),
                ))
            }
        };
        if output.shape() != target.shape() {
            return Err(TabError::ShapeError {
                expected: format!("{:?}", target.shape()),
                actual: format!("{:?}", output.shape()),
            });
        }

        let n = target.len().max(1) as f32;
        let mut loss = 0.0f64;
        let mut hits = 0usize;
        let mut grad = Array2::<f32>::zeros(output.raw_dim());
        ndarray::Zip::from(&mut grad)
            .and(output)
            .and(target)
            .for_each(|g, &logit, &t| {
                // numerically stable BCE with logits
                loss += (logit.max(0.0) - logit * t + (-logit.abs()).exp().ln_1p()) as f64;
                let p = 1.0 / (1.0 + (-logit).exp());
                *g = (p - t) / n;
                if (p > 0.5) == (t > 0.5) {
                    hits += 1;
                }
            });

        Ok(LossOutput {
            loss: loss / n as f64,
            grad,
            correct: Some(Correct {
                hits,
                total: target.len(),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array1};

    fn batch(cat: Array2<i64>, target: Option<Targets>) -> Batch {
        Batch {
            indices: (0..cat.nrows()).collect(),
            cat: Some(cat),
            cont: None,
            target,
        }
    }

    #[test]
    fn test_mse_loss_and_gradient() {
        let pretext = SupervisedPretext::new(ProblemType::Regression);
        let output = array![[1.0f32], [3.0]];
        let target = PretextTarget::Labels(Targets::Regression(Array1::from(vec![0.0, 3.0])));
        let out = pretext.loss(&output, &target).unwrap();
        assert!((out.loss - 0.5).abs() < 1e-9);
        assert!((out.grad[[0, 0]] - 1.0).abs() < 1e-6);
        assert!(out.correct.is_none());
    }

    #[test]
    fn test_cross_entropy_counts_hits() {
        let pretext = SupervisedPretext::new(ProblemType::Multiclass);
        let output = array![[2.0f32, 0.0, 0.0], [0.0, 0.0, 5.0]];
        let target = PretextTarget::Labels(Targets::Classes(Array1::from(vec![0, 1])));
        let out = pretext.loss(&output, &target).unwrap();
        assert_eq!(out.correct, Some(Correct { hits: 1, total: 2 }));
        // softmax gradients sum to zero per row
        for row in out.grad.rows() {
            assert!(row.sum().abs() < 1e-6);
        }
    }

    #[test]
    fn test_class_outside_output_rejected() {
        let pretext = SupervisedPretext::new(ProblemType::Binary);
        let output = array![[0.0f32, 1.0]];
        let target = PretextTarget::Labels(Targets::Classes(Array1::from(vec![2])));
        assert!(pretext.loss(&output, &target).is_err());
    }

    #[test]
    fn test_supervised_needs_labels() {
        let mut pretext = SupervisedPretext::new(ProblemType::Binary);
        assert!(pretext.transform(batch(array![[2]], None), &[4]).is_err());
    }

    #[test]
    fn test_bert_replacements_are_marked() {
        let mut pretext = BertPretext::new(1.0, Some(5));
        let cat = Array2::from_elem((20, 2), 2i64);
        let out = pretext.transform(batch(cat.clone(), None), &[6, 3]).unwrap();
        let new_cat = out.cat.unwrap();
        let replaced = match out.target {
            PretextTarget::Replaced(t) => t,
            _ => unreachable!(),
        };
        // column 0 has 4 value codes, column 1 only one and is never replaced
        for r in 0..20 {
            assert_eq!(replaced[[r, 0]], 1.0);
            assert!(new_cat[[r, 0]] >= 3 && new_cat[[r, 0]] < 6);
            assert_eq!(replaced[[r, 1]], 0.0);
            assert_eq!(new_cat[[r, 1]], 2);
        }
    }

    #[test]
    fn test_bert_zero_prob_keeps_codes() {
        let mut pretext = BertPretext::new(0.0, Some(5));
        let cat = array![[2i64, 3], [4, 2]];
        let out = pretext.transform(batch(cat.clone(), None), &[5, 5]).unwrap();
        assert_eq!(out.cat.unwrap(), cat);
    }

    #[test]
    fn test_bce_loss() {
        let pretext = BertPretext::new(0.3, Some(1));
        let output = array![[0.0f32, 10.0]];
        let target = PretextTarget::Replaced(array![[1.0f32, 1.0]]);
        let out = pretext.loss(&output, &target).unwrap();
        let expected = (2f64.ln() + (1.0 + (-10f64).exp()).ln()) / 2.0;
        assert!((out.loss - expected).abs() < 1e-5);
        assert_eq!(out.correct, Some(Correct { hits: 1, total: 2 }));
    }

    #[test]
    fn test_build_by_kind() {
        assert_eq!(
            PretextKind::Bert.build(ProblemType::Binary, Some(0)).kind(),
            PretextKind::Bert
        );
        assert_eq!(PretextKind::Supervised.name(), "SUPERVISED_pretext");
    }
}
