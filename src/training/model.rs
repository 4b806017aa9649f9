//! Model interface driven by the epoch runner

use crate::error::Result;
use ndarray::Array2;

/// A trainable weight matrix and its accumulated gradient
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub value: Array2<f32>,
    pub grad: Array2<f32>,
}

impl Param {
    pub fn new(name: impl Into<String>, value: Array2<f32>) -> Self {
        let grad = Array2::zeros(value.raw_dim());
        Self {
            name: name.into(),
            value,
            grad,
        }
    }

    pub fn zero_grad(&mut self) {
        self.grad.fill(0.0);
    }

    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

/// Model with a primary (task) head and a secondary (pretext) head.
///
/// Forward calls cache the activations that the following
/// [`backward`](TabModel::backward) needs. Neither forward call may change
/// a parameter value.
pub trait TabModel: Send {
    /// Primary head: one row per input row, [`output_dim`](TabModel::output_dim) columns
    fn forward(&mut self, cat: Option<&Array2<i64>>, cont: Option<&Array2<f32>>) -> Result<Array2<f32>>;

    /// Secondary head: one logit per categorical position
    fn forward_pretext(
        &mut self,
        cat: Option<&Array2<i64>>,
        cont: Option<&Array2<f32>>,
    ) -> Result<Array2<f32>>;

    /// Accumulate parameter gradients for the loss gradient of the last forward output
    fn backward(&mut self, grad_output: &Array2<f32>) -> Result<()>;

    fn params(&self) -> Vec<&Param>;

    fn params_mut(&mut self) -> Vec<&mut Param>;

    fn output_dim(&self) -> usize;

    fn zero_grad(&mut self) {
        for p in self.params_mut() {
            p.zero_grad();
        }
    }

    /// Copy of every parameter value, in [`params`](TabModel::params) order
    fn snapshot(&self) -> Vec<Array2<f32>> {
        self.params().into_iter().map(|p| p.value.clone()).collect()
    }

    /// Restore values captured by [`snapshot`](TabModel::snapshot)
    fn restore(&mut self, snapshot: &[Array2<f32>]) {
        for (p, value) in self.params_mut().into_iter().zip(snapshot) {
            p.value.assign(value);
        }
    }

    fn n_parameters(&self) -> usize {
        self.params().iter().map(|p| p.len()).sum()
    }
}
