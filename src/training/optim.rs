//! Optimisers and learning-rate schedules
//!
//! - [`Sgd`] - momentum SGD with decoupled L2 shrinkage
//! - [`AdamW`] - Adam with decoupled weight decay
//! - [`ExponentialLr`] - multiply the learning rate by `gamma` per step

use super::model::Param;
use ndarray::Array2;

/// Applies accumulated gradients to parameters
pub trait Optimizer: Send {
    /// Update every parameter from its gradient.
    ///
    /// Parameters must be passed in the same order on every call.
    fn step(&mut self, params: &mut [&mut Param]);

    fn lr(&self) -> f64;

    fn set_lr(&mut self, lr: f64);
}

/// Adjusts optimiser learning rates between epochs
pub trait LrScheduler: Send {
    /// Advance one epoch and apply the new rate to every optimiser
    fn step(&mut self, optimizers: &mut [&mut dyn Optimizer]);

    /// Rate applied by the last step
    fn last_lr(&self) -> f64;
}

fn state_for(state: &mut Vec<Array2<f32>>, params: &[&mut Param]) {
    if state.len() != params.len() {
        *state = params.iter().map(|p| Array2::zeros(p.value.raw_dim())).collect();
    }
}

/// Stochastic gradient descent with momentum
#[derive(Debug, Clone)]
pub struct Sgd {
    lr: f64,
    momentum: f64,
    weight_decay: f64,
    velocity: Vec<Array2<f32>>,
}

impl Sgd {
    pub fn new(lr: f64) -> Self {
        Self {
            lr,
            momentum: 0.0,
            weight_decay: 0.0,
            velocity: Vec::new(),
        }
    }

    pub fn with_momentum(mut self, momentum: f64) -> Self {
        self.momentum = momentum;
        self
    }

    pub fn with_weight_decay(mut self, weight_decay: f64) -> Self {
        self.weight_decay = weight_decay;
        self
    }
}

impl Optimizer for Sgd {
    fn step(&mut self, params: &mut [&mut Param]) {
        state_for(&mut self.velocity, params);
        let lr = self.lr as f32;
        let momentum = self.momentum as f32;
        let shrink = 1.0 - (self.lr * self.weight_decay) as f32;
        for (p, v) in params.iter_mut().zip(self.velocity.iter_mut()) {
            v.zip_mut_with(&p.grad, |v, &g| *v = momentum * *v - lr * g);
            p.value.zip_mut_with(&*v, |w, &dv| *w = *w * shrink + dv);
        }
    }

    fn lr(&self) -> f64 {
        self.lr
    }

    fn set_lr(&mut self, lr: f64) {
        self.lr = lr;
    }
}

/// Adam with decoupled weight decay
#[derive(Debug, Clone)]
pub struct AdamW {
    lr: f64,
    beta1: f64,
    beta2: f64,
    eps: f64,
    weight_decay: f64,
    t: i32,
    m: Vec<Array2<f32>>,
    v: Vec<Array2<f32>>,
}

impl AdamW {
    pub fn new(lr: f64, weight_decay: f64) -> Self {
        Self {
            lr,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            weight_decay,
            t: 0,
            m: Vec::new(),
            v: Vec::new(),
        }
    }

    pub fn with_betas(mut self, beta1: f64, beta2: f64) -> Self {
        self.beta1 = beta1;
        self.beta2 = beta2;
        self
    }
}

impl Optimizer for AdamW {
    fn step(&mut self, params: &mut [&mut Param]) {
        state_for(&mut self.m, params);
        state_for(&mut self.v, params);
        self.t += 1;

        let (b1, b2) = (self.beta1 as f32, self.beta2 as f32);
        let bias1 = 1.0 - self.beta1.powi(self.t);
        let bias2 = 1.0 - self.beta2.powi(self.t);
        let step = (self.lr * bias2.sqrt() / bias1) as f32;
        let eps = self.eps as f32;
        let decay = (self.lr * self.weight_decay) as f32;

        for ((p, m), v) in params.iter_mut().zip(self.m.iter_mut()).zip(self.v.iter_mut()) {
            m.zip_mut_with(&p.grad, |m, &g| *m = b1 * *m + (1.0 - b1) * g);
            v.zip_mut_with(&p.grad, |v, &g| *v = b2 * *v + (1.0 - b2) * g * g);
            ndarray::Zip::from(&mut p.value)
                .and(&*m)
                .and(&*v)
                .for_each(|w, &m, &v| {
                    *w -= decay * *w;
                    *w -= step * m / (v.sqrt() + eps);
                });
        }
    }

    fn lr(&self) -> f64 {
        self.lr
    }

    fn set_lr(&mut self, lr: f64) {
        self.lr = lr;
    }
}

/// `lr = base_lr * gamma^epoch`
#[derive(Debug, Clone)]
pub struct ExponentialLr {
    base_lr: f64,
    gamma: f64,
    epoch: i32,
}

impl ExponentialLr {
    pub fn new(base_lr: f64, gamma: f64) -> Self {
        Self {
            base_lr,
            gamma,
            epoch: 0,
        }
    }

    pub fn epoch(&self) -> usize {
        self.epoch as usize
    }
}

impl LrScheduler for ExponentialLr {
    fn step(&mut self, optimizers: &mut [&mut dyn Optimizer]) {
        self.epoch += 1;
        let lr = self.last_lr();
        for opt in optimizers.iter_mut() {
            opt.set_lr(lr);
        }
    }

    fn last_lr(&self) -> f64 {
        self.base_lr * self.gamma.powi(self.epoch)
    }
}
