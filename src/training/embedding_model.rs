//! Reference embedding model
//!
//! Each categorical sub-column gets its own embedding table. Embeddings are
//! concatenated with the continuous block and passed through two ReLU layers
//! into either the primary head or the secondary (pretext) head. Gradients are
//! computed by hand, layer by layer.

use super::model::{Param, TabModel};
use crate::config::HyperParameters;
use crate::error::{Result, TabError};
use ndarray::{s, Array2, Axis};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};

/// Layer sizes for [`TabEmbeddingModel`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingModelConfig {
    pub max_emb_dim: usize,
    pub hidden_dim: usize,
    pub feature_dim: usize,
    pub output_dim: usize,
    pub seed: Option<u64>,
}

impl EmbeddingModelConfig {
    pub fn from_params(params: &HyperParameters) -> Self {
        Self {
            max_emb_dim: params.tab_kwargs.max_emb_dim,
            hidden_dim: params.tab_kwargs.hidden_dim,
            feature_dim: params.feature_dim,
            output_dim: params.output_dim(),
            seed: params.seed,
        }
    }
}

/// Embedding width for a sub-column of cardinality `card`
pub fn embedding_dim(card: usize, max_emb_dim: usize) -> usize {
    max_emb_dim.min((card + 1) / 2).max(1)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Head {
    Primary,
    Pretext,
}

#[derive(Debug, Clone)]
struct Cache {
    head: Head,
    cat: Option<Array2<i64>>,
    x: Array2<f32>,
    z1: Array2<f32>,
    h1: Array2<f32>,
    z2: Array2<f32>,
    h2: Array2<f32>,
}

#[derive(Debug, Clone)]
pub struct TabEmbeddingModel {
    config: EmbeddingModelConfig,
    cat_cards: Vec<usize>,
    emb_dims: Vec<usize>,
    n_cont: usize,
    embeddings: Vec<Param>,
    w1: Param,
    b1: Param,
    w2: Param,
    b2: Param,
    w_out: Param,
    b_out: Param,
    w_pre: Param,
    b_pre: Param,
    cache: Option<Cache>,
}

fn xavier(rng: &mut Xoshiro256PlusPlus, n_in: usize, n_out: usize) -> Array2<f32> {
    let scale = (2.0 / (n_in + n_out).max(1) as f32).sqrt();
    Array2::from_shape_fn((n_in, n_out), |_| rng.gen::<f32>() * 2.0 * scale - scale)
}

fn relu_backward(grad: &mut Array2<f32>, z: &Array2<f32>) {
    grad.zip_mut_with(z, |g, &z| {
        if z <= 0.0 {
            *g = 0.0;
        }
    });
}

impl TabEmbeddingModel {
    pub fn new(cat_cards: &[usize], n_cont: usize, config: EmbeddingModelConfig) -> Result<Self> {
        if cat_cards.is_empty() && n_cont == 0 {
            return Err(TabError::TrainingError("model has no input features".to_string()));
        }
        if config.output_dim == 0 || config.hidden_dim == 0 || config.feature_dim == 0 {
            return Err(TabError::ConfigError(
                "model layer sizes must be positive".to_string(),
            ));
        }

        let mut rng = match config.seed {
            Some(seed) => Xoshiro256PlusPlus::seed_from_u64(seed),
            None => Xoshiro256PlusPlus::from_entropy(),
        };

        let emb_dims: Vec<usize> = cat_cards
            .iter()
            .map(|&card| embedding_dim(card, config.max_emb_dim))
            .collect();
        let embeddings = cat_cards
            .iter()
            .zip(&emb_dims)
            .enumerate()
            .map(|(i, (&card, &dim))| {
                let table = Array2::from_shape_fn((card, dim), |_| rng.gen::<f32>() * 0.2 - 0.1);
                Param::new(format!("embedding.{}", i), table)
            })
            .collect();

        let d_in = emb_dims.iter().sum::<usize>() + n_cont;
        let (h, f) = (config.hidden_dim, config.feature_dim);
        let n_cat = cat_cards.len();

        Ok(Self {
            w1: Param::new("dense1.weight", xavier(&mut rng, d_in, h)),
            b1: Param::new("dense1.bias", Array2::zeros((1, h))),
            w2: Param::new("dense2.weight", xavier(&mut rng, h, f)),
            b2: Param::new("dense2.bias", Array2::zeros((1, f))),
            w_out: Param::new("head.weight", xavier(&mut rng, f, config.output_dim)),
            b_out: Param::new("head.bias", Array2::zeros((1, config.output_dim))),
            w_pre: Param::new("pretext_head.weight", xavier(&mut rng, f, n_cat)),
            b_pre: Param::new("pretext_head.bias", Array2::zeros((1, n_cat))),
            config,
            cat_cards: cat_cards.to_vec(),
            emb_dims,
            n_cont,
            embeddings,
            cache: None,
        })
    }

    /// Size the model from loader metadata
    pub fn from_cards(
        cat_feat_origin_cards: &[(String, usize)],
        n_cont: usize,
        params: &HyperParameters,
    ) -> Result<Self> {
        let cards: Vec<usize> = cat_feat_origin_cards.iter().map(|(_, c)| *c).collect();
        Self::new(&cards, n_cont, EmbeddingModelConfig::from_params(params))
    }

    pub fn cat_cards(&self) -> &[usize] {
        &self.cat_cards
    }

    pub fn embedding_dims(&self) -> &[usize] {
        &self.emb_dims
    }

    pub fn config(&self) -> &EmbeddingModelConfig {
        &self.config
    }

    /// Embedded categorical features followed by the continuous block
    fn input(&self, cat: Option<&Array2<i64>>, cont: Option<&Array2<f32>>) -> Result<Array2<f32>> {
        let n_rows = match (cat, cont) {
            (Some(c), _) => c.nrows(),
            (None, Some(c)) => c.nrows(),
            (None, None) => return Err(TabError::DataError("batch has no features".to_string())),
        };
        let cat_width = cat.map_or(0, |c| c.ncols());
        let cont_width = cont.map_or(0, |c| c.ncols());
        if cat_width != self.cat_cards.len() || cont_width != self.n_cont {
            return Err(TabError::ShapeError {
                expected: format!("{} categorical, {} continuous", self.cat_cards.len(), self.n_cont),
                actual: format!("{} categorical, {} continuous", cat_width, cont_width),
            });
        }

        let d_in = self.emb_dims.iter().sum::<usize>() + self.n_cont;
        let mut x = Array2::<f32>::zeros((n_rows, d_in));
        let mut offset = 0;
        if let Some(cat) = cat {
            for (j, (table, &dim)) in self.embeddings.iter().zip(&self.emb_dims).enumerate() {
                for (r, &code) in cat.column(j).iter().enumerate() {
                    let row = usize::try_from(code)
                        .ok()
                        .filter(|&c| c < self.cat_cards[j])
                        .ok_or_else(|| {
                            TabError::DataError(format!(
                                "code {} out of range for categorical feature {} of cardinality {}",
                                code, j, self.cat_cards[j]
                            ))
                        })?;
                    x.slice_mut(s![r, offset..offset + dim])
                        .assign(&table.value.row(row));
                }
                offset += dim;
            }
        }
        if let Some(cont) = cont {
            if cont.nrows() != n_rows {
                return Err(TabError::ShapeError {
                    expected: format!("{} rows", n_rows),
                    actual: format!("{} continuous rows", cont.nrows()),
                });
            }
            x.slice_mut(s![.., offset..]).assign(cont);
        }
        Ok(x)
    }

    fn run(
        &mut self,
        head: Head,
        cat: Option<&Array2<i64>>,
        cont: Option<&Array2<f32>>,
    ) -> Result<Array2<f32>> {
        let x = self.input(cat, cont)?;
        let z1 = x.dot(&self.w1.value) + &self.b1.value;
        let h1 = z1.mapv(|v| v.max(0.0));
        let z2 = h1.dot(&self.w2.value) + &self.b2.value;
        let h2 = z2.mapv(|v| v.max(0.0));
        let out = match head {
            Head::Primary => h2.dot(&self.w_out.value) + &self.b_out.value,
            Head::Pretext => h2.dot(&self.w_pre.value) + &self.b_pre.value,
        };
        self.cache = Some(Cache {
            head,
            cat: cat.cloned(),
            x,
            z1,
            h1,
            z2,
            h2,
        });
        Ok(out)
    }
}

impl TabModel for TabEmbeddingModel {
    fn forward(&mut self, cat: Option<&Array2<i64>>, cont: Option<&Array2<f32>>) -> Result<Array2<f32>> {
        self.run(Head::Primary, cat, cont)
    }

    fn forward_pretext(
        &mut self,
        cat: Option<&Array2<i64>>,
        cont: Option<&Array2<f32>>,
    ) -> Result<Array2<f32>> {
        if self.cat_cards.is_empty() {
            return Err(TabError::TrainingError(
                "pretext head needs categorical features".to_string(),
            ));
        }
        self.run(Head::Pretext, cat, cont)
    }

    fn backward(&mut self, grad_output: &Array2<f32>) -> Result<()> {
        let cache = self
            .cache
            .take()
            .ok_or_else(|| TabError::TrainingError("backward called before forward".to_string()))?;
        let (w_head, b_head) = match cache.head {
            Head::Primary => (&mut self.w_out, &mut self.b_out),
            Head::Pretext => (&mut self.w_pre, &mut self.b_pre),
        };
        if grad_output.nrows() != cache.h2.nrows() || grad_output.ncols() != w_head.value.ncols() {
            return Err(TabError::ShapeError {
                expected: format!("({}, {})", cache.h2.nrows(), w_head.value.ncols()),
                actual: format!("{:?}", grad_output.shape()),
            });
        }

        w_head.grad += &cache.h2.t().dot(grad_output);
        b_head.grad += &grad_output.sum_axis(Axis(0)).insert_axis(Axis(0));
        let mut d2 = grad_output.dot(&w_head.value.t());
        relu_backward(&mut d2, &cache.z2);

        self.w2.grad += &cache.h1.t().dot(&d2);
        self.b2.grad += &d2.sum_axis(Axis(0)).insert_axis(Axis(0));
        let mut d1 = d2.dot(&self.w2.value.t());
        relu_backward(&mut d1, &cache.z1);

        self.w1.grad += &cache.x.t().dot(&d1);
        self.b1.grad += &d1.sum_axis(Axis(0)).insert_axis(Axis(0));

        if let Some(cat) = &cache.cat {
            let dx = d1.dot(&self.w1.value.t());
            let mut offset = 0;
            for (j, (table, &dim)) in self.embeddings.iter_mut().zip(&self.emb_dims).enumerate() {
                for (r, &code) in cat.column(j).iter().enumerate() {
                    // codes were range-checked in forward
                    let mut row = table.grad.row_mut(code as usize);
                    row += &dx.slice(s![r, offset..offset + dim]);
                }
                offset += dim;
            }
        }
        Ok(())
    }

    fn params(&self) -> Vec<&Param> {
        let mut params: Vec<&Param> = self.embeddings.iter().collect();
        params.extend([
            &self.w1,
            &self.b1,
            &self.w2,
            &self.b2,
            &self.w_out,
            &self.b_out,
            &self.w_pre,
            &self.b_pre,
        ]);
        params
    }

    fn params_mut(&mut self) -> Vec<&mut Param> {
        let mut params: Vec<&mut Param> = self.embeddings.iter_mut().collect();
        params.extend([
            &mut self.w1,
            &mut self.b1,
            &mut self.w2,
            &mut self.b2,
            &mut self.w_out,
            &mut self.b_out,
            &mut self.w_pre,
            &mut self.b_pre,
        ]);
        params
    }

    fn output_dim(&self) -> usize {
        self.config.output_dim
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn config(output_dim: usize) -> EmbeddingModelConfig {
        EmbeddingModelConfig {
            max_emb_dim: 8,
            hidden_dim: 6,
            feature_dim: 4,
            output_dim,
            seed: Some(3),
        }
    }

    #[test]
    fn test_embedding_dim_rule() {
        assert_eq!(embedding_dim(7, 8), 4);
        assert_eq!(embedding_dim(100, 8), 8);
        assert_eq!(embedding_dim(1, 8), 1);
    }

    #[test]
    fn test_output_shapes() {
        let mut model = TabEmbeddingModel::new(&[5, 7], 1, config(3)).unwrap();
        let cat = array![[2i64, 3], [4, 6]];
        let cont = array![[0.5f32], [-0.5]];
        assert_eq!(model.forward(Some(&cat), Some(&cont)).unwrap().shape(), &[2, 3]);
        assert_eq!(model.forward_pretext(Some(&cat), Some(&cont)).unwrap().shape(), &[2, 2]);
        assert_eq!(model.embedding_dims(), &[3, 4]);
    }

    #[test]
    fn test_out_of_range_code_rejected() {
        let mut model = TabEmbeddingModel::new(&[4], 0, config(1)).unwrap();
        assert!(model.forward(Some(&array![[4i64]]), None).is_err());
        assert!(model.forward(Some(&array![[1i64, 2]]), None).is_err());
    }

    #[test]
    fn test_no_features_rejected() {
        assert!(TabEmbeddingModel::new(&[], 0, config(1)).is_err());
    }

    #[test]
    fn test_backward_matches_finite_difference() {
        let mut model = TabEmbeddingModel::new(&[5], 2, config(1)).unwrap();
        let cat = array![[2i64], [3], [4]];
        let cont = array![[0.3f32, -1.0], [1.2, 0.4], [-0.7, 0.9]];

        // loss = sum(output)
        let out = model.forward(Some(&cat), Some(&cont)).unwrap();
        model.zero_grad();
        model.backward(&Array2::ones(out.raw_dim())).unwrap();

        let eps = 1e-3f32;
        for idx in 0..model.params().len() {
            let analytic = model.params()[idx].grad.clone();
            let shape = analytic.dim();
            for (r, c) in [(0, 0), (shape.0 - 1, shape.1 - 1)] {
                let orig = model.params()[idx].value[[r, c]];
                model.params_mut()[idx].value[[r, c]] = orig + eps;
                let plus = model.forward(Some(&cat), Some(&cont)).unwrap().sum();
                model.params_mut()[idx].value[[r, c]] = orig - eps;
                let minus = model.forward(Some(&cat), Some(&cont)).unwrap().sum();
                model.params_mut()[idx].value[[r, c]] = orig;

                let numeric = (plus - minus) / (2.0 * eps);
                assert!(
                    (numeric - analytic[[r, c]]).abs() < 1e-2,
                    "param {} [{}, {}]: numeric {} analytic {}",
                    model.params()[idx].name,
                    r,
                    c,
                    numeric,
                    analytic[[r, c]]
                );
            }
        }
    }

    #[test]
    fn test_backward_without_forward_fails() {
        let mut model = TabEmbeddingModel::new(&[5], 0, config(1)).unwrap();
        assert!(model.backward(&array![[1.0f32]]).is_err());
    }
}
