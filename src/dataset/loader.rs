//! Batch iteration over an encoded dataset
//!
//! With `num_workers > 0`, batches are assembled on background threads. Worker
//! `w` builds batches `w, w + n, w + 2n, ...` into its own bounded queue and the
//! iterator drains the queues round-robin, so batch order matches the
//! single-threaded path.

use super::targets::Targets;
use super::EncodedFeatures;
use ndarray::{Array2, Axis};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, Receiver};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// Batching behaviour of a [`TabDataLoader`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoaderConfig {
    pub batch_size: usize,
    /// Reshuffle row order on every pass
    pub shuffle: bool,
    /// Background threads assembling batches; `0` assembles on the caller
    pub num_workers: usize,
    /// Batches each worker may queue ahead of the consumer
    pub prefetch_factor: usize,
    /// Skip a trailing batch smaller than `batch_size`
    pub drop_last: bool,
    pub seed: Option<u64>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: 512,
            shuffle: true,
            num_workers: 0,
            prefetch_factor: 2,
            drop_last: false,
            seed: None,
        }
    }
}

impl LoaderConfig {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size,
            ..Default::default()
        }
    }

    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub fn with_num_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers;
        self
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_drop_last(mut self, drop_last: bool) -> Self {
        self.drop_last = drop_last;
        self
    }
}

/// One mini-batch of encoded rows
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// Source row indices
    pub indices: Vec<usize>,
    pub cat: Option<Array2<i64>>,
    pub cont: Option<Array2<f32>>,
    pub target: Option<Targets>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

#[derive(Debug)]
struct BatchSource {
    features: Arc<EncodedFeatures>,
    targets: Option<Arc<Targets>>,
}

impl BatchSource {
    fn gather(&self, indices: &[usize]) -> Batch {
        Batch {
            indices: indices.to_vec(),
            cat: self.features.cat.as_ref().map(|c| c.select(Axis(0), indices)),
            cont: self.features.cont.as_ref().map(|c| c.select(Axis(0), indices)),
            target: self.targets.as_ref().map(|t| t.select(indices)),
        }
    }
}

/// Batch iterator factory for an encoded dataset.
///
/// Carries the categorical cardinalities so a model can size its embedding
/// tables from the loader alone.
#[derive(Debug)]
pub struct TabDataLoader {
    source: Arc<BatchSource>,
    config: LoaderConfig,
    n_rows: usize,
    cat_feat_origin_cards: Vec<(String, usize)>,
    n_cont_features: usize,
    passes: AtomicU64,
}

impl TabDataLoader {
    pub(crate) fn new(
        features: Arc<EncodedFeatures>,
        targets: Option<Arc<Targets>>,
        n_rows: usize,
        config: LoaderConfig,
        cat_feat_origin_cards: Vec<(String, usize)>,
        n_cont_features: usize,
    ) -> Self {
        Self {
            source: Arc::new(BatchSource { features, targets }),
            config,
            n_rows,
            cat_feat_origin_cards,
            n_cont_features,
            passes: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn batch_size(&self) -> usize {
        self.config.batch_size
    }

    /// Rows in the underlying dataset
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    /// `(origin name, cardinality)` of every categorical sub-column
    pub fn cat_feat_origin_cards(&self) -> &[(String, usize)] {
        &self.cat_feat_origin_cards
    }

    pub fn n_cont_features(&self) -> usize {
        self.n_cont_features
    }

    pub fn has_targets(&self) -> bool {
        self.source.targets.is_some()
    }

    /// Number of batches one pass yields
    pub fn len(&self) -> usize {
        let bs = self.config.batch_size.max(1);
        if self.config.drop_last {
            self.n_rows / bs
        } else {
            self.n_rows.div_ceil(bs)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn plan(&self) -> Vec<Vec<usize>> {
        let pass = self.passes.fetch_add(1, Ordering::Relaxed);
        let mut order: Vec<usize> = (0..self.n_rows).collect();
        if self.config.shuffle {
            let mut rng = match self.config.seed {
                Some(seed) => Xoshiro256PlusPlus::seed_from_u64(seed.wrapping_add(pass)),
                None => Xoshiro256PlusPlus::from_entropy(),
            };
            order.shuffle(&mut rng);
        }
        let bs = self.config.batch_size.max(1);
        order
            .chunks(bs)
            .filter(|chunk| !self.config.drop_last || chunk.len() == bs)
            .map(|chunk| chunk.to_vec())
            .collect()
    }

    /// Start one pass over the data
    pub fn iter(&self) -> BatchIter {
        let plan = self.plan();
        let n_batches = plan.len();
        let n_workers = self.config.num_workers.min(n_batches);

        if n_workers == 0 {
            return BatchIter {
                mode: IterMode::Inline {
                    source: Arc::clone(&self.source),
                    plan,
                },
                next: 0,
                n_batches,
            };
        }

        debug!(n_workers, n_batches, "Starting loader workers");
        let plan = Arc::new(plan);
        let capacity = self.config.prefetch_factor.max(1);
        let mut receivers = Vec::with_capacity(n_workers);
        let mut handles = Vec::with_capacity(n_workers);
        for worker in 0..n_workers {
            let (tx, rx) = sync_channel(capacity);
            let source = Arc::clone(&self.source);
            let plan = Arc::clone(&plan);
            handles.push(thread::spawn(move || {
                for b in (worker..plan.len()).step_by(n_workers) {
                    if tx.send(source.gather(&plan[b])).is_err() {
                        break;
                    }
                }
            }));
            receivers.push(rx);
        }

        BatchIter {
            mode: IterMode::Workers { receivers, handles },
            next: 0,
            n_batches,
        }
    }
}

impl<'a> IntoIterator for &'a TabDataLoader {
    type Item = Batch;
    type IntoIter = BatchIter;

    fn into_iter(self) -> BatchIter {
        self.iter()
    }
}

enum IterMode {
    Inline {
        source: Arc<BatchSource>,
        plan: Vec<Vec<usize>>,
    },
    Workers {
        receivers: Vec<Receiver<Batch>>,
        handles: Vec<JoinHandle<()>>,
    },
}

/// One pass over a [`TabDataLoader`]
pub struct BatchIter {
    mode: IterMode,
    next: usize,
    n_batches: usize,
}

impl Iterator for BatchIter {
    type Item = Batch;

    fn next(&mut self) -> Option<Batch> {
        if self.next >= self.n_batches {
            return None;
        }
        let b = self.next;
        self.next += 1;
        let batch = match &self.mode {
            IterMode::Inline { source, plan } => Some(source.gather(&plan[b])),
            IterMode::Workers { receivers, .. } => receivers[b % receivers.len()].recv().ok(),
        };
        if batch.is_none() {
            warn!(
                batch = b,
                n_batches = self.n_batches,
                "Loader worker stopped early, pass is incomplete"
            );
            self.next = self.n_batches;
        }
        batch
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.n_batches - self.next;
        (remaining, Some(remaining))
    }
}

impl Drop for BatchIter {
    fn drop(&mut self) {
        if let IterMode::Workers { receivers, handles } = &mut self.mode {
            // Closing the queues unblocks workers waiting on a full channel
            receivers.clear();
            for handle in handles.drain(..) {
                if handle.join().is_err() {
                    warn!("Loader worker panicked");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array2};

    fn loader(n_rows: usize, config: LoaderConfig) -> TabDataLoader {
        let cat = Array2::from_shape_fn((n_rows, 2), |(r, c)| (r * 10 + c) as i64);
        let targets = Targets::Classes(Array1::from_iter((0..n_rows).map(|r| r as i64)));
        let features = EncodedFeatures {
            cat: Some(cat),
            cont: None,
        };
        TabDataLoader::new(
            Arc::new(features),
            Some(Arc::new(targets)),
            n_rows,
            config,
            vec![("a_0_CATEGORICAL".to_string(), 12)],
            0,
        )
    }

    fn all_indices(loader: &TabDataLoader) -> Vec<usize> {
        loader.iter().flat_map(|b| b.indices).collect()
    }

    #[test]
    fn test_sequential_batches() {
        let l = loader(10, LoaderConfig::new(4).with_shuffle(false));
        let batches: Vec<Batch> = l.iter().collect();
        assert_eq!(batches.len(), 3);
        assert_eq!(l.len(), 3);
        assert_eq!(batches[0].indices, vec![0, 1, 2, 3]);
        assert_eq!(batches[2].len(), 2);

        let cat = batches[1].cat.as_ref().unwrap();
        assert_eq!(cat.row(0).to_vec(), vec![40, 41]);
        assert_eq!(
            batches[1].target,
            Some(Targets::Classes(Array1::from(vec![4, 5, 6, 7])))
        );
    }

    #[test]
    fn test_dead_worker_ends_pass() {
        let (tx, rx) = sync_channel::<Batch>(1);
        drop(tx);
        let failed = thread::spawn(|| panic!("worker failed"));
        let mut iter = BatchIter {
            mode: IterMode::Workers {
                receivers: vec![rx],
                handles: vec![failed],
            },
            next: 0,
            n_batches: 3,
        };
        assert!(iter.next().is_none());
        assert_eq!(iter.size_hint(), (0, Some(0)));
        assert!(iter.next().is_none());
        // joining the panicked worker is logged, not propagated
        drop(iter);
    }

    #[test]
    fn test_drop_last() {
        let l = loader(10, LoaderConfig::new(4).with_shuffle(false).with_drop_last(true));
        assert_eq!(l.len(), 2);
        assert_eq!(l.iter().count(), 2);
    }

    #[test]
    fn test_shuffle_is_a_permutation() {
        let l = loader(50, LoaderConfig::new(8).with_seed(Some(3)));
        let mut seen = all_indices(&l);
        assert_ne!(seen, (0..50).collect::<Vec<_>>());
        seen.sort_unstable();
        assert_eq!(seen, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_seeded_passes_differ() {
        let l = loader(50, LoaderConfig::new(50).with_seed(Some(11)));
        let first = all_indices(&l);
        let second = all_indices(&l);
        assert_ne!(first, second);
    }

    #[test]
    fn test_workers_preserve_order() {
        let inline = loader(37, LoaderConfig::new(5).with_shuffle(false));
        let workers = loader(37, LoaderConfig::new(5).with_shuffle(false).with_num_workers(3));
        let a: Vec<Batch> = inline.iter().collect();
        let b: Vec<Batch> = workers.iter().collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_early_drop_with_workers() {
        let l = loader(100, LoaderConfig::new(2).with_num_workers(2));
        let first_two: Vec<Batch> = l.iter().take(2).collect();
        assert_eq!(first_two.len(), 2);
    }

    #[test]
    fn test_empty_loader() {
        let l = loader(0, LoaderConfig::new(4).with_num_workers(2));
        assert!(l.is_empty());
        assert_eq!(l.iter().count(), 0);
    }

    #[test]
    fn test_metadata_attached() {
        let l = loader(3, LoaderConfig::default());
        assert_eq!(l.cat_feat_origin_cards(), &[("a_0_CATEGORICAL".to_string(), 12)]);
        assert!(l.has_targets());
        assert!(l.config().shuffle);
    }
}
