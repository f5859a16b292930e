//! Batching data loader with a prefetching worker pool
//!
//! Each epoch the item order is shuffled with `seed + epoch`. Workers build
//! whole batches and hand them back over a bounded channel; the iterator
//! reorders them so batches always come out in plan order.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use ndarray::Array3;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use vx_spectral::stack_waveforms;

use crate::dataset::Dataset;
use crate::error::{TrainError, TrainResult};

/// A stacked batch of aligned mixture/vocal waveforms
#[derive(Debug, Clone)]
pub struct Batch {
    /// Position within the epoch
    pub index: usize,
    /// Dataset indices of the items
    pub items: Vec<usize>,
    /// `(batch, channels, samples)`
    pub mixture: Array3<f32>,
    /// `(batch, channels, samples)`
    pub vocals: Array3<f32>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Loader settings
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    pub batch_size: usize,
    pub shuffle: bool,
    /// 0 = build batches on the calling thread
    pub num_workers: usize,
    /// Finished batches buffered ahead of the consumer
    pub prefetch: usize,
    pub seed: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: 4,
            shuffle: true,
            num_workers: 4,
            prefetch: 4,
            seed: 0,
        }
    }
}

/// Splits a dataset into batches, one epoch at a time
pub struct DataLoader {
    dataset: Arc<dyn Dataset>,
    config: LoaderConfig,
}

impl DataLoader {
    pub fn new(dataset: Arc<dyn Dataset>, config: LoaderConfig) -> TrainResult<Self> {
        if config.batch_size == 0 {
            return Err(TrainError::Config("loader batch_size must be at least 1".into()));
        }
        Ok(Self { dataset, config })
    }

    pub fn dataset_len(&self) -> usize {
        self.dataset.len()
    }

    /// Number of batches per epoch (last batch may be short)
    pub fn batch_count(&self) -> usize {
        self.dataset.len().div_ceil(self.config.batch_size)
    }

    /// Item order for `epoch`, split into batches
    pub fn plan(&self, epoch: usize) -> Vec<Vec<usize>> {
        let mut order: Vec<usize> = (0..self.dataset.len()).collect();
        if self.config.shuffle {
            let mut rng = ChaCha8Rng::seed_from_u64(self.epoch_seed(epoch));
            order.shuffle(&mut rng);
        }
        order
            .chunks(self.config.batch_size)
            .map(|c| c.to_vec())
            .collect()
    }

    fn epoch_seed(&self, epoch: usize) -> u64 {
        self.config.seed.wrapping_add(epoch as u64)
    }

    /// Iterate the batches of one epoch
    pub fn epoch(&self, epoch: usize) -> BatchIter {
        let plan = self.plan(epoch);
        let seed = self.epoch_seed(epoch);
        let total = plan.len();

        if self.config.num_workers == 0 || total == 0 {
            return BatchIter {
                total,
                next: 0,
                source: Source::Inline {
                    dataset: Arc::clone(&self.dataset),
                    plan,
                    seed,
                },
            };
        }

        let (job_tx, job_rx) = unbounded::<(usize, Vec<usize>)>();
        for job in plan.into_iter().enumerate() {
            // receiver is alive until the workers below are spawned
            let _ = job_tx.send(job);
        }
        drop(job_tx);

        let (result_tx, result_rx) = bounded(self.config.prefetch.max(1));
        let shutdown = Arc::new(AtomicBool::new(false));
        let workers_wanted = self.config.num_workers.min(total);
        let mut workers = Vec::with_capacity(workers_wanted);

        for i in 0..workers_wanted {
            let jobs = job_rx.clone();
            let results = result_tx.clone();
            let flag = Arc::clone(&shutdown);
            let dataset = Arc::clone(&self.dataset);

            match thread::Builder::new()
                .name(format!("vx-loader-{}", i))
                .spawn(move || Self::worker_loop(dataset, jobs, results, flag, seed))
            {
                Ok(handle) => workers.push(handle),
                Err(e) => log::error!("Failed to spawn loader thread {}: {}", i, e),
            }
        }

        if workers.is_empty() {
            log::warn!("No loader workers running, building batches inline");
            let plan: Vec<Vec<usize>> = job_rx.try_iter().map(|(_, items)| items).collect();
            return BatchIter {
                total,
                next: 0,
                source: Source::Inline {
                    dataset: Arc::clone(&self.dataset),
                    plan,
                    seed,
                },
            };
        }

        log::debug!("Epoch {}: {} batches on {} workers", epoch, total, workers.len());

        BatchIter {
            total,
            next: 0,
            source: Source::Workers {
                results: Some(result_rx),
                pending: BTreeMap::new(),
                workers,
                shutdown,
            },
        }
    }

    fn worker_loop(
        dataset: Arc<dyn Dataset>,
        jobs: Receiver<(usize, Vec<usize>)>,
        results: Sender<(usize, TrainResult<Batch>)>,
        shutdown: Arc<AtomicBool>,
        seed: u64,
    ) {
        for (index, items) in jobs.iter() {
            if shutdown.load(Ordering::Relaxed) {
                break;
            }
            let batch = build_batch(dataset.as_ref(), index, items, seed);
            if results.send((index, batch)).is_err() {
                break;
            }
        }
    }
}

fn build_batch(
    dataset: &dyn Dataset,
    index: usize,
    items: Vec<usize>,
    seed: u64,
) -> TrainResult<Batch> {
    let mut mixtures = Vec::with_capacity(items.len());
    let mut vocals = Vec::with_capacity(items.len());
    for &item in &items {
        let sample = dataset.item(item, seed)?;
        mixtures.push(sample.mixture);
        vocals.push(sample.vocals);
    }

    Ok(Batch {
        index,
        mixture: stack_waveforms(&mixtures)?,
        vocals: stack_waveforms(&vocals)?,
        items,
    })
}

enum Source {
    Inline {
        dataset: Arc<dyn Dataset>,
        plan: Vec<Vec<usize>>,
        seed: u64,
    },
    Workers {
        results: Option<Receiver<(usize, TrainResult<Batch>)>>,
        pending: BTreeMap<usize, TrainResult<Batch>>,
        workers: Vec<JoinHandle<()>>,
        shutdown: Arc<AtomicBool>,
    },
}

/// Ordered batches of one epoch
pub struct BatchIter {
    total: usize,
    next: usize,
    source: Source,
}

impl BatchIter {
    /// Total batches in this epoch
    pub fn total(&self) -> usize {
        self.total
    }
}

impl Iterator for BatchIter {
    type Item = TrainResult<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.total {
            return None;
        }
        let index = self.next;
        self.next += 1;

        match &mut self.source {
            Source::Inline {
                dataset,
                plan,
                seed,
            } => {
                let items = std::mem::take(&mut plan[index]);
                Some(build_batch(dataset.as_ref(), index, items, *seed))
            }
            Source::Workers {
                results, pending, ..
            } => {
                if let Some(batch) = pending.remove(&index) {
                    return Some(batch);
                }
                let rx = results.as_ref()?;
                loop {
                    match rx.recv() {
                        Ok((i, batch)) if i == index => return Some(batch),
                        Ok((i, batch)) => {
                            pending.insert(i, batch);
                        }
                        Err(_) => {
                            // all workers gone before delivering this batch
                            self.next = self.total;
                            return Some(Err(TrainError::Loader(format!(
                                "loader workers exited before batch {}",
                                index
                            ))));
                        }
                    }
                }
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.total - self.next;
        (left, Some(left))
    }
}

impl Drop for BatchIter {
    fn drop(&mut self) {
        if let Source::Workers {
            results,
            workers,
            shutdown,
            ..
        } = &mut self.source
        {
            shutdown.store(true, Ordering::Relaxed);
            // unblocks workers waiting on a full channel
            results.take();
            for handle in workers.drain(..) {
                if handle.join().is_err() {
                    log::error!("Loader worker panicked");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{InMemoryDataset, Sample};
    use ndarray::Array2;

    fn dataset(n: usize, len: usize) -> Arc<dyn Dataset> {
        let samples = (0..n)
            .map(|i| Sample {
                mixture: Array2::from_elem((1, len), i as f32),
                vocals: Array2::from_elem((1, len), -(i as f32)),
            })
            .collect();
        Arc::new(InMemoryDataset::new(samples))
    }

    fn config(workers: usize) -> LoaderConfig {
        LoaderConfig {
            batch_size: 3,
            shuffle: true,
            num_workers: workers,
            prefetch: 1,
            seed: 5,
        }
    }

    #[test]
    fn test_plan_covers_every_item_once() {
        let loader = DataLoader::new(dataset(10, 8), config(0)).unwrap();
        assert_eq!(loader.batch_count(), 4);

        let plan = loader.plan(0);
        assert_eq!(plan.len(), 4);
        assert_eq!(plan[3].len(), 1);
        let mut all: Vec<usize> = plan.concat();
        all.sort();
        assert_eq!(all, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_shuffle_is_seeded_per_epoch() {
        let loader = DataLoader::new(dataset(32, 8), config(0)).unwrap();
        assert_eq!(loader.plan(3), loader.plan(3));
        assert_ne!(loader.plan(0), loader.plan(1));
    }

    #[test]
    fn test_workers_preserve_order() {
        let inline = DataLoader::new(dataset(20, 16), config(0)).unwrap();
        let pooled = DataLoader::new(dataset(20, 16), config(4)).unwrap();

        let a: Vec<Batch> = inline.epoch(2).map(|b| b.unwrap()).collect();
        let b: Vec<Batch> = pooled.epoch(2).map(|b| b.unwrap()).collect();
        assert_eq!(a.len(), 7);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.index, y.index);
            assert_eq!(x.items, y.items);
            assert_eq!(x.mixture, y.mixture);
        }
        assert_eq!(b[0].mixture.dim(), (3, 1, 16));
        assert_eq!(b[0].mixture[[1, 0, 0]], b[0].items[1] as f32);
    }

    #[test]
    fn test_early_drop_joins_workers() {
        let loader = DataLoader::new(dataset(40, 16), config(3)).unwrap();
        let mut iter = loader.epoch(0);
        assert!(iter.next().unwrap().is_ok());
        drop(iter);
    }

    #[test]
    fn test_mismatched_item_surfaces_error() {
        let mut ds = InMemoryDataset::default();
        ds.push(Array2::zeros((1, 8)), Array2::zeros((1, 8)));
        ds.push(Array2::zeros((1, 9)), Array2::zeros((1, 9)));
        let loader = DataLoader::new(
            Arc::new(ds),
            LoaderConfig {
                batch_size: 2,
                shuffle: false,
                num_workers: 0,
                ..Default::default()
            },
        )
        .unwrap();

        let err = loader.epoch(0).next().unwrap().unwrap_err();
        assert!(err.is_batch_recoverable());
    }
}
