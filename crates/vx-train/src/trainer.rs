//! Training/validation state machine
//!
//! ```text
//! Training(epoch, batch) → Validating(epoch) → Checkpointing(epoch)?
//!     → EarlyStopCheck(epoch) → Training(epoch + 1, 0) | Terminated(reason)
//! ```
//!
//! Loss is the MSE between the model output and the normalized vocal target.
//! Only a strictly improving validation loss writes a checkpoint and exports
//! predictions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use ndarray::Axis;
use vx_spectral::{Encoded, SeparationPipeline};

use crate::accumulator::{mse, LossAccumulator};
use crate::checkpoint::{Checkpoint, CheckpointStore, OptimizerState};
use crate::config::TrainConfig;
use crate::dataset::Dataset;
use crate::early_stop::{EarlyStopping, Verdict};
use crate::error::{TrainError, TrainResult};
use crate::export::PredictionExporter;
use crate::loader::{Batch, DataLoader, LoaderConfig};
use crate::model::TrainableModel;
use crate::scheduler::PlateauScheduler;

/// Where the state machine currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Training { epoch: usize, batch: usize },
    Validating { epoch: usize },
    Checkpointing { epoch: usize },
    EarlyStopCheck { epoch: usize },
    Terminated(StopReason),
}

/// Why a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Validation loss stalled past patience
    EarlyStopped { epoch: usize },
    /// All configured epochs ran
    MaxEpochs,
    /// Stop flag raised between batches
    Interrupted { epoch: usize },
}

/// Per-epoch statistics
#[derive(Debug, Clone, PartialEq)]
pub struct EpochReport {
    pub epoch: usize,
    pub train_loss: f64,
    pub val_loss: f64,
    /// Learning rate after the scheduler step
    pub learning_rate: f64,
    pub improved: bool,
    pub stall_count: usize,
    pub train_batches: usize,
    pub val_batches: usize,
    /// Batches dropped after a recoverable error
    pub skipped_batches: usize,
    /// Items left out for a degenerate mixture envelope
    pub excluded_items: usize,
    pub elapsed_secs: f64,
}

/// Outcome of [`Trainer::run`]
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSummary {
    pub reason: StopReason,
    pub best_loss: Option<f64>,
    pub best_epoch: Option<usize>,
    pub steps: u64,
    pub epochs: Vec<EpochReport>,
}

/// Loss of one batch over the items that were kept
#[derive(Debug, Clone, Copy)]
struct BatchLoss {
    loss: Option<f64>,
    items: usize,
    excluded: usize,
}

#[derive(Debug, Default)]
struct PassStats {
    loss: LossAccumulator,
    skipped: usize,
    excluded: usize,
    interrupted: bool,
}

impl PassStats {
    fn record(&mut self, batch: BatchLoss) {
        if let Some(loss) = batch.loss {
            self.loss = self.loss.add(loss, batch.items as f64);
        }
        self.excluded += batch.excluded;
    }
}

/// Drives a [`TrainableModel`] through training epochs
pub struct Trainer<M: TrainableModel> {
    config: TrainConfig,
    model: M,
    pipeline: SeparationPipeline,
    train_loader: DataLoader,
    val_loader: DataLoader,
    checkpoints: CheckpointStore,
    exporter: Option<PredictionExporter>,
    early_stopping: EarlyStopping,
    scheduler: PlateauScheduler,
    phase: Phase,
    stop: Arc<AtomicBool>,
    step: u64,
    start_epoch: usize,
    best_epoch: Option<usize>,
}

impl<M: TrainableModel> Trainer<M> {
    pub fn new(
        config: TrainConfig,
        mut model: M,
        train: Arc<dyn Dataset>,
        val: Arc<dyn Dataset>,
    ) -> TrainResult<Self> {
        config.validate()?;
        if train.is_empty() || val.is_empty() {
            return Err(TrainError::Loader(format!(
                "empty dataset (train {}, validation {})",
                train.len(),
                val.len()
            )));
        }

        let pipeline = SeparationPipeline::new(config.spectral.clone())?;

        let loader_config = LoaderConfig {
            batch_size: config.batch_size,
            shuffle: true,
            num_workers: config.num_workers,
            prefetch: config.prefetch,
            seed: config.seed,
        };
        let train_loader = DataLoader::new(train, loader_config.clone())?;
        let val_loader = DataLoader::new(
            val,
            LoaderConfig {
                shuffle: false,
                ..loader_config
            },
        )?;

        model.set_learning_rate(config.learning_rate);

        log::info!(
            "Trainer: model {}, {} train / {} val items, batch {}, {} epochs",
            model.name(),
            train_loader.dataset_len(),
            val_loader.dataset_len(),
            config.batch_size,
            config.num_epochs
        );

        Ok(Self {
            checkpoints: CheckpointStore::new(&config.checkpoint_dir),
            exporter: config
                .export_predictions
                .then(|| PredictionExporter::new(&config.export_dir)),
            early_stopping: EarlyStopping::new(config.patience),
            scheduler: PlateauScheduler::new(config.scheduler.clone()),
            config,
            model,
            pipeline,
            train_loader,
            val_loader,
            phase: Phase::Idle,
            stop: Arc::new(AtomicBool::new(false)),
            step: 0,
            start_epoch: 0,
            best_epoch: None,
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn into_model(self) -> M {
        self.model
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    /// Flag that stops the run at the next batch boundary
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Continue from the latest checkpoint; returns its epoch
    pub fn resume(&mut self) -> TrainResult<Option<usize>> {
        let Some(checkpoint) = self.checkpoints.latest()? else {
            log::info!(
                "No checkpoint in {}, starting fresh",
                self.checkpoints.dir().display()
            );
            return Ok(None);
        };

        self.checkpoints.restore(&mut self.model, &checkpoint)?;
        self.step = checkpoint.optimizer.step;
        self.start_epoch = checkpoint.epoch + 1;
        self.best_epoch = Some(checkpoint.epoch);
        self.scheduler = checkpoint.scheduler;
        self.early_stopping = checkpoint.early_stopping;

        log::info!(
            "Resuming after epoch {} (best val loss {:?}, lr {:.2e})",
            checkpoint.epoch,
            self.early_stopping.best_loss(),
            self.model.learning_rate()
        );
        Ok(Some(checkpoint.epoch))
    }

    /// Run until early stopping, the epoch limit or the stop flag
    pub fn run(&mut self) -> TrainResult<TrainingSummary> {
        let mut reports = Vec::new();

        for epoch in self.start_epoch..self.config.num_epochs {
            let started = Instant::now();

            self.phase = Phase::Training { epoch, batch: 0 };
            let train = self.train_epoch(epoch)?;
            if train.interrupted {
                return Ok(self.finish(StopReason::Interrupted { epoch }, reports));
            }

            self.phase = Phase::Validating { epoch };
            let val = self.validate(epoch)?;

            let train_loss = train.loss.finalize().ok_or(TrainError::EmptyEpoch {
                epoch,
                phase: "training",
            })?;
            let val_loss = val.loss.finalize().ok_or(TrainError::EmptyEpoch {
                epoch,
                phase: "validation",
            })?;

            if let Some(lr) = self.scheduler.step(val_loss, self.model.learning_rate()) {
                self.model.set_learning_rate(lr);
            }

            let verdict = self.early_stopping.observe(val_loss);
            if verdict.improved() {
                self.phase = Phase::Checkpointing { epoch };
                self.save_checkpoint(epoch, train_loss, val_loss)?;
                self.export_predictions(epoch)?;
                self.best_epoch = Some(epoch);
            }

            self.phase = Phase::EarlyStopCheck { epoch };
            let report = EpochReport {
                epoch,
                train_loss,
                val_loss,
                learning_rate: self.model.learning_rate(),
                improved: verdict.improved(),
                stall_count: self.early_stopping.stall_count(),
                train_batches: train.loss.batches(),
                val_batches: val.loss.batches(),
                skipped_batches: train.skipped + val.skipped,
                excluded_items: train.excluded + val.excluded,
                elapsed_secs: started.elapsed().as_secs_f64(),
            };
            log::info!(
                "Epoch {}: train {:.6}, val {:.6}{}, lr {:.2e}, {:.1}s",
                epoch,
                report.train_loss,
                report.val_loss,
                if report.improved { " (best)" } else { "" },
                report.learning_rate,
                report.elapsed_secs
            );
            reports.push(report);

            if let Verdict::Stop { stall_count } = verdict {
                log::info!(
                    "Early stopping at epoch {}: {} epochs without improvement",
                    epoch,
                    stall_count
                );
                return Ok(self.finish(StopReason::EarlyStopped { epoch }, reports));
            }
        }

        Ok(self.finish(StopReason::MaxEpochs, reports))
    }

    fn finish(&mut self, reason: StopReason, epochs: Vec<EpochReport>) -> TrainingSummary {
        self.phase = Phase::Terminated(reason);
        TrainingSummary {
            reason,
            best_loss: self.early_stopping.best_loss(),
            best_epoch: self.best_epoch,
            steps: self.step,
            epochs,
        }
    }

    fn train_epoch(&mut self, epoch: usize) -> TrainResult<PassStats> {
        let mut stats = PassStats::default();
        let batches = self.train_loader.epoch(epoch);
        let total = batches.total();

        for batch in batches {
            if self.stop.load(Ordering::Relaxed) {
                log::warn!("Stop requested during epoch {}", epoch);
                stats.interrupted = true;
                break;
            }

            let outcome = batch.and_then(|batch| {
                self.phase = Phase::Training {
                    epoch,
                    batch: batch.index,
                };
                self.train_batch(&batch)
            });

            match outcome {
                Ok(result) => {
                    stats.record(result);
                    if result.loss.is_none() {
                        continue;
                    }
                    self.step += 1;

                    let seen = stats.loss.batches();
                    if self.config.log_interval > 0 && seen % self.config.log_interval == 0 {
                        log::info!(
                            "Epoch {} [{}/{}] loss {:.6}",
                            epoch,
                            seen,
                            total,
                            stats.loss.finalize().unwrap_or_default()
                        );
                    }
                }
                Err(e) => self.skip_or_abort(e, epoch, &mut stats)?,
            }
        }
        Ok(stats)
    }

    /// One optimizer step; no loss when every item was excluded
    fn train_batch(&mut self, batch: &Batch) -> TrainResult<BatchLoss> {
        let (usable, excluded) = self.encode_usable(batch)?;
        let Some((mixture, target)) = usable else {
            return Ok(BatchLoss {
                loss: None,
                items: 0,
                excluded,
            });
        };

        let loss = self.model.train_step(
            &mixture.normalized,
            &target.normalized,
            self.config.max_grad_norm,
        )?;
        if !loss.is_finite() {
            return Err(TrainError::Model(format!(
                "non-finite training loss at step {}",
                self.step
            )));
        }
        log::debug!("batch {} loss {:.6}", batch.index, loss);
        Ok(BatchLoss {
            loss: Some(loss),
            items: mixture.batch_size(),
            excluded,
        })
    }

    fn validate(&self, epoch: usize) -> TrainResult<PassStats> {
        let mut stats = PassStats::default();

        for batch in self.val_loader.epoch(epoch) {
            let outcome = batch.and_then(|batch| self.validate_batch(&batch));
            match outcome {
                Ok(result) => stats.record(result),
                Err(e) => self.skip_or_abort(e, epoch, &mut stats)?,
            }
        }
        Ok(stats)
    }

    fn validate_batch(&self, batch: &Batch) -> TrainResult<BatchLoss> {
        let (usable, excluded) = self.encode_usable(batch)?;
        let Some((mixture, target)) = usable else {
            return Ok(BatchLoss {
                loss: None,
                items: 0,
                excluded,
            });
        };
        let output = self.pipeline.run_model(&self.model, &mixture)?;
        Ok(BatchLoss {
            loss: Some(mse(&output, &target.normalized)),
            items: mixture.batch_size(),
            excluded,
        })
    }

    /// Encode a batch pair, dropping items with a degenerate mixture envelope
    /// when configured
    fn encode_usable(&self, batch: &Batch) -> TrainResult<(Option<(Encoded, Encoded)>, usize)> {
        let (mixture, target) = self
            .pipeline
            .encode_pair(batch.mixture.view(), batch.vocals.view())?;

        if !self.config.exclude_degenerate || !mixture.has_degenerate() {
            return Ok((Some((mixture, target)), 0));
        }

        let keep: Vec<usize> = mixture
            .envelopes
            .iter()
            .enumerate()
            .filter(|(_, env)| !env.degenerate)
            .map(|(i, _)| i)
            .collect();
        let excluded = mixture.batch_size() - keep.len();
        log::debug!(
            "batch {}: excluding {} item(s) with degenerate mixture",
            batch.index,
            excluded
        );
        if keep.is_empty() {
            return Ok((None, excluded));
        }
        Ok((Some((select(&mixture, &keep), select(&target, &keep))), excluded))
    }

    fn skip_or_abort(
        &self,
        error: TrainError,
        epoch: usize,
        stats: &mut PassStats,
    ) -> TrainResult<()> {
        if !error.is_batch_recoverable() {
            return Err(error);
        }
        stats.skipped += 1;
        log::warn!("Epoch {}: skipping batch: {}", epoch, error);
        if stats.skipped > self.config.max_skipped_batches {
            return Err(TrainError::TooManySkipped {
                epoch,
                skipped: stats.skipped,
            });
        }
        Ok(())
    }

    fn save_checkpoint(&mut self, epoch: usize, train_loss: f64, val_loss: f64) -> TrainResult<()> {
        let checkpoint = Checkpoint {
            epoch,
            train_loss,
            val_loss,
            optimizer: OptimizerState {
                learning_rate: self.model.learning_rate(),
                step: self.step,
            },
            scheduler: self.scheduler.clone(),
            early_stopping: self.early_stopping.clone(),
            model: self.model.name().to_string(),
            weights: String::new(),
        };
        self.checkpoints.save(&self.model, checkpoint)?;
        Ok(())
    }

    /// Write the model's validation predictions for `epoch`
    fn export_predictions(&self, epoch: usize) -> TrainResult<()> {
        let Some(exporter) = &self.exporter else {
            return Ok(());
        };

        let mut written = 0;
        let mut stats = PassStats::default();
        for batch in self.val_loader.epoch(epoch) {
            let outcome = batch.and_then(|batch| {
                let (prediction, _) = self.pipeline.predict_with_target(
                    &self.model,
                    batch.mixture.view(),
                    batch.vocals.view(),
                )?;
                exporter.export_spectrogram(epoch, batch.index, &prediction.spectrogram)?;
                if self.config.export_waveforms && prediction.spectrogram.is_complex() {
                    let wave = self.pipeline.reconstruct(&prediction)?;
                    exporter.export_waveform(epoch, batch.index, &wave)?;
                }
                Ok(())
            });
            match outcome {
                Ok(_) => written += 1,
                Err(e) => self.skip_or_abort(e, epoch, &mut stats)?,
            }
        }

        log::info!(
            "Exported {} prediction batch(es) to {}",
            written,
            exporter.epoch_dir(epoch).display()
        );
        Ok(())
    }
}

fn select(encoded: &Encoded, keep: &[usize]) -> Encoded {
    Encoded {
        normalized: encoded.normalized.select(Axis(0), keep),
        envelopes: keep.iter().map(|&i| encoded.envelopes[i]).collect(),
        phase: encoded.phase.as_ref().map(|p| p.select(Axis(0), keep)),
        length: encoded.length,
    }
}
