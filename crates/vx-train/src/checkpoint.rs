//! Checkpoint persistence
//!
//! `<dir>/checkpoint_<epoch>.json` carries the run state; the model's own
//! parameter file sits next to it as `<dir>/checkpoint_<epoch>.<ext>`.
//!
//! Optimizer state is the learning rate and the step count only. candle's
//! `AdamW` keeps its moment estimates and bias-correction step private, so a
//! resumed `MaskNet` starts Adam with fresh moments at the restored rate.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::early_stop::EarlyStopping;
use crate::error::{TrainError, TrainResult};
use crate::model::TrainableModel;
use crate::scheduler::PlateauScheduler;

const PREFIX: &str = "checkpoint_";

/// Optimizer bookkeeping restored on resume
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OptimizerState {
    pub learning_rate: f64,
    /// Optimizer steps taken so far
    pub step: u64,
}

/// Run state at the end of an improving epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub epoch: usize,
    pub train_loss: f64,
    pub val_loss: f64,
    pub optimizer: OptimizerState,
    pub scheduler: PlateauScheduler,
    pub early_stopping: EarlyStopping,
    /// Model name reported by the model
    pub model: String,
    /// Parameter file name, relative to the checkpoint directory
    #[serde(default)]
    pub weights: String,
}

/// Directory of checkpoints
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn json_path(&self, epoch: usize) -> PathBuf {
        self.dir.join(format!("{}{}.json", PREFIX, epoch))
    }

    /// Write model parameters and run state; returns the JSON path
    pub fn save<M: TrainableModel + ?Sized>(
        &self,
        model: &M,
        mut checkpoint: Checkpoint,
    ) -> TrainResult<PathBuf> {
        std::fs::create_dir_all(&self.dir).map_err(|e| {
            TrainError::Checkpoint(format!("cannot create {}: {}", self.dir.display(), e))
        })?;

        checkpoint.weights = format!(
            "{}{}.{}",
            PREFIX,
            checkpoint.epoch,
            model.weights_extension()
        );
        model.save(&self.dir.join(&checkpoint.weights))?;

        let path = self.json_path(checkpoint.epoch);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(&checkpoint)?)?;
        std::fs::rename(&tmp, &path)?;

        log::info!(
            "Saved checkpoint epoch {} (val loss {:.6}) to {}",
            checkpoint.epoch,
            checkpoint.val_loss,
            path.display()
        );
        Ok(path)
    }

    /// Read the run state of `epoch`
    pub fn load(&self, epoch: usize) -> TrainResult<Checkpoint> {
        let path = self.json_path(epoch);
        let text = std::fs::read_to_string(&path)
            .map_err(|e| TrainError::Checkpoint(format!("{}: {}", path.display(), e)))?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Epochs with a checkpoint, ascending
    pub fn epochs(&self) -> TrainResult<Vec<usize>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut epochs = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let name = entry?.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(epoch) = name
                .strip_prefix(PREFIX)
                .and_then(|rest| rest.strip_suffix(".json"))
                .and_then(|n| n.parse::<usize>().ok())
            {
                epochs.push(epoch);
            }
        }
        epochs.sort_unstable();
        Ok(epochs)
    }

    /// Most recent checkpoint, if any
    pub fn latest(&self) -> TrainResult<Option<Checkpoint>> {
        match self.epochs()?.last() {
            Some(&epoch) => Ok(Some(self.load(epoch)?)),
            None => Ok(None),
        }
    }

    /// Load a checkpoint's parameters into `model` and restore its learning rate
    pub fn restore<M: TrainableModel + ?Sized>(
        &self,
        model: &mut M,
        checkpoint: &Checkpoint,
    ) -> TrainResult<()> {
        let weights = self.dir.join(&checkpoint.weights);
        if !weights.is_file() {
            return Err(TrainError::Checkpoint(format!(
                "missing weights file {}",
                weights.display()
            )));
        }
        model.load(&weights)?;
        model.set_learning_rate(checkpoint.optimizer.learning_rate);
        log::info!(
            "Restored epoch {} from {}",
            checkpoint.epoch,
            weights.display()
        );
        Ok(())
    }
}
