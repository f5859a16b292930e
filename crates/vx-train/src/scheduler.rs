//! Reduce-on-plateau learning-rate scheduler

use serde::{Deserialize, Serialize};

use crate::error::{TrainError, TrainResult};

/// Plateau scheduler settings (mode: minimize)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlateauConfig {
    /// Multiplier applied on plateau
    pub factor: f64,
    /// Epochs without improvement before reducing
    pub patience: usize,
    /// Relative improvement needed to count as better
    pub threshold: f64,
    /// Lower bound on the learning rate
    pub min_lr: f64,
}

impl Default for PlateauConfig {
    fn default() -> Self {
        Self {
            factor: 0.1,
            patience: 2,
            threshold: 1e-4,
            min_lr: 0.0,
        }
    }
}

impl PlateauConfig {
    pub fn validate(&self) -> TrainResult<()> {
        if !(self.factor > 0.0 && self.factor < 1.0) {
            return Err(TrainError::Config(format!(
                "scheduler factor must be in (0, 1), got {}",
                self.factor
            )));
        }
        if self.threshold < 0.0 || self.min_lr < 0.0 {
            return Err(TrainError::Config(
                "scheduler threshold and min_lr must be non-negative".into(),
            ));
        }
        Ok(())
    }
}

/// Scheduler state, serializable into checkpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlateauScheduler {
    config: PlateauConfig,
    best: Option<f64>,
    bad_epochs: usize,
}

impl PlateauScheduler {
    pub fn new(config: PlateauConfig) -> Self {
        Self {
            config,
            best: None,
            bad_epochs: 0,
        }
    }

    /// Feed a validation metric; returns the new learning rate when it drops
    pub fn step(&mut self, metric: f64, current_lr: f64) -> Option<f64> {
        let improved = match self.best {
            None => metric.is_finite(),
            Some(best) => metric < best * (1.0 - self.config.threshold),
        };

        if improved {
            self.best = Some(metric);
            self.bad_epochs = 0;
            return None;
        }

        self.bad_epochs += 1;
        if self.bad_epochs <= self.config.patience {
            return None;
        }

        self.bad_epochs = 0;
        let new_lr = (current_lr * self.config.factor).max(self.config.min_lr);
        if current_lr - new_lr > 1e-12 {
            log::info!("Reducing learning rate {:.2e} -> {:.2e}", current_lr, new_lr);
            Some(new_lr)
        } else {
            None
        }
    }

    pub fn best(&self) -> Option<f64> {
        self.best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reduces_after_patience() {
        let mut sched = PlateauScheduler::new(PlateauConfig::default());
        assert_eq!(sched.step(1.0, 1e-3), None);
        assert_eq!(sched.step(1.0, 1e-3), None);
        assert_eq!(sched.step(1.0, 1e-3), None);
        let lr = sched.step(1.0, 1e-3).unwrap();
        assert!((lr - 1e-4).abs() < 1e-15);
    }

    #[test]
    fn test_improvement_resets() {
        let mut sched = PlateauScheduler::new(PlateauConfig::default());
        sched.step(1.0, 1e-3);
        sched.step(1.0, 1e-3);
        sched.step(1.0, 1e-3);
        assert_eq!(sched.step(0.5, 1e-3), None);
        assert_eq!(sched.best(), Some(0.5));
        assert_eq!(sched.step(0.5, 1e-3), None);
    }

    #[test]
    fn test_min_lr_floor() {
        let config = PlateauConfig {
            patience: 0,
            min_lr: 1e-5,
            ..Default::default()
        };
        let mut sched = PlateauScheduler::new(config);
        sched.step(1.0, 1e-5);
        assert_eq!(sched.step(1.0, 1e-5), None);
    }

    #[test]
    fn test_state_serializes() {
        let mut sched = PlateauScheduler::new(PlateauConfig::default());
        sched.step(0.3, 1e-3);
        let json = serde_json::to_string(&sched).unwrap();
        let back: PlateauScheduler = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sched);
    }
}
