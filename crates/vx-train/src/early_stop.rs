//! Patience-based early stopping

use serde::{Deserialize, Serialize};

/// Outcome of observing one validation loss
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Strictly better than every earlier loss
    Improved,
    /// No improvement, still within patience
    Stalled { stall_count: usize },
    /// Patience exhausted
    Stop { stall_count: usize },
}

impl Verdict {
    pub fn improved(&self) -> bool {
        matches!(self, Verdict::Improved)
    }
}

/// Early-stopping state
///
/// The stall counter resets on every strict improvement; the run stops once
/// it exceeds `patience`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EarlyStopping {
    best_loss: Option<f64>,
    stall_count: usize,
    patience: usize,
}

impl EarlyStopping {
    pub fn new(patience: usize) -> Self {
        Self {
            best_loss: None,
            stall_count: 0,
            patience,
        }
    }

    pub fn observe(&mut self, loss: f64) -> Verdict {
        let improved = match self.best_loss {
            None => loss.is_finite(),
            Some(best) => loss < best,
        };

        if improved {
            self.best_loss = Some(loss);
            self.stall_count = 0;
            return Verdict::Improved;
        }

        self.stall_count += 1;
        if self.stall_count > self.patience {
            Verdict::Stop {
                stall_count: self.stall_count,
            }
        } else {
            Verdict::Stalled {
                stall_count: self.stall_count,
            }
        }
    }

    pub fn best_loss(&self) -> Option<f64> {
        self.best_loss
    }

    pub fn stall_count(&self) -> usize {
        self.stall_count
    }

    pub fn patience(&self) -> usize {
        self.patience
    }
}
