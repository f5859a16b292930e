//! Weighted loss accumulation

use ndarray::{Array4, Zip};

/// Running weighted mean of per-batch losses
///
/// Weights are item counts, so a short final batch counts for less.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LossAccumulator {
    total: f64,
    weight: f64,
    batches: usize,
}

impl LossAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a batch loss with its weight
    #[must_use]
    pub fn add(self, loss: f64, weight: f64) -> Self {
        Self {
            total: self.total + loss * weight,
            weight: self.weight + weight,
            batches: self.batches + 1,
        }
    }

    /// Batches seen so far
    pub fn batches(&self) -> usize {
        self.batches
    }

    /// Weighted mean, or `None` when nothing was added
    pub fn finalize(&self) -> Option<f64> {
        (self.weight > 0.0).then(|| self.total / self.weight)
    }
}

/// Mean squared error between two equally shaped tensors
pub fn mse(prediction: &Array4<f32>, target: &Array4<f32>) -> f64 {
    if prediction.is_empty() {
        return 0.0;
    }
    let mut sum = 0.0f64;
    Zip::from(prediction).and(target).for_each(|&p, &t| {
        let d = (p - t) as f64;
        sum += d * d;
    });
    sum / prediction.len() as f64
}
