//! Running accuracy/loss for one phase of one epoch.

use burn::tensor::{backend::Backend, Tensor};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Train,
    Val,
    Eval,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Train => "train",
            Phase::Val => "val",
            Phase::Eval => "eval",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters accumulated batch by batch; never reset mid-epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EpochStats {
    pub correct: usize,
    pub total: usize,
    /// Sum of per-sample losses (batch mean loss weighted by batch size).
    pub loss_sum: f64,
    pub batches: usize,
    /// Mean loss of the most recent batch.
    pub last_loss: f64,
}

impl EpochStats {
    pub fn record(&mut self, correct: usize, batch_len: usize, batch_loss: f64) {
        self.correct += correct;
        self.total += batch_len;
        self.loss_sum += batch_loss * batch_len as f64;
        self.batches += 1;
        self.last_loss = batch_loss;
    }

    pub fn accuracy(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.correct as f64 / self.total as f64
        }
    }

    pub fn mean_loss(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.loss_sum / self.total as f64
        }
    }

    /// `[acc-0.5000, loss-1.2345] [4/8]`
    pub fn running_line(&self) -> String {
        format!(
            "[acc-{:.4}, loss-{:.4}] [{}/{}]",
            self.accuracy(),
            self.mean_loss(),
            self.correct,
            self.total
        )
    }

    /// `[eval] [acc-0.5000, loss-1.2345] [4/8]`
    pub fn phase_line(&self, phase: Phase) -> String {
        format!("[{phase}] {}", self.running_line())
    }

    /// `[train-3/150] [acc-0.5000, loss-1.2345] [4/8]`
    pub fn summary_line(&self, phase: Phase, epoch: usize, n_epoch: usize) -> String {
        format!("[{phase}-{epoch}/{n_epoch}] {}", self.running_line())
    }
}

/// Arg-max class per row of `[N, C]` logits.
pub fn predicted_labels<B: Backend>(logits: Tensor<B, 2>) -> Vec<usize> {
    logits
        .argmax(1)
        .into_data()
        .iter::<i64>()
        .map(|v| v as usize)
        .collect()
}

pub fn count_correct(predicted: &[usize], labels: &[usize]) -> usize {
    predicted
        .iter()
        .zip(labels)
        .filter(|(p, l)| p == l)
        .count()
}

pub fn scalar<B: Backend>(tensor: Tensor<B, 1>) -> f64 {
    tensor
        .into_data()
        .to_vec::<f32>()
        .unwrap_or_default()
        .into_iter()
        .next()
        .unwrap_or(0.0) as f64
}
