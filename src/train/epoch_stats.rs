use serde::{Serialize, Deserialize};

/// Per-epoch training statistics emitted by `train_loop`.
///
/// When a `progress_tx` channel is configured in `TrainConfig`, the training
/// loop sends one `EpochStats` value at the end of every completed epoch.
/// The same value is handed to every `Trainer::on_epoch` callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochStats {
    /// 1-based epoch number.
    pub epoch: usize,
    /// Total epochs requested for this run.
    pub total_epochs: usize,
    /// Mean cross-entropy over the training batches of this epoch.
    pub train_loss: f64,
    /// Fraction of training pairs classified correctly while training
    /// (with dropout active).
    pub train_accuracy: f64,
    /// Dev accuracy with the current weights, if a dev set was provided.
    pub dev_accuracy: Option<f64>,
    /// Dev accuracy with the optimizer's averaged weights swapped in.
    pub dev_accuracy_averaged: Option<f64>,
    /// Dropout rate at the end of the epoch.
    pub dropout: f64,
    /// Minibatch size at the end of the epoch.
    pub batch_size: usize,
    /// Wall-clock duration of this single epoch in milliseconds.
    pub elapsed_ms: u64,
}
