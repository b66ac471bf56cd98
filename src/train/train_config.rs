use std::sync::mpsc;
use std::sync::{Arc, atomic::AtomicBool};

use serde::{Serialize, Deserialize};

use crate::train::epoch_stats::EpochStats;

/// Configuration for a `train_loop` run.
///
/// # Fields
/// - `nb_epoch`      : total number of full passes over the training data
/// - `min_batch_size`: minibatch size for the first batch
/// - `max_batch_size`: the batch size grows by `batch_growth` per batch up to this
/// - `dropout`       : initial dropout rate
/// - `dropout_decay` : dropout after `t` batches is `dropout / (1 + dropout_decay * t)`
/// - `learn_rate`    : Adam learning rate
/// - `quiet`         : suppresses per-batch progress logging
/// - `progress_tx`   : optional channel sender; one `EpochStats` is sent per
///                      completed epoch.  If the receiver is dropped the loop
///                      terminates early (clean shutdown).
/// - `stop_flag`     : optional atomic flag; when set to `true` from another
///                      thread the loop terminates after the current epoch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    pub nb_epoch: usize,
    pub min_batch_size: usize,
    pub max_batch_size: usize,
    pub batch_growth: f64,
    pub dropout: f64,
    pub dropout_decay: f64,
    pub learn_rate: f64,
    pub quiet: bool,
    #[serde(skip)]
    pub progress_tx: Option<mpsc::Sender<EpochStats>>,
    #[serde(skip)]
    pub stop_flag: Option<Arc<AtomicBool>>,
}

impl TrainConfig {
    /// Creates a `TrainConfig` with a fixed batch size, no progress channel
    /// and no stop flag.
    pub fn new(nb_epoch: usize, batch_size: usize) -> Self {
        TrainConfig {
            nb_epoch,
            min_batch_size: batch_size,
            max_batch_size: batch_size,
            ..TrainConfig::default()
        }
    }
}

impl Default for TrainConfig {
    fn default() -> Self {
        TrainConfig {
            nb_epoch: 20,
            min_batch_size: 128,
            max_batch_size: 128,
            batch_growth: 1.001,
            dropout: 0.2,
            dropout_decay: 0.0,
            learn_rate: 0.001,
            quiet: false,
            progress_tx: None,
            stop_flag: None,
        }
    }
}
