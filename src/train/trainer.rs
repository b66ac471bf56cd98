use crate::error::{NnError, NnResult};
use crate::math::matrix::Matrix;
use crate::model::batch::Batch;
use crate::model::model::Model;
use crate::optim::{Adam, Optimizer};
use crate::train::epoch_stats::EpochStats;
use crate::train::train_config::TrainConfig;

/// Upper bound on the number of samples used for data-driven initialization.
pub const INIT_SAMPLE_SIZE: usize = 5000;

/// Mutable training state: the optimizer plus the dropout rate and batch
/// size, both of which change as training proceeds.
pub struct Trainer {
    pub optimizer: Box<dyn Optimizer>,
    pub dropout: f64,
    pub batch_size: usize,
    pub config: TrainConfig,
    pub(crate) each_epoch: Vec<Box<dyn FnMut(&EpochStats)>>,
}

impl Trainer {
    /// Initializes `model` from (at most `INIT_SAMPLE_SIZE` of) the training
    /// data and returns a trainer with an Adam optimizer.
    ///
    /// Initialization infers every unset layer width, sizes the output layer
    /// from the labels, and rescales Maxout weights to unit output variance.
    pub fn begin_training(
        model: &mut dyn Model,
        train_x: &Batch,
        train_y: &Matrix,
        config: TrainConfig,
    ) -> NnResult<Trainer> {
        if train_x.len() != train_y.rows {
            return Err(NnError::InvalidConfig(format!(
                "{} inputs but {} labels", train_x.len(), train_y.rows
            )));
        }
        if config.min_batch_size == 0 {
            return Err(NnError::InvalidConfig("batch size must be at least 1".into()));
        }
        let n = train_x.len().min(INIT_SAMPLE_SIZE);
        let output = model.initialize(&train_x.slice(0..n), Some(&train_y.slice_rows(0..n)))?;
        tracing::info!(
            samples = n,
            nr_weight = model.nr_weight(),
            nr_out = ?model.nr_out(),
            output = output.kind(),
            "initialized model from data"
        );

        Ok(Trainer {
            optimizer: Box::new(Adam::new(config.learn_rate)),
            dropout: config.dropout,
            batch_size: config.min_batch_size,
            config,
            each_epoch: Vec::new(),
        })
    }

    /// Replaces the default Adam optimizer.
    pub fn with_optimizer(mut self, optimizer: Box<dyn Optimizer>) -> Self {
        self.optimizer = optimizer;
        self
    }

    /// Registers a callback run after every epoch.
    pub fn on_epoch(&mut self, callback: impl FnMut(&EpochStats) + 'static) {
        self.each_epoch.push(Box::new(callback));
    }

    /// Dropout after `nr_iter` updates: `dropout / (1 + decay * nr_iter)`.
    pub(crate) fn decayed_dropout(&self) -> f64 {
        self.config.dropout / (1.0 + self.config.dropout_decay * self.optimizer.nr_iter() as f64)
    }
}
