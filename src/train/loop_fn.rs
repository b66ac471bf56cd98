use std::sync::atomic::Ordering;
use std::time::Instant;

use rand::seq::SliceRandom;

use crate::error::{NnError, NnResult};
use crate::loss::cross_entropy::CrossEntropyLoss;
use crate::math::matrix::Matrix;
use crate::model::batch::Batch;
use crate::model::model::Model;
use crate::model::util::{pipe, use_params};
use crate::train::epoch_stats::EpochStats;
use crate::train::trainer::Trainer;

const EVAL_BATCH_SIZE: usize = 1000;
const PROGRESS_EVERY: usize = 100;

// ---------------------------------------------------------------------------
// Public entry points
// ---------------------------------------------------------------------------

/// Trains `model` for `trainer.config.nb_epoch` epochs and returns the
/// statistics of the last completed epoch (`None` if none completed).
///
/// Every epoch shuffles the training set and walks it in minibatches. The
/// batch size starts at `min_batch_size` and grows by `batch_growth` after
/// every batch, capped at `max_batch_size`; dropout decays with the number
/// of optimizer updates.
///
/// # Early termination
/// The loop breaks early if:
/// - the `progress_tx` receiver has been dropped, **or**
/// - `config.stop_flag` is set to `true`.
pub fn train_loop(
    model: &mut dyn Model,
    trainer: &mut Trainer,
    train_x: &Batch,
    train_y: &Matrix,
    dev: Option<(&Batch, &Matrix)>,
) -> NnResult<Option<EpochStats>> {
    let n = train_x.len();
    if n == 0 {
        return Err(NnError::InvalidConfig("training set is empty".into()));
    }
    if n != train_y.rows {
        return Err(NnError::InvalidConfig(format!("{} inputs but {} labels", n, train_y.rows)));
    }

    let total_epochs = trainer.config.nb_epoch;
    let max_batch_size = trainer.config.max_batch_size.max(trainer.config.min_batch_size);
    let mut grown_batch_size = trainer.batch_size as f64;
    let mut last_stats = None;

    for epoch in 1..=total_epochs {
        if stop_requested(trainer) {
            break;
        }
        let t_start = Instant::now();

        let mut indices: Vec<usize> = (0..n).collect();
        indices.shuffle(&mut rand::thread_rng());

        let mut total_loss = 0.0;
        let mut nr_batches = 0;
        let mut correct = 0;
        let mut start = 0;
        while start < n {
            let end = (start + trainer.batch_size.max(1)).min(n);
            let batch_indices = &indices[start..end];
            let x = train_x.take(batch_indices);
            let y = Matrix::from_rows(
                batch_indices.iter().map(|&i| train_y.data[i].clone()).collect(),
                train_y.cols,
            );

            let yh = model.begin_update(&x, trainer.dropout)?.into_floats(model.name())?;
            if yh.shape() != y.shape() {
                return Err(NnError::shape(model.name(), y.shape(), yh.shape()));
            }
            total_loss += CrossEntropyLoss::batch_loss(&yh, &y);
            correct += count_correct(&yh, &y);
            let d_output = Batch::Floats(CrossEntropyLoss::batch_derivative(&yh, &y));
            model.backprop(&d_output, trainer.optimizer.as_mut())?;
            trainer.optimizer.finish_batch();
            nr_batches += 1;

            trainer.dropout = trainer.decayed_dropout();
            trainer.batch_size = (grown_batch_size as usize).clamp(1, max_batch_size);
            grown_batch_size *= trainer.config.batch_growth;

            if !trainer.config.quiet && nr_batches % PROGRESS_EVERY == 0 {
                tracing::info!(epoch, done = end, total = n, "training");
            }
            start = end;
        }

        let (dev_accuracy, dev_accuracy_averaged) = match dev {
            Some((dev_x, dev_y)) => {
                let acc = evaluate(model, dev_x, dev_y)?;
                let avg_acc = match trainer.optimizer.averages() {
                    Some(averages) => Some(use_params(model, averages, |m| evaluate(m, dev_x, dev_y))?),
                    None => None,
                };
                (Some(acc), avg_acc)
            }
            None => (None, None),
        };

        let stats = EpochStats {
            epoch,
            total_epochs,
            train_loss: total_loss / nr_batches.max(1) as f64,
            train_accuracy: correct as f64 / n as f64,
            dev_accuracy,
            dev_accuracy_averaged,
            dropout: trainer.dropout,
            batch_size: trainer.batch_size,
            elapsed_ms: t_start.elapsed().as_millis() as u64,
        };
        tracing::info!(
            "epoch {}/{}: {:.3} ({:.3}) dev acc, {:.3} train acc, {:.4} drop",
            epoch,
            total_epochs,
            stats.dev_accuracy.unwrap_or(0.0),
            stats.dev_accuracy_averaged.unwrap_or(0.0),
            stats.train_accuracy,
            stats.dropout,
        );

        for callback in trainer.each_epoch.iter_mut() {
            callback(&stats);
        }
        last_stats = Some(stats.clone());

        if let Some(ref tx) = trainer.config.progress_tx {
            // If the receiver has been dropped, stop training.
            if tx.send(stats).is_err() {
                break;
            }
        }
    }

    Ok(last_stats)
}

/// Fraction of items whose predicted class (argmax) matches the label.
pub fn evaluate(model: &dyn Model, inputs: &Batch, labels: &Matrix) -> NnResult<f64> {
    if inputs.len() != labels.rows {
        return Err(NnError::InvalidConfig(format!(
            "{} inputs but {} labels", inputs.len(), labels.rows
        )));
    }
    if labels.rows == 0 {
        return Ok(0.0);
    }
    let mut correct = 0;
    for (i, row) in pipe(model, inputs, EVAL_BATCH_SIZE).enumerate() {
        if argmax_row(&row?) == labels.row_argmax(i) {
            correct += 1;
        }
    }
    Ok(correct as f64 / labels.rows as f64)
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn stop_requested(trainer: &Trainer) -> bool {
    trainer.config.stop_flag.as_ref().map_or(false, |flag| flag.load(Ordering::Relaxed))
}

fn count_correct(predicted: &Matrix, expected: &Matrix) -> usize {
    (0..predicted.rows)
        .filter(|&i| predicted.row_argmax(i) == expected.row_argmax(i))
        .count()
}

fn argmax_row(row: &[f64]) -> usize {
    crate::math::matrix::argmax(row)
}
