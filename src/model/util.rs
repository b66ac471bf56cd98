use std::collections::HashMap;
use std::ops::Range;

use crate::error::{NnError, NnResult};
use crate::loss::cross_entropy::CrossEntropyLoss;
use crate::math::matrix::Matrix;
use crate::model::batch::Batch;
use crate::model::model::{Model, ParamKey};
use crate::optim::Optimizer;

/// Consecutive index ranges of at most `size` items covering `0..len`.
pub fn minibatch(len: usize, size: usize) -> impl Iterator<Item = Range<usize>> {
    let size = size.max(1);
    (0..len).step_by(size).map(move |start| start..(start + size).min(len))
}

/// Predicts `input` in minibatches and yields one output row per item.
pub fn pipe<'a>(
    model: &'a dyn Model,
    input: &'a Batch,
    batch_size: usize,
) -> impl Iterator<Item = NnResult<Vec<f64>>> + 'a {
    minibatch(input.len(), batch_size).flat_map(move |range| {
        let rows: Vec<NnResult<Vec<f64>>> = match model.predict(&input.slice(range)) {
            Ok(Batch::Floats(m)) => m.data.into_iter().map(Ok).collect(),
            Ok(other) => vec![Err(NnError::input_kind("pipe", "floats", other.kind()))],
            Err(e) => vec![Err(e)],
        };
        rows
    })
}

/// Runs one pass of minibatch updates in order, yielding the mean
/// cross-entropy of each batch. The gradient fed back is `yh - y`.
pub fn update<'a>(
    model: &'a mut dyn Model,
    inputs: &'a Batch,
    labels: &'a Matrix,
    batch_size: usize,
    sgd: &'a mut dyn Optimizer,
) -> impl Iterator<Item = NnResult<f64>> + 'a {
    minibatch(inputs.len(), batch_size).map(move |range| {
        let y = labels.slice_rows(range.clone());
        let yh = model.begin_update(&inputs.slice(range), 0.0)?.into_floats(model.name())?;
        if yh.shape() != y.shape() {
            return Err(NnError::shape(model.name(), y.shape(), yh.shape()));
        }
        let loss = CrossEntropyLoss::batch_loss(&yh, &y);
        model.backprop(&Batch::Floats(CrossEntropyLoss::batch_derivative(&yh, &y)), sgd)?;
        sgd.finish_batch();
        Ok(loss)
    })
}

/// Runs `f` with `params` swapped in for the model's own values, then
/// restores them. Keys missing from `params` keep their current values.
pub fn use_params<R>(
    model: &mut dyn Model,
    params: &HashMap<ParamKey, Matrix>,
    f: impl FnOnce(&mut dyn Model) -> R,
) -> R {
    let mut backup: HashMap<ParamKey, Matrix> = HashMap::new();
    model.visit_params(&mut |key, weights| {
        if let Some(replacement) = params.get(&key) {
            if replacement.shape() == weights.shape() {
                backup.insert(key, std::mem::replace(weights, replacement.clone()));
            }
        }
    });
    let result = f(&mut *model);
    model.visit_params(&mut |key, weights| {
        if let Some(original) = backup.remove(&key) {
            *weights = original;
        }
    });
    result
}

/// Every parameter matrix in visit order.
pub fn collect_params(model: &mut dyn Model) -> Vec<Matrix> {
    let mut params = Vec::new();
    model.visit_params(&mut |_, weights| params.push(weights.clone()));
    params
}

/// Restores parameters written by `collect_params` on an identically built
/// model. Unallocated (lazily sized) slots take the saved shape. Every slot
/// is checked before any is written, so a rejected load leaves the model
/// untouched.
pub fn load_params(model: &mut dyn Model, params: Vec<Matrix>) -> NnResult<()> {
    let mut slots = Vec::new();
    model.visit_params(&mut |key, weights| slots.push((key, weights.shape())));
    if slots.len() != params.len() {
        return Err(NnError::InvalidConfig(format!(
            "model has {} parameter slots, saved state has {}", slots.len(), params.len()
        )));
    }
    for ((key, expected), value) in slots.iter().zip(&params) {
        let allocated = expected.0 * expected.1 > 0;
        if allocated && *expected != value.shape() {
            return Err(NnError::shape(
                &format!("parameter {}:{}", key.model, key.slot), *expected, value.shape(),
            ));
        }
    }

    let mut saved = params.into_iter();
    model.visit_params(&mut |_, weights| {
        if let Some(value) = saved.next() {
            *weights = value;
        }
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::Maxout;
    use crate::model::model::boxed;

    #[test]
    fn minibatch_covers_everything_once() {
        let ranges: Vec<_> = minibatch(7, 3).collect();
        assert_eq!(ranges, vec![0..3, 3..6, 6..7]);
        assert_eq!(minibatch(0, 3).count(), 0);
    }

    #[test]
    fn rejected_load_leaves_every_slot_alone() {
        let mut model = boxed(Maxout::new(2, Some(2), 2)) >> boxed(Maxout::new(2, Some(2), 2));
        let before = collect_params(model.as_mut());
        let mut params = before.clone();
        params[0] = Matrix::zeros(2, 4);
        params[2] = Matrix::zeros(3, 4);
        assert!(matches!(load_params(model.as_mut(), params), Err(NnError::ShapeMismatch { .. })));
        assert_eq!(collect_params(model.as_mut()), before);
    }

    #[test]
    fn slot_count_must_match() {
        let mut model = boxed(Maxout::new(2, Some(2), 2));
        let mut params = collect_params(model.as_mut());
        params.push(Matrix::zeros(1, 1));
        assert!(matches!(load_params(model.as_mut(), params), Err(NnError::InvalidConfig(_))));
    }

    #[test]
    fn lazy_slots_take_the_saved_shape() {
        let mut model = boxed(Maxout::new(2, None, 2));
        let params = vec![Matrix::uniform(3, 4, 1.0), Matrix::zeros(1, 4)];
        load_params(model.as_mut(), params.clone()).unwrap();
        assert_eq!(model.nr_in(), Some(3));
        assert_eq!(collect_params(model.as_mut()), params);
    }
}
