use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Serialize, Deserialize};

use crate::error::{NnError, NnResult};
use crate::math::matrix::Matrix;
use crate::model::batch::Batch;
use crate::optim::Optimizer;

static NEXT_MODEL_ID: AtomicUsize = AtomicUsize::new(1);

/// Hands out a process-unique model id.
pub fn next_model_id() -> usize {
    NEXT_MODEL_ID.fetch_add(1, Ordering::Relaxed)
}

/// Boxes a concrete layer so it can take part in `>>` and `|` expressions.
pub fn boxed<M: Model + 'static>(model: M) -> Box<dyn Model> {
    Box::new(model)
}

/// Identifies one parameter matrix: the owning model plus a slot within it.
///
/// Optimizers key their moment buffers and parameter averages on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParamKey {
    pub model: usize,
    pub slot: usize,
}

impl ParamKey {
    pub fn new(model: usize, slot: usize) -> Self {
        ParamKey { model, slot }
    }
}

/// What `Model::call` accepts: one dense example or a batch.
#[derive(Debug, Clone, Copy)]
pub enum Input<'a> {
    One(&'a [f64]),
    Many(&'a Batch),
}

/// What `Model::call` returns, matching the shape of its input.
#[derive(Debug, Clone, PartialEq)]
pub enum Prediction {
    One(Vec<f64>),
    Many(Batch),
}

/// A differentiable unit: forward prediction plus a gradient-producing update.
///
/// Training is a two-step protocol. `begin_update` runs the forward pass and
/// keeps whatever the backward pass needs inside the model; `backprop` then
/// consumes that state, computes the gradient with respect to the input using
/// the weights as they were during the forward pass, and hands every
/// parameter gradient to the optimizer.
///
/// Dimensions may be unknown at construction time. They are inferred from
/// data by `initialize`, or from the first `begin_update`.
pub trait Model: Send {
    fn name(&self) -> &str;

    fn id(&self) -> usize;

    /// Input width, if known.
    fn nr_in(&self) -> Option<usize> {
        None
    }

    /// Output width, if known.
    fn nr_out(&self) -> Option<usize> {
        None
    }

    /// Number of trainable parameters, including sublayers.
    fn nr_weight(&self) -> usize {
        self.layers().iter().map(|l| l.nr_weight()).sum()
    }

    fn layers(&self) -> &[Box<dyn Model>] {
        &[]
    }

    /// Infers missing dimensions from a sample, allocates weights and
    /// returns the model's output on that sample. `labels` is only
    /// consulted by output layers.
    fn initialize(&mut self, sample: &Batch, labels: Option<&Matrix>) -> NnResult<Batch> {
        let _ = labels;
        self.predict(sample)
    }

    fn predict(&self, input: &Batch) -> NnResult<Batch>;

    /// Predicts a single dense input row.
    fn predict_one(&self, x: &[f64]) -> NnResult<Vec<f64>> {
        let batch = Batch::Floats(Matrix::from_rows(vec![x.to_vec()], x.len()));
        let mut output = self.predict(&batch)?.into_floats(self.name())?;
        if output.data.is_empty() {
            return Err(NnError::shape(self.name(), (1, self.nr_out().unwrap_or(0)), output.shape()));
        }
        Ok(output.data.swap_remove(0))
    }

    /// Predicts a single row or a whole batch, answering in kind.
    fn call(&self, input: Input<'_>) -> NnResult<Prediction> {
        match input {
            Input::One(x) => self.predict_one(x).map(Prediction::One),
            Input::Many(batch) => self.predict(batch).map(Prediction::Many),
        }
    }

    fn begin_update(&mut self, input: &Batch, drop: f64) -> NnResult<Batch>;

    /// Returns the gradient with respect to the last `begin_update` input, or
    /// `None` when that input is not differentiable (words, ids).
    fn backprop(&mut self, d_output: &Batch, sgd: &mut dyn Optimizer) -> NnResult<Option<Batch>>;

    /// Visits every parameter matrix in a fixed structural order.
    fn visit_params(&mut self, visitor: &mut dyn FnMut(ParamKey, &mut Matrix)) {
        let _ = visitor;
    }

    /// Same architecture with a new id and freshly initialized weights.
    fn fresh_copy(&self) -> Box<dyn Model>;
}

impl std::fmt::Debug for dyn Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.name())
            .field("id", &self.id())
            .field("nr_in", &self.nr_in())
            .field("nr_out", &self.nr_out())
            .field("layers", &self.layers())
            .finish()
    }
}
