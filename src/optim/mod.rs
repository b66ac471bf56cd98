pub mod adam;
pub mod sgd;

use std::collections::HashMap;

use crate::math::matrix::Matrix;
use crate::model::model::ParamKey;

pub use adam::Adam;
pub use sgd::Sgd;

/// Receives parameter gradients from `Model::backprop`.
///
/// Layers call `update` once per parameter matrix per minibatch; the training
/// loop calls `finish_batch` once the whole model has been updated.
pub trait Optimizer {
    fn update(&mut self, key: ParamKey, weights: &mut Matrix, gradient: &Matrix);

    /// Advances the iteration counter after a minibatch.
    fn finish_batch(&mut self);

    /// Number of completed minibatches.
    fn nr_iter(&self) -> usize;

    fn learning_rate(&self) -> f64;

    /// Running parameter averages, if the optimizer keeps them.
    fn averages(&self) -> Option<&HashMap<ParamKey, Matrix>> {
        None
    }
}
