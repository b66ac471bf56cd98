use crate::error::{NnError, NnResult};
use crate::math::matrix::Matrix;
use crate::model::batch::Batch;
use crate::model::model::{next_model_id, Model, ParamKey};
use crate::optim::Optimizer;

/// Affine layer with a row-wise softmax output.
///
/// Meant to be trained with categorical cross-entropy: `backprop` expects the
/// combined gradient with respect to the logits (`predicted - expected`) and
/// does not apply the softmax Jacobian again.
///
/// Both widths may be left unset. The input width is taken from the data and
/// the output width from the labels passed to `initialize`.
pub struct Softmax {
    id: usize,
    nr_out: Option<usize>,
    nr_in: Option<usize>,
    weights: Matrix,
    biases: Matrix,
    cached_input: Option<Matrix>,
}

impl Softmax {
    pub fn new(nr_out: Option<usize>, nr_in: Option<usize>) -> Softmax {
        let mut layer = Softmax {
            id: next_model_id(),
            nr_out,
            nr_in,
            weights: Matrix::default(),
            biases: Matrix::default(),
            cached_input: None,
        };
        layer.try_allocate();
        layer
    }

    fn try_allocate(&mut self) {
        if let (Some(nr_in), Some(nr_out)) = (self.nr_in, self.nr_out) {
            if self.weights.shape() != (nr_in, nr_out) {
                self.weights = Matrix::zeros(nr_in, nr_out);
                self.biases = Matrix::zeros(1, nr_out);
            }
        }
    }

    fn is_allocated(&self) -> bool {
        self.weights.rows > 0 && self.weights.cols > 0
    }

    fn logits(&self, x: &Matrix) -> NnResult<Matrix> {
        if !self.is_allocated() {
            return Err(NnError::Uninitialized(self.name().to_string()));
        }
        if x.cols != self.weights.rows {
            return Err(NnError::shape(self.name(), (x.rows, self.weights.rows), x.shape()));
        }
        Ok(x.matmul(&self.weights).add_row_vector(&self.biases))
    }
}

impl Model for Softmax {
    fn name(&self) -> &str {
        "softmax"
    }

    fn id(&self) -> usize {
        self.id
    }

    fn nr_in(&self) -> Option<usize> {
        if self.is_allocated() { Some(self.weights.rows) } else { self.nr_in }
    }

    fn nr_out(&self) -> Option<usize> {
        if self.is_allocated() { Some(self.weights.cols) } else { self.nr_out }
    }

    fn nr_weight(&self) -> usize {
        self.weights.len() + self.biases.len()
    }

    fn initialize(&mut self, sample: &Batch, labels: Option<&Matrix>) -> NnResult<Batch> {
        let x = sample.as_floats(self.name())?;
        if self.nr_out.is_none() {
            self.nr_out = labels.map(|y| y.cols);
        }
        if self.nr_in.is_none() {
            self.nr_in = Some(x.cols);
        }
        self.try_allocate();
        Ok(Batch::Floats(self.logits(x)?.softmax_rows()))
    }

    fn predict(&self, input: &Batch) -> NnResult<Batch> {
        let x = input.as_floats(self.name())?;
        Ok(Batch::Floats(self.logits(x)?.softmax_rows()))
    }

    fn begin_update(&mut self, input: &Batch, _drop: f64) -> NnResult<Batch> {
        let x = input.as_floats(self.name())?;
        if self.nr_in.is_none() && !self.is_allocated() {
            self.nr_in = Some(x.cols);
            self.try_allocate();
        }
        let out = self.logits(x)?.softmax_rows();
        self.cached_input = Some(x.clone());
        Ok(Batch::Floats(out))
    }

    fn backprop(&mut self, d_output: &Batch, sgd: &mut dyn Optimizer) -> NnResult<Option<Batch>> {
        let input = self.cached_input.take()
            .ok_or_else(|| NnError::NoForwardState(self.name().to_string()))?;
        let d_logits = d_output.as_floats(self.name())?;
        if d_logits.shape() != (input.rows, self.weights.cols) {
            return Err(NnError::shape(self.name(), (input.rows, self.weights.cols), d_logits.shape()));
        }

        let d_input = d_logits.matmul(&self.weights.transpose());
        let d_weights = input.transpose().matmul(d_logits);
        let d_biases = d_logits.sum_rows();

        sgd.update(ParamKey::new(self.id, 0), &mut self.weights, &d_weights);
        sgd.update(ParamKey::new(self.id, 1), &mut self.biases, &d_biases);
        Ok(Some(Batch::Floats(d_input)))
    }

    fn visit_params(&mut self, visitor: &mut dyn FnMut(ParamKey, &mut Matrix)) {
        visitor(ParamKey::new(self.id, 0), &mut self.weights);
        visitor(ParamKey::new(self.id, 1), &mut self.biases);
    }

    fn fresh_copy(&self) -> Box<dyn Model> {
        Box::new(Softmax::new(self.nr_out(), self.nr_in()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_width_comes_from_labels() {
        let mut layer = Softmax::new(None, None);
        let x = Batch::Floats(Matrix::uniform(3, 4, 1.0));
        let y = Matrix::from_data(vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 0.0]]);
        let out = layer.initialize(&x, Some(&y)).unwrap();
        assert_eq!(layer.nr_in(), Some(4));
        assert_eq!(layer.nr_out(), Some(2));
        // Zero-initialized weights give a uniform distribution.
        let out = out.into_floats("test").unwrap();
        assert!(out.data.iter().flatten().all(|&p| (p - 0.5).abs() < 1e-12));
    }

    #[test]
    fn missing_output_width_is_reported() {
        let mut layer = Softmax::new(None, None);
        let x = Batch::Floats(Matrix::uniform(2, 4, 1.0));
        assert!(matches!(layer.begin_update(&x, 0.0), Err(NnError::Uninitialized(_))));
    }
}
