use std::sync::Arc;

use crate::data::vectors::VectorTable;
use crate::error::{NnError, NnResult};
use crate::math::matrix::Matrix;
use crate::model::batch::Batch;
use crate::model::model::{next_model_id, Model, ParamKey};
use crate::optim::Optimizer;

/// Maps each token of each text to its id in a `VectorTable`.
pub struct WordIds {
    id: usize,
    table: Arc<VectorTable>,
}

impl WordIds {
    pub fn new(table: Arc<VectorTable>) -> WordIds {
        WordIds { id: next_model_id(), table }
    }

    fn lookup(&self, input: &Batch) -> NnResult<Batch> {
        match input {
            Batch::Docs(docs) => Ok(Batch::IdSeqs(
                docs.iter()
                    .map(|doc| doc.iter().map(|word| self.table.word_id(word)).collect())
                    .collect(),
            )),
            other => Err(NnError::input_kind(self.name(), "docs", other.kind())),
        }
    }
}

impl Model for WordIds {
    fn name(&self) -> &str {
        "word_ids"
    }

    fn id(&self) -> usize {
        self.id
    }

    fn predict(&self, input: &Batch) -> NnResult<Batch> {
        self.lookup(input)
    }

    fn begin_update(&mut self, input: &Batch, _drop: f64) -> NnResult<Batch> {
        self.lookup(input)
    }

    fn backprop(&mut self, _d_output: &Batch, _sgd: &mut dyn Optimizer) -> NnResult<Option<Batch>> {
        Ok(None)
    }

    fn fresh_copy(&self) -> Box<dyn Model> {
        Box::new(WordIds::new(Arc::clone(&self.table)))
    }
}

/// Looks up fixed pre-trained vectors and projects them to `nr_out` with a
/// trainable affine map. The vectors themselves never change.
pub struct StaticVectors {
    id: usize,
    table: Arc<VectorTable>,
    nr_out: usize,
    weights: Matrix,
    biases: Matrix,
    cached_vectors: Option<Matrix>,
}

impl StaticVectors {
    pub fn new(table: Arc<VectorTable>, nr_out: usize) -> StaticVectors {
        let dim = table.dim();
        StaticVectors {
            id: next_model_id(),
            table,
            nr_out,
            weights: Matrix::xavier(dim, nr_out),
            biases: Matrix::zeros(1, nr_out),
            cached_vectors: None,
        }
    }

    fn gather(&self, input: &Batch) -> NnResult<Matrix> {
        match input {
            Batch::Ids(ids) => Ok(Matrix::from_rows(
                ids.iter().map(|&id| self.table.vector(id).to_vec()).collect(),
                self.table.dim(),
            )),
            other => Err(NnError::input_kind(self.name(), "ids", other.kind())),
        }
    }

    fn project(&self, vectors: &Matrix) -> NnResult<Matrix> {
        if self.weights.rows != vectors.cols {
            return Err(NnError::shape(self.name(), (vectors.rows, self.weights.rows), vectors.shape()));
        }
        Ok(vectors.matmul(&self.weights).add_row_vector(&self.biases))
    }
}

impl Model for StaticVectors {
    fn name(&self) -> &str {
        "static_vectors"
    }

    fn id(&self) -> usize {
        self.id
    }

    fn nr_out(&self) -> Option<usize> {
        Some(self.nr_out)
    }

    fn nr_weight(&self) -> usize {
        self.weights.len() + self.biases.len()
    }

    fn predict(&self, input: &Batch) -> NnResult<Batch> {
        let vectors = self.gather(input)?;
        Ok(Batch::Floats(self.project(&vectors)?))
    }

    fn begin_update(&mut self, input: &Batch, _drop: f64) -> NnResult<Batch> {
        let vectors = self.gather(input)?;
        let out = self.project(&vectors)?;
        self.cached_vectors = Some(vectors);
        Ok(Batch::Floats(out))
    }

    fn backprop(&mut self, d_output: &Batch, sgd: &mut dyn Optimizer) -> NnResult<Option<Batch>> {
        let vectors = self.cached_vectors.take()
            .ok_or_else(|| NnError::NoForwardState(self.name().to_string()))?;
        let d_out = d_output.as_floats(self.name())?;
        if d_out.shape() != (vectors.rows, self.nr_out) {
            return Err(NnError::shape(self.name(), (vectors.rows, self.nr_out), d_out.shape()));
        }
        let d_weights = vectors.transpose().matmul(d_out);
        let d_biases = d_out.sum_rows();
        sgd.update(ParamKey::new(self.id, 0), &mut self.weights, &d_weights);
        sgd.update(ParamKey::new(self.id, 1), &mut self.biases, &d_biases);
        Ok(None)
    }

    fn visit_params(&mut self, visitor: &mut dyn FnMut(ParamKey, &mut Matrix)) {
        visitor(ParamKey::new(self.id, 0), &mut self.weights);
        visitor(ParamKey::new(self.id, 1), &mut self.biases);
    }

    fn fresh_copy(&self) -> Box<dyn Model> {
        Box::new(StaticVectors::new(Arc::clone(&self.table), self.nr_out))
    }
}
