use crate::error::{NnError, NnResult};
use crate::math::matrix::Matrix;
use crate::model::batch::Batch;
use crate::model::model::{next_model_id, Model, ParamKey};
use crate::optim::Optimizer;

/// Encodes both sides of each text pair with one shared encoder and
/// compares them: `Pairs{B}` → `Floats{B, 2W}` = `hstack(X1 - X2, X1 * X2)`.
///
/// Both sides go through the encoder as a single batch of `2B` texts (all
/// left texts, then all right texts), so the encoder runs one forward pass
/// and receives one combined gradient. The encoder keeps every text's
/// tokens apart (ragged windows), so the two sides never see each other.
pub struct PairDiff {
    id: usize,
    encoder: Vec<Box<dyn Model>>,
    cache: Option<(Matrix, Matrix)>,
}

impl PairDiff {
    pub fn new(encoder: Box<dyn Model>) -> PairDiff {
        PairDiff { id: next_model_id(), encoder: vec![encoder], cache: None }
    }

    fn stack_sides(&self, input: &Batch) -> NnResult<(Batch, usize)> {
        match input {
            Batch::Pairs(pairs) => {
                let mut docs: Vec<Vec<String>> = pairs.iter().map(|(left, _)| left.clone()).collect();
                docs.extend(pairs.iter().map(|(_, right)| right.clone()));
                Ok((Batch::Docs(docs), pairs.len()))
            }
            other => Err(NnError::input_kind(self.name(), "pairs", other.kind())),
        }
    }

    fn split_sides(&self, encoded: Batch, n: usize) -> NnResult<(Matrix, Matrix)> {
        let encoded = encoded.into_floats(self.name())?;
        if encoded.rows != 2 * n {
            return Err(NnError::shape(self.name(), (2 * n, encoded.cols), encoded.shape()));
        }
        Ok((encoded.slice_rows(0..n), encoded.slice_rows(n..2 * n)))
    }

    fn combine(x1: &Matrix, x2: &Matrix) -> Matrix {
        let difference = x1.clone() - x2.clone();
        let product = x1.hadamard(x2);
        Matrix::hstack(&[&difference, &product])
    }
}

impl Model for PairDiff {
    fn name(&self) -> &str {
        "pair_diff"
    }

    fn id(&self) -> usize {
        self.id
    }

    fn nr_out(&self) -> Option<usize> {
        self.encoder[0].nr_out().map(|w| 2 * w)
    }

    fn layers(&self) -> &[Box<dyn Model>] {
        &self.encoder
    }

    fn initialize(&mut self, sample: &Batch, _labels: Option<&Matrix>) -> NnResult<Batch> {
        let (docs, n) = self.stack_sides(sample)?;
        let encoded = self.encoder[0].initialize(&docs, None)?;
        let (x1, x2) = self.split_sides(encoded, n)?;
        Ok(Batch::Floats(PairDiff::combine(&x1, &x2)))
    }

    fn predict(&self, input: &Batch) -> NnResult<Batch> {
        let (docs, n) = self.stack_sides(input)?;
        let (x1, x2) = self.split_sides(self.encoder[0].predict(&docs)?, n)?;
        Ok(Batch::Floats(PairDiff::combine(&x1, &x2)))
    }

    fn begin_update(&mut self, input: &Batch, drop: f64) -> NnResult<Batch> {
        let (docs, n) = self.stack_sides(input)?;
        let encoded = self.encoder[0].begin_update(&docs, drop)?;
        let (x1, x2) = self.split_sides(encoded, n)?;
        let output = PairDiff::combine(&x1, &x2);
        self.cache = Some((x1, x2));
        Ok(Batch::Floats(output))
    }

    fn backprop(&mut self, d_output: &Batch, sgd: &mut dyn Optimizer) -> NnResult<Option<Batch>> {
        let (x1, x2) = self.cache.take()
            .ok_or_else(|| NnError::NoForwardState(self.name().to_string()))?;
        let d_out = d_output.as_floats(self.name())?;
        let width = x1.cols;
        if d_out.shape() != (x1.rows, 2 * width) {
            return Err(NnError::shape(self.name(), (x1.rows, 2 * width), d_out.shape()));
        }
        let d_difference = d_out.slice_cols(0..width);
        let d_product = d_out.slice_cols(width..2 * width);

        let d_x1 = d_product.hadamard(&x2) + d_difference.clone();
        let d_x2 = d_product.hadamard(&x1) - d_difference;
        let d_encoded = Batch::Floats(Matrix::vstack(&[&d_x1, &d_x2]));

        // The encoder's input is text, so there is nothing to pass further back.
        self.encoder[0].backprop(&d_encoded, sgd)?;
        Ok(None)
    }

    fn visit_params(&mut self, visitor: &mut dyn FnMut(ParamKey, &mut Matrix)) {
        self.encoder[0].visit_params(visitor);
    }

    fn fresh_copy(&self) -> Box<dyn Model> {
        Box::new(PairDiff::new(self.encoder[0].fresh_copy()))
    }
}

pub fn diff(encoder: Box<dyn Model>) -> Box<dyn Model> {
    Box::new(PairDiff::new(encoder))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::data::vectors::VectorTable;
    use crate::layers::{mean_pool, ExtractWindow, Maxout, StaticVectors, WordIds};
    use crate::model::combinators::{flatten_add_lengths, with_flat};
    use crate::model::model::boxed;

    fn words(text: &str) -> Vec<String> {
        text.split(' ').map(String::from).collect()
    }

    #[test]
    fn identical_sides_have_zero_difference_even_with_windows() {
        let table = Arc::new(VectorTable::from_pairs(2, vec![
            ("a".to_string(), vec![0.3, -0.2]),
            ("b".to_string(), vec![0.9, 0.4]),
            ("c".to_string(), vec![-0.5, 0.7]),
        ]).unwrap());
        let encoder = boxed(WordIds::new(Arc::clone(&table)))
            >> flatten_add_lengths()
            >> with_flat(boxed(StaticVectors::new(table, 3)))
            >> boxed(ExtractWindow::new(1))
            >> with_flat(boxed(Maxout::new(3, Some(9), 2)))
            >> mean_pool();
        let model = PairDiff::new(encoder);

        let input = Batch::Pairs(vec![
            (words("c a"), words("b c")),
            (words("a b"), words("a b")),
        ]);
        let out = model.predict(&input).unwrap().into_floats("test").unwrap();
        assert_eq!(out.shape(), (2, 6));
        assert!(out.data[1][..3].iter().all(|&d| d == 0.0), "{:?}", out.data[1]);
    }
}
