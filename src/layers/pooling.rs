use crate::error::{NnError, NnResult};
use crate::math::matrix::Matrix;
use crate::model::batch::Batch;
use crate::model::combinators::concatenate;
use crate::model::model::{next_model_id, Model};
use crate::optim::Optimizer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reduction {
    Mean,
    Max,
}

/// What backward needs from the forward pass.
enum PoolCache {
    Mean { lengths: Vec<usize> },
    /// Row index of the winner for every (sequence, column).
    Max { lengths: Vec<usize>, rows: usize, which: Vec<Vec<usize>> },
}

/// Reduces each sequence of a ragged batch to one row.
///
/// Empty sequences pool to a zero row and receive no gradient.
pub struct Pool {
    id: usize,
    reduction: Reduction,
    cache: Option<PoolCache>,
}

impl Pool {
    pub fn new(reduction: Reduction) -> Pool {
        Pool { id: next_model_id(), reduction, cache: None }
    }

    fn unpack<'a>(&self, input: &'a Batch) -> NnResult<(&'a Matrix, &'a [usize])> {
        match input {
            Batch::Ragged { data, lengths } => {
                let total: usize = lengths.iter().sum();
                if total != data.rows {
                    return Err(NnError::shape(self.name(), (total, data.cols), data.shape()));
                }
                Ok((data, lengths))
            }
            other => Err(NnError::input_kind(self.name(), "ragged floats", other.kind())),
        }
    }

    fn forward(&self, data: &Matrix, lengths: &[usize]) -> (Matrix, PoolCache) {
        let mut out = Matrix::zeros(lengths.len(), data.cols);
        let mut which = vec![vec![0; data.cols]; lengths.len()];
        let mut start = 0;
        for (b, &len) in lengths.iter().enumerate() {
            for row in start..start + len {
                for (c, &x) in data.data[row].iter().enumerate() {
                    match self.reduction {
                        Reduction::Mean => out.data[b][c] += x / len as f64,
                        Reduction::Max => {
                            if row == start || x > out.data[b][c] {
                                out.data[b][c] = x;
                                which[b][c] = row;
                            }
                        }
                    }
                }
            }
            start += len;
        }
        let cache = match self.reduction {
            Reduction::Mean => PoolCache::Mean { lengths: lengths.to_vec() },
            Reduction::Max => PoolCache::Max { lengths: lengths.to_vec(), rows: data.rows, which },
        };
        (out, cache)
    }
}

impl Model for Pool {
    fn name(&self) -> &str {
        match self.reduction {
            Reduction::Mean => "mean_pool",
            Reduction::Max => "max_pool",
        }
    }

    fn id(&self) -> usize {
        self.id
    }

    fn predict(&self, input: &Batch) -> NnResult<Batch> {
        let (data, lengths) = self.unpack(input)?;
        Ok(Batch::Floats(self.forward(data, lengths).0))
    }

    fn begin_update(&mut self, input: &Batch, _drop: f64) -> NnResult<Batch> {
        let (data, lengths) = self.unpack(input)?;
        let (out, cache) = self.forward(data, lengths);
        self.cache = Some(cache);
        Ok(Batch::Floats(out))
    }

    fn backprop(&mut self, d_output: &Batch, _sgd: &mut dyn Optimizer) -> NnResult<Option<Batch>> {
        let cache = self.cache.take()
            .ok_or_else(|| NnError::NoForwardState(self.name().to_string()))?;
        let d_out = d_output.as_floats(self.name())?;
        let (lengths, rows) = match &cache {
            PoolCache::Mean { lengths } => (lengths, lengths.iter().sum()),
            PoolCache::Max { lengths, rows, .. } => (lengths, *rows),
        };
        if d_out.rows != lengths.len() {
            return Err(NnError::shape(self.name(), (lengths.len(), d_out.cols), d_out.shape()));
        }
        let mut d_input = Matrix::zeros(rows, d_out.cols);
        match &cache {
            PoolCache::Mean { lengths } => {
                let mut start = 0;
                for (b, &len) in lengths.iter().enumerate() {
                    for row in start..start + len {
                        for (d, g) in d_input.data[row].iter_mut().zip(&d_out.data[b]) {
                            *d = g / len as f64;
                        }
                    }
                    start += len;
                }
            }
            PoolCache::Max { lengths, which, .. } => {
                for (b, &len) in lengths.iter().enumerate() {
                    if len == 0 {
                        continue;
                    }
                    for (c, &g) in d_out.data[b].iter().enumerate() {
                        d_input.data[which[b][c]][c] += g;
                    }
                }
            }
        }
        Ok(Some(Batch::Ragged { data: d_input, lengths: lengths.clone() }))
    }

    fn fresh_copy(&self) -> Box<dyn Model> {
        Box::new(Pool::new(self.reduction))
    }
}

pub fn mean_pool() -> Box<dyn Model> {
    Box::new(Pool::new(Reduction::Mean))
}

pub fn max_pool() -> Box<dyn Model> {
    Box::new(Pool::new(Reduction::Max))
}

/// Several reductions side by side: `Floats{B, k * W}`.
pub fn pooling(reductions: &[Reduction]) -> Box<dyn Model> {
    if reductions.len() == 1 {
        return Box::new(Pool::new(reductions[0]));
    }
    concatenate(reductions.iter().map(|&r| Box::new(Pool::new(r)) as Box<dyn Model>).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ragged() -> Batch {
        Batch::Ragged {
            data: Matrix::from_data(vec![vec![1.0, 4.0], vec![3.0, 2.0], vec![5.0, 5.0]]),
            lengths: vec![2, 0, 1],
        }
    }

    #[test]
    fn mean_and_max_over_sequences() {
        let mean = mean_pool().predict(&ragged()).unwrap().into_floats("test").unwrap();
        assert_eq!(mean.data, vec![vec![2.0, 3.0], vec![0.0, 0.0], vec![5.0, 5.0]]);
        let max = max_pool().predict(&ragged()).unwrap().into_floats("test").unwrap();
        assert_eq!(max.data, vec![vec![3.0, 4.0], vec![0.0, 0.0], vec![5.0, 5.0]]);
    }

    #[test]
    fn lengths_must_cover_every_row() {
        let bad = Batch::Ragged { data: Matrix::zeros(3, 2), lengths: vec![1, 1] };
        assert!(matches!(mean_pool().predict(&bad), Err(NnError::ShapeMismatch { .. })));
    }

    #[test]
    fn max_pool_routes_gradient_to_winner() {
        let mut pool = Pool::new(Reduction::Max);
        pool.begin_update(&ragged(), 0.0).unwrap();
        let d = Batch::Floats(Matrix::from_data(vec![vec![1.0, 2.0], vec![7.0, 7.0], vec![3.0, 4.0]]));
        let mut sgd = crate::optim::Sgd::new(0.0);
        match pool.backprop(&d, &mut sgd).unwrap() {
            Some(Batch::Ragged { data, lengths }) => {
                assert_eq!(lengths, vec![2, 0, 1]);
                assert_eq!(data.data, vec![vec![0.0, 2.0], vec![1.0, 0.0], vec![3.0, 4.0]]);
            }
            other => panic!("unexpected gradient {:?}", other),
        }
    }
}
