use crate::error::{NnError, NnResult};
use crate::math::matrix::Matrix;
use crate::model::batch::Batch;
use crate::model::model::{next_model_id, Model};
use crate::optim::Optimizer;

/// Concatenates each row with its `n_w` neighbours on either side.
///
/// Row `i` of the output is `[x(i - n_w), ..., x(i), ..., x(i + n_w)]`, with
/// zeros past either end of its sequence. `Floats` input is one sequence;
/// `Ragged` input keeps every window inside its own text, so neighbouring
/// texts in a batch never see each other. Stacking a window with a dense
/// layer `depth` times lets every token see `2 * n_w * depth` surrounding
/// tokens.
pub struct ExtractWindow {
    id: usize,
    n_w: usize,
    cache: Option<WindowCache>,
}

struct WindowCache {
    width: usize,
    lengths: Option<Vec<usize>>,
}

impl ExtractWindow {
    pub fn new(n_w: usize) -> ExtractWindow {
        ExtractWindow { id: next_model_id(), n_w, cache: None }
    }

    fn window(&self) -> usize {
        2 * self.n_w + 1
    }

    fn unpack<'a>(&self, input: &'a Batch) -> NnResult<(&'a Matrix, Option<&'a [usize]>)> {
        match input {
            Batch::Floats(x) => Ok((x, None)),
            Batch::Ragged { data, lengths } => {
                let total: usize = lengths.iter().sum();
                if total != data.rows {
                    return Err(NnError::shape(self.name(), (total, data.cols), data.shape()));
                }
                Ok((data, Some(lengths)))
            }
            other => Err(NnError::input_kind(self.name(), "floats", other.kind())),
        }
    }

    /// `(output row, block, source row)` for every neighbour that exists.
    fn neighbours(&self, rows: usize, lengths: Option<&[usize]>) -> Vec<(usize, usize, usize)> {
        let whole = [rows];
        let lengths = lengths.unwrap_or(&whole);
        let mut links = Vec::new();
        let mut start = 0;
        for &len in lengths {
            for i in 0..len {
                for k in 0..self.window() {
                    let src = i as isize + k as isize - self.n_w as isize;
                    if src >= 0 && (src as usize) < len {
                        links.push((start + i, k, start + src as usize));
                    }
                }
            }
            start += len;
        }
        links
    }

    fn forward(&self, x: &Matrix, lengths: Option<&[usize]>) -> Matrix {
        let width = x.cols;
        let mut out = Matrix::zeros(x.rows, width * self.window());
        for (row, k, src) in self.neighbours(x.rows, lengths) {
            out.data[row][k * width..(k + 1) * width].copy_from_slice(&x.data[src]);
        }
        out
    }

    fn wrap(data: Matrix, lengths: Option<&[usize]>) -> Batch {
        match lengths {
            Some(lengths) => Batch::Ragged { data, lengths: lengths.to_vec() },
            None => Batch::Floats(data),
        }
    }
}

impl Model for ExtractWindow {
    fn name(&self) -> &str {
        "extract_window"
    }

    fn id(&self) -> usize {
        self.id
    }

    fn predict(&self, input: &Batch) -> NnResult<Batch> {
        let (x, lengths) = self.unpack(input)?;
        Ok(ExtractWindow::wrap(self.forward(x, lengths), lengths))
    }

    fn begin_update(&mut self, input: &Batch, _drop: f64) -> NnResult<Batch> {
        let (x, lengths) = self.unpack(input)?;
        let out = ExtractWindow::wrap(self.forward(x, lengths), lengths);
        self.cache = Some(WindowCache { width: x.cols, lengths: lengths.map(|l| l.to_vec()) });
        Ok(out)
    }

    fn backprop(&mut self, d_output: &Batch, _sgd: &mut dyn Optimizer) -> NnResult<Option<Batch>> {
        let cache = self.cache.take()
            .ok_or_else(|| NnError::NoForwardState(self.name().to_string()))?;
        let (d_out, _) = self.unpack(d_output)?;
        let width = cache.width;
        if d_out.cols != width * self.window() {
            return Err(NnError::shape(self.name(), (d_out.rows, width * self.window()), d_out.shape()));
        }
        let lengths = cache.lengths.as_deref();
        let mut d_input = Matrix::zeros(d_out.rows, width);
        for (row, k, src) in self.neighbours(d_out.rows, lengths) {
            let block = &d_out.data[row][k * width..(k + 1) * width];
            for (d, g) in d_input.data[src].iter_mut().zip(block) {
                *d += g;
            }
        }
        Ok(Some(ExtractWindow::wrap(d_input, lengths)))
    }

    fn fresh_copy(&self) -> Box<dyn Model> {
        Box::new(ExtractWindow::new(self.n_w))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_of_one_builds_trigrams() {
        let layer = ExtractWindow::new(1);
        let x = Batch::Floats(Matrix::from_data(vec![vec![1.0], vec![2.0], vec![3.0]]));
        let out = layer.predict(&x).unwrap().into_floats("test").unwrap();
        assert_eq!(out.data, vec![
            vec![0.0, 1.0, 2.0],
            vec![1.0, 2.0, 3.0],
            vec![2.0, 3.0, 0.0],
        ]);
    }

    #[test]
    fn ragged_windows_stop_at_text_boundaries() {
        let layer = ExtractWindow::new(1);
        let x = Batch::Ragged {
            data: Matrix::from_data(vec![vec![1.0], vec![2.0], vec![3.0]]),
            lengths: vec![2, 0, 1],
        };
        match layer.predict(&x).unwrap() {
            Batch::Ragged { data, lengths } => {
                assert_eq!(lengths, vec![2, 0, 1]);
                assert_eq!(data.data, vec![
                    vec![0.0, 1.0, 2.0],
                    vec![1.0, 2.0, 0.0],
                    vec![0.0, 3.0, 0.0],
                ]);
            }
            other => panic!("expected ragged output, got {}", other.kind()),
        }
    }

    #[test]
    fn ragged_gradient_keeps_its_lengths() {
        let mut layer = ExtractWindow::new(1);
        let x = Batch::Ragged { data: Matrix::uniform(3, 2, 1.0), lengths: vec![1, 2] };
        layer.begin_update(&x, 0.0).unwrap();
        let d = Batch::Ragged { data: Matrix::uniform(3, 6, 1.0), lengths: vec![1, 2] };
        let mut sgd = crate::optim::Sgd::new(0.0);
        match layer.backprop(&d, &mut sgd).unwrap() {
            Some(Batch::Ragged { data, lengths }) => {
                assert_eq!(data.shape(), (3, 2));
                assert_eq!(lengths, vec![1, 2]);
            }
            other => panic!("unexpected gradient {:?}", other),
        }
    }
}
