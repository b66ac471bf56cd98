use rand::Rng;

use crate::error::{NnError, NnResult};
use crate::math::matrix::Matrix;
use crate::model::batch::Batch;
use crate::model::model::{next_model_id, Model, ParamKey};
use crate::optim::Optimizer;

const LSUV_TOLERANCE: f64 = 0.1;
const LSUV_MAX_ROUNDS: usize = 10;

/// Forward state kept between `begin_update` and `backprop`.
struct MaxoutCache {
    input: Matrix,
    /// Winning piece for each output unit.
    which: Vec<Vec<usize>>,
    /// Inverted-dropout mask, already scaled by 1 / (1 - drop).
    mask: Option<Matrix>,
}

/// Affine layer followed by a max over `pieces` candidate units.
///
/// Weights are stored input-major as `(nr_in, nr_out * pieces)`; column
/// `o * pieces + p` is piece `p` of output unit `o`. The input width may be
/// left unset and is inferred from the first batch the layer sees.
pub struct Maxout {
    id: usize,
    nr_out: usize,
    pieces: usize,
    weights: Matrix,
    biases: Matrix,
    cache: Option<MaxoutCache>,
}

impl Maxout {
    pub fn new(nr_out: usize, nr_in: Option<usize>, pieces: usize) -> Maxout {
        let mut layer = Maxout {
            id: next_model_id(),
            nr_out,
            pieces: pieces.max(1),
            weights: Matrix::default(),
            biases: Matrix::default(),
            cache: None,
        };
        if let Some(nr_in) = nr_in {
            layer.allocate(nr_in);
        }
        layer
    }

    fn allocate(&mut self, nr_in: usize) {
        self.weights = Matrix::xavier(nr_in, self.nr_out * self.pieces);
        self.biases = Matrix::zeros(1, self.nr_out * self.pieces);
    }

    fn is_allocated(&self) -> bool {
        self.weights.rows > 0
    }

    fn check_input(&self, x: &Matrix) -> NnResult<()> {
        if !self.is_allocated() {
            return Err(NnError::Uninitialized(self.name().to_string()));
        }
        if x.cols != self.weights.rows {
            return Err(NnError::shape(self.name(), (x.rows, self.weights.rows), x.shape()));
        }
        Ok(())
    }

    fn ensure_allocated(&mut self, x: &Matrix) {
        if !self.is_allocated() {
            self.allocate(x.cols);
        }
    }

    /// Returns the max over pieces and the index of the winning piece.
    fn forward(&self, x: &Matrix) -> (Matrix, Vec<Vec<usize>>) {
        let z = x.matmul(&self.weights).add_row_vector(&self.biases);
        let mut out = Matrix::zeros(x.rows, self.nr_out);
        let mut which = vec![vec![0; self.nr_out]; x.rows];
        for (i, row) in z.data.iter().enumerate() {
            for (o, cands) in row.chunks(self.pieces).enumerate() {
                let mut best = 0;
                for (p, &c) in cands.iter().enumerate() {
                    if c > cands[best] {
                        best = p;
                    }
                }
                out.data[i][o] = cands[best];
                which[i][o] = best;
            }
        }
        (out, which)
    }

    /// Layer-sequential unit variance: rescale the weights until the output
    /// variance on the sample is close to one.
    fn lsuv(&mut self, x: &Matrix) {
        if x.rows == 0 {
            return;
        }
        for _ in 0..LSUV_MAX_ROUNDS {
            let var = self.forward(x).0.variance();
            if (var - 1.0).abs() < LSUV_TOLERANCE || var <= f64::EPSILON {
                break;
            }
            self.weights = self.weights.scale(1.0 / var.sqrt());
        }
    }
}

impl Model for Maxout {
    fn name(&self) -> &str {
        "maxout"
    }

    fn id(&self) -> usize {
        self.id
    }

    fn nr_in(&self) -> Option<usize> {
        self.is_allocated().then_some(self.weights.rows)
    }

    fn nr_out(&self) -> Option<usize> {
        Some(self.nr_out)
    }

    fn nr_weight(&self) -> usize {
        self.weights.len() + self.biases.len()
    }

    fn initialize(&mut self, sample: &Batch, _labels: Option<&Matrix>) -> NnResult<Batch> {
        let x = sample.as_floats(self.name())?;
        self.ensure_allocated(x);
        self.check_input(x)?;
        self.lsuv(x);
        Ok(Batch::Floats(self.forward(x).0))
    }

    fn predict(&self, input: &Batch) -> NnResult<Batch> {
        let x = input.as_floats(self.name())?;
        self.check_input(x)?;
        Ok(Batch::Floats(self.forward(x).0))
    }

    fn begin_update(&mut self, input: &Batch, drop: f64) -> NnResult<Batch> {
        let x = input.as_floats(self.name())?;
        self.ensure_allocated(x);
        self.check_input(x)?;
        let (mut out, which) = self.forward(x);
        let mask = if drop > 0.0 {
            let mask = dropout_mask(out.rows, out.cols, drop);
            out = out.hadamard(&mask);
            Some(mask)
        } else {
            None
        };
        self.cache = Some(MaxoutCache { input: x.clone(), which, mask });
        Ok(Batch::Floats(out))
    }

    fn backprop(&mut self, d_output: &Batch, sgd: &mut dyn Optimizer) -> NnResult<Option<Batch>> {
        let cache = self.cache.take()
            .ok_or_else(|| NnError::NoForwardState(self.name().to_string()))?;
        let mut d_out = d_output.as_floats(self.name())?.clone();
        if d_out.shape() != (cache.input.rows, self.nr_out) {
            return Err(NnError::shape(self.name(), (cache.input.rows, self.nr_out), d_out.shape()));
        }
        if let Some(mask) = &cache.mask {
            d_out = d_out.hadamard(mask);
        }

        // Route each output gradient to the piece that won the max.
        let mut d_z = Matrix::zeros(d_out.rows, self.nr_out * self.pieces);
        for (i, row) in d_out.data.iter().enumerate() {
            for (o, &d) in row.iter().enumerate() {
                d_z.data[i][o * self.pieces + cache.which[i][o]] = d;
            }
        }

        let d_input = d_z.matmul(&self.weights.transpose());
        let d_weights = cache.input.transpose().matmul(&d_z);
        let d_biases = d_z.sum_rows();

        sgd.update(ParamKey::new(self.id, 0), &mut self.weights, &d_weights);
        sgd.update(ParamKey::new(self.id, 1), &mut self.biases, &d_biases);
        Ok(Some(Batch::Floats(d_input)))
    }

    fn visit_params(&mut self, visitor: &mut dyn FnMut(ParamKey, &mut Matrix)) {
        visitor(ParamKey::new(self.id, 0), &mut self.weights);
        visitor(ParamKey::new(self.id, 1), &mut self.biases);
    }

    fn fresh_copy(&self) -> Box<dyn Model> {
        Box::new(Maxout::new(self.nr_out, self.nr_in(), self.pieces))
    }
}

/// Inverted dropout mask: zero with probability `drop`, else `1 / (1 - drop)`.
pub(crate) fn dropout_mask(rows: usize, cols: usize, drop: f64) -> Matrix {
    let mut rng = rand::thread_rng();
    let keep = 1.0 - drop.clamp(0.0, 0.99);
    let mut mask = Matrix::zeros(rows, cols);
    for row in mask.data.iter_mut() {
        for x in row.iter_mut() {
            if rng.gen::<f64>() < keep {
                *x = 1.0 / keep;
            }
        }
    }
    mask
}
