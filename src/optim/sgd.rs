use crate::math::matrix::Matrix;
use crate::model::model::ParamKey;
use crate::optim::Optimizer;

pub struct Sgd {
    pub learning_rate: f64,
    nr_iter: usize,
}

impl Sgd {
    pub fn new(learning_rate: f64) -> Sgd {
        Sgd { learning_rate, nr_iter: 0 }
    }
}

impl Optimizer for Sgd {
    /// Plain gradient descent: `w -= lr * g`.
    fn update(&mut self, _key: ParamKey, weights: &mut Matrix, gradient: &Matrix) {
        if self.learning_rate == 0.0 {
            return;
        }
        weights.add_assign(&gradient.scale(-self.learning_rate));
    }

    fn finish_batch(&mut self) {
        self.nr_iter += 1;
    }

    fn nr_iter(&self) -> usize {
        self.nr_iter
    }

    fn learning_rate(&self) -> f64 {
        self.learning_rate
    }
}
