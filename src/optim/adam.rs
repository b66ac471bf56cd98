use std::collections::HashMap;

use crate::math::matrix::Matrix;
use crate::model::model::ParamKey;
use crate::optim::Optimizer;

/// Per-parameter optimizer state.
struct Moments {
    m: Matrix,
    v: Matrix,
    t: u64,
}

/// Adam with bias correction and a running average of every parameter.
///
/// The averages are what `use_params` swaps in for evaluation; they usually
/// score better on held-out data than the raw weights.
pub struct Adam {
    learning_rate: f64,
    beta1: f64,
    beta2: f64,
    epsilon: f64,
    nr_iter: usize,
    moments: HashMap<ParamKey, Moments>,
    averages: HashMap<ParamKey, Matrix>,
}

impl Adam {
    pub fn new(learning_rate: f64) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            nr_iter: 0,
            moments: HashMap::new(),
            averages: HashMap::new(),
        }
    }

    pub fn with_betas(mut self, beta1: f64, beta2: f64) -> Self {
        self.beta1 = beta1;
        self.beta2 = beta2;
        self
    }

    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }

    fn update_average(&mut self, key: ParamKey, weights: &Matrix, t: u64) {
        let decay = ((1.0 + t as f64) / (10.0 + t as f64)).min(0.9999);
        let avg = self.averages.entry(key).or_insert_with(|| weights.clone());
        for (avg_row, w_row) in avg.data.iter_mut().zip(weights.data.iter()) {
            for (a, w) in avg_row.iter_mut().zip(w_row.iter()) {
                *a -= (1.0 - decay) * (*a - w);
            }
        }
    }
}

impl Optimizer for Adam {
    fn update(&mut self, key: ParamKey, weights: &mut Matrix, gradient: &Matrix) {
        let (beta1, beta2, eps, lr) = (self.beta1, self.beta2, self.epsilon, self.learning_rate);
        let state = self.moments.entry(key).or_insert_with(|| Moments {
            m: Matrix::zeros(weights.rows, weights.cols),
            v: Matrix::zeros(weights.rows, weights.cols),
            t: 0,
        });
        // Layers that are re-initialized after a load can change shape.
        if state.m.shape() != weights.shape() {
            state.m = Matrix::zeros(weights.rows, weights.cols);
            state.v = Matrix::zeros(weights.rows, weights.cols);
            state.t = 0;
        }
        state.t += 1;
        let t = state.t;
        let correction1 = 1.0 - beta1.powi(t as i32);
        let correction2 = 1.0 - beta2.powi(t as i32);

        for i in 0..weights.rows {
            for j in 0..weights.cols {
                let g = gradient.data[i][j];
                let m = beta1 * state.m.data[i][j] + (1.0 - beta1) * g;
                let v = beta2 * state.v.data[i][j] + (1.0 - beta2) * g * g;
                state.m.data[i][j] = m;
                state.v.data[i][j] = v;
                let m_hat = m / correction1;
                let v_hat = v / correction2;
                weights.data[i][j] -= lr * m_hat / (v_hat.sqrt() + eps);
            }
        }

        self.update_average(key, weights, t);
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

    fn averages(&self) -> Option<&HashMap<ParamKey, Matrix>> {
        Some(&self.averages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_step_moves_each_weight_by_learning_rate() {
        let mut adam = Adam::new(0.1);
        let key = ParamKey::new(1, 0);
        let mut w = Matrix::from_data(vec![vec![1.0, -1.0]]);
        let g = Matrix::from_data(vec![vec![2.0, -0.5]]);
        adam.update(key, &mut w, &g);
        // Bias-corrected first step is lr * sign(g).
        assert!((w.data[0][0] - 0.9).abs() < 1e-6);
        assert!((w.data[0][1] + 0.9).abs() < 1e-6);
    }

    #[test]
    fn averages_trail_the_weights() {
        let mut adam = Adam::new(0.1);
        let key = ParamKey::new(7, 1);
        let mut w = Matrix::from_data(vec![vec![0.0]]);
        let g = Matrix::from_data(vec![vec![1.0]]);
        for _ in 0..5 {
            adam.update(key, &mut w, &g);
        }
        let avg = &adam.averages().unwrap()[&key];
        assert!(w.data[0][0] < avg.data[0][0]);
        assert!(avg.data[0][0] < 0.0);
    }
}
