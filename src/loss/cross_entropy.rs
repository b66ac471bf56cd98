use crate::math::matrix::Matrix;

/// Categorical cross-entropy loss for use with a Softmax output layer.
pub struct CrossEntropyLoss;

/// Small epsilon added inside log() to prevent log(0) = -inf.
const EPS: f64 = 1e-12;

impl CrossEntropyLoss {
    /// L = -sum(expected[i] * log(predicted[i] + eps)) for one row.
    pub fn loss(predicted: &[f64], expected: &[f64]) -> f64 {
        predicted.iter().zip(expected.iter())
            .map(|(p, e)| -e * (p + EPS).ln())
            .sum()
    }

    /// Gradient of softmax + cross-entropy w.r.t. the logits: `predicted - expected`.
    /// `Softmax::backprop` expects exactly this.
    pub fn derivative(predicted: &[f64], expected: &[f64]) -> Vec<f64> {
        predicted.iter().zip(expected.iter())
            .map(|(p, e)| p - e)
            .collect()
    }

    /// Mean of the per-row losses.
    pub fn batch_loss(predicted: &Matrix, expected: &Matrix) -> f64 {
        if predicted.rows == 0 {
            return 0.0;
        }
        predicted.data.iter().zip(expected.data.iter())
            .map(|(p, e)| CrossEntropyLoss::loss(p, e))
            .sum::<f64>() / predicted.rows as f64
    }

    /// Row-wise `derivative` for a whole batch.
    pub fn batch_derivative(predicted: &Matrix, expected: &Matrix) -> Matrix {
        let data = predicted.data.iter().zip(expected.data.iter())
            .map(|(p, e)| CrossEntropyLoss::derivative(p, e))
            .collect();
        Matrix::from_rows(data, predicted.cols)
    }
}
