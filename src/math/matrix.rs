use rand::prelude::*;
use serde::{Serialize, Deserialize};
use std::f64::consts::PI;
use std::ops::{Add, Sub, Mul, Range};

/// Dense row-major matrix. Every layer in the crate passes its activations
/// and gradients around as one of these, one row per token or per text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Matrix{
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<Vec<f64>>
}

impl Matrix{
    pub fn zeros(rows: usize, cols: usize) -> Matrix {
        Matrix{
            rows,
            cols,
            data: vec![vec![0.0; cols]; rows]
        }
    }

    /// Uniform samples in [-scale, scale).
    pub fn uniform(rows: usize, cols: usize, scale: f64) -> Matrix {
        let mut rng = rand::thread_rng();
        let mut res = Matrix::zeros(rows, cols);
        for row in res.data.iter_mut() {
            for x in row.iter_mut() {
                *x = (rng.gen::<f64>() * 2.0 - 1.0) * scale;
            }
        }
        res
    }

    /// Samples a single value from N(0, 1) using the Box-Muller transform.
    fn sample_standard_normal(rng: &mut ThreadRng) -> f64 {
        let u1: f64 = 1.0 - rng.gen::<f64>();
        let u2: f64 = 1.0 - rng.gen::<f64>();
        (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
    }

    /// Xavier (Glorot) initialization: samples from N(0, sqrt(1 / rows)).
    ///
    /// Weights are stored input-major, so `rows` is the fan-in.
    pub fn xavier(rows: usize, cols: usize) -> Matrix {
        let mut rng = rand::thread_rng();
        let std_dev = (1.0 / rows.max(1) as f64).sqrt();
        let mut res = Matrix::zeros(rows, cols);
        for row in res.data.iter_mut() {
            for x in row.iter_mut() {
                *x = Matrix::sample_standard_normal(&mut rng) * std_dev;
            }
        }
        res
    }

    pub fn from_data(data: Vec<Vec<f64>>) -> Matrix {
        let cols = data.first().map_or(0, |row| row.len());
        Matrix {
            rows: data.len(),
            cols,
            data
        }
    }

    /// Like `from_data`, but keeps the column count when there are no rows.
    pub fn from_rows(data: Vec<Vec<f64>>, cols: usize) -> Matrix {
        Matrix { rows: data.len(), cols, data }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn transpose(&self) -> Matrix {
        let mut res = Matrix::zeros(self.cols, self.rows);

        for i in 0..res.rows {
            for j in 0..res.cols {
                res.data[i][j] = self.data[j][i];
            }
        }

        res
    }

    pub fn map<F>(&self, functor: F) -> Matrix
    where
        F: Fn(f64) -> f64,
    {
        let data = self.data.iter()
            .map(|row| row.iter().map(|&x| functor(x)).collect())
            .collect();
        Matrix::from_rows(data, self.cols)
    }

    pub fn scale(&self, factor: f64) -> Matrix {
        self.map(|x| x * factor)
    }

    /// `self · rhs` without consuming either side.
    pub fn matmul(&self, rhs: &Matrix) -> Matrix {
        assert_eq!(self.cols, rhs.rows, "matmul: {:?} x {:?}", self.shape(), rhs.shape());
        let mut res = Matrix::zeros(self.rows, rhs.cols);
        for (out_row, row) in res.data.iter_mut().zip(self.data.iter()) {
            for (k, &a) in row.iter().enumerate() {
                if a == 0.0 {
                    continue;
                }
                for (out, &b) in out_row.iter_mut().zip(rhs.data[k].iter()) {
                    *out += a * b;
                }
            }
        }
        res
    }

    /// Element-wise (Hadamard) product of two same-shape matrices.
    pub fn hadamard(&self, rhs: &Matrix) -> Matrix {
        assert_eq!(self.shape(), rhs.shape());
        let data = self.data.iter().zip(rhs.data.iter())
            .map(|(row_a, row_b)| {
                row_a.iter().zip(row_b.iter()).map(|(x, y)| x * y).collect()
            })
            .collect();
        Matrix::from_rows(data, self.cols)
    }

    pub fn add_assign(&mut self, rhs: &Matrix) {
        assert_eq!(self.shape(), rhs.shape());
        for (row_a, row_b) in self.data.iter_mut().zip(rhs.data.iter()) {
            for (x, y) in row_a.iter_mut().zip(row_b.iter()) {
                *x += y;
            }
        }
    }

    /// Adds a 1×cols bias row to every row.
    pub fn add_row_vector(&self, bias: &Matrix) -> Matrix {
        assert_eq!(bias.rows, 1);
        assert_eq!(bias.cols, self.cols);
        let data = self.data.iter()
            .map(|row| row.iter().zip(bias.data[0].iter()).map(|(x, b)| x + b).collect())
            .collect();
        Matrix::from_rows(data, self.cols)
    }

    /// Column sums as a 1×cols matrix.
    pub fn sum_rows(&self) -> Matrix {
        let mut sums = vec![0.0; self.cols];
        for row in &self.data {
            for (s, x) in sums.iter_mut().zip(row.iter()) {
                *s += x;
            }
        }
        Matrix::from_rows(vec![sums], self.cols)
    }

    pub fn hstack(parts: &[&Matrix]) -> Matrix {
        let rows = parts.first().map_or(0, |m| m.rows);
        assert!(parts.iter().all(|m| m.rows == rows), "hstack: row counts differ");
        let cols = parts.iter().map(|m| m.cols).sum();
        let data = (0..rows)
            .map(|i| parts.iter().flat_map(|m| m.data[i].iter().copied()).collect())
            .collect();
        Matrix::from_rows(data, cols)
    }

    pub fn vstack(parts: &[&Matrix]) -> Matrix {
        let cols = parts.first().map_or(0, |m| m.cols);
        assert!(parts.iter().all(|m| m.cols == cols), "vstack: column counts differ");
        let data = parts.iter().flat_map(|m| m.data.iter().cloned()).collect();
        Matrix::from_rows(data, cols)
    }

    pub fn slice_rows(&self, range: Range<usize>) -> Matrix {
        Matrix::from_rows(self.data[range].to_vec(), self.cols)
    }

    pub fn slice_cols(&self, range: Range<usize>) -> Matrix {
        let cols = range.len();
        let data = self.data.iter().map(|row| row[range.clone()].to_vec()).collect();
        Matrix::from_rows(data, cols)
    }

    /// Index of the largest value in row `i`.
    pub fn row_argmax(&self, i: usize) -> usize {
        argmax(&self.data[i])
    }

    /// Population variance over all elements.
    pub fn variance(&self) -> f64 {
        let n = self.len();
        if n == 0 {
            return 0.0;
        }
        let mean = self.data.iter().flatten().sum::<f64>() / n as f64;
        self.data.iter().flatten().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64
    }

    /// Numerically stable softmax applied to each row.
    pub fn softmax_rows(&self) -> Matrix {
        let data = self.data.iter()
            .map(|row| {
                let max = row.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
                let exps: Vec<f64> = row.iter().map(|x| (x - max).exp()).collect();
                let sum: f64 = exps.iter().sum();
                exps.into_iter().map(|e| e / sum).collect()
            })
            .collect();
        Matrix::from_rows(data, self.cols)
    }
}

/// Index of the maximum element in a slice.
pub fn argmax(v: &[f64]) -> usize {
    v.iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

impl Default for Matrix {
    fn default() -> Self {
        Matrix { rows: 0, cols: 0, data: vec![] }
    }
}

impl Add for Matrix {
    type Output = Matrix;

    fn add(mut self, rhs: Self) -> Self::Output {
        if self.rows != rhs.rows || self.cols != rhs.cols {
            panic!("Matrices are of incorrect sizes")
        }
        self.add_assign(&rhs);
        self
    }
}

impl Sub for Matrix {
    type Output = Matrix;

    fn sub(mut self, rhs: Self) -> Self::Output {
        if self.rows != rhs.rows || self.cols != rhs.cols {
            panic!("Matrices are of incorrect sizes")
        }
        for (row_a, row_b) in self.data.iter_mut().zip(rhs.data.iter()) {
            for (x, y) in row_a.iter_mut().zip(row_b.iter()) {
                *x -= y;
            }
        }
        self
    }
}

impl Mul for Matrix {
    type Output = Matrix;

    fn mul(self, rhs: Self) -> Self::Output {
        if self.cols != rhs.rows {
            panic!("Matrices are of incorrect sizes")
        }
        self.matmul(&rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matmul_matches_hand_computation() {
        let a = Matrix::from_data(vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
        let b = Matrix::from_data(vec![vec![5.0, 6.0], vec![7.0, 8.0]]);
        let c = a * b;
        assert_eq!(c.data, vec![vec![19.0, 22.0], vec![43.0, 50.0]]);
    }

    #[test]
    fn stacking_and_slicing_are_inverse() {
        let a = Matrix::from_data(vec![vec![1.0], vec![2.0]]);
        let b = Matrix::from_data(vec![vec![3.0, 4.0], vec![5.0, 6.0]]);
        let h = Matrix::hstack(&[&a, &b]);
        assert_eq!(h.shape(), (2, 3));
        assert_eq!(h.slice_cols(1..3), b);

        let v = Matrix::vstack(&[&b, &b]);
        assert_eq!(v.shape(), (4, 2));
        assert_eq!(v.slice_rows(2..4), b);
    }

    #[test]
    fn softmax_rows_sum_to_one() {
        let m = Matrix::from_data(vec![vec![1.0, 2.0, 3.0], vec![1000.0, 1000.0, 1000.0]]);
        let s = m.softmax_rows();
        for row in &s.data {
            assert!((row.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        }
        assert_eq!(s.row_argmax(0), 2);
        assert!((s.data[1][0] - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn empty_rows_keep_their_width() {
        let m = Matrix::from_rows(vec![], 4);
        assert_eq!(m.shape(), (0, 4));
        assert_eq!(m.sum_rows().data, vec![vec![0.0; 4]]);
        assert_eq!(Matrix::from_data(vec![]).shape(), (0, 0));
    }
}
