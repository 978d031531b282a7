use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Square `f64` matrix stored row-major in one contiguous buffer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DenseMatrix {
    n: usize,
    data: Vec<f64>,
}

impl DenseMatrix {
    pub fn zeros(n: usize) -> Self {
        Self {
            n,
            data: vec![0.0; n * n],
        }
    }

    /// Build an `n × n` matrix by evaluating `f(row, col)` for every cell.
    pub fn from_fn(n: usize, mut f: impl FnMut(usize, usize) -> f64) -> Self {
        let mut data = Vec::with_capacity(n * n);
        for i in 0..n {
            for j in 0..n {
                data.push(f(i, j));
            }
        }
        Self { n, data }
    }

    /// Number of rows (and columns).
    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.data[i * self.n + j]
    }

    #[inline]
    pub fn set(&mut self, i: usize, j: usize, value: f64) {
        self.data[i * self.n + j] = value;
    }

    pub fn set_symmetric(&mut self, i: usize, j: usize, value: f64) {
        self.set(i, j, value);
        self.set(j, i, value);
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.n..(i + 1) * self.n]
    }

    /// Mutable rows as a rayon parallel iterator.
    pub fn par_rows_mut(&mut self) -> rayon::slice::ChunksMut<'_, f64> {
        // Chunk size must be non-zero even for an empty matrix.
        self.data.par_chunks_mut(self.n.max(1))
    }

    /// Mean of all off-diagonal cells, 0 when there are none.
    pub fn off_diagonal_mean(&self) -> f64 {
        if self.n < 2 {
            return 0.0;
        }
        let mut sum = 0.0;
        for i in 0..self.n {
            for (j, v) in self.row(i).iter().enumerate() {
                if i != j {
                    sum += v;
                }
            }
        }
        sum / (self.n * (self.n - 1)) as f64
    }

    /// Mean over all unordered pairs of distinct `members`, 0 for fewer than two.
    pub fn mean_pairwise(&self, members: &[usize]) -> f64 {
        if members.len() < 2 {
            return 0.0;
        }
        let mut sum = 0.0;
        for (a, &i) in members.iter().enumerate() {
            for &j in &members[a + 1..] {
                sum += self.get(i, j);
            }
        }
        let pairs = members.len() * (members.len() - 1) / 2;
        sum / pairs as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_fn_is_row_major() {
        let m = DenseMatrix::from_fn(3, |i, j| (i * 10 + j) as f64);
        assert_eq!(m.len(), 3);
        assert_eq!(m.get(2, 1), 21.0);
        assert_eq!(m.row(1), &[10.0, 11.0, 12.0]);
    }

    #[test]
    fn off_diagonal_mean_skips_diagonal() {
        let m = DenseMatrix::from_fn(3, |i, j| if i == j { 100.0 } else { 1.0 });
        assert!((m.off_diagonal_mean() - 1.0).abs() < 1e-10);
        assert_eq!(DenseMatrix::zeros(1).off_diagonal_mean(), 0.0);
    }

    #[test]
    fn mean_pairwise_over_members() {
        let mut m = DenseMatrix::zeros(4);
        m.set_symmetric(0, 1, 2.0);
        m.set_symmetric(0, 3, 4.0);
        m.set_symmetric(1, 3, 6.0);
        assert!((m.mean_pairwise(&[0, 1, 3]) - 4.0).abs() < 1e-10);
        assert_eq!(m.mean_pairwise(&[2]), 0.0);
    }

    #[test]
    fn parallel_rows_on_empty_matrix() {
        let mut m = DenseMatrix::zeros(0);
        assert!(m.is_empty());
        assert_eq!(m.par_rows_mut().count(), 0);
    }
}
