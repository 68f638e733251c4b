use rayon::prelude::*;

/// A dense `n x n` matrix of `f32` stored row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct SquareMatrix {
    n: usize,
    data: Vec<f32>,
}

impl SquareMatrix {
    /// Create a matrix filled with `value`.
    pub fn filled(n: usize, value: f32) -> Self {
        Self {
            n,
            data: vec![value; n * n],
        }
    }

    /// Wrap row-major values. Returns `None` if `data` does not hold `n * n` values.
    pub fn from_vec(n: usize, data: Vec<f32>) -> Option<Self> {
        (data.len() == n * n).then_some(Self { n, data })
    }

    /// Build a matrix by evaluating `f(i, j)` for every entry, rows in parallel.
    pub fn from_fn<F>(n: usize, f: F) -> Self
    where
        F: Fn(usize, usize) -> f32 + Sync,
    {
        let mut m = Self::filled(n, 0.0);
        m.fill_rows(|i, row| row.iter_mut().enumerate().for_each(|(j, v)| *v = f(i, j)));
        m
    }

    /// Dimension of the matrix.
    pub fn len(&self) -> usize {
        self.n
    }

    /// Whether the matrix has no rows.
    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// Entry `(i, j)`.
    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f32 {
        self.data[i * self.n + j]
    }

    /// Set entry `(i, j)`.
    #[inline]
    pub fn set(&mut self, i: usize, j: usize, value: f32) {
        self.data[i * self.n + j] = value;
    }

    /// Row `i`.
    #[inline]
    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.n..(i + 1) * self.n]
    }

    /// All entries, row-major.
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Overwrite every row with `f(i, row)`, rows in parallel.
    pub fn fill_rows<F>(&mut self, f: F)
    where
        F: Fn(usize, &mut [f32]) + Sync,
    {
        if self.n == 0 {
            return;
        }
        self.data
            .par_chunks_mut(self.n)
            .enumerate()
            .for_each(|(i, row)| f(i, row));
    }

    /// Replace every entry by the larger of itself and the matching entry of `other`.
    pub fn max_assign(&mut self, other: &Self) {
        self.data
            .par_iter_mut()
            .zip(other.data.par_iter())
            .for_each(|(a, &b)| *a = a.max(b));
    }

    /// The matrix with entry `(i, j)` set to `max(m_ij, m_ji)`.
    pub fn symmetric_max(&self) -> Self {
        Self::from_fn(self.n, |i, j| self.get(i, j).max(self.get(j, i)))
    }

    /// The matrix with entry `(i, j)` set to `(m_ij + m_ji) / 2`.
    pub fn symmetric_mean(&self) -> Self {
        Self::from_fn(self.n, |i, j| {
            if i == j {
                self.get(i, i)
            } else {
                // summing in index order keeps the result bitwise symmetric
                let (a, b) = if i < j { (i, j) } else { (j, i) };
                0.5 * (self.get(a, b) + self.get(b, a))
            }
        })
    }

    /// Whether `|m_ij - m_ji| <= tolerance` for every pair.
    pub fn is_symmetric(&self, tolerance: f32) -> bool {
        (0..self.n).all(|i| (i + 1..self.n).all(|j| (self.get(i, j) - self.get(j, i)).abs() <= tolerance))
    }

    /// Keep the rows and columns listed in `kept`, in that order.
    pub fn select(&self, kept: &[usize]) -> Self {
        Self::from_fn(kept.len(), |i, j| self.get(kept[i], kept[j]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symmetrize() {
        let m = SquareMatrix::from_vec(2, vec![1.0, 2.0, 4.0, 1.0]).unwrap();
        assert!(!m.is_symmetric(0.5));
        assert_eq!(m.symmetric_max().as_slice(), &[1.0, 4.0, 4.0, 1.0]);
        assert_eq!(m.symmetric_mean().as_slice(), &[1.0, 3.0, 3.0, 1.0]);
        assert!(m.symmetric_mean().is_symmetric(0.0));
        assert!(SquareMatrix::from_vec(2, vec![1.0]).is_none());
    }

    #[test]
    fn test_select_and_max() {
        let mut m = SquareMatrix::from_fn(3, |i, j| (i * 3 + j) as f32);
        let s = m.select(&[0, 2]);
        assert_eq!(s.as_slice(), &[0.0, 2.0, 6.0, 8.0]);

        m.max_assign(&SquareMatrix::filled(3, 4.0));
        assert_eq!(m.row(0), &[4.0, 4.0, 4.0]);
        assert_eq!(m.row(2), &[6.0, 7.0, 8.0]);
        assert!(SquareMatrix::filled(0, 1.0).is_empty());
    }
}
