use std::path::Path;

use rayon::prelude::*;
use voltrack_3d::io::matrix::{read_square_matrix, write_square_matrix};

use crate::matrix::SquareMatrix;
use crate::TrackingError;

/// Summary of neighbor list sizes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NeighborStats {
    /// Mean neighbor count.
    pub average: f64,
    /// Smallest neighbor count.
    pub min: usize,
    /// Largest neighbor count.
    pub max: usize,
}

/// A symmetric affinity matrix with optional thresholded neighbor lists.
///
/// Neighbor lists exist only between a call to [`SmoothWeights::cutoff`] and the next
/// rewrite of the matrix.
#[derive(Debug, Clone)]
pub struct SmoothWeights {
    matrix: SquareMatrix,
    neighbors: Option<Vec<Vec<usize>>>,
    threshold: Option<f32>,
}

impl SmoothWeights {
    /// Wrap a weight matrix. No neighbor lists are available yet.
    pub fn new(matrix: SquareMatrix) -> Self {
        Self {
            matrix,
            neighbors: None,
            threshold: None,
        }
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.matrix.len()
    }

    /// Whether there are no points.
    pub fn is_empty(&self) -> bool {
        self.matrix.is_empty()
    }

    /// The dense weights.
    pub fn matrix(&self) -> &SquareMatrix {
        &self.matrix
    }

    /// Weight between points `i` and `j`.
    #[inline]
    pub fn weight(&self, i: usize, j: usize) -> f32 {
        self.matrix.get(i, j)
    }

    /// The threshold of the last cutoff, if any.
    pub fn threshold(&self) -> Option<f32> {
        self.threshold
    }

    /// Whether neighbor lists are available.
    pub fn has_neighbors(&self) -> bool {
        self.neighbors.is_some()
    }

    /// Replace the matrix and drop the neighbor lists.
    pub fn set_matrix(&mut self, matrix: SquareMatrix) {
        self.matrix = matrix;
        self.neighbors = None;
    }

    /// Rewrite every row with `f(i, row)` in parallel and drop the neighbor lists.
    pub fn update_rows<F>(&mut self, f: F)
    where
        F: Fn(usize, &mut [f32]) + Sync,
    {
        self.matrix.fill_rows(f);
        self.neighbors = None;
    }

    /// Set each diagonal entry to the maximum of its row.
    pub fn enforce_self_affinity(&mut self) {
        self.matrix.fill_rows(|i, row| {
            let max = row.iter().copied().fold(f32::MIN, f32::max);
            row[i] = max;
        });
        self.neighbors = None;
    }

    /// Build the neighbor lists: `j` is a neighbor of `i` when `w_ij > threshold`.
    pub fn cutoff(&mut self, threshold: f32) {
        let n = self.matrix.len();
        let lists = if n == 0 {
            Vec::new()
        } else {
            self.matrix
                .as_slice()
                .par_chunks(n)
                .map(|row| {
                    row.iter()
                        .enumerate()
                        .filter(|(_, &w)| w > threshold)
                        .map(|(j, _)| j)
                        .collect()
                })
                .collect()
        };
        self.neighbors = Some(lists);
        self.threshold = Some(threshold);
    }

    /// Neighbor list of point `i`.
    pub fn neighbors(&self, i: usize) -> Result<&[usize], TrackingError> {
        let lists = self.neighbor_lists()?;
        lists
            .get(i)
            .map(Vec::as_slice)
            .ok_or(TrackingError::FrameOutOfRange {
                index: i,
                count: lists.len(),
            })
    }

    /// All neighbor lists.
    pub fn neighbor_lists(&self) -> Result<&[Vec<usize>], TrackingError> {
        self.neighbors
            .as_deref()
            .ok_or(TrackingError::MissingNeighbors)
    }

    /// Points with at most two neighbors, themselves included.
    pub fn detect_irregular(&self) -> Result<Vec<usize>, TrackingError> {
        Ok(self
            .neighbor_lists()?
            .iter()
            .enumerate()
            .filter(|(_, nn)| nn.len() <= 2)
            .map(|(i, _)| i)
            .collect())
    }

    /// Neighbor count statistics.
    pub fn neighbor_stats(&self) -> Result<NeighborStats, TrackingError> {
        let lists = self.neighbor_lists()?;
        let counts = lists.iter().map(Vec::len);
        let total: usize = counts.clone().sum();
        Ok(NeighborStats {
            average: if lists.is_empty() {
                0.0
            } else {
                total as f64 / lists.len() as f64
            },
            min: counts.clone().min().unwrap_or(0),
            max: counts.max().unwrap_or(0),
        })
    }

    /// Restrict to the points in `kept`, renumbering them `0..kept.len()`.
    ///
    /// Neighbor lists are carried over without the removed points.
    pub fn select(&self, kept: &[usize]) -> Self {
        let mut new_index = vec![None; self.len()];
        for (new, &old) in kept.iter().enumerate() {
            new_index[old] = Some(new);
        }
        let neighbors = self.neighbors.as_ref().map(|lists| {
            kept.iter()
                .map(|&old| lists[old].iter().filter_map(|&j| new_index[j]).collect())
                .collect()
        });
        Self {
            matrix: self.matrix.select(kept),
            neighbors,
            threshold: self.threshold,
        }
    }

    /// Write the matrix in the binary weight format.
    pub fn write(&self, path: impl AsRef<Path>) -> Result<(), TrackingError> {
        write_square_matrix(path, self.len(), self.matrix.as_slice())?;
        Ok(())
    }

    /// Read a matrix in the binary weight format.
    pub fn read(path: impl AsRef<Path>) -> Result<Self, TrackingError> {
        let (n, values) = read_square_matrix(path)?;
        let matrix = SquareMatrix::from_vec(n, values).ok_or_else(|| {
            TrackingError::InvalidParameter(format!("weight file does not hold a {n} x {n} matrix"))
        })?;
        Ok(Self::new(matrix))
    }
}
