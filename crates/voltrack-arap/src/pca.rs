use faer::{Mat, Side};
use voltrack_3d::pointcloud::{common_point_count, Frame};

use crate::TrackingError;

/// Principal component analysis of point trajectories.
#[derive(Debug, Clone)]
pub struct TrajectoryPca {
    /// Every eigenvalue of the trajectory autocorrelation matrix, in decreasing order.
    pub eigenvalues: Vec<f64>,
    /// Coordinates of each point's trajectory on the leading components.
    pub embedding: Vec<Vec<f64>>,
}

impl TrajectoryPca {
    /// Number of embedding components.
    pub fn components(&self) -> usize {
        self.embedding.first().map_or(0, Vec::len)
    }

    /// Fraction of the total variance explained by the embedding components.
    pub fn explained_variance(&self) -> f64 {
        let total: f64 = self.eigenvalues.iter().map(|e| e.max(0.0)).sum();
        if total <= 0.0 {
            return 1.0;
        }
        let kept: f64 = self
            .eigenvalues
            .iter()
            .take(self.components())
            .map(|e| e.max(0.0))
            .sum();
        kept / total
    }

    /// Squared distance between the embeddings of points `i` and `j`.
    pub fn distance_squared(&self, i: usize, j: usize) -> f64 {
        self.embedding[i]
            .iter()
            .zip(self.embedding[j].iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum()
    }
}

/// Project every point trajectory onto its leading principal components.
///
/// Each trajectory stacks the x, y and z coordinates of one point over all frames into a vector
/// of length `3 F`. The rows of the resulting `3 F x N` matrix are centered, the autocorrelation
/// matrix is eigendecomposed, and each trajectory is projected on the eigenvectors with the
/// largest eigenvalues.
///
/// # Arguments
///
/// * `frames` - The tracked frames, all with the same number of points.
/// * `components` - The number of components to keep, clamped to `3 F`.
pub fn trajectory_pca(frames: &[Frame], components: usize) -> Result<TrajectoryPca, TrackingError> {
    let n = common_point_count(frames).map_err(|(index, found)| {
        TrackingError::PointCountMismatch {
            index,
            expected: frames[0].len(),
            found,
        }
    })?;
    let rows = 3 * frames.len();
    let components = components.min(rows);
    if n == 0 {
        return Ok(TrajectoryPca {
            eigenvalues: vec![0.0; rows],
            embedding: Vec::new(),
        });
    }

    let mut m = Mat::<f64>::from_fn(rows, n, |r, c| frames[r / 3][c][r % 3]);
    for r in 0..rows {
        let mean = (0..n).map(|c| m.read(r, c)).sum::<f64>() / n as f64;
        for c in 0..n {
            m.write(r, c, m.read(r, c) - mean);
        }
    }

    let autocorrelation = m.as_ref() * m.transpose();
    let evd = autocorrelation.selfadjoint_eigendecomposition(Side::Lower);
    let values = evd.s().column_vector();
    let u = evd.u();

    let mut order: Vec<usize> = (0..rows).collect();
    order.sort_by(|&a, &b| values.read(b).total_cmp(&values.read(a)));
    let eigenvalues = order.iter().map(|&k| values.read(k)).collect();

    let embedding = (0..n)
        .map(|c| {
            order
                .iter()
                .take(components)
                .map(|&k| (0..rows).map(|r| u.read(r, k) * m.read(r, c)).sum())
                .collect()
        })
        .collect();

    Ok(TrajectoryPca {
        eigenvalues,
        embedding,
    })
}
