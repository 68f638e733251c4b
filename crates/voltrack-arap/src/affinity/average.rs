use glam::DVec3;
use voltrack_3d::pointcloud::Frame;
use voltrack_3d::volume::OccupancyVolume;

use super::{decay, frame_at, AffinityModel};
use crate::distances::spatial_distances;
use crate::error::ensure_len;
use crate::matrix::SquareMatrix;
use crate::weights::SmoothWeights;
use crate::TrackingError;

/// `w_ij = exp(-k d_ij)` with `d_ij` the squared distance averaged over the frames.
///
/// Forward tracking leaves the weights of the first frame in place. A batch update averages
/// over the whole sequence.
pub struct AverageDistanceAffinity {
    k: f64,
    weights: SmoothWeights,
}

impl AverageDistanceAffinity {
    /// Create the weights from the reference frame.
    pub fn new(reference: &[DVec3], k: f64) -> Self {
        Self {
            k,
            weights: SmoothWeights::new(decay(&spatial_distances(reference), k)),
        }
    }
}

/// Mean over `frames` of the squared distance between every pair of points.
pub(crate) fn mean_distances(frames: &[Frame]) -> Result<SquareMatrix, TrackingError> {
    let n = frame_at(frames, 0)?.len();
    for (index, frame) in frames.iter().enumerate() {
        ensure_len(index, n, frame.len())?;
    }
    let count = frames.len() as f64;
    Ok(SquareMatrix::from_fn(n, |i, j| {
        let sum: f64 = frames.iter().map(|f| f[i].distance_squared(f[j])).sum();
        (sum / count) as f32
    }))
}

impl AffinityModel for AverageDistanceAffinity {
    fn name(&self) -> &'static str {
        "average_distance"
    }

    fn weights(&self) -> &SmoothWeights {
        &self.weights
    }

    fn weights_mut(&mut self) -> &mut SmoothWeights {
        &mut self.weights
    }

    fn update(
        &mut self,
        _frames: &[Frame],
        _frame: usize,
        _volume: Option<&OccupancyVolume>,
    ) -> Result<(), TrackingError> {
        Ok(())
    }

    fn update_full(
        &mut self,
        frames: &[Frame],
        _volumes: Option<&[OccupancyVolume]>,
    ) -> Result<(), TrackingError> {
        let mean = mean_distances(frames)?;
        self.weights.set_matrix(decay(&mean, self.k));
        self.weights.enforce_self_affinity();
        Ok(())
    }
}
