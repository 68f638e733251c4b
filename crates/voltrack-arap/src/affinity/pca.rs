use voltrack_3d::pointcloud::Frame;
use voltrack_3d::volume::OccupancyVolume;

use super::{frame_at, AffinityModel};
use crate::matrix::SquareMatrix;
use crate::pca::trajectory_pca;
use crate::weights::SmoothWeights;
use crate::TrackingError;

/// `w_ij = exp(-k |e_i - e_j|^2)` with `e` the principal component embedding of the
/// trajectories.
pub struct PcaAffinity {
    k: f64,
    components: usize,
    weights: SmoothWeights,
}

impl PcaAffinity {
    /// Create the weights from the frames tracked so far.
    pub fn new(frames: &[Frame], k: f64, components: usize) -> Result<Self, TrackingError> {
        frame_at(frames, 0)?;
        if components == 0 {
            return Err(TrackingError::InvalidParameter(
                "PCA affinity needs at least one component".into(),
            ));
        }
        let mut model = Self {
            k,
            components,
            weights: SmoothWeights::new(SquareMatrix::filled(frames[0].len(), 1.0)),
        };
        model.recompute(frames)?;
        Ok(model)
    }

    fn recompute(&mut self, frames: &[Frame]) -> Result<(), TrackingError> {
        let pca = trajectory_pca(frames, self.components)?;
        log::debug!(
            "trajectory PCA over {} frames explains {:.4} of the variance",
            frames.len(),
            pca.explained_variance()
        );
        let k = self.k;
        let n = pca.embedding.len();
        self.weights.set_matrix(SquareMatrix::from_fn(n, |i, j| {
            (-k * pca.distance_squared(i, j)).exp() as f32
        }));
        self.weights.enforce_self_affinity();
        Ok(())
    }
}

impl AffinityModel for PcaAffinity {
    fn name(&self) -> &'static str {
        "pca"
    }

    fn weights(&self) -> &SmoothWeights {
        &self.weights
    }

    fn weights_mut(&mut self) -> &mut SmoothWeights {
        &mut self.weights
    }

    fn update(
        &mut self,
        frames: &[Frame],
        frame: usize,
        _volume: Option<&OccupancyVolume>,
    ) -> Result<(), TrackingError> {
        frame_at(frames, frame)?;
        self.recompute(&frames[..=frame])
    }

    fn update_full(
        &mut self,
        frames: &[Frame],
        _volumes: Option<&[OccupancyVolume]>,
    ) -> Result<(), TrackingError> {
        frame_at(frames, 0)?;
        self.recompute(frames)
    }
}
