use glam::DVec3;
use voltrack_3d::pointcloud::Frame;
use voltrack_3d::volume::OccupancyVolume;

use super::{decay, frame_at, AffinityModel};
use crate::distances::spatial_distances;
use crate::weights::SmoothWeights;
use crate::TrackingError;

/// `w_ij = exp(-k |p_i - p_j|^2)` in the first frame, never updated.
pub struct SpatialAffinity {
    k: f64,
    weights: SmoothWeights,
}

impl SpatialAffinity {
    /// Create the weights from the reference frame.
    pub fn new(reference: &[DVec3], k: f64) -> Self {
        Self {
            k,
            weights: SmoothWeights::new(decay(&spatial_distances(reference), k)),
        }
    }
}

impl AffinityModel for SpatialAffinity {
    fn name(&self) -> &'static str {
        "spatial"
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
        let reference = frame_at(frames, 0)?;
        self.weights
            .set_matrix(decay(&spatial_distances(reference), self.k));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_spatial_weights_are_static() -> Result<(), TrackingError> {
        let frames = vec![
            vec![DVec3::ZERO, DVec3::X],
            vec![DVec3::ZERO, DVec3::X * 3.0],
        ];
        let mut model = SpatialAffinity::new(&frames[0], 2.0);
        assert_relative_eq!(model.weights().weight(0, 1), (-2.0f32).exp(), epsilon = 1e-6);

        model.cutoff(0.01);
        model.update(&frames, 1, None)?;
        assert!(model.weights().has_neighbors());
        assert_relative_eq!(model.weights().weight(1, 0), (-2.0f32).exp(), epsilon = 1e-6);
        Ok(())
    }
}
