use std::path::Path;

use voltrack_3d::pointcloud::Frame;
use voltrack_3d::volume::OccupancyVolume;

use super::AffinityModel;
use crate::weights::SmoothWeights;
use crate::TrackingError;

/// Weights supplied from outside and never updated.
pub struct ExternalAffinity {
    weights: SmoothWeights,
}

impl ExternalAffinity {
    /// Wrap externally computed weights.
    ///
    /// Weights that are not symmetric are replaced by `(w_ij + w_ji) / 2`, and every diagonal
    /// entry is raised to the maximum of its row.
    pub fn new(weights: SmoothWeights) -> Self {
        let mut weights = weights;
        if !weights.matrix().is_symmetric(0.0) {
            log::warn!("external weights are not symmetric, averaging with the transpose");
            let symmetric = weights.matrix().symmetric_mean();
            weights.set_matrix(symmetric);
        }
        weights.enforce_self_affinity();
        Self { weights }
    }

    /// Read the weights from a binary weight file holding `expected` points.
    pub fn from_file(path: impl AsRef<Path>, expected: usize) -> Result<Self, TrackingError> {
        let weights = SmoothWeights::read(path)?;
        crate::error::ensure_len(0, expected, weights.len())?;
        Ok(Self::new(weights))
    }
}

impl AffinityModel for ExternalAffinity {
    fn name(&self) -> &'static str {
        "external"
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
        _frames: &[Frame],
        _volumes: Option<&[OccupancyVolume]>,
    ) -> Result<(), TrackingError> {
        Ok(())
    }
}
