use glam::DVec3;
use voltrack_3d::pointcloud::Frame;
use voltrack_3d::volume::OccupancyVolume;

use super::{decay, frame_at, volume_at, AffinityModel};
use crate::distances::{spatial_distances, transform_distances};
use crate::matrix::SquareMatrix;
use crate::weights::SmoothWeights;
use crate::TrackingError;

/// Weights from the largest spatial distance and transform disagreement seen so far.
///
/// Both running maxima only grow between batch updates, so the weights only tighten as more
/// frames are tracked.
pub struct MaxDistanceAffinity {
    k_spatial: f64,
    k_transform: f64,
    use_spatial: bool,
    use_transform: bool,
    bootstrap_cutoff: f32,
    max_spatial: SquareMatrix,
    max_transform: SquareMatrix,
    weights: SmoothWeights,
}

impl MaxDistanceAffinity {
    /// Create the model from the reference frame.
    ///
    /// # Arguments
    ///
    /// * `reference` - The first frame.
    /// * `k_spatial` - Decay rate of the spatial term.
    /// * `k_transform` - Decay rate of the transform term.
    /// * `use_spatial` - Whether the spatial term contributes.
    /// * `use_transform` - Whether the transform term contributes.
    /// * `bootstrap_cutoff` - Threshold used by [`AffinityModel::update_full`] when no neighbor
    ///   lists are available.
    pub fn new(
        reference: &[DVec3],
        k_spatial: f64,
        k_transform: f64,
        use_spatial: bool,
        use_transform: bool,
        bootstrap_cutoff: f32,
    ) -> Self {
        let n = reference.len();
        let mut model = Self {
            k_spatial,
            k_transform,
            use_spatial,
            use_transform,
            bootstrap_cutoff,
            max_spatial: spatial_distances(reference),
            max_transform: SquareMatrix::filled(n, 0.0),
            weights: SmoothWeights::new(SquareMatrix::filled(n, 1.0)),
        };
        model.rebuild();
        model
    }

    /// The running maximum of the squared spatial distances.
    pub fn max_spatial(&self) -> &SquareMatrix {
        &self.max_spatial
    }

    /// The running maximum of the transform disagreements.
    pub fn max_transform(&self) -> &SquareMatrix {
        &self.max_transform
    }

    fn reset(&mut self, reference: &[DVec3]) {
        self.max_spatial = spatial_distances(reference);
        self.max_transform = SquareMatrix::filled(reference.len(), 0.0);
    }

    fn accumulate(
        &mut self,
        frames: &[Frame],
        frame: usize,
        volume: Option<&OccupancyVolume>,
        fitting: &SmoothWeights,
    ) -> Result<(), TrackingError> {
        let current = frame_at(frames, frame)?;
        crate::error::ensure_len(frame, self.max_spatial.len(), current.len())?;
        if self.use_spatial {
            self.max_spatial.max_assign(&spatial_distances(current));
        }
        if self.use_transform && frame > 0 {
            let prev = frame_at(frames, frame - 1)?;
            let (distances, _) = transform_distances(prev, current, fitting, volume)?;
            self.max_transform.max_assign(&distances.symmetric_max());
        }
        Ok(())
    }

    fn rebuild(&mut self) {
        let n = self.max_spatial.len();
        let matrix = match (self.use_spatial, self.use_transform) {
            (true, true) => {
                let (ks, kt) = (self.k_spatial, self.k_transform);
                let (s, t) = (&self.max_spatial, &self.max_transform);
                SquareMatrix::from_fn(n, |i, j| {
                    let e = ks * s.get(i, j) as f64 + kt * t.get(i, j) as f64;
                    (-e).exp() as f32
                })
            }
            (true, false) => decay(&self.max_spatial, self.k_spatial),
            (false, true) => decay(&self.max_transform, self.k_transform),
            (false, false) => SquareMatrix::filled(n, 1.0),
        };
        self.weights.set_matrix(matrix);
        self.weights.enforce_self_affinity();
    }
}

impl AffinityModel for MaxDistanceAffinity {
    fn name(&self) -> &'static str {
        "max_distance"
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
        volume: Option<&OccupancyVolume>,
    ) -> Result<(), TrackingError> {
        let fitting = self.weights.clone();
        self.accumulate(frames, frame, volume, &fitting)?;
        self.rebuild();
        Ok(())
    }

    fn update_full(
        &mut self,
        frames: &[Frame],
        volumes: Option<&[OccupancyVolume]>,
    ) -> Result<(), TrackingError> {
        let reference = frame_at(frames, 0)?;
        self.reset(reference);

        // transforms are fitted on the neighbor lists present at entry, or on a spatial bootstrap
        let fitting = if self.weights.has_neighbors() || !self.use_transform {
            self.weights.clone()
        } else {
            log::debug!(
                "bootstrapping neighbor lists with cutoff {}",
                self.bootstrap_cutoff
            );
            let mut max_spatial = spatial_distances(reference);
            for frame in frames.iter().skip(1) {
                max_spatial.max_assign(&spatial_distances(frame));
            }
            let mut bootstrap = SmoothWeights::new(decay(&max_spatial, self.k_spatial));
            bootstrap.cutoff(self.bootstrap_cutoff);
            bootstrap
        };

        for frame in 0..frames.len() {
            let volume = volume_at(volumes, frames.len(), frame)?;
            self.accumulate(frames, frame, volume, &fitting)?;
        }
        self.rebuild();
        Ok(())
    }

    fn retain(&mut self, filter: &crate::filter::PointFilter) {
        self.max_spatial = self.max_spatial.select(filter.kept());
        self.max_transform = self.max_transform.select(filter.kept());
        self.weights = filter.apply_weights(&self.weights);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::affinity::tests::{assert_weight_invariants, bending_sequence};

    #[test]
    fn test_weights_only_tighten() -> Result<(), TrackingError> {
        let frames = bending_sequence(4);
        let mut model = MaxDistanceAffinity::new(&frames[0], 50.0, 1000.0, true, true, 0.01);
        let mut previous = model.weights().matrix().clone();
        for f in 1..frames.len() {
            model.cutoff(0.01);
            model.update(&frames, f, None)?;
            let current = model.weights().matrix();
            for i in 0..current.len() {
                for j in 0..current.len() {
                    if i != j {
                        assert!(current.get(i, j) <= previous.get(i, j) + 1e-6);
                    }
                }
            }
            assert_weight_invariants(model.weights());
            previous = current.clone();
        }
        Ok(())
    }

    #[test]
    fn test_update_full_resets_and_is_repeatable() -> Result<(), TrackingError> {
        let frames = bending_sequence(4);
        let mut model = MaxDistanceAffinity::new(&frames[0], 50.0, 1000.0, true, true, 0.01);
        model.update_full(&frames, None)?;
        let first = model.weights().matrix().clone();
        model.update_full(&frames, None)?;
        assert_eq!(&first, model.weights().matrix());
        assert_weight_invariants(model.weights());
        Ok(())
    }

    #[test]
    fn test_spatial_only_ignores_neighbors() -> Result<(), TrackingError> {
        let frames = bending_sequence(2);
        let mut model = MaxDistanceAffinity::new(&frames[0], 50.0, 1000.0, true, false, 0.01);
        // no cutoff: the transform term is disabled and needs no neighbor lists
        model.update(&frames, 1, None)?;
        assert_weight_invariants(model.weights());
        Ok(())
    }
}
