use glam::DVec3;
use voltrack_3d::pointcloud::Frame;
use voltrack_3d::volume::OccupancyVolume;

use super::{decay, frame_at, volume_at, AffinityModel};
use crate::distances::{spatial_distances, transform_distances, velocity_distances};
use crate::filter::PointFilter;
use crate::matrix::SquareMatrix;
use crate::weights::SmoothWeights;
use crate::TrackingError;

/// Per-frame motion disagreement folded into the history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionTerm {
    /// Disagreement of the fitted local transforms. Needs neighbor lists.
    TransformDistance,
    /// Squared difference of the point displacements.
    Velocity,
}

/// Spatial weights modulated by an exponential moving average of motion agreement.
///
/// With `g_f = exp(-k_motion d_f)` the motion factor of frame `f`, the history is `h = g_1`
/// after the first tracked frame and `h = (1 - falloff) h + falloff g_f` afterwards. The weights
/// are `exp(-k_spatial |p_i - p_j|^2) * h_ij` with positions taken from the latest updated frame.
pub struct HistoryAffinity {
    term: MotionTerm,
    k_spatial: f64,
    k_motion: f64,
    falloff: f64,
    spatial: SquareMatrix,
    history: Option<SquareMatrix>,
    next: SquareMatrix,
    weights: SmoothWeights,
}

impl HistoryAffinity {
    /// Create the model from the reference frame. The weights start purely spatial.
    pub fn new(
        reference: &[DVec3],
        term: MotionTerm,
        k_spatial: f64,
        k_motion: f64,
        falloff: f64,
    ) -> Self {
        let spatial = decay(&spatial_distances(reference), k_spatial);
        let n = reference.len();
        Self {
            term,
            k_spatial,
            k_motion,
            falloff,
            weights: SmoothWeights::new(spatial.clone()),
            spatial,
            history: None,
            next: SquareMatrix::filled(n, 0.0),
        }
    }

    /// The motion term in use.
    pub fn term(&self) -> MotionTerm {
        self.term
    }

    /// The smoothed motion factor, once a frame has been folded in.
    pub fn history(&self) -> Option<&SquareMatrix> {
        self.history.as_ref()
    }

    fn motion_factor(
        &self,
        prev: &[DVec3],
        current: &[DVec3],
        volume: Option<&OccupancyVolume>,
    ) -> Result<SquareMatrix, TrackingError> {
        let distances = match self.term {
            MotionTerm::TransformDistance => {
                transform_distances(prev, current, &self.weights, volume)?
                    .0
                    .symmetric_max()
            }
            MotionTerm::Velocity => velocity_distances(prev, current),
        };
        Ok(decay(&distances, self.k_motion))
    }

    fn rebuild(&mut self) {
        let spatial = &self.spatial;
        match &self.history {
            Some(history) => self.weights.update_rows(|i, row| {
                for (j, w) in row.iter_mut().enumerate() {
                    *w = spatial.get(i, j) * history.get(i, j);
                }
            }),
            None => self.weights.set_matrix(spatial.clone()),
        }
        self.weights.enforce_self_affinity();
    }
}

impl AffinityModel for HistoryAffinity {
    fn name(&self) -> &'static str {
        match self.term {
            MotionTerm::TransformDistance => "transform_history",
            MotionTerm::Velocity => "bilateral",
        }
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
        if frame == 0 {
            return Ok(());
        }
        let current = frame_at(frames, frame)?;
        let prev = frame_at(frames, frame - 1)?;
        crate::error::ensure_len(frame, self.spatial.len(), current.len())?;
        let factor = self.motion_factor(prev, current, volume)?;
        self.spatial = decay(&spatial_distances(current), self.k_spatial);

        match self.history.take() {
            Some(history) if frame > 1 => {
                let falloff = self.falloff as f32;
                self.next.fill_rows(|i, row| {
                    for (j, h) in row.iter_mut().enumerate() {
                        *h = (1.0 - falloff) * history.get(i, j) + falloff * factor.get(i, j);
                    }
                });
                // the previous history becomes the scratch buffer of the next pass
                self.history = Some(std::mem::replace(&mut self.next, history));
            }
            _ => self.history = Some(factor),
        }
        self.rebuild();
        Ok(())
    }

    fn update_full(
        &mut self,
        frames: &[Frame],
        volumes: Option<&[OccupancyVolume]>,
    ) -> Result<(), TrackingError> {
        let reference = frame_at(frames, 0)?;
        let threshold = self.weights.threshold();
        if threshold.is_none() && self.term == MotionTerm::TransformDistance {
            return Err(TrackingError::MissingNeighbors);
        }

        self.spatial = decay(&spatial_distances(reference), self.k_spatial);
        self.history = None;
        self.rebuild();
        for frame in 1..frames.len() {
            if let Some(threshold) = threshold {
                self.weights.cutoff(threshold);
            }
            let volume = volume_at(volumes, frames.len(), frame)?;
            self.update(frames, frame, volume)?;
        }
        Ok(())
    }

    fn retain(&mut self, filter: &PointFilter) {
        let kept = filter.kept();
        self.spatial = self.spatial.select(kept);
        self.history = self.history.as_ref().map(|h| h.select(kept));
        self.next = SquareMatrix::filled(kept.len(), 0.0);
        self.weights = filter.apply_weights(&self.weights);
    }
}
