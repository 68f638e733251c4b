use std::time::Duration;

use glam::DVec3;
use voltrack_3d::transforms::RigidTransform;

/// The two energy terms of one optimization step.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EnergyTerms {
    /// Summed squared distance between the uniformity prediction and the blended positions.
    pub lloyd: f64,
    /// Summed squared distance between the rigidity prediction and the blended positions.
    pub arap: f64,
}

impl EnergyTerms {
    /// Sum of both terms.
    pub fn total(&self) -> f64 {
        self.lloyd + self.arap
    }

    /// Whether either term is NaN.
    pub fn is_nan(&self) -> bool {
        self.lloyd.is_nan() || self.arap.is_nan()
    }
}

/// Receives progress reports from the tracker and the optimizer.
///
/// Every method has an empty default so observers only implement what they need. Observers have
/// no influence on the results.
pub trait TrackingObserver: Sync {
    /// Called after every fixed-point iteration of the forward tracker.
    fn on_energy(&self, _frame: usize, _iteration: usize, _energy: &EnergyTerms) {}

    /// Called once a frame has been tracked, with its transforms from the previous frame.
    fn on_frame(&self, _frame: usize, _points: &[DVec3], _transforms: Option<&[RigidTransform]>) {}

    /// Called with the wall time of a named stage.
    fn on_stage(&self, _name: &str, _elapsed: Duration) {}

    /// Called with the sequence energy after each global iteration.
    fn on_sequence_energy(&self, _iteration: usize, _energy: f64) {}
}

/// An observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl TrackingObserver for NoopObserver {}
