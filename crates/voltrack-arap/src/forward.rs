//! The forward tracker advances a point set through a volume sequence one frame at a time.
//!
//! For every frame `i > 0` the points are extrapolated from the two previous frames, optionally
//! presmoothed toward a locally rigid pose, and then iterated with a blend of the Lloyd gradient
//! of the frame volume and the ARAP gradient against frame `i - 1`.

use std::time::Instant;

use glam::DVec3;
use serde::{Deserialize, Serialize};
use voltrack_3d::pointcloud::Frame;
use voltrack_3d::transforms::RigidTransform;
use voltrack_3d::volume::OccupancyVolume;

use crate::affinity::AffinityModel;
use crate::arap::{arap_gradient, frame_transforms};
use crate::observer::{EnergyTerms, TrackingObserver};
use crate::weights::SmoothWeights;
use crate::TrackingError;

/// Parameters of the forward tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerParams {
    /// Whether to presmooth the extrapolated frame.
    pub presmooth: bool,
    /// Number of presmoothing steps.
    pub presmooth_iterations: usize,
    /// Maximum number of fixed-point iterations per frame.
    pub max_iterations: usize,
    /// Iteration stops once every point displacement is shorter than this length.
    pub gradient_threshold: f64,
    /// Weight of the uniformity gradient.
    pub lloyd_weight: f64,
    /// Weight of the rigidity gradient.
    pub arap_weight: f64,
    /// Over-relaxation of the Lloyd gradient.
    pub over_relaxation: f64,
    /// Weight threshold for neighbor lists.
    pub neighbor_cutoff: f32,
}

impl Default for TrackerParams {
    fn default() -> Self {
        Self {
            presmooth: true,
            presmooth_iterations: 10,
            max_iterations: 1000,
            gradient_threshold: 1e-5,
            lloyd_weight: 1.0,
            arap_weight: 1.0,
            over_relaxation: 1.0,
            neighbor_cutoff: 0.001,
        }
    }
}

impl TrackerParams {
    /// Enable or disable presmoothing.
    pub fn with_presmooth(mut self, presmooth: bool) -> Self {
        self.presmooth = presmooth;
        self
    }

    /// Set the maximum number of iterations per frame.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Set the convergence threshold.
    pub fn with_gradient_threshold(mut self, threshold: f64) -> Self {
        self.gradient_threshold = threshold;
        self
    }

    /// Set the weights of the uniformity and rigidity gradients.
    pub fn with_weights(mut self, lloyd: f64, arap: f64) -> Self {
        self.lloyd_weight = lloyd;
        self.arap_weight = arap;
        self
    }

    /// Set the neighbor cutoff.
    pub fn with_neighbor_cutoff(mut self, cutoff: f32) -> Self {
        self.neighbor_cutoff = cutoff;
        self
    }
}

/// Outcome of the optimization of one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameReport {
    /// Iterations performed.
    pub iterations: usize,
    /// Whether the displacement threshold was reached.
    pub converged: bool,
    /// Largest point displacement of the last iteration.
    pub max_step: f64,
    /// Energy at the last iteration.
    pub energy: EnergyTerms,
}

/// Result of tracking a whole sequence.
#[derive(Debug, Clone)]
pub struct TrackedSequence {
    /// The tracked frames, the first one being the initial points.
    pub frames: Vec<Frame>,
    /// `transforms[i]` moves the neighborhoods of frame `i` onto frame `i + 1`.
    pub transforms: Vec<Vec<RigidTransform>>,
    /// `reports[i]` describes the optimization of frame `i + 1`.
    pub reports: Vec<FrameReport>,
}

/// Frame by frame tracker.
#[derive(Debug, Clone, Default)]
pub struct ForwardTracker {
    params: TrackerParams,
}

impl ForwardTracker {
    /// Create a tracker.
    pub fn new(params: TrackerParams) -> Self {
        Self { params }
    }

    /// The tracker parameters.
    pub fn params(&self) -> &TrackerParams {
        &self.params
    }

    /// Initial guess for the frame after the last of `frames`.
    ///
    /// Continues the motion between the last two frames; with a single frame, copies it.
    pub fn extrapolate(frames: &[Frame]) -> Result<Frame, TrackingError> {
        match frames {
            [] => Err(TrackingError::FrameOutOfRange { index: 0, count: 0 }),
            [only] => Ok(only.clone()),
            [.., before, last] => {
                crate::error::ensure_len(frames.len() - 1, before.len(), last.len())?;
                Ok(last
                    .iter()
                    .zip(before.iter())
                    .map(|(&l, &b)| l + (l - b))
                    .collect())
            }
        }
    }

    /// Pull `current` toward a locally rigid motion of `prev`.
    pub fn presmooth(
        &self,
        prev: &[DVec3],
        current: &mut [DVec3],
        weights: &SmoothWeights,
    ) -> Result<(), TrackingError> {
        for _ in 0..self.params.presmooth_iterations {
            let gradient = arap_gradient(prev, current, weights)?;
            for (p, g) in current.iter_mut().zip(gradient) {
                *p += g;
            }
        }
        Ok(())
    }

    /// Run the fixed-point iteration on `current`.
    ///
    /// # Arguments
    ///
    /// * `frame` - Index of the frame, for reporting.
    /// * `prev` - The tracked previous frame.
    /// * `current` - The frame to optimize, updated in place.
    /// * `volume` - The volume of the frame.
    /// * `weights` - Smooth weights with neighbor lists.
    /// * `observer` - Receives the energy of every iteration.
    ///
    /// # Errors
    ///
    /// [`TrackingError::NanEnergy`] when an energy term becomes NaN.
    pub fn optimize_frame(
        &self,
        frame: usize,
        prev: &[DVec3],
        current: &mut [DVec3],
        volume: &OccupancyVolume,
        weights: &SmoothWeights,
        observer: &dyn TrackingObserver,
    ) -> Result<FrameReport, TrackingError> {
        let (lw, aw) = (self.params.lloyd_weight, self.params.arap_weight);
        let denominator = lw + aw;
        if denominator.is_nan() || denominator <= 0.0 {
            return Err(TrackingError::InvalidParameter(format!(
                "gradient weights must have a positive sum, got {lw} + {aw}"
            )));
        }

        let mut report = FrameReport {
            iterations: 0,
            converged: false,
            max_step: 0.0,
            energy: EnergyTerms::default(),
        };
        let threshold = self.params.gradient_threshold * self.params.gradient_threshold;
        for iteration in 0..self.params.max_iterations {
            let lloyd = volume.lloyd_gradient(current, self.params.over_relaxation);
            let arap = arap_gradient(prev, current, weights)?;

            let steps: Vec<DVec3> = lloyd
                .iter()
                .zip(arap.iter())
                .map(|(&l, &a)| (lw * l + aw * a) / denominator)
                .collect();

            // distance of each prediction from the blended position
            let mut energy = EnergyTerms::default();
            for ((&l, &a), &step) in lloyd.iter().zip(arap.iter()).zip(steps.iter()) {
                energy.lloyd += l.distance_squared(step);
                energy.arap += a.distance_squared(step);
            }
            if energy.is_nan() {
                return Err(TrackingError::NanEnergy { frame, iteration });
            }

            let mut max_step = 0.0f64;
            for (p, &step) in current.iter_mut().zip(steps.iter()) {
                *p += step;
                max_step = max_step.max(step.length_squared());
            }

            log::debug!(
                "frame {frame} iteration {iteration}: lloyd {:.6e} arap {:.6e} step {:.3e}",
                energy.lloyd,
                energy.arap,
                max_step.sqrt()
            );
            observer.on_energy(frame, iteration, &energy);
            report.iterations = iteration + 1;
            report.max_step = max_step.sqrt();
            report.energy = energy;
            if max_step < threshold {
                report.converged = true;
                break;
            }
        }
        Ok(report)
    }

    /// Extrapolate, presmooth and optimize the frame following `frames`.
    pub fn track_frame(
        &self,
        frames: &[Frame],
        volume: &OccupancyVolume,
        weights: &SmoothWeights,
        observer: &dyn TrackingObserver,
    ) -> Result<(Frame, FrameReport), TrackingError> {
        let mut current = Self::extrapolate(frames)?;
        let index = frames.len();
        let prev = &frames[index - 1];
        if self.params.presmooth {
            self.presmooth(prev, &mut current, weights)?;
        }
        let report = self.optimize_frame(index, prev, &mut current, volume, weights, observer)?;
        Ok((current, report))
    }

    /// Track `initial` through `frame_count` frames.
    ///
    /// # Arguments
    ///
    /// * `initial` - The points of frame 0.
    /// * `frame_count` - Total number of frames, frame 0 included.
    /// * `affinity` - The weight model, seeded on `initial`.
    /// * `volume_at` - Loads the volume of a frame.
    /// * `observer` - Receives progress reports.
    pub fn track_sequence<F>(
        &self,
        initial: Frame,
        frame_count: usize,
        affinity: &mut dyn AffinityModel,
        mut volume_at: F,
        observer: &dyn TrackingObserver,
    ) -> Result<TrackedSequence, TrackingError>
    where
        F: FnMut(usize) -> Result<OccupancyVolume, TrackingError>,
    {
        crate::error::ensure_len(0, affinity.weights().len(), initial.len())?;
        let mut sequence = TrackedSequence {
            frames: vec![initial],
            transforms: Vec::with_capacity(frame_count.saturating_sub(1)),
            reports: Vec::with_capacity(frame_count.saturating_sub(1)),
        };
        observer.on_frame(0, &sequence.frames[0], None);

        for index in 1..frame_count {
            let start = Instant::now();
            let volume = volume_at(index)?;

            affinity.cutoff(self.params.neighbor_cutoff);
            let (frame, report) =
                self.track_frame(&sequence.frames, &volume, affinity.weights(), observer)?;
            let transforms = frame_transforms(&sequence.frames[index - 1], &frame, affinity.weights())?;
            observer.on_frame(index, &frame, Some(&transforms));
            sequence.frames.push(frame);

            if index + 1 < frame_count {
                affinity.update(&sequence.frames, index, Some(&volume))?;
            }

            let elapsed = start.elapsed();
            log::info!(
                "frame {index}/{}: {} iterations, converged {}, energy {:.6e}, {:?}",
                frame_count - 1,
                report.iterations,
                report.converged,
                report.energy.total(),
                elapsed
            );
            observer.on_stage("track_frame", elapsed);
            sequence.transforms.push(transforms);
            sequence.reports.push(report);
        }
        Ok(sequence)
    }
}
