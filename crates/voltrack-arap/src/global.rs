//! Whole-sequence optimization by gradient descent with backtracking line search.
//!
//! The energy of a sequence sums, over every optimized frame, the weighted squared norms of the
//! Lloyd gradient of the frame and of the ARAP gradients toward the previous and the next frame.

use std::time::Instant;

use glam::DVec3;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use voltrack_3d::pointcloud::{squared_norm_sum, Frame};
use voltrack_3d::volume::OccupancyVolume;

use crate::affinity::AffinityModel;
use crate::arap::arap_gradient;
use crate::error::ensure_len;
use crate::filter::PointFilter;
use crate::observer::TrackingObserver;
use crate::weights::SmoothWeights;
use crate::TrackingError;

/// Parameters of the global optimizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerParams {
    /// Maximum number of line-search iterations.
    pub max_iterations: usize,
    /// Keep frame 0 where it is.
    pub first_frame_fixed: bool,
    /// Weight of the uniformity term.
    pub lloyd_weight: f64,
    /// Weight of the rigidity terms.
    pub arap_weight: f64,
    /// First step length tried by the line search.
    pub initial_step: f64,
    /// Factor applied to the step after a rejected candidate.
    pub step_decay: f64,
    /// Candidates evaluated per iteration before giving up.
    pub max_step_attempts: usize,
    /// Points removed by each filtering pass of [`GlobalOptimizer::improve`].
    pub filter_count: usize,
    /// Weight threshold for neighbor lists.
    pub neighbor_cutoff: f32,
    /// Rounds of reweighting, filtering and optimizing run by [`GlobalOptimizer::improve`].
    pub improvements: usize,
}

impl Default for OptimizerParams {
    fn default() -> Self {
        Self {
            max_iterations: 30,
            first_frame_fixed: false,
            lloyd_weight: 1.0,
            arap_weight: 1.0,
            initial_step: 0.1,
            step_decay: 0.5,
            max_step_attempts: 20,
            filter_count: 10,
            neighbor_cutoff: 0.001,
            improvements: 1,
        }
    }
}

impl OptimizerParams {
    /// Set the maximum number of iterations.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Keep frame 0 fixed or not.
    pub fn with_first_frame_fixed(mut self, fixed: bool) -> Self {
        self.first_frame_fixed = fixed;
        self
    }

    /// Set the weights of the uniformity and rigidity terms.
    pub fn with_weights(mut self, lloyd: f64, arap: f64) -> Self {
        self.lloyd_weight = lloyd;
        self.arap_weight = arap;
        self
    }

    /// Set the number of line-search candidates per iteration.
    pub fn with_max_step_attempts(mut self, attempts: usize) -> Self {
        self.max_step_attempts = attempts;
        self
    }

    /// Set the number of points removed per filtering pass.
    pub fn with_filter_count(mut self, count: usize) -> Self {
        self.filter_count = count;
        self
    }
}

/// Outcome of [`GlobalOptimizer::optimize`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptimizeReport {
    /// Iterations performed.
    pub iterations: usize,
    /// Iterations whose line search found a better sequence.
    pub accepted_steps: usize,
    /// Initial energy followed by the energy after every accepted step.
    pub energies: Vec<f64>,
    /// Whether the optimization stopped because no step improved the energy.
    pub converged: bool,
}

/// Optimizer of a whole tracked sequence.
#[derive(Debug, Clone, Default)]
pub struct GlobalOptimizer {
    params: OptimizerParams,
}

impl GlobalOptimizer {
    /// Create an optimizer.
    pub fn new(params: OptimizerParams) -> Self {
        Self { params }
    }

    /// The optimizer parameters.
    pub fn params(&self) -> &OptimizerParams {
        &self.params
    }

    fn first_frame(&self) -> usize {
        usize::from(self.params.first_frame_fixed)
    }

    fn check(
        frames: &[Frame],
        volumes: &[OccupancyVolume],
        weights: &SmoothWeights,
    ) -> Result<(), TrackingError> {
        if volumes.len() != frames.len() {
            return Err(TrackingError::VolumeCountMismatch {
                volumes: volumes.len(),
                frames: frames.len(),
            });
        }
        for (index, frame) in frames.iter().enumerate() {
            ensure_len(index, weights.len(), frame.len())?;
        }
        Ok(())
    }

    /// Gradient and energy of frame `f`.
    fn frame_terms(
        &self,
        frames: &[Frame],
        volume: &OccupancyVolume,
        weights: &SmoothWeights,
        f: usize,
    ) -> Result<(Vec<DVec3>, f64), TrackingError> {
        let current = &frames[f];
        let (lw, aw) = (self.params.lloyd_weight, self.params.arap_weight);
        let zero = || vec![DVec3::ZERO; current.len()];

        let lloyd = volume.lloyd_gradient(current, 1.0);
        let forward = match f {
            0 => zero(),
            _ => arap_gradient(&frames[f - 1], current, weights)?,
        };
        let backward = match frames.get(f + 1) {
            Some(next) => arap_gradient(next, current, weights)?,
            None => zero(),
        };

        let energy = lw * squared_norm_sum(&lloyd)
            + aw * (squared_norm_sum(&forward) + squared_norm_sum(&backward));
        let gradient = lloyd
            .iter()
            .zip(forward.iter().zip(backward.iter()))
            .map(|(&l, (&fw, &bw))| lw * l + aw * fw + aw * bw)
            .collect();
        Ok((gradient, energy))
    }

    /// Gradient of every frame and the total energy of the sequence.
    ///
    /// Frame 0 gets a zero gradient and no energy when it is fixed. `weights` must hold
    /// neighbor lists.
    pub fn evaluate(
        &self,
        frames: &[Frame],
        volumes: &[OccupancyVolume],
        weights: &SmoothWeights,
    ) -> Result<(Vec<Frame>, f64), TrackingError> {
        Self::check(frames, volumes, weights)?;
        let first = self.first_frame();
        let terms = (0..frames.len())
            .into_par_iter()
            .map(|f| {
                if f < first {
                    Ok((vec![DVec3::ZERO; frames[f].len()], 0.0))
                } else {
                    self.frame_terms(frames, &volumes[f], weights, f)
                }
            })
            .collect::<Result<Vec<_>, TrackingError>>()?;

        let energy = terms.iter().map(|(_, e)| e).sum();
        Ok((terms.into_iter().map(|(g, _)| g).collect(), energy))
    }

    /// Total energy of the sequence.
    pub fn energy(
        &self,
        frames: &[Frame],
        volumes: &[OccupancyVolume],
        weights: &SmoothWeights,
    ) -> Result<f64, TrackingError> {
        Ok(self.evaluate(frames, volumes, weights)?.1)
    }

    /// Lower the sequence energy by gradient steps with backtracking line search.
    ///
    /// Every iteration tries `p + step * gradient` with a step starting at
    /// [`OptimizerParams::initial_step`] and decaying after each rejection. The first candidate
    /// with a strictly lower energy replaces `frames`. When no candidate is better the
    /// optimization stops and `frames` is left untouched.
    pub fn optimize(
        &self,
        frames: &mut [Frame],
        volumes: &[OccupancyVolume],
        weights: &SmoothWeights,
        observer: &dyn TrackingObserver,
    ) -> Result<OptimizeReport, TrackingError> {
        let start = Instant::now();
        let mut report = OptimizeReport::default();

        for iteration in 0..self.params.max_iterations {
            let (gradient, baseline) = self.evaluate(frames, volumes, weights)?;
            if iteration == 0 {
                report.energies.push(baseline);
                observer.on_sequence_energy(0, baseline);
            }
            report.iterations = iteration + 1;

            let mut step = self.params.initial_step;
            let mut accepted = None;
            for attempt in 0..self.params.max_step_attempts {
                let candidate: Vec<Frame> = frames
                    .par_iter()
                    .zip(gradient.par_iter())
                    .map(|(frame, grad)| {
                        frame
                            .iter()
                            .zip(grad.iter())
                            .map(|(&p, &g)| p + step * g)
                            .collect()
                    })
                    .collect();
                let energy = self.energy(&candidate, volumes, weights)?;
                log::debug!(
                    "iteration {iteration} attempt {attempt}: step {step:.4e}, energy {energy:.6e} (baseline {baseline:.6e})"
                );
                if energy < baseline {
                    accepted = Some((candidate, energy));
                    break;
                }
                step *= self.params.step_decay;
            }

            match accepted {
                Some((candidate, energy)) => {
                    for (frame, moved) in frames.iter_mut().zip(candidate) {
                        *frame = moved;
                    }
                    report.accepted_steps += 1;
                    report.energies.push(energy);
                    observer.on_sequence_energy(iteration + 1, energy);
                    log::info!("iteration {iteration}: energy {baseline:.6e} -> {energy:.6e}");
                }
                None => {
                    log::info!("iteration {iteration}: no improving step, stopping");
                    report.converged = true;
                    break;
                }
            }
        }

        observer.on_stage("global_optimize", start.elapsed());
        Ok(report)
    }

    /// Remove the `count` most isolated trajectories from `frames` and from the affinity model.
    pub fn filter(
        &self,
        frames: &mut [Frame],
        affinity: &mut dyn AffinityModel,
        count: usize,
    ) -> Result<PointFilter, TrackingError> {
        let filter = PointFilter::most_isolated(frames, count)?;
        filter.apply_frames(frames)?;
        affinity.retain(&filter);
        log::info!(
            "filtered {} points, {} remain",
            filter.removed_count(),
            filter.kept().len()
        );
        Ok(filter)
    }

    /// Run [`OptimizerParams::improvements`] rounds of batch reweighting, filtering and
    /// optimization.
    pub fn improve(
        &self,
        frames: &mut [Frame],
        volumes: &[OccupancyVolume],
        affinity: &mut dyn AffinityModel,
        observer: &dyn TrackingObserver,
    ) -> Result<Vec<OptimizeReport>, TrackingError> {
        let mut reports = Vec::with_capacity(self.params.improvements);
        for round in 0..self.params.improvements {
            let start = Instant::now();
            affinity.cutoff(self.params.neighbor_cutoff);
            affinity.update_full(frames, Some(volumes))?;
            if self.params.filter_count > 0 {
                self.filter(frames, affinity, self.params.filter_count)?;
            }
            affinity.cutoff(self.params.neighbor_cutoff);
            reports.push(self.optimize(frames, volumes, affinity.weights(), observer)?);
            log::info!("improvement round {round} took {:?}", start.elapsed());
        }
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::affinity::{gaussian_k, SpatialAffinity};
    use crate::observer::NoopObserver;
    use approx::assert_relative_eq;

    fn ball(center: DVec3) -> Result<OccupancyVolume, TrackingError> {
        Ok(OccupancyVolume::from_fn(
            DVec3::ZERO,
            0.05,
            [30, 30, 30],
            |[x, y, z]| {
                let c = DVec3::new(x as f64, y as f64, z as f64) * 0.05 + 0.025;
                c.distance(center) < 0.5
            },
        )?)
    }

    fn setup() -> Result<(Vec<Frame>, Vec<OccupancyVolume>), TrackingError> {
        let centers = [DVec3::splat(0.7), DVec3::splat(0.75), DVec3::splat(0.8)];
        let volumes = centers
            .iter()
            .map(|&c| ball(c))
            .collect::<Result<Vec<_>, _>>()?;
        let first = volumes[0].random_sample(15, 3)?;
        let frames = centers
            .iter()
            .map(|&c| first.iter().map(|&p| p + (c - centers[0])).collect())
            .collect();
        Ok((frames, volumes))
    }

    #[test]
    fn test_energy_decreases() -> Result<(), TrackingError> {
        let (mut frames, volumes) = setup()?;
        let mut affinity = SpatialAffinity::new(&frames[0], gaussian_k(0.3));
        affinity.cutoff(0.01);

        let optimizer = GlobalOptimizer::new(OptimizerParams::default().with_max_iterations(5));
        let report = optimizer.optimize(&mut frames, &volumes, affinity.weights(), &NoopObserver)?;

        assert!(report.accepted_steps >= 1);
        assert_eq!(report.energies.len(), report.accepted_steps + 1);
        for pair in report.energies.windows(2) {
            assert!(pair[1] <= pair[0] * (1.0 + 1e-12));
        }
        let final_energy = optimizer.energy(&frames, &volumes, affinity.weights())?;
        let last = report.energies.last().copied().unwrap_or(f64::NAN);
        assert_relative_eq!(final_energy, last, max_relative = 1e-9);
        assert!(last < report.energies[0]);
        Ok(())
    }

    #[test]
    fn test_no_improving_step_leaves_frames() -> Result<(), TrackingError> {
        let (mut frames, volumes) = setup()?;
        let original = frames.clone();
        let mut affinity = SpatialAffinity::new(&frames[0], gaussian_k(0.3));
        affinity.cutoff(0.01);

        let optimizer = GlobalOptimizer::new(OptimizerParams::default().with_max_step_attempts(0));
        let report = optimizer.optimize(&mut frames, &volumes, affinity.weights(), &NoopObserver)?;

        assert!(report.converged);
        assert_eq!(report.accepted_steps, 0);
        assert_eq!(report.iterations, 1);
        assert_eq!(frames, original);
        Ok(())
    }

    #[test]
    fn test_converged_sequence_is_left_untouched() -> Result<(), TrackingError> {
        // every point sits on the centre of the one cell it owns and never moves
        let volume = OccupancyVolume::from_fn(DVec3::ZERO, 0.5, [2, 2, 1], |_| true)?;
        let frame: Frame = [[0, 0, 0], [1, 0, 0], [0, 1, 0], [1, 1, 0]]
            .into_iter()
            .map(|c| volume.cell_center(c))
            .collect();
        let mut frames = vec![frame; 3];
        let volumes = vec![volume; 3];
        let original = frames.clone();
        let mut weights = SmoothWeights::new(crate::matrix::SquareMatrix::from_fn(4, |i, j| {
            if i == j {
                1.0
            } else {
                0.0
            }
        }));
        weights.cutoff(0.5);

        // default line search: every halving is tried and none is strictly better
        let optimizer = GlobalOptimizer::default();
        let report = optimizer.optimize(&mut frames, &volumes, &weights, &NoopObserver)?;

        assert!(report.converged);
        assert_eq!(report.iterations, 1);
        assert_eq!(report.accepted_steps, 0);
        assert_eq!(report.energies, vec![0.0]);
        assert_eq!(frames, original);
        Ok(())
    }

    #[test]
    fn test_fixed_first_frame() -> Result<(), TrackingError> {
        let (frames, volumes) = setup()?;
        let mut affinity = SpatialAffinity::new(&frames[0], gaussian_k(0.3));
        affinity.cutoff(0.01);

        let optimizer = GlobalOptimizer::new(OptimizerParams::default().with_first_frame_fixed(true));
        let (gradient, _) = optimizer.evaluate(&frames, &volumes, affinity.weights())?;
        assert!(gradient[0].iter().all(|g| *g == DVec3::ZERO));
        assert!(gradient[1].iter().any(|g| *g != DVec3::ZERO));
        Ok(())
    }

    #[test]
    fn test_filter_and_mismatch() -> Result<(), TrackingError> {
        let (mut frames, volumes) = setup()?;
        let mut affinity = SpatialAffinity::new(&frames[0], gaussian_k(0.3));
        let optimizer = GlobalOptimizer::default();

        let filter = optimizer.filter(&mut frames, &mut affinity, 2)?;
        assert_eq!(filter.kept().len(), 13);
        assert!(frames.iter().all(|f| f.len() == 13));
        assert_eq!(affinity.weights().len(), 13);

        affinity.cutoff(0.01);
        assert!(matches!(
            optimizer.evaluate(&frames, &volumes[..2], affinity.weights()),
            Err(TrackingError::VolumeCountMismatch { .. })
        ));
        Ok(())
    }
}
