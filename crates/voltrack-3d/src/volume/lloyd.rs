use glam::DVec3;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::{OccupancyVolume, VolumeError};
use crate::kdtree::KdTree;

/// Uniformity statistics of a set of centres over a volume.
#[derive(Debug, Clone)]
pub struct LloydStats {
    /// Coefficient of variation of the cell counts per centre ("deviation from uniformity").
    pub deviation_from_uniformity: f64,
    /// Number of occupied cells assigned to each centre.
    pub counts: Vec<usize>,
    /// Squared deviation of each centre's count from the mean count.
    pub contributions: Vec<f64>,
}

/// Parameters of the initial sampling of a volume.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingParams {
    /// Number of points to draw.
    pub point_count: usize,
    /// Seed of the cell selection and jitter.
    pub seed: u64,
    /// Lloyd iterations applied after drawing.
    pub lloyd_iterations: usize,
    /// Over-relaxation factor of those iterations.
    pub over_relaxation: f64,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            point_count: 1000,
            seed: 0,
            lloyd_iterations: 100,
            over_relaxation: 1.8,
        }
    }
}

impl SamplingParams {
    /// Set the number of points.
    pub fn with_point_count(mut self, point_count: usize) -> Self {
        self.point_count = point_count;
        self
    }

    /// Set the number of Lloyd iterations.
    pub fn with_lloyd_iterations(mut self, lloyd_iterations: usize) -> Self {
        self.lloyd_iterations = lloyd_iterations;
        self
    }
}

struct CentroidSums {
    sums: Vec<DVec3>,
    counts: Vec<usize>,
}

impl CentroidSums {
    fn new(n: usize) -> Self {
        Self {
            sums: vec![DVec3::ZERO; n],
            counts: vec![0; n],
        }
    }

    fn merge(mut self, other: Self) -> Self {
        self.sums
            .iter_mut()
            .zip(other.sums)
            .for_each(|(a, b)| *a += b);
        self.counts
            .iter_mut()
            .zip(other.counts)
            .for_each(|(a, b)| *a += b);
        self
    }
}

impl OccupancyVolume {
    /// Assign every occupied cell to its nearest centre and fold the assignments.
    ///
    /// Work is split over x slabs. Each slab keeps its own accumulator and the previous
    /// answer as the starting guess of the next query along the scanline.
    fn fold_assignments<A, I, V, M>(&self, centers: &[DVec3], init: I, visit: V, merge: M) -> A
    where
        A: Send,
        I: Fn() -> A + Sync + Send,
        V: Fn(&mut A, usize, DVec3) + Sync + Send,
        M: Fn(A, A) -> A + Sync + Send,
    {
        let tree = KdTree::new(centers);
        if tree.is_empty() {
            return init();
        }
        let [nx, ny, nz] = self.resolution;

        (0..nx)
            .into_par_iter()
            .fold(&init, |mut acc, x| {
                let mut guess = 0;
                for y in 0..ny {
                    let row = (x * ny + y) * nz;
                    for z in 0..nz {
                        if !self.bit(row + z) {
                            continue;
                        }
                        let p = self.cell_center([x, y, z]);
                        if let Some(nearest) = tree.find_nearest_with_guess(p, guess) {
                            guess = nearest;
                            visit(&mut acc, nearest, p);
                        }
                    }
                }
                acc
            })
            .reduce(&init, merge)
    }

    /// Compute the Lloyd relaxation step of every centre.
    ///
    /// The step of a centre is `(centroid of its cells - centre) * over_relaxation`. A centre
    /// without cells moves to the nearest occupied cell instead.
    ///
    /// # Arguments
    ///
    /// * `centers` - The current sample positions.
    /// * `over_relaxation` - Step multiplier; 1 moves each centre onto its centroid.
    ///
    /// # Returns
    ///
    /// One displacement per centre, in the same order.
    pub fn lloyd_gradient(&self, centers: &[DVec3], over_relaxation: f64) -> Vec<DVec3> {
        let n = centers.len();
        let acc = self.fold_assignments(
            centers,
            || CentroidSums::new(n),
            |acc, i, p| {
                acc.sums[i] += p;
                acc.counts[i] += 1;
            },
            CentroidSums::merge,
        );

        let gradient: Vec<DVec3> = centers
            .par_iter()
            .enumerate()
            .map(|(i, &c)| match acc.counts[i] {
                0 => self.nearest_occupied(c).map_or(DVec3::ZERO, |v| v - c),
                count => (acc.sums[i] / count as f64 - c) * over_relaxation,
            })
            .collect();

        let orphans = acc.counts.iter().filter(|&&c| c == 0).count();
        if orphans > 0 {
            log::warn!("{} of {} centers own no cells", orphans, n);
        }
        gradient
    }

    /// Compute the cell count statistics of a set of centres.
    pub fn lloyd_stats(&self, centers: &[DVec3]) -> LloydStats {
        let n = centers.len();
        let counts = self.fold_assignments(
            centers,
            || vec![0usize; n],
            |acc, i, _| acc[i] += 1,
            |mut a, b| {
                a.iter_mut().zip(b).for_each(|(x, y)| *x += y);
                a
            },
        );

        if n == 0 {
            return LloydStats {
                deviation_from_uniformity: 0.0,
                counts,
                contributions: Vec::new(),
            };
        }

        let mean = counts.iter().sum::<usize>() as f64 / n as f64;
        let contributions: Vec<f64> = counts
            .iter()
            .map(|&c| (c as f64 - mean).powi(2))
            .collect();
        let variance = contributions.iter().sum::<f64>() / n as f64;
        let deviation_from_uniformity = if mean > 0.0 {
            variance.sqrt() / mean
        } else {
            0.0
        };

        LloydStats {
            deviation_from_uniformity,
            counts,
            contributions,
        }
    }

    /// Collect the cell centres assigned to each centre, followed by the centre itself.
    pub fn assigned_points(&self, centers: &[DVec3]) -> Vec<Vec<DVec3>> {
        let n = centers.len();
        let mut groups = self.fold_assignments(
            centers,
            || vec![Vec::new(); n],
            |acc, i, p| acc[i].push(p),
            |mut a, b| {
                a.iter_mut().zip(b).for_each(|(x, mut y)| x.append(&mut y));
                a
            },
        );
        groups
            .iter_mut()
            .zip(centers.iter())
            .for_each(|(g, &c)| g.push(c));
        groups
    }

    /// Find the occupied cell centre nearest to `point` by exhaustive scan.
    pub fn nearest_occupied(&self, point: DVec3) -> Option<DVec3> {
        self.occupied_cells()
            .map(|c| self.cell_center(c))
            .min_by(|a, b| a.distance_squared(point).total_cmp(&b.distance_squared(point)))
    }

    /// Apply `iterations` Lloyd steps to `centers` in place.
    pub fn relax(&self, centers: &mut [DVec3], iterations: usize, over_relaxation: f64) {
        for it in 0..iterations {
            let gradient = self.lloyd_gradient(centers, over_relaxation);
            centers
                .iter_mut()
                .zip(gradient.iter())
                .for_each(|(c, g)| *c += *g);
            log::debug!("lloyd iteration {}", it);
        }
    }

    /// Draw a uniform initial sample: random distinct cells, jitter, then Lloyd relaxation.
    pub fn initial_sample(&self, params: &SamplingParams) -> Result<Vec<DVec3>, VolumeError> {
        let mut points = self.random_sample(params.point_count, params.seed)?;
        self.perturb(&mut points, params.seed);
        self.relax(&mut points, params.lloyd_iterations, params.over_relaxation);
        Ok(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::tests::sphere_volume;
    use approx::assert_relative_eq;

    #[test]
    fn test_single_center_moves_to_box_center() -> Result<(), VolumeError> {
        let vol = OccupancyVolume::from_fn(DVec3::ZERO, 1.0, [4, 4, 4], |_| true)?;
        let centers = vec![DVec3::new(0.5, 0.5, 0.5)];
        let g = vol.lloyd_gradient(&centers, 1.0);
        assert_relative_eq!(g[0].x, 1.5);
        assert_relative_eq!(g[0].y, 1.5);
        assert_relative_eq!(g[0].z, 1.5);

        let g = vol.lloyd_gradient(&centers, 2.0);
        assert_relative_eq!(g[0].x, 3.0);
        Ok(())
    }

    #[test]
    fn test_two_centers_split_the_box() -> Result<(), VolumeError> {
        let vol = OccupancyVolume::from_fn(DVec3::ZERO, 1.0, [4, 2, 2], |_| true)?;
        let centers = vec![DVec3::new(0.9, 1.0, 1.0), DVec3::new(3.1, 1.0, 1.0)];
        let stats = vol.lloyd_stats(&centers);
        assert_eq!(stats.counts, vec![8, 8]);
        assert_relative_eq!(stats.deviation_from_uniformity, 0.0);

        let g = vol.lloyd_gradient(&centers, 1.0);
        assert_relative_eq!(g[0].x, 1.0 - 0.9, epsilon = 1e-12);
        assert_relative_eq!(g[1].x, 3.0 - 3.1, epsilon = 1e-12);

        let groups = vol.assigned_points(&centers);
        assert_eq!(groups[0].len(), 9);
        assert_eq!(groups[1].len(), 9);
        assert!(groups[0][..8].iter().all(|p| p.x < 2.0));
        assert_eq!(groups[1][8], centers[1]);
        Ok(())
    }

    #[test]
    fn test_orphan_falls_back_to_nearest_cell() -> Result<(), VolumeError> {
        let vol = OccupancyVolume::from_fn(DVec3::ZERO, 1.0, [4, 1, 1], |[x, _, _]| x < 2)?;
        // the second centre is farther from every occupied cell than the first
        let centers = vec![DVec3::new(1.0, 0.5, 0.5), DVec3::new(3.5, 0.5, 0.5)];
        let g = vol.lloyd_gradient(&centers, 1.0);
        assert_relative_eq!(g[1].x, 1.5 - 3.5);
        assert!(g.iter().all(|v| v.is_finite()));
        Ok(())
    }

    #[test]
    fn test_empty_centers() -> Result<(), VolumeError> {
        let vol = OccupancyVolume::from_fn(DVec3::ZERO, 1.0, [2, 2, 2], |_| true)?;
        assert!(vol.lloyd_gradient(&[], 1.0).is_empty());
        assert!(vol.assigned_points(&[]).is_empty());
        assert_relative_eq!(vol.lloyd_stats(&[]).deviation_from_uniformity, 0.0);
        Ok(())
    }

    #[test]
    fn test_lloyd_reduces_deviation_from_uniformity() -> Result<(), VolumeError> {
        let vol = sphere_volume(24, 10.0);
        let mut centers = vol.random_sample(30, 0)?;
        vol.perturb(&mut centers, 0);
        let initial = vol.lloyd_stats(&centers).deviation_from_uniformity;

        vol.relax(&mut centers, 100, 1.0);
        let relaxed = vol.lloyd_stats(&centers).deviation_from_uniformity;

        assert!(relaxed < initial, "{} >= {}", relaxed, initial);
        assert!(relaxed < 0.25, "deviation from uniformity {}", relaxed);
        Ok(())
    }

    #[test]
    fn test_deviation_never_increases_per_iteration() -> Result<(), VolumeError> {
        // two centres on a line of 41 cells, the split point moves toward the middle every step
        let vol = OccupancyVolume::from_fn(DVec3::ZERO, 1.0, [41, 1, 1], |_| true)?;
        let mut centers = vec![DVec3::new(0.3, 0.5, 0.5), DVec3::new(3.3, 0.5, 0.5)];

        let mut counts = Vec::new();
        let mut deviations = Vec::new();
        for _ in 0..8 {
            let stats = vol.lloyd_stats(&centers);
            counts.push(stats.counts[0]);
            deviations.push(stats.deviation_from_uniformity);
            vol.relax(&mut centers, 1, 1.0);
        }

        assert_eq!(counts, vec![2, 11, 16, 18, 19, 20, 20, 20]);
        for pair in deviations.windows(2) {
            assert!(pair[1] <= pair[0] + 1e-12, "{} > {}", pair[1], pair[0]);
        }
        assert_relative_eq!(deviations[7], 0.5 / 20.5, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn test_initial_sample() -> Result<(), VolumeError> {
        let vol = sphere_volume(16, 6.0);
        let params = SamplingParams::default()
            .with_point_count(12)
            .with_lloyd_iterations(5);
        let points = vol.initial_sample(&params)?;
        assert_eq!(points.len(), 12);
        assert!(points.iter().all(|p| p.is_finite()));
        Ok(())
    }
}
