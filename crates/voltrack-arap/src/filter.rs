use std::path::Path;

use glam::DVec3;
use rayon::prelude::*;
use voltrack_3d::io::indices::{read_indices, write_indices};
use voltrack_3d::pointcloud::Frame;

use crate::weights::SmoothWeights;
use crate::TrackingError;

/// Distance from each trajectory to its nearest other trajectory.
///
/// The distance between two trajectories is the sum over frames of the squared distance between
/// the points. A point without any other point scores `f64::INFINITY`.
pub fn irregularity(frames: &[Frame]) -> Vec<f64> {
    let n = frames.first().map_or(0, Vec::len);
    (0..n)
        .into_par_iter()
        .map(|i| {
            (0..n)
                .filter(|&j| j != i)
                .map(|j| trajectory_distance(frames, i, j))
                .fold(f64::INFINITY, f64::min)
        })
        .collect()
}

fn trajectory_distance(frames: &[Frame], i: usize, j: usize) -> f64 {
    frames
        .iter()
        .map(|f| f[i].distance_squared(f[j]))
        .sum()
}

/// A one-way removal of points with dense renumbering of the survivors.
#[derive(Debug, Clone, PartialEq)]
pub struct PointFilter {
    map: Vec<Option<usize>>,
    kept: Vec<usize>,
}

impl PointFilter {
    /// Remove the points in `removed` from a set of `n` points.
    ///
    /// Survivors keep their relative order. Duplicate indices are ignored.
    pub fn new(n: usize, removed: &[usize]) -> Result<Self, TrackingError> {
        let mut keep = vec![true; n];
        for &index in removed {
            match keep.get_mut(index) {
                Some(k) => *k = false,
                None => {
                    return Err(TrackingError::FrameOutOfRange {
                        index,
                        count: n,
                    })
                }
            }
        }
        let kept: Vec<usize> = (0..n).filter(|&i| keep[i]).collect();
        if kept.is_empty() && n > 0 {
            return Err(TrackingError::FilterTooLarge {
                requested: removed.len(),
                available: n,
            });
        }
        let mut map = vec![None; n];
        for (new, &old) in kept.iter().enumerate() {
            map[old] = Some(new);
        }
        Ok(Self { map, kept })
    }

    /// Remove the points listed in an index file from a set of `n` points.
    pub fn from_file(path: impl AsRef<Path>, n: usize) -> Result<Self, TrackingError> {
        let removed = read_indices(path)?;
        Self::new(n, &removed)
    }

    /// Write the removed indices, in increasing order, for [`PointFilter::from_file`].
    pub fn write(&self, path: impl AsRef<Path>) -> Result<(), TrackingError> {
        let removed: Vec<usize> = (0..self.map.len())
            .filter(|&i| self.map[i].is_none())
            .collect();
        write_indices(path, &removed)?;
        Ok(())
    }

    /// Remove the `count` points whose nearest trajectory is farthest away.
    pub fn most_isolated(frames: &[Frame], count: usize) -> Result<Self, TrackingError> {
        let n = frames.first().map_or(0, Vec::len);
        if count >= n && n > 0 {
            return Err(TrackingError::FilterTooLarge {
                requested: count,
                available: n,
            });
        }
        let scores = irregularity(frames);
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]).then(a.cmp(&b)));
        order.truncate(count);
        log::debug!("removing {} isolated points: {:?}", order.len(), order);
        Self::new(n, &order)
    }

    /// Number of points before filtering.
    pub fn original_len(&self) -> usize {
        self.map.len()
    }

    /// Old indices of the surviving points, in their new order.
    pub fn kept(&self) -> &[usize] {
        &self.kept
    }

    /// Number of removed points.
    pub fn removed_count(&self) -> usize {
        self.map.len() - self.kept.len()
    }

    /// New index of old point `old`, `None` when it was removed.
    pub fn new_index(&self, old: usize) -> Option<usize> {
        self.map.get(old).copied().flatten()
    }

    /// The surviving points of one frame.
    pub fn apply_frame(&self, frame: &[DVec3]) -> Result<Frame, TrackingError> {
        crate::error::ensure_len(0, self.map.len(), frame.len())?;
        Ok(self.kept.iter().map(|&i| frame[i]).collect())
    }

    /// Replace every frame by its surviving points.
    pub fn apply_frames(&self, frames: &mut [Frame]) -> Result<(), TrackingError> {
        for (index, frame) in frames.iter_mut().enumerate() {
            crate::error::ensure_len(index, self.map.len(), frame.len())?;
            *frame = self.kept.iter().map(|&i| frame[i]).collect();
        }
        Ok(())
    }

    /// The weights restricted to the surviving points.
    pub fn apply_weights(&self, weights: &SmoothWeights) -> SmoothWeights {
        weights.select(&self.kept)
    }
}
