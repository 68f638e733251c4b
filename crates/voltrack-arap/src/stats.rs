use glam::DVec3;
use rayon::prelude::*;
use voltrack_3d::pointcloud::Frame;
use voltrack_3d::transforms::RigidTransform;
use voltrack_3d::volume::OccupancyVolume;

use crate::error::ensure_len;
use crate::pca::trajectory_pca;
use crate::{TrackingError, TransformDistance};

/// Deviation from uniformity of a tracked sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct UniformityReport {
    /// Coefficient of variation of the cell counts per point, for every frame.
    pub per_frame: Vec<f64>,
    /// Mean over the frames.
    pub mean: f64,
}

/// Measure how evenly the points of every frame split the occupied cells of its volume.
pub fn deviation_from_uniformity(
    frames: &[Frame],
    volumes: &[OccupancyVolume],
) -> Result<UniformityReport, TrackingError> {
    if volumes.len() != frames.len() {
        return Err(TrackingError::VolumeCountMismatch {
            volumes: volumes.len(),
            frames: frames.len(),
        });
    }
    let per_frame: Vec<f64> = frames
        .iter()
        .zip(volumes.iter())
        .map(|(frame, volume)| volume.lloyd_stats(frame).deviation_from_uniformity)
        .collect();
    let mean = if per_frame.is_empty() {
        0.0
    } else {
        per_frame.iter().sum::<f64>() / per_frame.len() as f64
    };
    log::debug!("deviation from uniformity: mean {mean:.6}");
    Ok(UniformityReport { per_frame, mean })
}

/// Mean squared distance between corresponding points of two sequences.
pub fn mean_squared_error(a: &[Frame], b: &[Frame]) -> Result<f64, TrackingError> {
    if a.len() != b.len() {
        return Err(TrackingError::FrameOutOfRange {
            index: a.len().min(b.len()),
            count: a.len().max(b.len()),
        });
    }
    let mut sum = 0.0;
    let mut count = 0usize;
    for (index, (fa, fb)) in a.iter().zip(b.iter()).enumerate() {
        ensure_len(index, fa.len(), fb.len())?;
        sum += fa
            .iter()
            .zip(fb.iter())
            .map(|(p, q)| p.distance_squared(*q))
            .sum::<f64>();
        count += fa.len();
    }
    Ok(if count == 0 { 0.0 } else { sum / count as f64 })
}

/// Mean transform distance between two transform sets of the same points.
///
/// The distance of point `i` is evaluated on the cells of `volume` assigned to `points[i]`.
pub fn mean_transform_error(
    a: &[RigidTransform],
    b: &[RigidTransform],
    points: &[DVec3],
    volume: &OccupancyVolume,
) -> Result<f64, TrackingError> {
    ensure_len(0, points.len(), a.len())?;
    ensure_len(1, points.len(), b.len())?;
    if points.is_empty() {
        return Ok(0.0);
    }
    let assigned = volume.assigned_points(points);
    let total: f64 = assigned
        .par_iter()
        .zip(a.par_iter().zip(b.par_iter()))
        .map(|(cells, (ta, tb))| TransformDistance::new(cells).distance(ta, tb))
        .sum();
    Ok(total / points.len() as f64)
}

/// Fraction of the trajectory variance captured by the leading `components`.
pub fn pca_compactness(frames: &[Frame], components: usize) -> Result<f64, TrackingError> {
    Ok(trajectory_pca(frames, components)?.explained_variance())
}
