use glam::DVec3;

/// A single time step of a tracked point set.
///
/// The point at index `i` of every frame of a sequence is the same physical sample.
pub type Frame = Vec<DVec3>;

/// Compute the centroid of a point set.
///
/// Returns the origin for an empty set.
pub fn compute_centroid(points: &[DVec3]) -> DVec3 {
    if points.is_empty() {
        return DVec3::ZERO;
    }
    points.iter().fold(DVec3::ZERO, |acc, &p| acc + p) / points.len() as f64
}

/// Compute the axis aligned bounding box of a point set as `(min, max)`.
pub fn compute_bounds(points: &[DVec3]) -> Option<(DVec3, DVec3)> {
    let first = *points.first()?;
    Some(
        points
            .iter()
            .fold((first, first), |(lo, hi), &p| (lo.min(p), hi.max(p))),
    )
}

/// Check that all frames hold the same number of points.
///
/// # Returns
///
/// The common point count, `Err((frame, len))` on the first frame that differs from frame 0.
pub fn common_point_count(frames: &[Frame]) -> Result<usize, (usize, usize)> {
    let n = frames.first().map_or(0, |f| f.len());
    match frames.iter().position(|f| f.len() != n) {
        Some(i) => Err((i, frames[i].len())),
        None => Ok(n),
    }
}

/// Sum of squared norms of a set of displacement vectors.
pub fn squared_norm_sum(vectors: &[DVec3]) -> f64 {
    vectors.iter().map(|v| v.length_squared()).sum()
}
