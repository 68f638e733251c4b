use glam::DVec3;
use rayon::prelude::*;
use voltrack_3d::transforms::RigidTransform;
use voltrack_3d::volume::OccupancyVolume;

use crate::arap::frame_transforms;
use crate::matrix::SquareMatrix;
use crate::weights::SmoothWeights;
use crate::{TrackingError, TransformDistance};

/// Half-width of the local frame used when no volume is available.
pub const LOCAL_FRAME_OFFSET: f64 = 0.01;

/// Squared Euclidean distance between every pair of points.
pub fn spatial_distances(points: &[DVec3]) -> SquareMatrix {
    SquareMatrix::from_fn(points.len(), |i, j| points[i].distance_squared(points[j]) as f32)
}

/// Squared distance between the displacements `current - prev` of every pair of points.
pub fn velocity_distances(prev: &[DVec3], current: &[DVec3]) -> SquareMatrix {
    let velocity: Vec<DVec3> = prev
        .iter()
        .zip(current.iter())
        .map(|(&p, &c)| c - p)
        .collect();
    spatial_distances(&velocity)
}

/// Disagreement between the neighborhood motions of every pair of points.
///
/// Entry `(i, j)` is the mean squared displacement between moving the local point set of `i`
/// with its own transform and with the transform of `j`. Local point sets are the cells assigned
/// to each point in `volume`, or a small frame around the point when no volume is given. The
/// result is not symmetric; the diagonal is zero.
///
/// # Returns
///
/// The distance matrix and the fitted transforms.
pub fn transform_distances(
    prev: &[DVec3],
    current: &[DVec3],
    weights: &SmoothWeights,
    volume: Option<&OccupancyVolume>,
) -> Result<(SquareMatrix, Vec<RigidTransform>), TrackingError> {
    let transforms = frame_transforms(prev, current, weights)?;

    let moments: Vec<TransformDistance> = match volume {
        Some(volume) => volume
            .assigned_points(current)
            .par_iter()
            .map(|points| TransformDistance::new(points))
            .collect(),
        None => current
            .par_iter()
            .map(|&p| TransformDistance::new(&TransformDistance::local_frame(p, LOCAL_FRAME_OFFSET)))
            .collect(),
    };

    let distances = SquareMatrix::from_fn(current.len(), |i, j| {
        if i == j {
            0.0
        } else {
            moments[i].distance(&transforms[i], &transforms[j]) as f32
        }
    });
    Ok((distances, transforms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_spatial_distances() {
        let points = vec![DVec3::ZERO, DVec3::new(3.0, 4.0, 0.0), DVec3::Z];
        let d = spatial_distances(&points);
        assert_relative_eq!(d.get(0, 1), 25.0);
        assert_relative_eq!(d.get(2, 1), 26.0);
        assert!(d.is_symmetric(0.0));
        assert_eq!(d.get(1, 1), 0.0);

        let v = velocity_distances(&points, &points);
        assert!(v.as_slice().iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_transform_distances_of_two_clusters() -> Result<(), TrackingError> {
        // two clusters, the second one moves away, neighbors stay within a cluster
        let prev = vec![
            DVec3::new(0.0, 0.0, 0.0),
            DVec3::new(0.1, 0.0, 0.0),
            DVec3::new(0.0, 0.1, 0.0),
            DVec3::new(5.0, 0.0, 0.0),
            DVec3::new(5.1, 0.0, 0.0),
            DVec3::new(5.0, 0.1, 0.0),
        ];
        let mut current = prev.clone();
        for p in current.iter_mut().skip(3) {
            *p += DVec3::new(0.0, 0.0, 1.0);
        }
        let mut weights = SmoothWeights::new(spatial_distances(&prev));
        weights.update_rows(|_, row| row.iter_mut().for_each(|d| *d = (-*d).exp()));
        weights.cutoff(0.5);

        let (d, transforms) = transform_distances(&prev, &current, &weights, None)?;
        assert_eq!(transforms.len(), 6);
        assert_relative_eq!(d.get(0, 1), 0.0, epsilon = 1e-6);
        assert_relative_eq!(d.get(0, 4), 1.0, epsilon = 1e-6);
        assert_relative_eq!(d.get(4, 0), 1.0, epsilon = 1e-6);
        assert_eq!(d.get(3, 3), 0.0);
        Ok(())
    }
}
