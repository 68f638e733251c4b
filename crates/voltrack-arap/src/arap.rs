use glam::{DMat3, DVec3};
use rayon::prelude::*;
use voltrack_3d::transforms::RigidTransform;

use crate::error::ensure_len;
use crate::weights::SmoothWeights;
use crate::TrackingError;

fn to_dmat3(m: faer::MatRef<'_, f64>) -> DMat3 {
    DMat3::from_cols(
        DVec3::new(m.read(0, 0), m.read(1, 0), m.read(2, 0)),
        DVec3::new(m.read(0, 1), m.read(1, 1), m.read(2, 1)),
        DVec3::new(m.read(0, 2), m.read(1, 2), m.read(2, 2)),
    )
}

/// Weighted Procrustes fit over `(source, destination, weight)` triples.
fn fit_weighted<I>(pairs: I) -> RigidTransform
where
    I: Iterator<Item = (DVec3, DVec3, f64)> + Clone,
{
    let (mut count, mut weight_sum) = (0usize, 0.0);
    for (_, _, w) in pairs.clone() {
        count += 1;
        weight_sum += w;
    }
    if count == 0 {
        return RigidTransform::IDENTITY;
    }

    // all-zero weights carry no preference, fall back to uniform
    let uniform = weight_sum <= f64::EPSILON;
    let weight = |w: f64| if uniform { 1.0 } else { w };
    let total = if uniform { count as f64 } else { weight_sum };

    let (src_sum, dst_sum) = pairs
        .clone()
        .fold((DVec3::ZERO, DVec3::ZERO), |(sa, sb), (a, b, w)| {
            (sa + a * weight(w), sb + b * weight(w))
        });
    let src_centroid = src_sum / total;
    let dst_centroid = dst_sum / total;

    if count < 2 {
        return RigidTransform::from_correspondence(DMat3::IDENTITY, src_centroid, dst_centroid);
    }

    // cross-covariance H = A^T * diag(w) * B of the centered sets
    let mut h = DMat3::ZERO;
    for (a, b, w) in pairs {
        let a = a - src_centroid;
        let b = (b - dst_centroid) * weight(w);
        h += DMat3::from_cols(a * b.x, a * b.y, a * b.z);
    }

    let h = faer::Mat::<f64>::from_fn(3, 3, |i, j| h.col(j)[i]);
    let svd = h.svd();
    let u = to_dmat3(svd.u());
    let v = to_dmat3(svd.v());

    let mut r = v * u.transpose();

    // reflection: flip the direction of the smallest singular value
    if r.determinant() < 0.0 {
        let v_corrected = DMat3::from_cols(v.x_axis, v.y_axis, -v.z_axis);
        r = v_corrected * u.transpose();
    }

    RigidTransform::from_correspondence(r, src_centroid, dst_centroid)
}

/// Compute the weighted rigid transform that best maps `src` onto `dst`.
///
/// The rotation comes from the SVD of the weighted cross-covariance and always has
/// determinant +1. The translation maps the weighted centroid of `src` exactly onto the one of
/// `dst`. With fewer than two points the rotation is the identity.
///
/// # Arguments
///
/// * `src` - Source points.
/// * `dst` - Destination points, one per source point.
/// * `weights` - Non-negative weight of each correspondence.
pub fn fit_rigid_transform(
    src: &[DVec3],
    dst: &[DVec3],
    weights: &[f64],
) -> Result<RigidTransform, TrackingError> {
    ensure_len(1, src.len(), dst.len())?;
    ensure_len(2, src.len(), weights.len())?;
    Ok(fit_weighted(
        src.iter()
            .zip(dst.iter())
            .zip(weights.iter())
            .map(|((&a, &b), &w)| (a, b, w)),
    ))
}

fn fit_rows(prev: &[DVec3], current: &[DVec3], neighbors: &[usize], row: &[f32]) -> RigidTransform {
    fit_weighted(
        neighbors
            .iter()
            .map(|&j| (prev[j], current[j], row[j] as f64)),
    )
}

/// Fit the rigid motion of the neighborhood of point `index` from `prev` to `current`.
///
/// Correspondences are the neighbor list of `index`, weighted by its row of the weight matrix.
///
/// # Errors
///
/// [`TrackingError::MissingNeighbors`] if the weights have not been cut off.
pub fn fit_neighborhood(
    prev: &[DVec3],
    current: &[DVec3],
    index: usize,
    weights: &SmoothWeights,
) -> Result<RigidTransform, TrackingError> {
    let neighbors = weights.neighbors(index)?;
    ensure_len(0, weights.len(), prev.len())?;
    ensure_len(1, weights.len(), current.len())?;
    Ok(fit_rows(prev, current, neighbors, weights.matrix().row(index)))
}

/// Fit the neighborhood motion of every point, in parallel.
pub fn frame_transforms(
    prev: &[DVec3],
    current: &[DVec3],
    weights: &SmoothWeights,
) -> Result<Vec<RigidTransform>, TrackingError> {
    let lists = weights.neighbor_lists()?;
    ensure_len(0, weights.len(), prev.len())?;
    ensure_len(1, weights.len(), current.len())?;
    Ok(lists
        .par_iter()
        .enumerate()
        .map(|(i, nn)| fit_rows(prev, current, nn, weights.matrix().row(i)))
        .collect())
}

/// Compute the rigidity correction of every point.
///
/// Each point is predicted by applying its neighborhood's rigid motion from `prev` to
/// `current` to its own `prev` position. The result is `prediction - current`.
pub fn arap_gradient(
    prev: &[DVec3],
    current: &[DVec3],
    weights: &SmoothWeights,
) -> Result<Vec<DVec3>, TrackingError> {
    let transforms = frame_transforms(prev, current, weights)?;
    Ok(transforms
        .par_iter()
        .zip(prev.par_iter().zip(current.par_iter()))
        .map(|(t, (&p, &c))| t.apply(p) - c)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::SquareMatrix;
    use approx::assert_relative_eq;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn assert_transform_eq(a: &RigidTransform, b: &RigidTransform, epsilon: f64) {
        let (ra, rb) = (a.rotation_rows(), b.rotation_rows());
        for i in 0..3 {
            for j in 0..3 {
                assert_relative_eq!(ra[i][j], rb[i][j], epsilon = epsilon);
            }
        }
        let (ta, tb) = (a.translation(), b.translation());
        assert_relative_eq!(ta.x, tb.x, epsilon = epsilon);
        assert_relative_eq!(ta.y, tb.y, epsilon = epsilon);
        assert_relative_eq!(ta.z, tb.z, epsilon = epsilon);
    }

    #[test]
    fn test_unit_square_quarter_turn() -> Result<(), Box<dyn std::error::Error>> {
        let src = vec![
            DVec3::new(0.0, 0.0, 0.0),
            DVec3::new(1.0, 0.0, 0.0),
            DVec3::new(1.0, 1.0, 0.0),
            DVec3::new(0.0, 1.0, 0.0),
        ];
        let expected = RigidTransform::from_axis_angle(DVec3::Z, std::f64::consts::FRAC_PI_2, DVec3::ZERO)?;
        let dst: Vec<DVec3> = src.iter().map(|&p| expected.apply(p)).collect();

        let fitted = fit_rigid_transform(&src, &dst, &[1.0; 4])?;
        assert_transform_eq(&fitted, &expected, 1e-5);
        assert_relative_eq!(fitted.rotation().determinant(), 1.0, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn test_recovers_random_motions() -> Result<(), Box<dyn std::error::Error>> {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..20 {
            let src: Vec<DVec3> = (0..12)
                .map(|_| DVec3::new(rng.random(), rng.random(), rng.random()) * 2.0 - 1.0)
                .collect();
            let axis = DVec3::new(rng.random(), rng.random(), rng.random()) - 0.5;
            let translation = DVec3::new(rng.random(), rng.random(), rng.random()) * 10.0;
            let truth = RigidTransform::from_axis_angle(axis, rng.random_range(-3.0..3.0), translation)?;
            let dst: Vec<DVec3> = src.iter().map(|&p| truth.apply(p)).collect();
            let weights: Vec<f64> = (0..12).map(|_| rng.random_range(0.1..1.0)).collect();

            let fitted = fit_rigid_transform(&src, &dst, &weights)?;
            assert_transform_eq(&fitted, &truth, 1e-9);
        }
        Ok(())
    }

    #[test]
    fn test_reflection_is_corrected() -> Result<(), Box<dyn std::error::Error>> {
        // a mirror image has no proper rotation fit; the result must still be a rotation
        let src = vec![
            DVec3::new(1.0, 0.0, 0.0),
            DVec3::new(0.0, 1.0, 0.0),
            DVec3::new(0.0, 0.0, 1.0),
            DVec3::new(1.0, 1.0, 1.0),
        ];
        let dst: Vec<DVec3> = src.iter().map(|p| DVec3::new(p.x, p.y, -p.z)).collect();
        let fitted = fit_rigid_transform(&src, &dst, &[1.0; 4])?;
        assert_relative_eq!(fitted.rotation().determinant(), 1.0, epsilon = 1e-12);

        // planar input
        let flat = vec![DVec3::ZERO, DVec3::X, DVec3::Y, DVec3::new(1.0, 1.0, 0.0)];
        let fitted = fit_rigid_transform(&flat, &flat, &[1.0; 4])?;
        assert_relative_eq!(fitted.rotation().determinant(), 1.0, epsilon = 1e-12);
        assert_transform_eq(&fitted, &RigidTransform::IDENTITY, 1e-9);
        Ok(())
    }

    #[test]
    fn test_single_point_translates() -> Result<(), Box<dyn std::error::Error>> {
        let fitted = fit_rigid_transform(&[DVec3::ONE], &[DVec3::new(2.0, 3.0, 4.0)], &[0.5])?;
        assert_transform_eq(
            &fitted,
            &RigidTransform::new(DMat3::IDENTITY, DVec3::new(1.0, 2.0, 3.0)),
            1e-12,
        );
        assert!(fit_rigid_transform(&[DVec3::ONE], &[], &[1.0]).is_err());
        Ok(())
    }

    #[test]
    fn test_neighborhood_fit_requires_cutoff() -> Result<(), Box<dyn std::error::Error>> {
        let prev = vec![DVec3::ZERO, DVec3::X, DVec3::Y, DVec3::Z];
        let current: Vec<DVec3> = prev.iter().map(|&p| p + DVec3::new(0.5, 0.0, 0.0)).collect();
        let mut weights = SmoothWeights::new(SquareMatrix::filled(4, 1.0));

        assert!(matches!(
            fit_neighborhood(&prev, &current, 0, &weights),
            Err(TrackingError::MissingNeighbors)
        ));
        assert!(matches!(
            arap_gradient(&prev, &current, &weights),
            Err(TrackingError::MissingNeighbors)
        ));

        weights.cutoff(0.5);
        let t = fit_neighborhood(&prev, &current, 2, &weights)?;
        assert_relative_eq!(t.translation().x, 0.5, epsilon = 1e-12);

        // a rigidly moved frame needs no correction
        for g in arap_gradient(&prev, &current, &weights)? {
            assert!(g.length() < 1e-12);
        }
        Ok(())
    }

    #[test]
    fn test_gradient_pulls_outlier_back() -> Result<(), Box<dyn std::error::Error>> {
        let prev = vec![DVec3::ZERO, DVec3::X, DVec3::Y, DVec3::Z];
        let mut current = prev.clone();
        current[3] = DVec3::new(0.0, 0.0, 1.5);
        let mut weights = SmoothWeights::new(SquareMatrix::filled(4, 1.0));
        weights.cutoff(0.5);

        let g = arap_gradient(&prev, &current, &weights)?;
        assert!(g[3].z < 0.0);
        Ok(())
    }
}
