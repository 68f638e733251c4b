use glam::{DMat3, DVec3};
use voltrack_3d::transforms::RigidTransform;

/// Moments of a local point set, for comparing rigid transforms on it.
///
/// Holds `sum q`, `sum q q^T`, `sum q.q` and the count of a point set `{q}` so that the mean
/// squared displacement between `A(q)` and `B(q)` is evaluated in constant time:
///
/// `sum |R1 q + t1 - R2 q - t2|^2 = 2 sum q.q + 2 dt.(R1 sum q) - 2 dt.(R2 sum q)
///  + n |dt|^2 - 2 <R1^T R2, sum q q^T>` with `dt = t1 - t2`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformDistance {
    sum: DVec3,
    outer: DMat3,
    norm: f64,
    count: f64,
}

impl TransformDistance {
    /// Accumulate the moments of a point set.
    pub fn new(points: &[DVec3]) -> Self {
        points.iter().fold(
            Self {
                sum: DVec3::ZERO,
                outer: DMat3::ZERO,
                norm: 0.0,
                count: 0.0,
            },
            |acc, &q| Self {
                sum: acc.sum + q,
                outer: acc.outer + DMat3::from_cols(q * q.x, q * q.y, q * q.z),
                norm: acc.norm + q.length_squared(),
                count: acc.count + 1.0,
            },
        )
    }

    /// Seven points spanning a small frame around `center`: the centre and `offset` along each
    /// axis in both directions.
    pub fn local_frame(center: DVec3, offset: f64) -> [DVec3; 7] {
        [
            center,
            center + DVec3::X * offset,
            center - DVec3::X * offset,
            center + DVec3::Y * offset,
            center - DVec3::Y * offset,
            center + DVec3::Z * offset,
            center - DVec3::Z * offset,
        ]
    }

    /// Number of accumulated points.
    pub fn count(&self) -> usize {
        self.count as usize
    }

    /// Mean squared distance between the images of the point set under `a` and `b`.
    pub fn distance(&self, a: &RigidTransform, b: &RigidTransform) -> f64 {
        if self.count == 0.0 {
            return 0.0;
        }
        let (r1, r2) = (a.rotation(), b.rotation());
        let dt = a.translation() - b.translation();
        let cross = r1.transpose() * r2;
        let frobenius: f64 = (0..3).map(|j| cross.col(j).dot(self.outer.col(j))).sum();

        let total = 2.0 * self.norm + 2.0 * dt.dot(r1 * self.sum) - 2.0 * dt.dot(r2 * self.sum)
            + self.count * dt.length_squared()
            - 2.0 * frobenius;
        (total / self.count).abs()
    }
}
