use glam::{DMat3, DVec3};

/// Error types for the transforms module.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum TransformError {
    /// The rotation axis has no direction.
    #[error("cannot compute rotation matrix from a zero vector")]
    ZeroAxis,

    /// Source and destination slices differ in length.
    #[error("point count mismatch: {0} source points, {1} destination points")]
    LengthMismatch(usize, usize),
}

/// A rigid motion `p -> R * p + t`.
///
/// The rotation is orthonormal with determinant +1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RigidTransform {
    rotation: DMat3,
    translation: DVec3,
}

impl Default for RigidTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl RigidTransform {
    /// The transform that leaves every point in place.
    pub const IDENTITY: Self = Self {
        rotation: DMat3::IDENTITY,
        translation: DVec3::ZERO,
    };

    /// Create a transform from a rotation and a translation.
    pub fn new(rotation: DMat3, translation: DVec3) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// Create a transform that rotates by `rotation` and maps `src_anchor` exactly onto `dst_anchor`.
    ///
    /// The translation is `dst_anchor - rotation * src_anchor`.
    pub fn from_correspondence(rotation: DMat3, src_anchor: DVec3, dst_anchor: DVec3) -> Self {
        Self {
            rotation,
            translation: dst_anchor - rotation * src_anchor,
        }
    }

    /// Create a transform from an axis, an angle in radians and a translation.
    ///
    /// Example:
    ///
    /// ```no_run
    /// use voltrack_3d::transforms::RigidTransform;
    /// use voltrack_3d::DVec3;
    ///
    /// let t = RigidTransform::from_axis_angle(DVec3::Z, std::f64::consts::FRAC_PI_2, DVec3::ZERO).unwrap();
    /// let p = t.apply(DVec3::X);
    /// assert!((p - DVec3::Y).length() < 1e-12);
    /// ```
    pub fn from_axis_angle(
        axis: DVec3,
        angle: f64,
        translation: DVec3,
    ) -> Result<Self, TransformError> {
        let magnitude = axis.length();
        if magnitude < 1e-10 {
            return Err(TransformError::ZeroAxis);
        }
        Ok(Self {
            rotation: DMat3::from_axis_angle(axis / magnitude, angle),
            translation,
        })
    }

    /// Create a transform from a row-major rotation and a translation.
    pub fn from_rows(rows: [[f64; 3]; 3], translation: [f64; 3]) -> Self {
        Self {
            rotation: DMat3::from_cols_array_2d(&rows).transpose(),
            translation: DVec3::from_array(translation),
        }
    }

    /// The rotation part.
    pub fn rotation(&self) -> DMat3 {
        self.rotation
    }

    /// The translation part.
    pub fn translation(&self) -> DVec3 {
        self.translation
    }

    /// The rotation as row-major rows.
    pub fn rotation_rows(&self) -> [[f64; 3]; 3] {
        self.rotation.transpose().to_cols_array_2d()
    }

    /// Apply the transform to a point.
    #[inline]
    pub fn apply(&self, point: DVec3) -> DVec3 {
        self.rotation * point + self.translation
    }

    /// The inverse motion.
    pub fn inverse(&self) -> Self {
        let rotation = self.rotation.transpose();
        Self {
            rotation,
            translation: -(rotation * self.translation),
        }
    }

    /// Transform a set of points into a preallocated destination.
    pub fn transform_points(&self, src: &[DVec3], dst: &mut [DVec3]) -> Result<(), TransformError> {
        if src.len() != dst.len() {
            return Err(TransformError::LengthMismatch(src.len(), dst.len()));
        }
        dst.iter_mut()
            .zip(src.iter())
            .for_each(|(d, &s)| *d = self.apply(s));
        Ok(())
    }
}
