use voltrack_3d::io::IoError;
use voltrack_3d::volume::VolumeError;

/// Error types for the tracking crate.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum TrackingError {
    /// A neighborhood fit was requested before the weights were cut off.
    #[error("neighbor lists are not available, cutoff must be called first")]
    MissingNeighbors,

    /// An energy term became NaN during frame optimization.
    #[error("NaN energy at frame {frame}, iteration {iteration}")]
    NanEnergy {
        /// Frame being optimized.
        frame: usize,
        /// Iteration at which the NaN appeared.
        iteration: usize,
    },

    /// A point set does not have the expected number of points.
    #[error("point set {index} has {found} points, expected {expected}")]
    PointCountMismatch {
        /// Frame or matrix index of the offending set.
        index: usize,
        /// Expected number of points.
        expected: usize,
        /// Actual number of points.
        found: usize,
    },

    /// A frame index is outside the sequence.
    #[error("frame {index} out of range for {count} frames")]
    FrameOutOfRange {
        /// Requested frame.
        index: usize,
        /// Number of frames.
        count: usize,
    },

    /// The number of volumes does not match the number of frames.
    #[error("{volumes} volumes for {frames} frames")]
    VolumeCountMismatch {
        /// Number of volumes.
        volumes: usize,
        /// Number of frames.
        frames: usize,
    },

    /// Filtering would remove every point.
    #[error("cannot remove {requested} of {available} points")]
    FilterTooLarge {
        /// Number of points to remove.
        requested: usize,
        /// Number of points available.
        available: usize,
    },

    /// A parameter has an unusable value.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Volume construction or sampling failed.
    #[error(transparent)]
    Volume(#[from] VolumeError),

    /// Reading or writing a file failed.
    #[error(transparent)]
    Io(#[from] IoError),
}

/// Check that a point set has `expected` points.
pub(crate) fn ensure_len(index: usize, expected: usize, found: usize) -> Result<(), TrackingError> {
    if expected != found {
        return Err(TrackingError::PointCountMismatch {
            index,
            expected,
            found,
        });
    }
    Ok(())
}
