//! Every model keeps a [`SmoothWeights`] that is symmetric, non-negative and has each diagonal
//! entry equal to the maximum of its row.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use voltrack_3d::pointcloud::Frame;
use voltrack_3d::volume::OccupancyVolume;

use crate::filter::PointFilter;
use crate::matrix::SquareMatrix;
use crate::weights::SmoothWeights;
use crate::TrackingError;

mod average;
pub use average::AverageDistanceAffinity;

mod external;
pub use external::ExternalAffinity;

mod history;
pub use history::{HistoryAffinity, MotionTerm};

mod max_distance;
pub use max_distance::MaxDistanceAffinity;

mod pca;
pub use pca::PcaAffinity;

mod spatial;
pub use spatial::SpatialAffinity;

/// Decay rate that halves a weight at distance `sigma`: `ln 2 / sigma^2`.
pub fn gaussian_k(sigma: f64) -> f64 {
    std::f64::consts::LN_2 / (sigma * sigma)
}

/// `exp(-k * distance)` for every entry.
pub(crate) fn decay(distances: &SquareMatrix, k: f64) -> SquareMatrix {
    SquareMatrix::from_fn(distances.len(), |i, j| {
        (-k * distances.get(i, j) as f64).exp() as f32
    })
}

/// A strategy that maintains the smooth weights of a tracked point set.
pub trait AffinityModel: Send + Sync {
    /// Short name for logging.
    fn name(&self) -> &'static str;

    /// The current weights.
    fn weights(&self) -> &SmoothWeights;

    /// Mutable access to the current weights.
    fn weights_mut(&mut self) -> &mut SmoothWeights;

    /// Fold in the newly tracked frame `frame` of `frames`.
    ///
    /// `volume` is the volume of that frame, when available.
    fn update(
        &mut self,
        frames: &[Frame],
        frame: usize,
        volume: Option<&OccupancyVolume>,
    ) -> Result<(), TrackingError>;

    /// Recompute the weights from the whole sequence.
    fn update_full(
        &mut self,
        frames: &[Frame],
        volumes: Option<&[OccupancyVolume]>,
    ) -> Result<(), TrackingError>;

    /// Threshold the weights into neighbor lists.
    fn cutoff(&mut self, threshold: f32) {
        self.weights_mut().cutoff(threshold);
    }

    /// Drop the points removed by `filter` from every internal matrix.
    fn retain(&mut self, filter: &PointFilter) {
        let weights = filter.apply_weights(self.weights());
        *self.weights_mut() = weights;
    }
}

/// Check a frame index against a sequence and return the frame.
pub(crate) fn frame_at(frames: &[Frame], index: usize) -> Result<&Frame, TrackingError> {
    frames.get(index).ok_or(TrackingError::FrameOutOfRange {
        index,
        count: frames.len(),
    })
}

/// Pick the volume of frame `index`, checking the volume count.
pub(crate) fn volume_at<'a>(
    volumes: Option<&'a [OccupancyVolume]>,
    frames: usize,
    index: usize,
) -> Result<Option<&'a OccupancyVolume>, TrackingError> {
    match volumes {
        Some(v) if v.len() != frames => Err(TrackingError::VolumeCountMismatch {
            volumes: v.len(),
            frames,
        }),
        Some(v) => Ok(Some(&v[index])),
        None => Ok(None),
    }
}

/// Selection and constants of an affinity model.
///
/// Widths are distances at which a weight falls to one half.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AffinityConfig {
    /// Gaussian of the distance in the first frame.
    Spatial {
        /// Spatial width.
        sigma: f64,
    },
    /// Gaussian of the distance averaged over the sequence by batch updates.
    AverageDistance {
        /// Spatial width.
        sigma: f64,
    },
    /// Gaussian of the largest distance seen so far.
    MaxDistance {
        /// Spatial width.
        sigma: f64,
        /// Width of the transform disagreement.
        transform_sigma: f64,
        /// Track the spatial distance.
        use_spatial: bool,
        /// Track the transform disagreement.
        use_transform: bool,
        /// Cutoff used to derive neighbor lists when a batch update starts without them.
        bootstrap_cutoff: f32,
    },
    /// Spatial Gaussian times a smoothed Gaussian of the transform disagreement.
    TransformHistory {
        /// Spatial width.
        sigma: f64,
        /// Width of the transform disagreement.
        transform_sigma: f64,
        /// Blend factor of the newest frame.
        falloff: f64,
    },
    /// Spatial Gaussian times a smoothed Gaussian of the velocity difference.
    Bilateral {
        /// Spatial width.
        sigma: f64,
        /// Width of the velocity difference.
        velocity_sigma: f64,
        /// Blend factor of the newest frame.
        falloff: f64,
    },
    /// Gaussian of the distance between trajectory embeddings.
    Pca {
        /// Embedding width.
        sigma: f64,
        /// Number of principal components.
        components: usize,
    },
    /// Weights read from a binary weight file.
    External {
        /// Path of the weight file.
        path: PathBuf,
    },
}

impl Default for AffinityConfig {
    fn default() -> Self {
        Self::TransformHistory {
            sigma: 0.1861,
            transform_sigma: 0.01,
            falloff: 0.01,
        }
    }
}

impl AffinityConfig {
    /// Instantiate the model, seeded with the frames tracked so far.
    ///
    /// All models except [`AffinityConfig::Pca`] only look at the first frame.
    pub fn build(&self, frames: &[Frame]) -> Result<Box<dyn AffinityModel>, TrackingError> {
        let first = frame_at(frames, 0)?;
        let model: Box<dyn AffinityModel> = match self {
            Self::Spatial { sigma } => Box::new(SpatialAffinity::new(first, gaussian_k(*sigma))),
            Self::AverageDistance { sigma } => {
                Box::new(AverageDistanceAffinity::new(first, gaussian_k(*sigma)))
            }
            Self::MaxDistance {
                sigma,
                transform_sigma,
                use_spatial,
                use_transform,
                bootstrap_cutoff,
            } => Box::new(MaxDistanceAffinity::new(
                first,
                gaussian_k(*sigma),
                gaussian_k(*transform_sigma),
                *use_spatial,
                *use_transform,
                *bootstrap_cutoff,
            )),
            Self::TransformHistory {
                sigma,
                transform_sigma,
                falloff,
            } => Box::new(HistoryAffinity::new(
                first,
                MotionTerm::TransformDistance,
                gaussian_k(*sigma),
                gaussian_k(*transform_sigma),
                *falloff,
            )),
            Self::Bilateral {
                sigma,
                velocity_sigma,
                falloff,
            } => Box::new(HistoryAffinity::new(
                first,
                MotionTerm::Velocity,
                gaussian_k(*sigma),
                gaussian_k(*velocity_sigma),
                *falloff,
            )),
            Self::Pca { sigma, components } => {
                Box::new(PcaAffinity::new(frames, gaussian_k(*sigma), *components)?)
            }
            Self::External { path } => Box::new(ExternalAffinity::from_file(path, first.len())?),
        };
        log::info!("affinity model: {}", model.name());
        Ok(model)
    }
}
