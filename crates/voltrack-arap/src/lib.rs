#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Affinity models producing smooth weights between points.
pub mod affinity;

mod arap;
pub use arap::{arap_gradient, fit_neighborhood, fit_rigid_transform, frame_transforms};

/// Pairwise distance matrices.
pub mod distances;

mod error;
pub use error::TrackingError;

/// Point removal and reindexing.
pub mod filter;

/// Frame by frame tracking.
pub mod forward;

/// Whole sequence optimization.
pub mod global;

/// Dense square matrices.
pub mod matrix;

/// Progress reporting hooks.
pub mod observer;

/// Trajectory principal component analysis.
pub mod pca;

/// Sequence quality measures.
pub mod stats;

mod transform_distance;
pub use transform_distance::TransformDistance;

/// Smooth weights and neighbor lists.
pub mod weights;
