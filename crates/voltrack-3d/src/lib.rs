#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// I/O utilities for volumes, point clouds and transform lists.
pub mod io;

/// Spatial index for nearest neighbor queries.
pub mod kdtree;

/// Point and frame utilities.
pub mod pointcloud;

/// Rigid transforms.
pub mod transforms;

/// Occupancy volumes and Lloyd relaxation.
pub mod volume;

pub use glam::{DMat3, DVec3};
