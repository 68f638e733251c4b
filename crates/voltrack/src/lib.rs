#![doc = env!("CARGO_PKG_DESCRIPTION")]

#[doc(inline)]
pub use voltrack_3d as v3d;

#[doc(inline)]
pub use voltrack_arap as arap;
