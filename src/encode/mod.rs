//! Frame encoders for the scene tree
//!
//! Point clouds become PCD files and camera frames become JPEG files.

pub mod jpeg;
pub mod pcd;

pub use jpeg::{encode_jpeg, DEFAULT_QUALITY};
pub use pcd::{encode_pcd, read_pcd, write_pcd, PcdFormat};
