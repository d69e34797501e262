//! rollcall-hw: frame sources for the live loop.
//!
//! Provides V4L2-based camera capture and replay of still images from a
//! directory, both as [`rollcall_core::FrameSource`] implementations.

pub mod camera;
pub mod dir;
pub mod frame;

pub use camera::{Camera, CameraError, PixelFormat};
pub use dir::{DirSourceError, ImageDirSource};
