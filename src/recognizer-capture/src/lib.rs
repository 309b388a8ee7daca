//! recognizer-capture - Frame sources for the recognizer
//!
//! Supplies raw interleaved frames (pixel buffer, width, height, stride,
//! channel count) from still images or from a directory replayed as a
//! camera stream.

pub mod error;
pub mod frame;
pub mod source;

pub use error::{CaptureError, Result};
pub use frame::CapturedFrame;
pub use source::{open_source, DirectorySource, FrameSource, StillSource};
