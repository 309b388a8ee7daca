//! Capture error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("capture source not found: {0}")]
    SourceNotFound(String),

    #[error("no frames found in {0}")]
    NoFrames(String),

    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, CaptureError>;
