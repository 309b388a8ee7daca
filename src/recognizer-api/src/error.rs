//! Status taxonomy and error types shared by every fallible operation

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Status codes returned across the recognizer boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Success,
    InvalidArgument,
    LicenseError,
    ConfigError,
    DecodeFailure,
    IoFailure,
    KindMismatch,
    InvalidState,
    EngineFailure,
}

impl Status {
    /// Human readable description of the status
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Success => "success",
            Status::InvalidArgument => "invalid argument",
            Status::LicenseError => "license key rejected or expired",
            Status::ConfigError => "invalid recognizer settings",
            Status::DecodeFailure => "failed to decode image",
            Status::IoFailure => "file could not be read",
            Status::KindMismatch => "result is of a different kind",
            Status::InvalidState => "operation not allowed in current session state",
            Status::EngineFailure => "recognition engine failure",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("license error: {0}")]
    License(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("image decode failed: {0}")]
    Decode(#[from] image::ImageError),

    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("result kind mismatch: expected {expected}, got {actual}")]
    KindMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("invalid session state: {0}")]
    InvalidState(String),

    #[error("engine failure: {0}")]
    Engine(String),
}

impl RecognizerError {
    /// Map the error onto the shared status taxonomy
    pub fn status(&self) -> Status {
        match self {
            RecognizerError::InvalidArgument(_) => Status::InvalidArgument,
            RecognizerError::License(_) => Status::LicenseError,
            RecognizerError::Config(_) => Status::ConfigError,
            RecognizerError::Decode(_) => Status::DecodeFailure,
            RecognizerError::Io { .. } => Status::IoFailure,
            RecognizerError::KindMismatch { .. } => Status::KindMismatch,
            RecognizerError::InvalidState(_) => Status::InvalidState,
            RecognizerError::Engine(_) => Status::EngineFailure,
        }
    }

    pub(crate) fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        RecognizerError::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}

impl From<serde_json::Error> for RecognizerError {
    fn from(e: serde_json::Error) -> Self {
        RecognizerError::Config(format!("malformed replay script: {}", e))
    }
}

pub type Result<T> = std::result::Result<T, RecognizerError>;
