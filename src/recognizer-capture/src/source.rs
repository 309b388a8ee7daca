//! Frame sources: a single still image or a directory of images replayed as
//! a camera stream

use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace};

use crate::error::{CaptureError, Result};
use crate::frame::CapturedFrame;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "tif", "tiff", "webp"];

/// A supplier of frames; `None` means the stream has ended
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Option<CapturedFrame>>;

    /// Short description for logs
    fn describe(&self) -> String;
}

fn decode(path: &Path, sequence: u64) -> Result<CapturedFrame> {
    let bytes = std::fs::read(path).map_err(|source| CaptureError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let decoded = image::load_from_memory(&bytes)?;
    trace!("decoded {:?} ({}x{})", path, decoded.width(), decoded.height());
    Ok(CapturedFrame::from_dynamic(&decoded, sequence))
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// One image file, delivered once or repeated as a static camera feed
pub struct StillSource {
    path: PathBuf,
    cached: Option<CapturedFrame>,
    sequence: u64,
    looping: bool,
}

impl StillSource {
    pub fn new(path: impl Into<PathBuf>, looping: bool) -> Result<Self> {
        let path = path.into();
        if !path.is_file() {
            return Err(CaptureError::SourceNotFound(path.display().to_string()));
        }
        Ok(Self {
            path,
            cached: None,
            sequence: 0,
            looping,
        })
    }
}

impl FrameSource for StillSource {
    fn next_frame(&mut self) -> Result<Option<CapturedFrame>> {
        if self.sequence > 0 && !self.looping {
            return Ok(None);
        }
        let mut frame = match &self.cached {
            Some(frame) => frame.clone(),
            None => {
                let frame = decode(&self.path, 0)?;
                self.cached = Some(frame.clone());
                frame
            }
        };
        frame.sequence = self.sequence;
        frame.timestamp = Utc::now();
        self.sequence += 1;
        Ok(Some(frame))
    }

    fn describe(&self) -> String {
        format!("still image {}", self.path.display())
    }
}

/// Image files of a directory in name order, optionally looping forever
pub struct DirectorySource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    position: usize,
    sequence: u64,
    looping: bool,
}

impl DirectorySource {
    pub fn new(dir: impl Into<PathBuf>, looping: bool) -> Result<Self> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(CaptureError::SourceNotFound(dir.display().to_string()));
        }

        let entries = std::fs::read_dir(&dir).map_err(|source| CaptureError::Io {
            path: dir.display().to_string(),
            source,
        })?;
        let mut files: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file() && is_image(p))
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(CaptureError::NoFrames(dir.display().to_string()));
        }
        info!("found {} frames in {:?}", files.len(), dir);

        Ok(Self {
            dir,
            files,
            position: 0,
            sequence: 0,
            looping,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FrameSource for DirectorySource {
    fn next_frame(&mut self) -> Result<Option<CapturedFrame>> {
        if self.position >= self.files.len() {
            if !self.looping {
                return Ok(None);
            }
            debug!("restarting frame directory {:?}", self.dir);
            self.position = 0;
        }

        let path = &self.files[self.position];
        self.position += 1;
        let frame = decode(path, self.sequence)?;
        self.sequence += 1;
        Ok(Some(frame))
    }

    fn describe(&self) -> String {
        format!("frame directory {} ({} images)", self.dir.display(), self.files.len())
    }
}

/// Open a directory as a frame sequence, anything else as a still image
pub fn open_source(path: &Path, looping: bool) -> Result<Box<dyn FrameSource>> {
    if path.is_dir() {
        Ok(Box::new(DirectorySource::new(path, looping)?))
    } else {
        Ok(Box::new(StillSource::new(path, looping)?))
    }
}
