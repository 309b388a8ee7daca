//! Captured frame data

use chrono::{DateTime, Utc};
use image::DynamicImage;

/// Interleaved BGR, BGRA or gray frame as delivered by a capture device
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Bytes per row
    pub stride: usize,
    /// 1 (gray), 3 (BGR) or 4 (BGRA)
    pub channels: u8,
    pub timestamp: DateTime<Utc>,
    /// Position of the frame in its stream
    pub sequence: u64,
}

impl CapturedFrame {
    /// Convert a decoded image to the device byte order: BGRA when it carries
    /// alpha, BGR otherwise
    pub fn from_dynamic(decoded: &DynamicImage, sequence: u64) -> Self {
        let (width, height) = (decoded.width(), decoded.height());
        let (mut data, channels) = if decoded.color().has_alpha() {
            (decoded.to_rgba8().into_raw(), 4u8)
        } else {
            (decoded.to_rgb8().into_raw(), 3u8)
        };
        for px in data.chunks_exact_mut(channels as usize) {
            px.swap(0, 2);
        }

        Self {
            data,
            width,
            height,
            stride: width as usize * channels as usize,
            channels,
            timestamp: Utc::now(),
            sequence,
        }
    }
}
