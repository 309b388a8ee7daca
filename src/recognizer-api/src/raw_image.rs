//! Typed image wrapper over raw and encoded pixel buffers
//!
//! An [`Image`] either borrows a caller-owned buffer (zero-copy wrapping of a
//! captured frame) or owns pixels produced by the library or the engine
//! (decoded files, dewarp output, intermediate images shown through callbacks).

use image::{DynamicImage, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::path::Path;
use tracing::debug;

use crate::error::{RecognizerError, Result};

/// Pixel layout of a raw buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RawLayout {
    Bgra,
    Bgr,
    Gray,
    /// 8-bit luma plane followed by an interleaved V/U plane at half resolution
    Nv21,
}

impl RawLayout {
    /// Map a capture channel count onto a layout
    pub fn from_channels(channels: u32) -> Option<Self> {
        match channels {
            1 => Some(RawLayout::Gray),
            3 => Some(RawLayout::Bgr),
            4 => Some(RawLayout::Bgra),
            _ => None,
        }
    }

    /// Bytes per pixel in the first (or only) plane
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            RawLayout::Bgra => 4,
            RawLayout::Bgr => 3,
            RawLayout::Gray | RawLayout::Nv21 => 1,
        }
    }

    /// Number of buffer rows backing an image of the given height
    pub fn buffer_rows(&self, height: u32) -> usize {
        let h = height as usize;
        match self {
            RawLayout::Nv21 => h + h / 2,
            _ => h,
        }
    }

    /// Smallest valid stride for an image of the given width
    pub fn min_stride(&self, width: u32) -> usize {
        width as usize * self.bytes_per_pixel()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RawLayout::Bgra => "BGRA",
            RawLayout::Bgr => "BGR",
            RawLayout::Gray => "GRAY",
            RawLayout::Nv21 => "NV21",
        }
    }
}

/// Who allocated the pixel buffer behind an image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageOrigin {
    /// Source buffer supplied by the caller
    Caller,
    /// Buffer produced by the library or the engine from another image
    Derived,
}

/// Image handle: dimensions, stride, layout and pixel bytes
#[derive(Debug, Clone)]
pub struct Image<'a> {
    width: u32,
    height: u32,
    stride: usize,
    layout: RawLayout,
    origin: ImageOrigin,
    data: Cow<'a, [u8]>,
}

impl<'a> Image<'a> {
    /// Wrap a caller-owned raw buffer without copying it
    pub fn from_raw(
        data: &'a [u8],
        width: u32,
        height: u32,
        stride: usize,
        layout: RawLayout,
    ) -> Result<Self> {
        validate(data.len(), width, height, stride, layout)?;
        Ok(Self {
            width,
            height,
            stride,
            layout,
            origin: ImageOrigin::Caller,
            data: Cow::Borrowed(data),
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Bytes per buffer row
    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn layout(&self) -> RawLayout {
        self.layout
    }

    pub fn origin(&self) -> ImageOrigin {
        self.origin
    }

    /// Raw pixel bytes, including row padding
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Whether the pixels are borrowed from a caller buffer
    pub fn is_borrowed(&self) -> bool {
        matches!(self.data, Cow::Borrowed(_))
    }

    /// Pixel bytes of buffer row `index`, without padding.
    ///
    /// For NV21 rows `height..` address the chroma plane.
    pub fn buffer_row(&self, index: usize) -> &[u8] {
        let start = index * self.stride;
        let len = self.layout.min_stride(self.width);
        &self.data[start..start + len]
    }

    /// Copy the pixels so the image can outlive the buffer it was created from
    pub fn to_owned_image(&self) -> Image<'static> {
        Image {
            width: self.width,
            height: self.height,
            stride: self.stride,
            layout: self.layout,
            origin: self.origin,
            data: Cow::Owned(self.data.to_vec()),
        }
    }

    /// Take ownership of the pixels, copying only if they were borrowed
    pub fn into_owned(self) -> Image<'static> {
        Image {
            width: self.width,
            height: self.height,
            stride: self.stride,
            layout: self.layout,
            origin: self.origin,
            data: Cow::Owned(self.data.into_owned()),
        }
    }

    /// Convert into an RGBA buffer suitable for display or saving
    pub fn to_rgba_image(&self) -> RgbaImage {
        let mut out = RgbaImage::new(self.width, self.height);

        for y in 0..self.height {
            let row = self.buffer_row(y as usize);
            for x in 0..self.width {
                let i = x as usize;
                let pixel = match self.layout {
                    RawLayout::Bgra => {
                        let p = &row[i * 4..i * 4 + 4];
                        Rgba([p[2], p[1], p[0], p[3]])
                    }
                    RawLayout::Bgr => {
                        let p = &row[i * 3..i * 3 + 3];
                        Rgba([p[2], p[1], p[0], 255])
                    }
                    RawLayout::Gray => Rgba([row[i], row[i], row[i], 255]),
                    RawLayout::Nv21 => {
                        let chroma = self.buffer_row(self.height as usize + y as usize / 2);
                        let off = (i / 2) * 2;
                        yuv_to_rgba(row[i], chroma[off + 1], chroma[off])
                    }
                };
                out.put_pixel(x, y, pixel);
            }
        }

        out
    }
}

impl Image<'static> {
    /// Create an image that owns a caller-supplied buffer
    pub fn from_raw_owned(
        data: Vec<u8>,
        width: u32,
        height: u32,
        stride: usize,
        layout: RawLayout,
    ) -> Result<Self> {
        validate(data.len(), width, height, stride, layout)?;
        Ok(Self {
            width,
            height,
            stride,
            layout,
            origin: ImageOrigin::Caller,
            data: Cow::Owned(data),
        })
    }

    /// Create an image derived from another one (dewarp output, engine crops)
    pub fn derived(
        data: Vec<u8>,
        width: u32,
        height: u32,
        stride: usize,
        layout: RawLayout,
    ) -> Result<Self> {
        let mut image = Self::from_raw_owned(data, width, height, stride, layout)?;
        image.origin = ImageOrigin::Derived;
        Ok(image)
    }

    /// Decode an encoded image (PNG, JPEG, ...) held in memory
    pub fn from_encoded(bytes: &[u8]) -> Result<Self> {
        let decoded = image::load_from_memory(bytes)?;
        debug!("decoded {}x{} image from memory", decoded.width(), decoded.height());
        Self::from_dynamic(&decoded)
    }

    /// Read and decode an image file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| RecognizerError::io(path, e))?;
        Self::from_encoded(&bytes)
    }

    /// Convert a decoded image into the closest raw layout
    pub fn from_dynamic(decoded: &DynamicImage) -> Result<Self> {
        let (width, height) = (decoded.width(), decoded.height());
        let color = decoded.color();

        if color.has_alpha() && color.has_color() {
            let mut data = decoded.to_rgba8().into_raw();
            for px in data.chunks_exact_mut(4) {
                px.swap(0, 2);
            }
            Self::from_raw_owned(data, width, height, width as usize * 4, RawLayout::Bgra)
        } else if !color.has_color() {
            let data = decoded.to_luma8().into_raw();
            Self::from_raw_owned(data, width, height, width as usize, RawLayout::Gray)
        } else {
            let mut data = decoded.to_rgb8().into_raw();
            for px in data.chunks_exact_mut(3) {
                px.swap(0, 2);
            }
            Self::from_raw_owned(data, width, height, width as usize * 3, RawLayout::Bgr)
        }
    }
}

/// Check dimensions, stride and buffer length against the layout
fn validate(len: usize, width: u32, height: u32, stride: usize, layout: RawLayout) -> Result<()> {
    if width == 0 || height == 0 {
        return Err(RecognizerError::InvalidArgument(format!(
            "image dimensions must be non-zero, got {}x{}",
            width, height
        )));
    }

    let min_stride = layout.min_stride(width);
    if stride < min_stride {
        return Err(RecognizerError::InvalidArgument(format!(
            "stride {} is smaller than {} bytes required for {} {}px rows",
            stride,
            min_stride,
            layout.as_str(),
            width
        )));
    }

    if layout == RawLayout::Nv21 && (width % 2 != 0 || height % 2 != 0) {
        return Err(RecognizerError::InvalidArgument(format!(
            "NV21 images need even dimensions, got {}x{}",
            width, height
        )));
    }

    let rows = layout.buffer_rows(height);
    let required = stride
        .checked_mul(rows - 1)
        .and_then(|n| n.checked_add(min_stride))
        .ok_or_else(|| RecognizerError::InvalidArgument("buffer size overflow".to_string()))?;

    if len < required {
        return Err(RecognizerError::InvalidArgument(format!(
            "buffer holds {} bytes, {} required",
            len, required
        )));
    }

    Ok(())
}

/// BT.601 limited-range YUV to RGBA
fn yuv_to_rgba(y: u8, u: u8, v: u8) -> Rgba<u8> {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clamp = |x: i32| x.clamp(0, 255) as u8;
    Rgba([
        clamp((298 * c + 409 * e + 128) >> 8),
        clamp((298 * c - 100 * d - 208 * e + 128) >> 8),
        clamp((298 * c + 516 * d + 128) >> 8),
        255,
    ])
}
