//! Barrel distortion correction applied to frames before recognition
//!
//! The correction uses the Brown-Conrady radial-tangential model expressed in
//! pixel units about the image centre: every output pixel is scaled back by
//! `scale`, pushed through the distortion polynomial and bilinearly sampled
//! from the input.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{RecognizerError, Result};
use crate::raw_image::{Image, RawLayout};

/// Largest output side a dewarper may produce beyond the input's own size
const MAX_OUTPUT_SIDE: u32 = 16_384;

/// Neutral chroma; zero U/V would decode as saturated green
const NEUTRAL_CHROMA: f64 = 128.0;

/// Lens coefficients of a barrel dewarper
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DewarpCoefficients {
    /// Radial coefficient on r^2
    pub k1: f32,
    /// Radial coefficient on r^4
    pub k2: f32,
    /// Tangential coefficient p1
    pub p1: f32,
    /// Tangential coefficient p2
    pub p2: f32,
    /// Radial coefficient on r^6
    pub k3: f32,
    /// Output scale relative to the input size
    pub scale: f32,
}

impl DewarpCoefficients {
    /// No distortion correction
    pub const IDENTITY: Self = Self {
        k1: 0.0,
        k2: 0.0,
        p1: 0.0,
        p2: 0.0,
        k3: 0.0,
        scale: 1.0,
    };

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }
}

impl Default for DewarpCoefficients {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Stateless barrel dewarper configured once with fixed coefficients
#[derive(Debug, Clone)]
pub struct BarrelDewarper {
    coefficients: DewarpCoefficients,
}

impl BarrelDewarper {
    pub fn new(k1: f32, k2: f32, p1: f32, p2: f32, k3: f32, scale: f32) -> Result<Self> {
        Self::from_coefficients(DewarpCoefficients { k1, k2, p1, p2, k3, scale })
    }

    pub fn from_coefficients(coefficients: DewarpCoefficients) -> Result<Self> {
        let c = coefficients;
        if ![c.k1, c.k2, c.p1, c.p2, c.k3, c.scale].iter().all(|v| v.is_finite()) {
            return Err(RecognizerError::InvalidArgument(
                "dewarp coefficients must be finite".to_string(),
            ));
        }
        if c.scale <= 0.0 {
            return Err(RecognizerError::InvalidArgument(format!(
                "dewarp scale must be positive, got {}",
                c.scale
            )));
        }
        Ok(Self { coefficients })
    }

    /// Dewarper that leaves images untouched
    pub fn identity() -> Self {
        Self {
            coefficients: DewarpCoefficients::IDENTITY,
        }
    }

    pub fn coefficients(&self) -> DewarpCoefficients {
        self.coefficients
    }

    /// Dimensions of the image produced for an input of the given size.
    ///
    /// Fails when the scale would grow a side past both the input and
    /// [`MAX_OUTPUT_SIDE`].
    pub fn output_size(&self, width: u32, height: u32, layout: RawLayout) -> Result<(u32, u32)> {
        if self.coefficients.is_identity() {
            return Ok((width, height));
        }
        let scale = self.coefficients.scale as f64;
        let side = |dim: u32| -> Result<u32> {
            let scaled = (dim as f64 * scale).round();
            if scaled > MAX_OUTPUT_SIDE.max(dim) as f64 {
                return Err(RecognizerError::InvalidArgument(format!(
                    "dewarp scale {} turns a side of {} into {}",
                    scale, dim, scaled
                )));
            }
            Ok((scaled as u32).max(1))
        };
        let mut w = side(width)?;
        let mut h = side(height)?;
        if layout == RawLayout::Nv21 {
            w = (w & !1).max(2);
            h = (h & !1).max(2);
        }
        Ok((w, h))
    }

    /// Produce a corrected copy of `input`; the input is never modified
    pub fn dewarp(&self, input: &Image<'_>) -> Result<Image<'static>> {
        let layout = input.layout();
        let (out_w, out_h) = self.output_size(input.width(), input.height(), layout)?;
        let out_stride = layout.min_stride(out_w);
        let len = out_stride
            .checked_mul(layout.buffer_rows(out_h))
            .ok_or_else(|| {
                RecognizerError::InvalidArgument(format!(
                    "dewarp output {}x{} is too large",
                    out_w, out_h
                ))
            })?;
        let mut out = vec![0u8; len];

        trace!(
            "dewarping {}x{} {} frame into {}x{}",
            input.width(),
            input.height(),
            layout.as_str(),
            out_w,
            out_h
        );

        if self.coefficients.is_identity() {
            for row in 0..layout.buffer_rows(out_h) {
                out[row * out_stride..(row + 1) * out_stride]
                    .copy_from_slice(input.buffer_row(row));
            }
            return Image::derived(out, out_w, out_h, out_stride, layout);
        }

        let mapping = Mapping {
            coefficients: self.coefficients,
            in_center: (input.width() as f64 / 2.0, input.height() as f64 / 2.0),
            out_center: (out_w as f64 / 2.0, out_h as f64 / 2.0),
        };

        let bpp = layout.bytes_per_pixel();
        let luma = Plane {
            data: input.bytes(),
            width: input.width() as usize,
            height: input.height() as usize,
            stride: input.stride(),
            bpp,
            fill: 0.0,
        };

        for yo in 0..out_h as usize {
            let row = &mut out[yo * out_stride..(yo + 1) * out_stride];
            for xo in 0..out_w as usize {
                let (sx, sy) = mapping.source_position(xo as f64, yo as f64);
                luma.sample_into(sx, sy, &mut row[xo * bpp..(xo + 1) * bpp]);
            }
        }

        if layout == RawLayout::Nv21 {
            let chroma_offset = input.height() as usize * input.stride();
            let chroma = Plane {
                data: &input.bytes()[chroma_offset..],
                width: input.width() as usize / 2,
                height: input.height() as usize / 2,
                stride: input.stride(),
                bpp: 2,
                fill: NEUTRAL_CHROMA,
            };
            let out_chroma = out_h as usize * out_stride;
            for by in 0..out_h as usize / 2 {
                let start = out_chroma + by * out_stride;
                let row = &mut out[start..start + out_stride];
                for bx in 0..out_w as usize / 2 {
                    // centre of the 2x2 luma block covered by this chroma sample
                    let (sx, sy) =
                        mapping.source_position(2.0 * bx as f64 + 0.5, 2.0 * by as f64 + 0.5);
                    chroma.sample_into((sx - 0.5) / 2.0, (sy - 0.5) / 2.0, &mut row[bx * 2..bx * 2 + 2]);
                }
            }
        }

        Image::derived(out, out_w, out_h, out_stride, layout)
    }
}

/// Output-to-input pixel mapping for one image size
struct Mapping {
    coefficients: DewarpCoefficients,
    in_center: (f64, f64),
    out_center: (f64, f64),
}

impl Mapping {
    /// Input position (pixel index coordinates) sampled for output pixel `(xo, yo)`
    fn source_position(&self, xo: f64, yo: f64) -> (f64, f64) {
        let c = &self.coefficients;
        let scale = c.scale as f64;
        let x = (xo + 0.5 - self.out_center.0) / scale;
        let y = (yo + 0.5 - self.out_center.1) / scale;

        let (k1, k2, k3) = (c.k1 as f64, c.k2 as f64, c.k3 as f64);
        let (p1, p2) = (c.p1 as f64, c.p2 as f64);
        let r2 = x * x + y * y;
        let radial = 1.0 + k1 * r2 + k2 * r2 * r2 + k3 * r2 * r2 * r2;
        let xd = x * radial + 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x);
        let yd = y * radial + p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y;

        (self.in_center.0 + xd - 0.5, self.in_center.1 + yd - 0.5)
    }
}

/// Interleaved 8-bit plane
struct Plane<'a> {
    data: &'a [u8],
    width: usize,
    height: usize,
    stride: usize,
    bpp: usize,
    /// Value read for positions outside the plane
    fill: f64,
}

impl Plane<'_> {
    #[inline]
    fn get(&self, x: i64, y: i64, channel: usize) -> f64 {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return self.fill;
        }
        self.data[y as usize * self.stride + x as usize * self.bpp + channel] as f64
    }

    /// Bilinear sample of every channel at `(x, y)`; outside pixels read as `fill`
    fn sample_into(&self, x: f64, y: f64, dst: &mut [u8]) {
        let x0 = x.floor();
        let y0 = y.floor();
        let fx = x - x0;
        let fy = y - y0;
        let (x0, y0) = (x0 as i64, y0 as i64);

        for (channel, out) in dst.iter_mut().enumerate() {
            let p00 = self.get(x0, y0, channel);
            let p10 = self.get(x0 + 1, y0, channel);
            let p01 = self.get(x0, y0 + 1, channel);
            let p11 = self.get(x0 + 1, y0 + 1, channel);

            let a = p00 + fx * (p10 - p00);
            let b = p01 + fx * (p11 - p01);
            *out = (a + fy * (b - a)).round().clamp(0.0, 255.0) as u8;
        }
    }
}
