//! Compositor
//!
//! "Over" blending of a transparent cutout onto a flat colour, and the
//! lossy alpha drop used when a save target cannot store transparency.

use image::{RgbImage, RgbaImage};
use palette::Srgb;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::FluxisError;
use crate::raster::RasterImage;

/// Solid background colour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackgroundColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl BackgroundColor {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl FromStr for BackgroundColor {
    type Err = FluxisError;

    /// Accepts `#rrggbb`, `rrggbb` or the short `#rgb` form
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rgb: Srgb<u8> = s
            .trim()
            .parse()
            .map_err(|e| FluxisError::InvalidParameter(format!("bad colour '{}': {}", s, e)))?;
        Ok(Self::new(rgb.red, rgb.green, rgb.blue))
    }
}

impl fmt::Display for BackgroundColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[inline]
fn blend_channel(fg: u8, bg: u8, alpha: u8) -> u8 {
    let a = alpha as u32;
    ((fg as u32 * a + bg as u32 * (255 - a) + 127) / 255) as u8
}

/// Blend `fg` over an opaque canvas of `color`: `out = fg * a + bg * (1 - a)`
pub fn composite_over_color(fg: &RgbaImage, color: BackgroundColor) -> RgbImage {
    let (width, height) = fg.dimensions();
    let mut out = RgbImage::new(width, height);
    let bg = [color.r, color.g, color.b];

    out.par_chunks_mut(3)
        .zip(fg.par_chunks(4))
        .for_each(|(dst, src)| {
            let alpha = src[3];
            for c in 0..3 {
                dst[c] = blend_channel(src[c], bg[c], alpha);
            }
        });

    out
}

/// Composite any raster over `color`. RGB sources are already opaque and
/// come back unchanged.
pub fn composite_raster(img: &RasterImage, color: BackgroundColor) -> RasterImage {
    match img {
        RasterImage::Rgb(rgb) => RasterImage::Rgb(rgb.clone()),
        RasterImage::Rgba(rgba) => RasterImage::Rgb(composite_over_color(rgba, color)),
    }
}

/// Drop alpha entirely. Lossy; only used on a save-time copy.
pub fn flatten_for_opaque_format(img: &RasterImage) -> RgbImage {
    img.to_rgb8()
}
