//! Super-resolution engine seam.
//!
//! Engines see colour only: an `RgbTensor` laid out channel-first
//! (3 x height x width) with values in `[0, 1]`. Alpha handling lives in
//! `resample::upscale_preserving_alpha`.

use image::{imageops, imageops::FilterType, ImageBuffer, Rgb, RgbImage};
use ndarray::Array3;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::UpscaleError;

/// Channel-first RGB tensor, values in [0, 1]
pub type RgbTensor = Array3<f32>;

/// External 2x super-resolution model
pub trait SuperResolution {
    fn upscale2x(&self, input: &RgbTensor) -> Result<RgbTensor, UpscaleError>;
}

/// Upscaling choice offered to the user
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum UpscaleMode {
    /// Leaves the working image untouched
    #[default]
    None,
    SuperResolution2x,
}

impl FromStr for UpscaleMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "off" => Ok(UpscaleMode::None),
            "2x" | "super_resolution2x" | "sr2x" => Ok(UpscaleMode::SuperResolution2x),
            other => Err(format!("unknown upscale mode '{}' (expected none or 2x)", other)),
        }
    }
}

/// Convert packed RGB8 to a channel-first float tensor
pub fn image_to_tensor(img: &RgbImage) -> RgbTensor {
    let (width, height) = img.dimensions();
    Array3::from_shape_fn((3, height as usize, width as usize), |(c, y, x)| {
        img.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
    })
}

/// Convert a channel-first float tensor back to RGB8, clamping to [0, 255]
pub fn tensor_to_image(tensor: &RgbTensor) -> Result<RgbImage, UpscaleError> {
    let (channels, height, width) = tensor.dim();
    if channels != 3 {
        return Err(UpscaleError::RuntimeFailure(format!(
            "expected 3 channels from engine, got {}",
            channels
        )));
    }
    if width == 0 || height == 0 {
        return Err(UpscaleError::RuntimeFailure("engine returned an empty tensor".to_string()));
    }

    Ok(RgbImage::from_fn(width as u32, height as u32, |x, y| {
        let px = |c: usize| {
            (tensor[[c, y as usize, x as usize]] * 255.0).round().clamp(0.0, 255.0) as u8
        };
        Rgb([px(0), px(1), px(2)])
    }))
}

/// Lanczos-based stand-in used when no learned model is wired up.
///
/// Produces the same output geometry as a 2x model so the alpha
/// reattachment path is exercised identically.
#[derive(Debug, Clone, Default)]
pub struct LanczosUpscaler;

impl SuperResolution for LanczosUpscaler {
    fn upscale2x(&self, input: &RgbTensor) -> Result<RgbTensor, UpscaleError> {
        let (channels, height, width) = input.dim();
        if channels != 3 || width == 0 || height == 0 {
            return Err(UpscaleError::RuntimeFailure(format!(
                "invalid input tensor shape {:?}",
                input.dim()
            )));
        }

        let plane: ImageBuffer<Rgb<f32>, Vec<f32>> =
            ImageBuffer::from_fn(width as u32, height as u32, |x, y| {
                Rgb([
                    input[[0, y as usize, x as usize]],
                    input[[1, y as usize, x as usize]],
                    input[[2, y as usize, x as usize]],
                ])
            });

        let (out_width, out_height) = (width as u32 * 2, height as u32 * 2);
        let resized = imageops::resize(&plane, out_width, out_height, FilterType::Lanczos3);

        Ok(Array3::from_shape_fn((3, height * 2, width * 2), |(c, y, x)| {
            resized.get_pixel(x as u32, y as u32)[c].clamp(0.0, 1.0)
        }))
    }
}
