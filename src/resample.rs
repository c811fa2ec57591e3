//! Alpha-Preserving Resampler
//!
//! Two paths:
//! - display fit: every channel resampled together with Lanczos3, aspect
//!   ratio preserved, degenerate targets yield `None`
//! - model upscale: colour goes through a `SuperResolution` engine, alpha is
//!   resampled on its own to the engine's output size and reattached

use image::{imageops, imageops::FilterType, GrayImage};
use log::debug;

use crate::error::UpscaleError;
use crate::raster::{attach_alpha, RasterImage};
use crate::upscale::{image_to_tensor, tensor_to_image, SuperResolution};

const FILTER: FilterType = FilterType::Lanczos3;

/// Target size that fits `(width, height)` inside the viewport while keeping
/// aspect ratio. `None` when either side truncates to zero.
pub fn fit_dimensions(
    width: u32,
    height: u32,
    viewport_width: u32,
    viewport_height: u32,
) -> Option<(u32, u32)> {
    if width == 0 || height == 0 {
        return None;
    }

    let ratio = (viewport_width as f64 / width as f64).min(viewport_height as f64 / height as f64);
    let new_width = (width as f64 * ratio) as u32;
    let new_height = (height as f64 * ratio) as u32;

    if new_width == 0 || new_height == 0 {
        None
    } else {
        Some((new_width, new_height))
    }
}

/// Resample all channels together to exactly `width` x `height`
pub fn resample(img: &RasterImage, width: u32, height: u32) -> Option<RasterImage> {
    if width == 0 || height == 0 || img.width() == 0 || img.height() == 0 {
        return None;
    }
    if img.dimensions() == (width, height) {
        return Some(img.clone());
    }

    Some(match img {
        RasterImage::Rgb(rgb) => RasterImage::Rgb(imageops::resize(rgb, width, height, FILTER)),
        RasterImage::Rgba(rgba) => RasterImage::Rgba(imageops::resize(rgba, width, height, FILTER)),
    })
}

/// Scale to fit the viewport, preserving aspect ratio
pub fn fit_to_viewport(
    img: &RasterImage,
    viewport_width: u32,
    viewport_height: u32,
) -> Option<RasterImage> {
    let (width, height) =
        fit_dimensions(img.width(), img.height(), viewport_width, viewport_height)?;
    debug!(
        "Display fit {}x{} -> {}x{} for viewport {}x{}",
        img.width(),
        img.height(),
        width,
        height,
        viewport_width,
        viewport_height
    );
    resample(img, width, height)
}

/// Resample a standalone alpha plane
pub fn resample_alpha(alpha: &GrayImage, width: u32, height: u32) -> GrayImage {
    if alpha.dimensions() == (width, height) {
        return alpha.clone();
    }
    imageops::resize(alpha, width, height, FILTER)
}

/// Run the colour channels through `engine` and carry alpha across separately.
///
/// The engine decides the output geometry; alpha is resampled to whatever
/// size it produced so the planes always line up.
pub fn upscale_preserving_alpha(
    img: &RasterImage,
    engine: &dyn SuperResolution,
) -> Result<RasterImage, UpscaleError> {
    let rgb = img.to_rgb8();
    let output = engine.upscale2x(&image_to_tensor(&rgb))?;
    let upscaled_rgb = tensor_to_image(&output)?;
    let (width, height) = upscaled_rgb.dimensions();

    match img.alpha_channel() {
        None => Ok(RasterImage::Rgb(upscaled_rgb)),
        Some(alpha) => {
            let upscaled_alpha = resample_alpha(&alpha, width, height);
            debug!(
                "Reattaching alpha {}x{} -> {}x{}",
                alpha.width(),
                alpha.height(),
                width,
                height
            );
            attach_alpha(&upscaled_rgb, &upscaled_alpha)
                .map(RasterImage::Rgba)
                .ok_or_else(|| {
                    UpscaleError::RuntimeFailure("alpha plane size mismatch".to_string())
                })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upscale::{LanczosUpscaler, RgbTensor};
    use image::{Luma, Rgba, RgbaImage};

    #[test]
    fn test_fit_dimensions_preserves_aspect() {
        assert_eq!(fit_dimensions(400, 200, 800, 600), Some((800, 400)));
        assert_eq!(fit_dimensions(100, 300, 800, 600), Some((200, 600)));
        assert_eq!(fit_dimensions(800, 600, 800, 600), Some((800, 600)));
    }

    #[test]
    fn test_fit_dimensions_degenerate() {
        assert_eq!(fit_dimensions(1000, 1, 10, 10), None);
        assert_eq!(fit_dimensions(10, 10, 0, 600), None);
        assert_eq!(fit_dimensions(0, 10, 800, 600), None);
    }

    #[test]
    fn test_resample_zero_target_is_none() {
        let img = RasterImage::from(RgbaImage::new(4, 4));
        assert!(resample(&img, 0, 4).is_none());
        assert!(fit_to_viewport(&img, 0, 0).is_none());
    }

    #[test]
    fn test_opaque_alpha_stays_opaque() {
        let alpha = GrayImage::from_pixel(7, 5, Luma([255]));
        for (w, h) in [(1, 1), (3, 2), (14, 10), (31, 17)] {
            let out = resample_alpha(&alpha, w, h);
            assert_eq!(out.dimensions(), (w, h));
            assert!(out.pixels().all(|p| p[0] == 255), "opaque lost at {}x{}", w, h);
        }
    }

    #[test]
    fn test_transparent_alpha_stays_transparent() {
        let alpha = GrayImage::from_pixel(7, 5, Luma([0]));
        for (w, h) in [(1, 1), (3, 2), (14, 10), (31, 17)] {
            let out = resample_alpha(&alpha, w, h);
            assert!(out.pixels().all(|p| p[0] == 0));
        }
    }

    #[test]
    fn test_upscale_reattaches_alpha() {
        let mut img = RgbaImage::from_pixel(4, 4, Rgba([10, 200, 30, 255]));
        for y in 0..4 {
            img.put_pixel(0, y, Rgba([10, 200, 30, 0]));
        }
        let out = upscale_preserving_alpha(&RasterImage::from(img), &LanczosUpscaler).unwrap();
        assert_eq!(out.dimensions(), (8, 8));
        assert!(out.has_alpha());
        let alpha = out.alpha_channel().unwrap();
        assert_eq!(alpha.get_pixel(7, 4)[0], 255);
    }

    #[test]
    fn test_upscale_rgb_source_has_no_alpha() {
        let img = RasterImage::from(image::RgbImage::new(3, 3));
        let out = upscale_preserving_alpha(&img, &LanczosUpscaler).unwrap();
        assert!(!out.has_alpha());
        assert_eq!(out.dimensions(), (6, 6));
    }

    /// Engine whose output size is not exactly 2x
    struct OddEngine;

    impl SuperResolution for OddEngine {
        fn upscale2x(&self, input: &RgbTensor) -> Result<RgbTensor, UpscaleError> {
            let (_, h, w) = input.dim();
            Ok(RgbTensor::from_elem((3, h * 2 + 1, w * 2 - 1), 0.5))
        }
    }

    #[test]
    fn test_alpha_follows_engine_geometry() {
        let img = RasterImage::from(RgbaImage::from_pixel(4, 3, Rgba([0, 0, 0, 255])));
        let out = upscale_preserving_alpha(&img, &OddEngine).unwrap();
        assert_eq!(out.dimensions(), (7, 7));
        assert!(out.alpha_channel().unwrap().pixels().all(|p| p[0] == 255));
    }
}
