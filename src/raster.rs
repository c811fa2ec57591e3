//! Raster Buffer
//!
//! `RasterImage` is the common currency between the pipeline, the
//! transforms and the comparison view. It wraps the `image` crate's packed
//! buffers so the `len == width * height * channels` invariant is upheld by
//! construction. Transforms never mutate an input in place; they return a
//! fresh `RasterImage`.

use image::{DynamicImage, GrayImage, RgbImage, RgbaImage};

/// Pixel layout of a raster buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb,
    Rgba,
}

impl PixelFormat {
    pub fn channel_count(self) -> usize {
        match self {
            PixelFormat::Rgb => 3,
            PixelFormat::Rgba => 4,
        }
    }

    pub fn has_alpha(self) -> bool {
        matches!(self, PixelFormat::Rgba)
    }
}

/// Owned 2-D pixel array in RGB or RGBA layout
#[derive(Debug, Clone, PartialEq)]
pub enum RasterImage {
    Rgb(RgbImage),
    Rgba(RgbaImage),
}

impl RasterImage {
    /// Build from raw interleaved bytes. Returns `None` when the buffer length
    /// does not match `width * height * channels`.
    pub fn from_raw(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Option<Self> {
        match format {
            PixelFormat::Rgb => RgbImage::from_raw(width, height, data).map(RasterImage::Rgb),
            PixelFormat::Rgba => RgbaImage::from_raw(width, height, data).map(RasterImage::Rgba),
        }
    }

    /// Convert any decoded image, keeping alpha only when the source has it
    pub fn from_dynamic(img: DynamicImage) -> Self {
        if img.color().has_alpha() {
            RasterImage::Rgba(img.into_rgba8())
        } else {
            RasterImage::Rgb(img.into_rgb8())
        }
    }

    pub fn width(&self) -> u32 {
        match self {
            RasterImage::Rgb(img) => img.width(),
            RasterImage::Rgba(img) => img.width(),
        }
    }

    pub fn height(&self) -> u32 {
        match self {
            RasterImage::Rgb(img) => img.height(),
            RasterImage::Rgba(img) => img.height(),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width(), self.height())
    }

    pub fn format(&self) -> PixelFormat {
        match self {
            RasterImage::Rgb(_) => PixelFormat::Rgb,
            RasterImage::Rgba(_) => PixelFormat::Rgba,
        }
    }

    pub fn has_alpha(&self) -> bool {
        self.format().has_alpha()
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            RasterImage::Rgb(img) => img.as_raw(),
            RasterImage::Rgba(img) => img.as_raw(),
        }
    }

    /// RGBA copy; RGB sources become fully opaque
    pub fn to_rgba8(&self) -> RgbaImage {
        match self {
            RasterImage::Rgb(img) => DynamicImage::ImageRgb8(img.clone()).into_rgba8(),
            RasterImage::Rgba(img) => img.clone(),
        }
    }

    /// RGB copy with alpha discarded (not composited)
    pub fn to_rgb8(&self) -> RgbImage {
        match self {
            RasterImage::Rgb(img) => img.clone(),
            RasterImage::Rgba(img) => DynamicImage::ImageRgba8(img.clone()).into_rgb8(),
        }
    }

    /// Alpha channel as a grayscale plane, if present
    pub fn alpha_channel(&self) -> Option<GrayImage> {
        match self {
            RasterImage::Rgb(_) => None,
            RasterImage::Rgba(img) => Some(GrayImage::from_fn(img.width(), img.height(), |x, y| {
                image::Luma([img.get_pixel(x, y)[3]])
            })),
        }
    }

    pub fn to_dynamic(&self) -> DynamicImage {
        match self {
            RasterImage::Rgb(img) => DynamicImage::ImageRgb8(img.clone()),
            RasterImage::Rgba(img) => DynamicImage::ImageRgba8(img.clone()),
        }
    }
}

impl From<RgbaImage> for RasterImage {
    fn from(img: RgbaImage) -> Self {
        RasterImage::Rgba(img)
    }
}

impl From<RgbImage> for RasterImage {
    fn from(img: RgbImage) -> Self {
        RasterImage::Rgb(img)
    }
}

/// Attach `alpha` to `rgb`. Both planes must share dimensions.
pub fn attach_alpha(rgb: &RgbImage, alpha: &GrayImage) -> Option<RgbaImage> {
    if rgb.dimensions() != alpha.dimensions() {
        return None;
    }
    Some(RgbaImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let p = rgb.get_pixel(x, y);
        image::Rgba([p[0], p[1], p[2], alpha.get_pixel(x, y)[0]])
    }))
}
