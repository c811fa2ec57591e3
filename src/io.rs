//! File I/O for source images and the final output raster

use image::ImageFormat;
use std::path::Path;

use crate::error::{LoadError, SaveError};
use crate::raster::RasterImage;

/// Open and decode an image, converted to RGBA
pub fn load_image(path: &Path) -> Result<RasterImage, LoadError> {
    let img = image::open(path).map_err(|e| LoadError {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    Ok(RasterImage::Rgba(img.into_rgba8()))
}

/// Output format for a destination path; PNG when there is no extension
pub fn output_format(path: &Path) -> Result<ImageFormat, SaveError> {
    let format = match path.extension() {
        None => ImageFormat::Png,
        Some(ext) => ImageFormat::from_extension(ext)
            .ok_or_else(|| SaveError::UnsupportedFormat(ext.to_string_lossy().into_owned()))?,
    };

    if !format.writing_enabled() {
        return Err(SaveError::UnsupportedFormat(format!("{:?}", format)));
    }
    Ok(format)
}

/// Whether the container can store an alpha channel
pub fn format_supports_alpha(format: ImageFormat) -> bool {
    !matches!(format, ImageFormat::Jpeg | ImageFormat::Pnm)
}

/// Write `img` as-is. Callers strip alpha first for opaque formats.
pub fn write_image(img: &RasterImage, path: &Path, format: ImageFormat) -> Result<(), SaveError> {
    let unwritable = |reason: String| SaveError::Unwritable {
        path: path.display().to_string(),
        reason,
    };

    // Ensure output directory exists
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| unwritable(e.to_string()))?;
    }

    img.to_dynamic()
        .save_with_format(path, format)
        .map_err(|e| match e {
            image::ImageError::Unsupported(u) => SaveError::UnsupportedFormat(u.to_string()),
            other => unwritable(other.to_string()),
        })
}

/// Default save name: `<stem>-processed.png`
pub fn suggested_output_name(input: Option<&Path>) -> String {
    input
        .and_then(|p| p.file_stem())
        .map(|stem| format!("{}-processed.png", stem.to_string_lossy()))
        .unwrap_or_else(|| "processed_image.png".to_string())
}
