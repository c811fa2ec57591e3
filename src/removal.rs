//! Background removal engine seam.
//!
//! `BackgroundRemover` is the boundary to whatever segmentation engine is
//! available. `EdgeFloodRemover` is the built-in engine: it samples the
//! canvas border for dominant background colours, flood-fills matching
//! pixels inward from the edges, and optionally refines the cut with a
//! trimap-based alpha matte.

use image::{GrayImage, Luma, RgbaImage, Rgba};
use imageproc::distance_transform::Norm;
use imageproc::filter::gaussian_blur_f32;
use imageproc::morphology::erode;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

use crate::error::{FluxisError, RemovalError};

// ============================================================================
// SETTINGS
// ============================================================================

pub const DEFAULT_FOREGROUND_THRESHOLD: u8 = 240;
pub const DEFAULT_BACKGROUND_THRESHOLD: u8 = 10;
pub const DEFAULT_ERODE_SIZE: u8 = 10;
pub const MAX_ERODE_SIZE: u8 = 50;

/// Options handed to the removal engine
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RemovalConfig {
    /// Soften the binary cut into graded alpha along edges
    pub alpha_matting: bool,
    /// Soft-mask value at or above which a pixel is certain foreground (default: 240)
    pub foreground_threshold: u8,
    /// Soft-mask value at or below which a pixel is certain background (default: 10)
    pub background_threshold: u8,
    /// Erosion radius applied to both certain regions, 0-50 (default: 10)
    pub erode_size: u8,
}

impl Default for RemovalConfig {
    fn default() -> Self {
        Self {
            alpha_matting: false,
            foreground_threshold: DEFAULT_FOREGROUND_THRESHOLD,
            background_threshold: DEFAULT_BACKGROUND_THRESHOLD,
            erode_size: DEFAULT_ERODE_SIZE,
        }
    }
}

impl RemovalConfig {
    /// Configuration actually sent to the engine. Threshold values only
    /// matter with matting enabled, so they are replaced by the defaults
    /// otherwise.
    pub fn effective(&self) -> RemovalConfig {
        if self.alpha_matting {
            RemovalConfig {
                erode_size: self.erode_size.min(MAX_ERODE_SIZE),
                ..*self
            }
        } else {
            RemovalConfig::default()
        }
    }

    pub fn validate(&self) -> Result<(), FluxisError> {
        if self.erode_size > MAX_ERODE_SIZE {
            return Err(FluxisError::InvalidParameter(format!(
                "erode size {} exceeds {}",
                self.erode_size, MAX_ERODE_SIZE
            )));
        }
        Ok(())
    }
}

/// External background-removal engine
pub trait BackgroundRemover {
    /// Returns an RGBA cutout the same size as `image`
    fn remove(&self, image: &RgbaImage, config: &RemovalConfig) -> Result<RgbaImage, RemovalError>;
}

// ============================================================================
// EDGE FLOOD ENGINE
// ============================================================================

/// Border-seeded flood fill over background-coloured pixels
#[derive(Debug, Clone)]
pub struct EdgeFloodRemover {
    /// Manhattan RGB distance accepted as background in the interior
    pub tolerance: u16,
    /// Looser distance used inside the border zone
    pub edge_tolerance: u16,
    /// Width of the border strip sampled for background colours
    pub sample_width: u32,
    /// Number of dominant border colours treated as background
    pub max_colors: usize,
    /// Blur radius used to build the soft mask for matting
    pub matte_sigma: f32,
}

impl Default for EdgeFloodRemover {
    fn default() -> Self {
        Self {
            tolerance: 30,
            edge_tolerance: 45,
            sample_width: 5,
            max_colors: 3,
            matte_sigma: 2.0,
        }
    }
}

/// Sample RGB colours from the canvas border, skipping transparent pixels
fn sample_edge_colors(img: &RgbaImage, sample_width: u32) -> Vec<[u8; 3]> {
    let (width, height) = img.dimensions();
    let band = sample_width.max(1);

    img.enumerate_pixels()
        .filter(|(x, y, p)| {
            p[3] > 0
                && (*x < band || *y < band || *x + band >= width || *y + band >= height)
        })
        .map(|(_, _, p)| [p[0], p[1], p[2]])
        .collect()
}

/// Most common border colours, bucketed in 16-level steps and averaged per bucket
fn find_background_colors(edge_colors: &[[u8; 3]], max_colors: usize) -> Vec<[u8; 3]> {
    let mut buckets: HashMap<[u8; 3], ([u64; 3], u64)> = HashMap::new();
    for color in edge_colors {
        let key = [color[0] / 16, color[1] / 16, color[2] / 16];
        let entry = buckets.entry(key).or_insert(([0; 3], 0));
        for c in 0..3 {
            entry.0[c] += color[c] as u64;
        }
        entry.1 += 1;
    }

    let mut counts: Vec<_> = buckets.into_values().collect();
    counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    counts
        .into_iter()
        .take(max_colors)
        .map(|(sum, n)| [(sum[0] / n) as u8, (sum[1] / n) as u8, (sum[2] / n) as u8])
        .collect()
}

/// RGB colour distance (sum of absolute differences)
fn rgb_color_distance(c1: &[u8; 3], c2: &[u8; 3]) -> u16 {
    c1.iter().zip(c2).map(|(a, b)| (*a as i16 - *b as i16).unsigned_abs()).sum()
}

impl EdgeFloodRemover {
    /// Hard foreground mask: 255 keeps a pixel, 0 removes it
    fn foreground_mask(&self, img: &RgbaImage) -> GrayImage {
        let (width, height) = img.dimensions();
        let edge_colors = sample_edge_colors(img, self.sample_width);
        let bg_colors = find_background_colors(&edge_colors, self.max_colors);
        debug!("Background colours sampled from border: {:?}", bg_colors);

        let edge_zone = self.sample_width.max(1) * 2;
        let is_candidate = |x: u32, y: u32| {
            let p = img.get_pixel(x, y);
            if p[3] == 0 {
                return true;
            }
            let in_edge_zone =
                x < edge_zone || y < edge_zone || x + edge_zone >= width || y + edge_zone >= height;
            let threshold = if in_edge_zone { self.edge_tolerance } else { self.tolerance };
            let rgb = [p[0], p[1], p[2]];
            bg_colors.iter().any(|bg| rgb_color_distance(&rgb, bg) <= threshold)
        };

        // BFS from border candidates, 4-connected
        let idx = |x: u32, y: u32| (y * width + x) as usize;
        let mut background = vec![false; (width * height) as usize];
        let mut queue = VecDeque::new();

        for y in 0..height {
            for x in 0..width {
                let on_border = x == 0 || y == 0 || x == width - 1 || y == height - 1;
                if on_border && is_candidate(x, y) {
                    background[idx(x, y)] = true;
                    queue.push_back((x, y));
                }
            }
        }

        while let Some((x, y)) = queue.pop_front() {
            let neighbors = [
                (x.wrapping_sub(1), y),
                (x + 1, y),
                (x, y.wrapping_sub(1)),
                (x, y + 1),
            ];
            for (nx, ny) in neighbors {
                if nx < width && ny < height && !background[idx(nx, ny)] && is_candidate(nx, ny) {
                    background[idx(nx, ny)] = true;
                    queue.push_back((nx, ny));
                }
            }
        }

        GrayImage::from_fn(width, height, |x, y| {
            Luma([if background[idx(x, y)] { 0 } else { 255 }])
        })
    }

    /// Trimap matte: eroded certain-foreground and certain-background regions
    /// keep hard values, the band between them takes the blurred mask
    fn matte(&self, hard: &GrayImage, config: &RemovalConfig) -> GrayImage {
        let soft = gaussian_blur_f32(hard, self.matte_sigma);

        let sure_fg = GrayImage::from_fn(soft.width(), soft.height(), |x, y| {
            Luma([if soft.get_pixel(x, y)[0] >= config.foreground_threshold { 255 } else { 0 }])
        });
        let sure_bg = GrayImage::from_fn(soft.width(), soft.height(), |x, y| {
            Luma([if soft.get_pixel(x, y)[0] <= config.background_threshold { 255 } else { 0 }])
        });

        let sure_fg = erode(&sure_fg, Norm::LInf, config.erode_size);
        let sure_bg = erode(&sure_bg, Norm::LInf, config.erode_size);

        GrayImage::from_fn(soft.width(), soft.height(), |x, y| {
            if sure_fg.get_pixel(x, y)[0] > 0 {
                Luma([255])
            } else if sure_bg.get_pixel(x, y)[0] > 0 {
                Luma([0])
            } else {
                *soft.get_pixel(x, y)
            }
        })
    }
}

impl BackgroundRemover for EdgeFloodRemover {
    fn remove(&self, image: &RgbaImage, config: &RemovalConfig) -> Result<RgbaImage, RemovalError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(RemovalError("image has no pixels".to_string()));
        }

        let hard = self.foreground_mask(image);
        let mask = if config.alpha_matting {
            self.matte(&hard, config)
        } else {
            hard
        };

        Ok(RgbaImage::from_fn(width, height, |x, y| {
            let p = image.get_pixel(x, y);
            let m = mask.get_pixel(x, y)[0] as u16;
            Rgba([p[0], p[1], p[2], ((p[3] as u16 * m + 127) / 255) as u8])
        }))
    }
}

// ============================================================================
// TESTS
// ============================================================================
