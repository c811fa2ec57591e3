//! Comparison Renderer
//!
//! Before/after split view. The processed image fills the image footprint
//! left of the separator and the original fills the rest. All geometry is
//! derived from the viewport size, the separator position and the
//! display-fit copies this view owns.

use image::{imageops, Rgba, RgbaImage};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect;
use log::debug;
use std::sync::Arc;

use crate::raster::RasterImage;
use crate::resample::fit_to_viewport;

pub const CANVAS_COLOR: Rgba<u8> = Rgba([0, 0, 0, 255]);
pub const SEPARATOR_COLOR: Rgba<u8> = Rgba([255, 255, 255, 255]);
pub const SEPARATOR_WIDTH: u32 = 2;

// ============================================================================
// CROP GEOMETRY
// ============================================================================

/// Half-open column range `[start, end)` within a display-fit image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRange {
    pub start: u32,
    pub end: u32,
}

impl CropRange {
    pub fn width(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0
    }
}

/// Left edge of an image of `image_width` centred in the viewport
pub fn image_left_edge(viewport_width: u32, image_width: u32) -> f32 {
    (viewport_width as f32 - image_width as f32) / 2.0
}

/// Column of the display-fit image under the separator, clamped to `[0, image_width]`
pub fn split_column(separator_x: f32, left_edge: f32, image_width: u32) -> u32 {
    let offset = (separator_x - left_edge).floor();
    offset.clamp(0.0, image_width as f32) as u32
}

/// `(processed, original)` crops for a separator position. The two ranges
/// partition `[0, image_width)`.
pub fn crop_ranges(separator_x: f32, left_edge: f32, image_width: u32) -> (CropRange, CropRange) {
    let split = split_column(separator_x, left_edge, image_width);
    (
        CropRange { start: 0, end: split },
        CropRange { start: split, end: image_width },
    )
}

/// Clamp a pointer x to the displayed image footprint, or to the viewport
/// when nothing is displayed
pub fn clamp_separator(x: f32, viewport_width: u32, image_width: Option<u32>) -> f32 {
    match image_width {
        Some(w) => {
            let left = image_left_edge(viewport_width, w);
            x.clamp(left, left + w as f32)
        }
        None => x.clamp(0.0, viewport_width as f32),
    }
}

// ============================================================================
// DRAWABLE FRAME
// ============================================================================

/// Positioned image in viewport coordinates
#[derive(Debug, Clone)]
pub struct Sprite {
    pub x: i64,
    pub y: i64,
    pub image: RgbaImage,
}

/// Full-height vertical line centred on `x`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeparatorLine {
    pub x: f32,
    pub width: u32,
}

/// Everything needed to draw one comparison frame, back to front
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub sprites: Vec<Sprite>,
    pub separator: SeparatorLine,
}

impl Frame {
    /// Draw onto a black canvas of the viewport size. The separator is
    /// painted last so it is always on top.
    pub fn rasterize(&self) -> RgbaImage {
        let mut canvas = RgbaImage::from_pixel(self.width, self.height, CANVAS_COLOR);

        for sprite in &self.sprites {
            imageops::overlay(&mut canvas, &sprite.image, sprite.x, sprite.y);
        }

        if self.height > 0 && self.separator.width > 0 {
            let left = self.separator.x.round() as i32 - (self.separator.width / 2) as i32;
            draw_filled_rect_mut(
                &mut canvas,
                Rect::at(left, 0).of_size(self.separator.width, self.height),
                SEPARATOR_COLOR,
            );
        }

        canvas
    }
}

// ============================================================================
// VIEW STATE
// ============================================================================

/// Before/after comparison view.
///
/// Sources are shared read-only with the pipeline; the display-fit copies
/// are owned here and replaced wholesale whenever the sources or the
/// viewport change.
#[derive(Debug, Clone)]
pub struct ComparisonView {
    viewport_width: u32,
    viewport_height: u32,
    separator_x: f32,
    left: Option<Arc<RasterImage>>,
    right: Option<Arc<RasterImage>>,
    resized_left: Option<RgbaImage>,
    resized_right: Option<RgbaImage>,
}

impl ComparisonView {
    pub fn new(viewport_width: u32, viewport_height: u32) -> Self {
        Self {
            viewport_width,
            viewport_height,
            separator_x: viewport_width as f32 / 2.0,
            left: None,
            right: None,
            resized_left: None,
            resized_right: None,
        }
    }

    pub fn viewport(&self) -> (u32, u32) {
        (self.viewport_width, self.viewport_height)
    }

    pub fn separator_x(&self) -> f32 {
        self.separator_x
    }

    pub fn left(&self) -> Option<&Arc<RasterImage>> {
        self.left.as_ref()
    }

    pub fn right(&self) -> Option<&Arc<RasterImage>> {
        self.right.as_ref()
    }

    pub fn resized_left(&self) -> Option<&RgbaImage> {
        self.resized_left.as_ref()
    }

    pub fn resized_right(&self) -> Option<&RgbaImage> {
        self.resized_right.as_ref()
    }

    /// Install new sources, rebuild the display copies and recentre the separator
    pub fn set_images(&mut self, left: Arc<RasterImage>, right: Option<Arc<RasterImage>>) {
        self.left = Some(left);
        self.right = right;
        self.refit();
        self.separator_x = self.viewport_width as f32 / 2.0;
    }

    /// Drop all sources; only the separator remains
    pub fn clear(&mut self) {
        self.left = None;
        self.right = None;
        self.resized_left = None;
        self.resized_right = None;
        self.separator_x = self.viewport_width as f32 / 2.0;
    }

    /// Resize the viewport. The separator keeps its relative position across
    /// the image footprint (or across the viewport when nothing is shown).
    pub fn on_viewport_resize(&mut self, width: u32, height: u32) {
        let fraction = match self.displayed_width() {
            Some(w) => (self.separator_x - self.image_left_edge().unwrap_or(0.0)) / w as f32,
            None if self.viewport_width > 0 => self.separator_x / self.viewport_width as f32,
            None => 0.5,
        };

        self.viewport_width = width;
        self.viewport_height = height;
        self.refit();

        let x = match (self.displayed_width(), self.image_left_edge()) {
            (Some(w), Some(left)) => left + fraction * w as f32,
            _ => fraction * width as f32,
        };
        self.separator_x = clamp_separator(x, width, self.displayed_width());
        debug!("Viewport {}x{}, separator at {:.1}", width, height, self.separator_x);
    }

    pub fn on_pointer_down(&mut self, x: f32, _y: f32) {
        self.move_separator(x);
    }

    pub fn on_pointer_drag(&mut self, x: f32, _y: f32) {
        self.move_separator(x);
    }

    fn move_separator(&mut self, x: f32) {
        self.separator_x = clamp_separator(x, self.viewport_width, self.displayed_width());
    }

    fn refit(&mut self) {
        let (width, height) = (self.viewport_width, self.viewport_height);
        let fit = |src: &Option<Arc<RasterImage>>| {
            src.as_ref()
                .and_then(|img| fit_to_viewport(img, width, height))
                .map(|img| img.to_rgba8())
        };
        self.resized_left = fit(&self.left);
        self.resized_right = fit(&self.right);
    }

    /// Width of the display-fit original, which defines the image footprint
    pub fn displayed_width(&self) -> Option<u32> {
        self.resized_left.as_ref().map(|img| img.width())
    }

    pub fn image_left_edge(&self) -> Option<f32> {
        self.displayed_width().map(|w| image_left_edge(self.viewport_width, w))
    }

    /// Current `(processed, original)` crops, when both images are displayed
    pub fn crop_ranges(&self) -> Option<(CropRange, CropRange)> {
        match (&self.resized_left, &self.resized_right) {
            (Some(left), Some(_)) => Some(crop_ranges(
                self.separator_x,
                image_left_edge(self.viewport_width, left.width()),
                left.width(),
            )),
            _ => None,
        }
    }

    pub fn render(&self) -> Frame {
        let mut sprites = Vec::new();
        let vertical = |h: u32| (self.viewport_height as i64 - h as i64) / 2;

        match (&self.resized_left, &self.resized_right) {
            (Some(original), Some(processed)) => {
                let width = original.width();
                let left_edge = image_left_edge(self.viewport_width, width);
                let origin = left_edge.floor() as i64;
                let split = split_column(self.separator_x, left_edge, width);

                // Processed, left of the separator
                let end = split.min(processed.width());
                if end > 0 {
                    let crop =
                        imageops::crop_imm(processed, 0, 0, end, processed.height()).to_image();
                    sprites.push(Sprite {
                        x: origin,
                        y: vertical(processed.height()),
                        image: crop,
                    });
                }

                // Original, right of the separator
                if split < width {
                    let crop =
                        imageops::crop_imm(original, split, 0, width - split, original.height())
                            .to_image();
                    sprites.push(Sprite {
                        x: origin + split as i64,
                        y: vertical(original.height()),
                        image: crop,
                    });
                }
            }
            (Some(original), None) => {
                sprites.push(Sprite {
                    x: image_left_edge(self.viewport_width, original.width()).floor() as i64,
                    y: vertical(original.height()),
                    image: original.clone(),
                });
            }
            _ => {}
        }

        Frame {
            width: self.viewport_width,
            height: self.viewport_height,
            sprites,
            separator: SeparatorLine {
                x: self.separator_x,
                width: SEPARATOR_WIDTH,
            },
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn solid(width: u32, height: u32, color: [u8; 4]) -> Arc<RasterImage> {
        Arc::new(RasterImage::from(RgbaImage::from_pixel(width, height, Rgba(color))))
    }

    const RED: [u8; 4] = [255, 0, 0, 255];
    const BLUE: [u8; 4] = [0, 0, 255, 255];

    #[test]
    fn test_set_images_fits_and_centres() {
        let mut view = ComparisonView::new(800, 600);
        view.set_images(solid(400, 200, RED), Some(solid(400, 200, BLUE)));
        assert_eq!(view.resized_left().unwrap().dimensions(), (800, 400));
        assert_eq!(view.separator_x(), 400.0);
    }

    #[test]
    fn test_drag_clamps_to_image_footprint() {
        let mut view = ComparisonView::new(800, 600);
        view.set_images(solid(100, 300, RED), Some(solid(100, 300, BLUE)));
        // 200x600 image centred: footprint [300, 500]
        view.on_pointer_drag(10.0, 0.0);
        assert_eq!(view.separator_x(), 300.0);
        view.on_pointer_drag(790.0, 0.0);
        assert_eq!(view.separator_x(), 500.0);
        view.on_pointer_down(350.0, 0.0);
        assert_eq!(view.separator_x(), 350.0);
    }

    #[test]
    fn test_drag_without_image_clamps_to_viewport() {
        let mut view = ComparisonView::new(640, 480);
        view.on_pointer_drag(-20.0, 0.0);
        assert_eq!(view.separator_x(), 0.0);
        view.on_pointer_drag(900.0, 0.0);
        assert_eq!(view.separator_x(), 640.0);
    }

    #[test]
    fn test_render_split_colours() {
        let mut view = ComparisonView::new(10, 10);
        view.set_images(solid(10, 10, RED), Some(solid(10, 10, BLUE)));
        view.on_pointer_drag(3.0, 5.0);

        let (processed, original) = view.crop_ranges().unwrap();
        assert_eq!(processed, CropRange { start: 0, end: 3 });
        assert_eq!(original, CropRange { start: 3, end: 10 });

        let frame = view.render();
        assert_eq!(frame.sprites.len(), 2);
        let canvas = frame.rasterize();
        assert_eq!(*canvas.get_pixel(0, 5), Rgba(BLUE));
        assert_eq!(*canvas.get_pixel(9, 5), Rgba(RED));
        assert_eq!(*canvas.get_pixel(3, 0), SEPARATOR_COLOR);
        assert_eq!(*canvas.get_pixel(2, 9), SEPARATOR_COLOR);
    }

    #[test]
    fn test_render_separator_at_edge_draws_one_side() {
        let mut view = ComparisonView::new(10, 10);
        view.set_images(solid(10, 10, RED), Some(solid(10, 10, BLUE)));
        view.on_pointer_drag(0.0, 0.0);
        let frame = view.render();
        assert_eq!(frame.sprites.len(), 1);
        assert_eq!(frame.sprites[0].image.width(), 10);
        assert_eq!(*frame.sprites[0].image.get_pixel(0, 0), Rgba(RED));
    }

    #[test]
    fn test_single_image_centred_with_separator() {
        let mut view = ComparisonView::new(20, 10);
        view.set_images(solid(10, 10, RED), None);
        let frame = view.render();
        assert_eq!(frame.sprites.len(), 1);
        assert_eq!(frame.sprites[0].x, 5);
        assert!(view.crop_ranges().is_none());
        let canvas = frame.rasterize();
        assert_eq!(*canvas.get_pixel(0, 5), CANVAS_COLOR);
        assert_eq!(*canvas.get_pixel(6, 5), Rgba(RED));
        assert_eq!(*canvas.get_pixel(10, 5), SEPARATOR_COLOR);
    }

    #[test]
    fn test_empty_view_draws_only_separator() {
        let view = ComparisonView::new(8, 4);
        let frame = view.render();
        assert!(frame.sprites.is_empty());
        let canvas = frame.rasterize();
        assert_eq!(*canvas.get_pixel(4, 0), SEPARATOR_COLOR);
        assert_eq!(*canvas.get_pixel(0, 0), CANVAS_COLOR);
    }

    #[test]
    fn test_degenerate_fit_draws_nothing() {
        let mut view = ComparisonView::new(10, 10);
        view.set_images(solid(1000, 1, RED), Some(solid(1000, 1, BLUE)));
        assert!(view.resized_left().is_none());
        assert!(view.render().sprites.is_empty());
    }

    #[test]
    fn test_resize_keeps_relative_separator() {
        let mut view = ComparisonView::new(100, 100);
        view.set_images(solid(100, 100, RED), Some(solid(100, 100, BLUE)));
        view.on_pointer_drag(25.0, 0.0);
        view.on_viewport_resize(200, 200);
        assert_eq!(view.resized_left().unwrap().dimensions(), (200, 200));
        assert!((view.separator_x() - 50.0).abs() < 1e-3);
    }

    #[test]
    fn test_resize_refits_before_next_draw() {
        let mut view = ComparisonView::new(100, 50);
        view.set_images(solid(40, 40, RED), Some(solid(40, 40, BLUE)));
        assert_eq!(view.resized_right().unwrap().dimensions(), (50, 50));
        view.on_viewport_resize(30, 90);
        assert_eq!(view.resized_left().unwrap().dimensions(), (30, 30));
        assert_eq!(view.resized_right().unwrap().dimensions(), (30, 30));
        let frame = view.render();
        assert_eq!(frame.width, 30);
        assert_eq!(frame.height, 90);
    }

    #[test]
    fn test_clear_drops_sources() {
        let mut view = ComparisonView::new(10, 10);
        view.set_images(solid(10, 10, RED), Some(solid(10, 10, BLUE)));
        view.clear();
        assert!(view.left().is_none());
        assert!(view.render().sprites.is_empty());
    }

    proptest! {
        #[test]
        fn prop_crops_partition_image(
            (viewport, width, offset) in (1u32..=2000)
                .prop_flat_map(|vw| (Just(vw), 0u32..=vw))
                .prop_flat_map(|(vw, w)| (Just(vw), Just(w), 0.0f32..=1.0))
        ) {
            let left = image_left_edge(viewport, width);
            let separator = left + offset * width as f32;
            let (processed, original) = crop_ranges(separator, left, width);
            prop_assert_eq!(processed.start, 0);
            prop_assert_eq!(processed.end, original.start);
            prop_assert_eq!(original.end, width);
            prop_assert_eq!(processed.width() + original.width(), width);
        }

        #[test]
        fn prop_clamp_matches_nearest_boundary(
            (viewport, width) in (1u32..=2000).prop_flat_map(|vw| (Just(vw), 1u32..=vw)),
            outside in 0.0f32..5000.0,
            go_left in any::<bool>(),
        ) {
            let left = image_left_edge(viewport, width);
            let right = left + width as f32;
            let (x, boundary) = if go_left {
                (left - outside, left)
            } else {
                (right + outside, right)
            };

            let clamped = clamp_separator(x, viewport, Some(width));
            prop_assert_eq!(clamped, boundary);
            prop_assert_eq!(
                crop_ranges(clamped, left, width),
                crop_ranges(boundary, left, width)
            );
        }
    }
}
