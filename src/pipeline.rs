//! Processing Pipeline Controller
//!
//! Owns the canonical images for one editing session and sequences
//! load -> remove background -> recolour -> upscale -> save. After every
//! transition the comparison view is handed `(original, final)` again, so
//! the view never holds state of its own that could drift.
//!
//! Engine-backed stages are split into an input step and a commit step.
//! The synchronous methods run both back to back; `worker::Controller` runs
//! the engine in between on a blocking task. The commit step rejects
//! results produced for an earlier load (`generation` mismatch).

use log::{info, warn};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::compare::ComparisonView;
use crate::compositor::{composite_raster, flatten_for_opaque_format, BackgroundColor};
use crate::error::{FluxisError, Result};
use crate::io;
use crate::raster::RasterImage;
use crate::removal::{BackgroundRemover, RemovalConfig};
use crate::resample::upscale_preserving_alpha;
use crate::upscale::{SuperResolution, UpscaleMode};

pub const DEFAULT_VIEWPORT: (u32, u32) = (800, 600);

/// Position in the processing sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Empty,
    Loaded,
    BackgroundRemoved,
    /// A background colour is applied over a loaded or cut-out image
    ColorComposited,
    Upscaled,
}

/// Image handed to an engine together with the load it belongs to
#[derive(Debug, Clone)]
pub struct JobInput {
    pub generation: u64,
    pub image: Arc<RasterImage>,
}

/// Canonical session images.
///
/// `final_image` is derived from `working` and `background_color` and is
/// rebuilt immediately whenever either changes.
#[derive(Debug, Clone)]
pub struct PipelineState {
    /// Last image-changing transition; colour edits do not move it
    stage: Stage,
    /// Bumped on every load
    generation: u64,
    source_path: Option<PathBuf>,
    original: Option<Arc<RasterImage>>,
    working: Option<Arc<RasterImage>>,
    background_color: Option<BackgroundColor>,
    final_image: Option<Arc<RasterImage>>,
    /// Working image and stage from before the last upscale
    pre_upscale: Option<(Arc<RasterImage>, Stage)>,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self {
            stage: Stage::Empty,
            generation: 0,
            source_path: None,
            original: None,
            working: None,
            background_color: None,
            final_image: None,
            pre_upscale: None,
        }
    }
}

impl PipelineState {
    /// Observable stage. A colour over a loaded or cut-out image reports
    /// `ColorComposited`; upscaled images stay `Upscaled`.
    pub fn stage(&self) -> Stage {
        match (self.stage, self.background_color) {
            (Stage::Loaded | Stage::BackgroundRemoved, Some(_)) => Stage::ColorComposited,
            (stage, _) => stage,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn source_path(&self) -> Option<&Path> {
        self.source_path.as_deref()
    }

    pub fn original(&self) -> Option<&Arc<RasterImage>> {
        self.original.as_ref()
    }

    pub fn working(&self) -> Option<&Arc<RasterImage>> {
        self.working.as_ref()
    }

    pub fn background_color(&self) -> Option<BackgroundColor> {
        self.background_color
    }

    pub fn final_image(&self) -> Option<&Arc<RasterImage>> {
        self.final_image.as_ref()
    }

    pub fn can_revert_upscale(&self) -> bool {
        self.pre_upscale.is_some()
    }

    fn rederive_final(&mut self) {
        self.final_image = self.working.as_ref().map(|working| match self.background_color {
            Some(color) => Arc::new(composite_raster(working, color)),
            None => Arc::clone(working),
        });
    }
}

/// Session controller: pipeline state plus the comparison view it drives
#[derive(Debug, Clone)]
pub struct Pipeline {
    state: PipelineState,
    view: ComparisonView,
    status: String,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(DEFAULT_VIEWPORT.0, DEFAULT_VIEWPORT.1)
    }
}

impl Pipeline {
    pub fn new(viewport_width: u32, viewport_height: u32) -> Self {
        Self {
            state: PipelineState::default(),
            view: ComparisonView::new(viewport_width, viewport_height),
            status: "Please select an image.".to_string(),
        }
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn stage(&self) -> Stage {
        self.state.stage()
    }

    pub fn view(&self) -> &ComparisonView {
        &self.view
    }

    /// Pointer and resize events go straight to the view
    pub fn view_mut(&mut self) -> &mut ComparisonView {
        &mut self.view
    }

    /// Last human-readable outcome
    pub fn status(&self) -> &str {
        &self.status
    }

    fn set_status(&mut self, status: impl Into<String>) {
        self.status = status.into();
        info!("{}", self.status);
    }

    pub(crate) fn fail<T>(&mut self, status: &str, err: impl Into<FluxisError>) -> Result<T> {
        let err = err.into();
        self.status = status.to_string();
        warn!("{}: {}", status, err);
        Err(err)
    }

    fn refresh_view(&mut self) {
        match &self.state.original {
            Some(original) => self
                .view
                .set_images(Arc::clone(original), self.state.final_image.clone()),
            None => self.view.clear(),
        }
    }

    // ------------------------------------------------------------------------
    // LOAD
    // ------------------------------------------------------------------------

    /// Start a new session from `image`. Resets colour and upscale history.
    pub fn load(&mut self, image: RasterImage) {
        let image = Arc::new(image);
        self.state = PipelineState {
            stage: Stage::Loaded,
            generation: self.state.generation + 1,
            source_path: None,
            original: Some(Arc::clone(&image)),
            working: Some(image),
            background_color: None,
            final_image: None,
            pre_upscale: None,
        };
        self.state.rederive_final();
        self.refresh_view();
        self.set_status(format!("Image loaded (generation {})", self.state.generation));
    }

    /// Open `path` and load it. A failure leaves the current session intact.
    pub fn load_path(&mut self, path: &Path) -> Result<()> {
        match io::load_image(path) {
            Ok(image) => {
                self.load(image);
                self.state.source_path = Some(path.to_path_buf());
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                self.set_status(format!("Image loaded: {}", name));
                Ok(())
            }
            Err(e) => self.fail("Failed to open image", e),
        }
    }

    // ------------------------------------------------------------------------
    // BACKGROUND REMOVAL
    // ------------------------------------------------------------------------

    /// Removal always runs on the original so repeating it never compounds
    pub fn removal_input(&self) -> Result<JobInput> {
        let image = self.state.original.clone().ok_or(FluxisError::NothingLoaded)?;
        Ok(JobInput {
            generation: self.state.generation,
            image,
        })
    }

    /// Install an engine cutout. Returns `false` if the result belongs to an
    /// earlier load and was discarded.
    pub fn commit_removal(&mut self, generation: u64, cutout: RasterImage) -> bool {
        if generation != self.state.generation || self.state.original.is_none() {
            warn!(
                "Discarding background removal for generation {} (current {})",
                generation, self.state.generation
            );
            return false;
        }
        self.state.working = Some(Arc::new(cutout));
        self.state.stage = Stage::BackgroundRemoved;
        self.state.pre_upscale = None;
        self.state.rederive_final();
        self.refresh_view();
        self.set_status("Background removed successfully!");
        true
    }

    pub fn remove_background(
        &mut self,
        engine: &dyn BackgroundRemover,
        config: &RemovalConfig,
    ) -> Result<()> {
        let input = self.removal_input()?;
        let effective = config.effective();
        self.set_status("Removing background...");

        match engine.remove(&input.image.to_rgba8(), &effective) {
            Ok(cutout) => {
                self.commit_removal(input.generation, RasterImage::Rgba(cutout));
                Ok(())
            }
            Err(e) => self.fail("Removal failed.", e),
        }
    }

    // ------------------------------------------------------------------------
    // BACKGROUND COLOUR
    // ------------------------------------------------------------------------

    /// Set or clear the background colour. Only `final_image` is rebuilt.
    pub fn set_background_color(&mut self, color: Option<BackgroundColor>) -> Result<()> {
        if self.state.working.is_none() {
            return Err(FluxisError::NothingLoaded);
        }
        self.state.background_color = color;
        self.state.rederive_final();
        self.refresh_view();
        match color {
            Some(c) => self.set_status(format!("Background colour set to {}", c)),
            None => self.set_status("Background colour cleared"),
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // UPSCALE
    // ------------------------------------------------------------------------

    pub fn upscale_input(&self) -> Result<JobInput> {
        let image = self.state.working.clone().ok_or(FluxisError::NothingLoaded)?;
        Ok(JobInput {
            generation: self.state.generation,
            image,
        })
    }

    /// Install an upscaled working image, keeping the previous one for
    /// `revert_upscale`. The result is discarded if it belongs to an earlier
    /// load or if `working` changed since `input` was taken.
    pub fn commit_upscale(&mut self, input: &JobInput, upscaled: RasterImage) -> bool {
        if input.generation != self.state.generation {
            warn!(
                "Discarding upscale for generation {} (current {})",
                input.generation, self.state.generation
            );
            return false;
        }
        match &self.state.working {
            Some(working) if Arc::ptr_eq(working, &input.image) => {}
            _ => {
                warn!("Discarding upscale of a working image that has since been replaced");
                return false;
            }
        }
        let Some(previous) = self.state.working.take() else {
            return false;
        };
        self.state.pre_upscale = Some((previous, self.state.stage));
        self.state.working = Some(Arc::new(upscaled));
        self.state.stage = Stage::Upscaled;
        self.state.rederive_final();
        self.refresh_view();
        self.set_status("Image upscaled successfully with Super-Resolution!");
        true
    }

    /// `UpscaleMode::None` is a no-op, even after an upscale has been applied
    pub fn upscale(&mut self, engine: &dyn SuperResolution, mode: UpscaleMode) -> Result<()> {
        let input = self.upscale_input()?;
        if mode == UpscaleMode::None {
            return Ok(());
        }
        self.set_status("Upscaling image with 2x Super-Resolution...");

        match upscale_preserving_alpha(&input.image, engine) {
            Ok(upscaled) => {
                self.commit_upscale(&input, upscaled);
                Ok(())
            }
            Err(e) => self.fail("Upscaling failed.", e),
        }
    }

    /// Restore the working image from before the last upscale.
    /// Returns `false` when there is nothing to restore.
    pub fn revert_upscale(&mut self) -> bool {
        let Some((previous, stage)) = self.state.pre_upscale.take() else {
            return false;
        };
        self.state.working = Some(previous);
        self.state.stage = stage;
        self.state.rederive_final();
        self.refresh_view();
        self.set_status("Upscaling reverted");
        true
    }

    // ------------------------------------------------------------------------
    // SAVE
    // ------------------------------------------------------------------------

    /// Write `final_image`. Formats without transparency get a flattened
    /// copy; the pipeline's own image is left untouched.
    pub fn save(&mut self, path: &Path) -> Result<()> {
        let Some(final_image) = self.state.final_image.clone() else {
            return Err(FluxisError::NothingLoaded);
        };

        let format = match io::output_format(path) {
            Ok(format) => format,
            Err(e) => return self.fail("Saving failed.", e),
        };

        let result = if final_image.has_alpha() && !io::format_supports_alpha(format) {
            let flat = RasterImage::Rgb(flatten_for_opaque_format(&final_image));
            io::write_image(&flat, path, format)
        } else {
            io::write_image(&final_image, path, format)
        };

        match result {
            Ok(()) => {
                self.set_status(format!("Image saved to {}", path.display()));
                Ok(())
            }
            Err(e) => self.fail("Saving failed.", e),
        }
    }

    /// Save name suggested for the current session
    pub fn suggested_output_name(&self) -> String {
        io::suggested_output_name(self.state.source_path())
    }
}

// ============================================================================
// TESTS
// ============================================================================
