pub mod compare;
pub mod compositor;
pub mod config;
pub mod error;
pub mod io;
pub mod pipeline;
pub mod raster;
pub mod removal;
pub mod resample;
pub mod upscale;
pub mod worker;

pub use compare::{ComparisonView, CropRange, Frame};
pub use compositor::BackgroundColor;
pub use config::Settings;
pub use error::{FluxisError, Result};
pub use pipeline::{Pipeline, Stage};
pub use raster::{PixelFormat, RasterImage};
pub use removal::{BackgroundRemover, EdgeFloodRemover, RemovalConfig};
pub use upscale::{LanczosUpscaler, SuperResolution, UpscaleMode};
pub use worker::Controller;
