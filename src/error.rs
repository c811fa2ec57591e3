use thiserror::Error;

/// Source image could not be opened or decoded
#[derive(Error, Debug)]
#[error("Failed to load {path}: {reason}")]
pub struct LoadError {
    pub path: String,
    pub reason: String,
}

/// Background-removal engine failure
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Background removal failed: {0}")]
pub struct RemovalError(pub String);

/// Super-resolution engine failure
#[derive(Error, Debug, Clone, PartialEq)]
pub enum UpscaleError {
    /// Model weights could not be fetched or loaded
    #[error("Failed to load upscaling model: {0}")]
    ModelUnavailable(String),

    #[error("Upscaling failed: {0}")]
    RuntimeFailure(String),
}

/// Destination could not be written
#[derive(Error, Debug)]
pub enum SaveError {
    #[error("Unsupported output format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to write {path}: {reason}")]
    Unwritable { path: String, reason: String },
}

#[derive(Error, Debug)]
pub enum FluxisError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Removal(#[from] RemovalError),

    #[error(transparent)]
    Upscale(#[from] UpscaleError),

    #[error(transparent)]
    Save(#[from] SaveError),

    #[error("No image loaded")]
    NothingLoaded,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

pub type Result<T> = std::result::Result<T, FluxisError>;
