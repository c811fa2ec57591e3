//! Settings file
//!
//! JSON document with every field optional; missing fields take the same
//! defaults as the interactive controls (matting off, 240/10/10, no
//! colour, no upscaling, 800x600 preview).

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::compositor::BackgroundColor;
use crate::error::{FluxisError, Result};
use crate::removal::RemovalConfig;
use crate::upscale::UpscaleMode;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ViewportSettings {
    pub width: u32,
    pub height: u32,
}

impl Default for ViewportSettings {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub removal: RemovalConfig,
    /// Hex colour, e.g. "#00ff00"
    pub background_color: Option<String>,
    pub upscale: UpscaleMode,
    pub viewport: ViewportSettings,
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            removal: RemovalConfig::default(),
            background_color: None,
            upscale: UpscaleMode::None,
            viewport: ViewportSettings::default(),
            log_level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Read `path` if it exists, otherwise return defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&content)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.removal.validate()?;
        self.background_color()?;
        if self.viewport.width == 0 || self.viewport.height == 0 {
            return Err(FluxisError::Config(format!(
                "viewport must be non-empty, got {}x{}",
                self.viewport.width, self.viewport.height
            )));
        }
        Ok(())
    }

    /// Parsed background colour, if one is configured
    pub fn background_color(&self) -> Result<Option<BackgroundColor>> {
        self.background_color.as_deref().map(str::parse).transpose()
    }
}
