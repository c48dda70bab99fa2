//! Capture settings

use crate::core::vendor::Pacing;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Capture configuration
///
/// Loaded from `config.toml` in the platform config directory; every field
/// has a default so a partial (or absent) file works. CLI arguments
/// override loaded values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Background color of the captured screenshot, `WHITE` or `BLACK`.
    /// Unknown values coerce to `WHITE` with a warning.
    pub color: String,
    /// Seconds to wait for connects and reads
    pub timeout_secs: u64,
    /// Output path template; a timestamp is inserted before the extension
    pub output: PathBuf,
    /// Minimum plausible screen-image size in bytes
    pub min_image_bytes: usize,
    /// Honor the per-vendor settle delays. Disabling is only sensible
    /// against simulated instruments.
    pub settle_delays: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            color: "WHITE".to_string(),
            timeout_secs: 15,
            output: PathBuf::from("scope_screenshot.png"),
            min_image_bytes: crate::core::capture::DEFAULT_MIN_IMAGE_BYTES,
            settle_delays: true,
        }
    }
}

impl Settings {
    /// Load settings from the platform config directory
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        match super::config_dir() {
            Some(dir) => Self::load_from(&dir.join("config.toml")),
            None => Ok(Self::default()),
        }
    }

    /// Load settings from a specific file, defaulting when it is absent
    pub fn load_from(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
        } else {
            Ok(Self::default())
        }
    }

    /// Save settings to the platform config directory
    pub fn save(&self) -> Result<(), Box<dyn std::error::Error>> {
        let dir = super::config_dir().ok_or("Could not determine config directory")?;
        std::fs::create_dir_all(&dir)?;
        let content = toml::to_string_pretty(self)?;
        std::fs::write(dir.join("config.toml"), content)?;
        Ok(())
    }

    /// Settle-delay profile implied by these settings
    pub fn pacing(&self) -> Pacing {
        if self.settle_delays {
            Pacing::default()
        } else {
            Pacing::zero()
        }
    }
}
