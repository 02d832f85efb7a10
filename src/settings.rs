//! Runtime camera settings with JSON persistence.
//!
//! Every field carries a serde default, so a settings file written by an older
//! build (or edited by hand down to a few keys) still loads.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::calibration::AutoZeroConfig;
use crate::camera::error::CameraResult;
use crate::camera::framer::TimeoutConfig;
use crate::camera::retry::RetryPolicy;
use crate::camera::types::{AdvancedSettings, FilterSlot};

fn default_true() -> bool {
    true
}

/// Per-connection camera configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CameraSettings {
    /// Advanced settings sent before each exposure when they change.
    #[serde(default)]
    pub advanced: AdvancedSettings,

    #[serde(default)]
    pub auto_zero: AutoZeroConfig,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Retry policy for init, state polls and temperature reads.
    #[serde(default)]
    pub connect_retry: RetryPolicy,

    /// Apply the loaded hot-pixel map to delivered frames.
    #[serde(default = "default_true")]
    pub hot_pixel_correction: bool,

    /// Accept 1x2 binning on cameras that do not advertise asymmetric binning.
    #[serde(default = "default_true")]
    pub allow_1x2_binning: bool,

    /// Filter wheel slot names and trims, in slot order.
    #[serde(default)]
    pub filters: Vec<FilterSlot>,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            advanced: AdvancedSettings::default(),
            auto_zero: AutoZeroConfig::default(),
            timeouts: TimeoutConfig::default(),
            connect_retry: RetryPolicy::default(),
            hot_pixel_correction: true,
            allow_1x2_binning: true,
            filters: Vec::new(),
        }
    }
}

impl CameraSettings {
    /// Slot index of a named filter (case-insensitive).
    pub fn filter_index(&self, name: &str) -> Option<u8> {
        self.filters
            .iter()
            .position(|f| f.name.eq_ignore_ascii_case(name))
            .map(|i| i as u8)
    }

    /// Trim for a slot, 0 when the slot is not configured.
    pub fn filter_trim(&self, slot: u8) -> i16 {
        self.filters
            .get(slot as usize)
            .map(|f| f.trim)
            .unwrap_or(0)
    }

    /// Check if these settings differ from defaults.
    pub fn has_non_default_settings(&self) -> bool {
        *self != Self::default()
    }
}

/// Settings file name inside the settings directory.
const SETTINGS_FILENAME: &str = "camera_settings.json";

/// Manages persistence of camera settings to a JSON file.
pub struct SettingsManager {
    settings_file_path: PathBuf,
}

impl SettingsManager {
    /// Settings manager for `camera_settings.json` in `dir`.
    pub fn new(dir: &Path) -> Self {
        Self::with_file(dir.join(SETTINGS_FILENAME))
    }

    /// Settings manager for an explicit file path.
    pub fn with_file(path: impl Into<PathBuf>) -> Self {
        Self {
            settings_file_path: path.into(),
        }
    }

    /// Load settings from disk, returning defaults if the file doesn't exist.
    pub fn load(&self) -> CameraResult<CameraSettings> {
        if !self.settings_file_path.exists() {
            return Ok(CameraSettings::default());
        }

        let contents = fs::read_to_string(&self.settings_file_path)?;

        // Handle empty file gracefully
        if contents.trim().is_empty() {
            return Ok(CameraSettings::default());
        }

        Ok(serde_json::from_str(&contents)?)
    }

    /// Save settings to disk.
    pub fn save(&self, settings: &CameraSettings) -> CameraResult<()> {
        if let Some(parent) = self.settings_file_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = serde_json::to_string_pretty(settings)?;
        fs::write(&self.settings_file_path, contents)?;

        Ok(())
    }

    /// Get the path where settings are stored.
    pub fn settings_path(&self) -> &Path {
        &self.settings_file_path
    }
}
