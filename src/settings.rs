//! Settings management for the effect stack tools
//!
//! Handles loading/saving of the XML preferences file in the user's config
//! directory.

use quick_xml::de::from_str;
use quick_xml::se::to_string;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::SettingsError;
use crate::telemetry::LogConfig;

/// Bounds for the undo history depth
const UNDO_LIMIT_RANGE: (usize, usize) = (1, 10_000);

/// User preferences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename = "EffectStackSettings")]
pub struct StackSettings {
    /// Maximum number of undo entries kept
    #[serde(rename = "undoLimit", default = "default_undo_limit")]
    pub undo_limit: usize,

    /// Extra effect catalog loaded on top of the built-in effects
    #[serde(rename = "catalogPath", default, skip_serializing_if = "Option::is_none")]
    pub catalog_path: Option<String>,

    /// Default log filter when no env var is set
    #[serde(rename = "logLevel", default = "default_log_level")]
    pub log_level: String,

    /// Emit JSON log lines instead of compact text
    #[serde(rename = "logJson", default)]
    pub log_json: bool,
}

fn default_undo_limit() -> usize {
    100
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for StackSettings {
    fn default() -> Self {
        Self {
            undo_limit: default_undo_limit(),
            catalog_path: None,
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

impl StackSettings {
    /// Get the settings file path
    fn get_settings_path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut p| {
            p.push("EffectStack");
            p.push("settings.xml");
            p
        })
    }

    pub fn clamp_undo_limit(&mut self) {
        self.undo_limit = self.undo_limit.clamp(UNDO_LIMIT_RANGE.0, UNDO_LIMIT_RANGE.1);
    }

    /// Load settings from the config directory, falling back to defaults
    pub fn load() -> Self {
        let Some(path) = Self::get_settings_path() else {
            return Self::default();
        };

        if !path.exists() {
            return Self::default();
        }

        match Self::load_from_file(&path) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!("Failed to read settings from {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Save settings to the config directory
    pub fn save(&self) -> Result<(), SettingsError> {
        let Some(path) = Self::get_settings_path() else {
            return Err(SettingsError::NoConfigDir);
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(SettingsError::Io)?;
        }
        self.save_to_file(&path)
    }

    /// Load settings from an explicit XML file
    pub fn load_from_file(path: &Path) -> Result<Self, SettingsError> {
        let contents = fs::read_to_string(path).map_err(SettingsError::Io)?;
        let mut settings: Self = from_str(&contents).map_err(SettingsError::XmlParse)?;
        settings.clamp_undo_limit();
        Ok(settings)
    }

    /// Save settings to an explicit XML file
    pub fn save_to_file(&self, path: &Path) -> Result<(), SettingsError> {
        let xml = to_string(self).map_err(SettingsError::XmlWrite)?;
        let formatted = format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{}", xml);
        fs::write(path, formatted).map_err(SettingsError::Io)?;
        Ok(())
    }

    /// Configured catalog path, if it exists on disk
    pub fn catalog_path(&self) -> Option<PathBuf> {
        self.catalog_path.as_ref().map(PathBuf::from).filter(|p| p.exists())
    }

    /// Logging configuration derived from these settings
    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            default_level: self.log_level.clone(),
            json: self.log_json,
            ..LogConfig::default()
        }
    }
}
