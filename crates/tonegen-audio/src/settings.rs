//! Settings file format for the control surface.
//!
//! Uses RON (Rust Object Notation) so a saved tone is easy to read and edit
//! by hand:
//!
//! ```ron
//! (
//!     version: 1,
//!     tone: (
//!         base_frequency_hz: 7.83,
//!         waveform: sine,
//!         volume: 0.3,
//!         binaural: (enabled: false, beat_hz: 4.0),
//!     ),
//!     auto_stop_minutes: 0.0,
//!     render_minutes: 1.0,
//!     render_format: wav,
//! )
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tonegen_core::render::validate_duration;
use tonegen_core::{OutputFormat, ToneConfiguration};

use crate::control::DEFAULT_RENDER_MINUTES;

/// Current format version
pub const SETTINGS_VERSION: u32 = 1;

fn default_render_minutes() -> f64 {
    DEFAULT_RENDER_MINUTES
}

/// Everything the control surface lets the user set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToneSettings {
    /// Format version for future compatibility
    pub version: u32,

    /// The tone itself
    pub tone: ToneConfiguration,

    /// Auto-stop after this many minutes; 0 disables
    #[serde(default)]
    pub auto_stop_minutes: f64,

    /// Length of exported files
    #[serde(default = "default_render_minutes")]
    pub render_minutes: f64,

    /// Container of exported files
    #[serde(default)]
    pub render_format: OutputFormat,
}

impl Default for ToneSettings {
    fn default() -> Self {
        Self::new(
            ToneConfiguration::default(),
            0.0,
            DEFAULT_RENDER_MINUTES,
            OutputFormat::default(),
        )
    }
}

impl ToneSettings {
    #[must_use]
    pub fn new(
        tone: ToneConfiguration,
        auto_stop_minutes: f64,
        render_minutes: f64,
        render_format: OutputFormat,
    ) -> Self {
        Self {
            version: SETTINGS_VERSION,
            tone,
            auto_stop_minutes,
            render_minutes,
            render_format,
        }
    }

    /// Check every value against its domain
    ///
    /// # Errors
    ///
    /// `InvalidData` naming the first bad value
    pub fn validate(&self) -> Result<(), SettingsError> {
        self.tone
            .validate()
            .map_err(|e| SettingsError::InvalidData(e.to_string()))?;

        if !self.auto_stop_minutes.is_finite() || self.auto_stop_minutes < 0.0 {
            return Err(SettingsError::InvalidData(format!(
                "auto-stop minutes {} must be zero or positive",
                self.auto_stop_minutes
            )));
        }
        validate_duration(self.render_minutes * 60.0)
            .map_err(|e| SettingsError::InvalidData(e.to_string()))
    }

    /// Save settings to a RON file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be written or serialization fails
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), SettingsError> {
        let ron_string = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| SettingsError::SerializationFailed(e.to_string()))?;

        std::fs::write(path.as_ref(), ron_string)
            .map_err(|e| SettingsError::IoError(e.to_string()))?;

        tracing::debug!("Saved settings to {}", path.as_ref().display());
        Ok(())
    }

    /// Load settings from a RON file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read, deserialization fails, the
    /// version is unknown or a value is out of range
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let ron_string = std::fs::read_to_string(path.as_ref())
            .map_err(|e| SettingsError::IoError(e.to_string()))?;

        let settings: Self = ron::from_str(&ron_string)
            .map_err(|e| SettingsError::DeserializationFailed(e.to_string()))?;

        if settings.version > SETTINGS_VERSION {
            return Err(SettingsError::UnsupportedVersion(settings.version));
        }
        settings.validate()?;

        tracing::debug!("Loaded settings from {}", path.as_ref().display());
        Ok(settings)
    }
}

/// Errors that can occur reading or writing settings
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    #[error("Unsupported settings version: {0}")]
    UnsupportedVersion(u32),

    #[error("Invalid settings: {0}")]
    InvalidData(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonegen_core::Waveform;

    #[test]
    fn test_defaults() {
        let settings = ToneSettings::default();
        assert_eq!(settings.version, 1);
        assert_eq!(settings.tone, ToneConfiguration::default());
        assert_eq!(settings.render_format, OutputFormat::Wav);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.ron");

        let settings = ToneSettings::new(
            ToneConfiguration::new(136.1, Waveform::Triangle, 0.5).with_binaural_beat(6.0),
            30.0,
            10.0,
            OutputFormat::Mp3,
        );
        settings.save(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("triangle"));
        assert!(text.contains("mp3"));

        assert_eq!(ToneSettings::load(&path).unwrap(), settings);
    }

    #[test]
    fn test_optional_fields_default() {
        let settings: ToneSettings = ron::from_str(
            "(version: 1, tone: (base_frequency_hz: 432.0, waveform: square, volume: 0.2))",
        )
        .unwrap();
        assert!(!settings.tone.binaural.enabled);
        assert_eq!(settings.auto_stop_minutes, 0.0);
        assert_eq!(settings.render_minutes, DEFAULT_RENDER_MINUTES);
        assert_eq!(settings.render_format, OutputFormat::Wav);
    }

    #[test]
    fn test_rejects_newer_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("future.ron");
        let mut settings = ToneSettings::default();
        settings.version = 2;
        settings.save(&path).unwrap();

        assert!(matches!(
            ToneSettings::load(&path),
            Err(SettingsError::UnsupportedVersion(2))
        ));
    }

    #[test]
    fn test_rejects_out_of_range_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.ron");
        let mut settings = ToneSettings::default();
        settings.tone.base_frequency_hz = 30_000.0;
        settings.save(&path).unwrap();

        assert!(matches!(
            ToneSettings::load(&path),
            Err(SettingsError::InvalidData(_))
        ));
    }

    #[test]
    fn test_rejects_overlong_render() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("long.ron");
        let settings = ToneSettings {
            render_minutes: 1e15,
            ..ToneSettings::default()
        };
        settings.save(&path).unwrap();

        assert!(matches!(
            ToneSettings::load(&path),
            Err(SettingsError::InvalidData(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            ToneSettings::load("/nonexistent/tonegen/settings.ron"),
            Err(SettingsError::IoError(_))
        ));
    }
}
