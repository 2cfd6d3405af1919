//! Audio configuration (§3, §10.3).
//!
//! `AudioConfig` is the engine's immutable-for-its-lifetime construction
//! parameter; it is validated once at `Engine::initialize` and a rejected
//! config never reaches ring sizing. `EngineToml` is the optional
//! TOML-bootstrap half of the teacher's two-tier config story: a small
//! static file choosing a default device/rate/channels/mixdown path before
//! the embedding application constructs an `AudioConfig`. There is no
//! database-backed settings layer (§10.3): this crate persists nothing.

use serde::Deserialize;
use std::path::PathBuf;

use crate::error::{EngineError, Result};

/// Immutable audio engine configuration, validated at construction (§3).
#[derive(Debug, Clone)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u32,
    pub frames_per_buffer: u32,
    pub enable_input: bool,
    pub enable_output: bool,
    pub output_device_id: Option<String>,
    pub input_device_id: Option<String>,
    /// Maximum number of concurrently registered sources (§4.8).
    pub max_audio_sources: usize,
    /// Deterministic per-buffer wait bound for a clock-bound source in
    /// offline mode, before raising `SourceError::OfflineTimeout` (§4.5, §9).
    pub offline_source_timeout_secs: f64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
            frames_per_buffer: 512,
            enable_input: false,
            enable_output: true,
            output_device_id: None,
            input_device_id: None,
            max_audio_sources: 32,
            offline_source_timeout_secs: 5.0,
        }
    }
}

impl AudioConfig {
    /// Validate the invariants from §3. Called once at engine construction;
    /// a rejected config never reaches ring sizing.
    pub fn validate(&self) -> Result<()> {
        if !(8_000..=192_000).contains(&self.sample_rate) {
            return Err(EngineError::ConfigInvalid(format!(
                "sample_rate {} out of range 8000..=192000",
                self.sample_rate
            )));
        }
        if !(1..=32).contains(&self.channels) {
            return Err(EngineError::ConfigInvalid(format!(
                "channels {} out of range 1..=32",
                self.channels
            )));
        }
        if !(64..=16_384).contains(&self.frames_per_buffer) {
            return Err(EngineError::ConfigInvalid(format!(
                "frames_per_buffer {} out of range 64..=16384",
                self.frames_per_buffer
            )));
        }
        if !self.enable_input && !self.enable_output {
            return Err(EngineError::ConfigInvalid(
                "at least one of enable_input/enable_output must be true".into(),
            ));
        }
        if self.max_audio_sources == 0 {
            return Err(EngineError::ConfigInvalid(
                "max_audio_sources must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// TOML-bootstrap configuration: chooses a device and starting format before
/// the engine exists. Mirrors the teacher's `TomlConfig` (bootstrap-only,
/// cannot change at runtime) without the database-settings half, since this
/// crate has nothing to persist.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineToml {
    /// Output device name; `None` selects the host default.
    #[serde(default)]
    pub output_device: Option<String>,

    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    #[serde(default = "default_channels")]
    pub channels: u32,

    #[serde(default = "default_frames_per_buffer")]
    pub frames_per_buffer: u32,

    /// If set, recording starts immediately at engine start.
    #[serde(default)]
    pub mixdown_path: Option<PathBuf>,
}

fn default_sample_rate() -> u32 {
    48_000
}

fn default_channels() -> u32 {
    2
}

fn default_frames_per_buffer() -> u32 {
    512
}

impl EngineToml {
    pub fn parse(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| EngineError::ConfigInvalid(format!("failed to parse TOML: {e}")))
    }

    /// Turn the bootstrap config into a validated `AudioConfig`.
    pub fn into_audio_config(self) -> Result<AudioConfig> {
        let config = AudioConfig {
            sample_rate: self.sample_rate,
            channels: self.channels,
            frames_per_buffer: self.frames_per_buffer,
            output_device_id: self.output_device,
            ..AudioConfig::default()
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(AudioConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_sample_rate() {
        let cfg = AudioConfig {
            sample_rate: 4_000,
            ..AudioConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_neither_input_nor_output() {
        let cfg = AudioConfig {
            enable_input: false,
            enable_output: false,
            ..AudioConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn parses_minimal_toml() {
        let toml_str = r#"
            output_device = "Speakers"
        "#;
        let parsed = EngineToml::parse(toml_str).unwrap();
        assert_eq!(parsed.output_device.as_deref(), Some("Speakers"));
        assert_eq!(parsed.sample_rate, 48_000);
        let config = parsed.into_audio_config().unwrap();
        assert_eq!(config.output_device_id.as_deref(), Some("Speakers"));
    }
}
