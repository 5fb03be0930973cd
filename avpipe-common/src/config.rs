//! Bootstrap configuration loading and resolution
//!
//! All tunables have compiled defaults; a TOML file only overrides what it
//! names. Resolution order for the file itself:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. Platform config directory (`<config_dir>/avpipe/config.toml`)
//! 4. Compiled defaults (no file)
//!
//! A missing file never aborts startup; an unreadable or invalid one does.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable consulted for the config file path
pub const CONFIG_ENV_VAR: &str = "AVPIPE_CONFIG";

/// Top-level configuration file contents
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct TomlConfig {
    #[serde(default)]
    pub buffering: BufferingConfig,

    #[serde(default)]
    pub clock: ClockConfig,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Buffer sizing and backpressure knobs
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct BufferingConfig {
    /// Buffered audio the refill loop aims to keep ahead of playback (seconds)
    #[serde(default = "default_audio_decode_target_secs")]
    pub audio_decode_target_secs: f64,

    /// Ring buffer capacity (seconds of interleaved audio)
    #[serde(default = "default_audio_ring_capacity_secs")]
    pub audio_ring_capacity_secs: f64,

    /// Audio decoder queue depth at which refill stops submitting work
    #[serde(default = "default_audio_decoder_queue_max")]
    pub audio_decoder_queue_max: usize,

    /// Decoded frames the video pipeline keeps ready; also its decoder ceiling
    #[serde(default = "default_video_frame_buffer_target")]
    pub video_frame_buffer_target: usize,

    /// Samples the pull demuxer reads ahead before pausing its source
    #[serde(default = "default_demuxer_lookahead_samples")]
    pub demuxer_lookahead_samples: usize,

    /// Decoded video frames the decoder may have outstanding at once
    #[serde(default = "default_video_frame_pool_size")]
    pub video_frame_pool_size: usize,
}

/// Media clock and render cadence
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ClockConfig {
    /// How often the audio side reports media time to the control context
    #[serde(default = "default_report_interval_ms")]
    pub report_interval_ms: u64,

    /// Render tick period while playing
    #[serde(default = "default_render_interval_ms")]
    pub render_interval_ms: u64,
}

/// Audio output device settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct OutputConfig {
    /// Initial volume (0.0-1.0)
    #[serde(default = "default_volume")]
    pub volume: f32,

    /// Output device name (None = host default)
    #[serde(default)]
    pub device: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_audio_decode_target_secs() -> f64 {
    0.3
}

fn default_audio_ring_capacity_secs() -> f64 {
    0.6
}

fn default_audio_decoder_queue_max() -> usize {
    5
}

fn default_video_frame_buffer_target() -> usize {
    3
}

fn default_demuxer_lookahead_samples() -> usize {
    50
}

fn default_video_frame_pool_size() -> usize {
    4
}

fn default_report_interval_ms() -> u64 {
    1000
}

fn default_render_interval_ms() -> u64 {
    16
}

fn default_volume() -> f32 {
    1.0
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for BufferingConfig {
    fn default() -> Self {
        Self {
            audio_decode_target_secs: default_audio_decode_target_secs(),
            audio_ring_capacity_secs: default_audio_ring_capacity_secs(),
            audio_decoder_queue_max: default_audio_decoder_queue_max(),
            video_frame_buffer_target: default_video_frame_buffer_target(),
            demuxer_lookahead_samples: default_demuxer_lookahead_samples(),
            video_frame_pool_size: default_video_frame_pool_size(),
        }
    }
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            report_interval_ms: default_report_interval_ms(),
            render_interval_ms: default_render_interval_ms(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            volume: default_volume(),
            device: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl BufferingConfig {
    /// Check the relationships the refill loops depend on
    ///
    /// The decoder ceilings must be at least 2: some decoders hold back one
    /// output until the next input arrives, and with a ceiling of 1 the
    /// output-triggered refill would never run.
    pub fn validate(&self) -> Result<()> {
        if self.audio_decoder_queue_max < 2 {
            return Err(Error::Config(format!(
                "audio_decoder_queue_max must be >= 2 (got {})",
                self.audio_decoder_queue_max
            )));
        }
        if self.video_frame_buffer_target < 2 {
            return Err(Error::Config(format!(
                "video_frame_buffer_target must be >= 2 (got {})",
                self.video_frame_buffer_target
            )));
        }
        if !(self.audio_decode_target_secs > 0.0) {
            return Err(Error::Config(format!(
                "audio_decode_target_secs must be positive (got {})",
                self.audio_decode_target_secs
            )));
        }
        if self.audio_ring_capacity_secs <= self.audio_decode_target_secs {
            return Err(Error::Config(format!(
                "audio_ring_capacity_secs ({}) must exceed audio_decode_target_secs ({})",
                self.audio_ring_capacity_secs, self.audio_decode_target_secs
            )));
        }
        if self.demuxer_lookahead_samples == 0 {
            return Err(Error::Config(
                "demuxer_lookahead_samples must be >= 1".to_string(),
            ));
        }
        if self.video_frame_pool_size < self.video_frame_buffer_target {
            return Err(Error::Config(format!(
                "video_frame_pool_size ({}) must be >= video_frame_buffer_target ({})",
                self.video_frame_pool_size, self.video_frame_buffer_target
            )));
        }
        Ok(())
    }
}

impl TomlConfig {
    /// Parse configuration from TOML text and validate it
    pub fn parse(text: &str) -> Result<Self> {
        let config: TomlConfig =
            toml::from_str(text).map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.buffering.validate()?;
        if self.clock.report_interval_ms == 0 {
            return Err(Error::Config("report_interval_ms must be > 0".to_string()));
        }
        if self.clock.render_interval_ms == 0 {
            return Err(Error::Config("render_interval_ms must be > 0".to_string()));
        }
        if !(0.0..=1.0).contains(&self.output.volume) {
            return Err(Error::Config(format!(
                "volume must be within [0.0, 1.0] (got {})",
                self.output.volume
            )));
        }
        Ok(())
    }
}

/// Pick the configuration file path following the resolution order
///
/// Returns `None` when no candidate exists; the caller then runs on defaults.
pub fn resolve_config_path(cli_arg: Option<&Path>, env_var_name: &str) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Platform config directory
    dirs::config_dir()
        .map(|d| d.join("avpipe").join("config.toml"))
        .filter(|p| p.exists())
}

/// Resolve and load configuration, falling back to defaults if no file exists
pub fn load_config(cli_arg: Option<&Path>, env_var_name: &str) -> Result<TomlConfig> {
    match resolve_config_path(cli_arg, env_var_name) {
        Some(path) if path.exists() => {
            info!("Loading configuration from {}", path.display());
            TomlConfig::load(&path)
        }
        Some(path) => {
            warn!(
                "Configuration file {} not found, using compiled defaults",
                path.display()
            );
            Ok(TomlConfig::default())
        }
        None => {
            info!("No configuration file, using compiled defaults");
            Ok(TomlConfig::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = TomlConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.buffering.audio_decode_target_secs, 0.3);
        assert_eq!(config.buffering.audio_ring_capacity_secs, 0.6);
        assert_eq!(config.buffering.audio_decoder_queue_max, 5);
        assert_eq!(config.buffering.video_frame_buffer_target, 3);
        assert_eq!(config.buffering.demuxer_lookahead_samples, 50);
        assert_eq!(config.clock.report_interval_ms, 1000);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let config = TomlConfig::parse(
            r#"
            [buffering]
            audio_decoder_queue_max = 8

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.buffering.audio_decoder_queue_max, 8);
        assert_eq!(config.buffering.audio_decode_target_secs, 0.3);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.clock.render_interval_ms, 16);
    }

    #[test]
    fn test_queue_ceiling_below_two_rejected() {
        let err = TomlConfig::parse("[buffering]\naudio_decoder_queue_max = 1\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains(">= 2"));
    }

    #[test]
    fn test_capacity_must_exceed_target() {
        let err = TomlConfig::parse(
            "[buffering]\naudio_decode_target_secs = 0.5\naudio_ring_capacity_secs = 0.5\n",
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_volume_out_of_range_rejected() {
        assert!(TomlConfig::parse("[output]\nvolume = 1.5\n").is_err());
    }

    #[test]
    fn test_malformed_toml_is_config_error() {
        let err = TomlConfig::parse("[buffering\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
