//! Engine configuration
//!
//! Buffer depths, the preload budget and the defaults used before a consumer
//! has configured its frames. Loaded from JSON; every field is optional.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pixel_convert::{ColorSpace, OutputFormat};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    Invalid(&'static str),
}

/// Tunables shared by every stream of an open file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Max bytes of undecoded packets held across the active streams
    pub preload_bytes: usize,
    /// Decoded picture slots per video stream
    pub video_slots: usize,
    /// Decoded sample slots per audio stream
    pub audio_slots: usize,
    /// Upper bound on a worker wait when it cannot make progress
    pub idle_wait_ms: u64,
    /// Audio frame capacity until `create_audio_frame` says otherwise
    pub audio_frame_bytes: usize,
    pub default_sample_rate: u32,
    pub default_channels: u16,
    /// Output format until `create_video_frame` says otherwise
    pub video_format: OutputFormat,
    pub color_space: ColorSpace,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            preload_bytes: 2 * 1024 * 1024,
            video_slots: 25,
            audio_slots: 256,
            idle_wait_ms: 10,
            audio_frame_bytes: 4096,
            default_sample_rate: 48_000,
            default_channels: 2,
            video_format: OutputFormat::Rgba32,
            color_space: ColorSpace::Bt601,
        }
    }
}

impl EngineConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.preload_bytes == 0 {
            return Err(ConfigError::Invalid("preload_bytes must be non-zero"));
        }
        if self.video_slots == 0 || self.audio_slots == 0 {
            return Err(ConfigError::Invalid("slot counts must be non-zero"));
        }
        if self.audio_frame_bytes == 0 {
            return Err(ConfigError::Invalid("audio_frame_bytes must be non-zero"));
        }
        if self.default_channels == 0 || self.default_sample_rate == 0 {
            return Err(ConfigError::Invalid("default audio spec must be non-zero"));
        }
        Ok(())
    }

    pub fn idle_wait(&self) -> Duration {
        Duration::from_millis(self.idle_wait_ms)
    }
}

// ============================================================================
// Tests
// ============================================================================
