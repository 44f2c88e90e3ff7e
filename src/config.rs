//! Client configuration
//!
//! Loaded from `config.toml` in the platform config directory. Every section
//! falls back to defaults, so a partial file (or none at all) is valid.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::{Error, Result};

/// Top-level client configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub server: ServerConfig,
    pub audio: AudioConfig,
    pub session: SessionConfig,
}

/// Relay server endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub connect_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_PORT,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
        }
    }
}

impl ServerConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Audio format shared by both devices and the wire.
///
/// Samples are always signed 16-bit; the three fields below fix the frame size
/// for the whole session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub frame_ms: u32,
    /// Input device buffer, in frames
    pub input_buffer_frames: usize,
    /// Output device buffer, in frames
    pub output_buffer_frames: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            frame_ms: DEFAULT_FRAME_MS,
            input_buffer_frames: INPUT_BUFFER_FRAMES,
            output_buffer_frames: OUTPUT_BUFFER_FRAMES,
        }
    }
}

impl AudioConfig {
    /// Samples per channel in one frame
    pub fn frame_samples(&self) -> usize {
        (self.sample_rate as u64 * self.frame_ms as u64 / 1000) as usize
    }

    /// Bytes in one wire frame across all channels
    pub fn frame_bytes(&self) -> usize {
        self.frame_samples() * self.channels as usize * BYTES_PER_SAMPLE
    }

    /// Reject formats that cannot produce a non-empty, sendable frame
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 || self.channels == 0 || self.frame_ms == 0 {
            return Err(Error::Config(
                "sample_rate, channels and frame_ms must be non-zero".into(),
            ));
        }
        if self.frame_samples() == 0 {
            return Err(Error::Config(format!(
                "{} ms at {} Hz is shorter than one sample",
                self.frame_ms, self.sample_rate
            )));
        }
        if self.frame_bytes() > MAX_PAYLOAD_SIZE {
            return Err(Error::Config(format!(
                "frame of {} bytes exceeds the protocol maximum",
                self.frame_bytes()
            )));
        }
        if self.input_buffer_frames == 0 || self.output_buffer_frames == 0 {
            return Err(Error::Config("device buffers must hold at least one frame".into()));
        }
        Ok(())
    }
}

/// Room membership
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub room: String,
    pub name: String,
}

impl ClientConfig {
    /// Platform config file location, if a home directory can be resolved
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "lan-voice-client")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` or the default location; a missing file yields defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let path = match path.map(Path::to_path_buf).or_else(Self::default_path) {
            Some(path) => path,
            None => return Ok(Self::default()),
        };
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load(&path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, text)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.audio.validate()?;
        if self.server.port == 0 {
            return Err(Error::Config("port must be non-zero".into()));
        }
        Ok(())
    }
}
