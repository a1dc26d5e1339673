//! Runtime configuration.
//!
//! Loaded from a TOML file under `dirs::config_dir()` (the same
//! `serde` + `toml` + `dirs` pairing the teacher codebase uses for its
//! secure-config layer), falling back to built-in defaults when the file
//! is absent. Config is read once at startup; nothing here is touched from
//! the audio hot path.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ErrorContext, RtError};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RtConfig {
    pub ring_buffer: RingBufferConfig,
    pub alsa: AlsaConfig,
    pub mdns: MdnsConfig,
    pub control_surface: ControlSurfaceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RingBufferConfig {
    pub device_count: usize,
    pub meter_window_ms: u32,
}

impl Default for RingBufferConfig {
    fn default() -> Self {
        Self {
            device_count: 1,
            meter_window_ms: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlsaConfig {
    pub periods_per_buffer: u32,
    pub poll_timeout_ms: i32,
}

impl Default for AlsaConfig {
    fn default() -> Self {
        Self {
            periods_per_buffer: 2,
            poll_timeout_ms: 250,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MdnsConfig {
    pub service_name: String,
    pub service_type: String,
    pub domain: String,
    pub port: u16,
}

impl Default for MdnsConfig {
    fn default() -> Self {
        Self {
            service_name: "MC Mix".to_string(),
            service_type: "_EuConProxy._tcp".to_string(),
            domain: "local".to_string(),
            port: 49168,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlSurfaceConfig {
    pub tcp_port: u16,
    pub ticks_per_heartbeat: u32,
    pub channel_count: usize,
}

impl Default for ControlSurfaceConfig {
    fn default() -> Self {
        Self {
            tcp_port: 49168,
            ticks_per_heartbeat: 1,
            channel_count: 8,
        }
    }
}

impl Default for RtConfig {
    fn default() -> Self {
        Self {
            ring_buffer: RingBufferConfig::default(),
            alsa: AlsaConfig::default(),
            mdns: MdnsConfig::default(),
            control_surface: ControlSurfaceConfig::default(),
        }
    }
}

impl RtConfig {
    /// Default config file location: `$XDG_CONFIG_HOME/rt-audio-core/config.toml`
    /// (or the platform equivalent via `dirs::config_dir`).
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("rt-audio-core").join("config.toml"))
    }

    /// Load configuration from `path`, falling back to defaults if the file
    /// does not exist.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(&format!("reading config file {}", path.display()))?;
        toml::from_str(&text).map_err(|e| {
            RtError::invalid_arg(format!("malformed config at {}: {e}", path.display()))
        })
    }

    /// Load from the default platform config path, or defaults if unset.
    pub fn load_default() -> crate::error::Result<Self> {
        match Self::default_path() {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_fader_channel_count() {
        let cfg = RtConfig::default();
        assert_eq!(cfg.control_surface.channel_count, 8);
        assert_eq!(cfg.ring_buffer.meter_window_ms, 50);
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let cfg = RtConfig::load(Path::new("/nonexistent/path/config.toml")).unwrap();
        assert_eq!(cfg.alsa.periods_per_buffer, 2);
    }
}
