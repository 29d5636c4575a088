//! Configuration management for the webcam service

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::distributor::DEFAULT_FANOUT_LIMIT;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Video device to capture from
    #[serde(default = "default_device")]
    pub device: String,

    /// Preferred pixel format, either a fourcc such as "MJPG" or the
    /// driver's description string. The first supported format the device
    /// advertises wins when unset.
    #[serde(default)]
    pub format: Option<String>,

    /// Preferred frame size as "WIDTHxHEIGHT". The largest advertised size
    /// wins when unset.
    #[serde(default)]
    pub size: Option<String>,

    /// Address to listen on
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Print frame rate info to stdout
    #[serde(default)]
    pub print_fps: bool,

    /// Maximum waiting clients served from one image in a single delivery
    /// pass
    #[serde(default = "default_fanout_limit")]
    pub fanout_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: default_device(),
            format: None,
            size: None,
            listen: default_listen(),
            print_fps: false,
            fanout_limit: default_fanout_limit(),
        }
    }
}

// Default value functions
fn default_device() -> String {
    "/dev/video0".to_string()
}
fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_fanout_limit() -> usize {
    DEFAULT_FANOUT_LIMIT
}

impl Config {
    /// Loads configuration from TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from TOML file, falling back to defaults when the
    /// file does not exist. Parse and validation errors are still reported.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Loads configuration from TOML string
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// The requested frame size, parsed from the `size` field
    pub fn requested_size(&self) -> Option<(u32, u32)> {
        self.size.as_deref().and_then(parse_size)
    }

    /// Validates configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device.is_empty() {
            return Err(ConfigError::Invalid("device must not be empty".into()));
        }

        if self.listen.is_empty() {
            return Err(ConfigError::Invalid("listen must not be empty".into()));
        }

        if self.fanout_limit == 0 {
            return Err(ConfigError::Invalid("fanout_limit must be >= 1".into()));
        }

        if let Some(size) = &self.size {
            if parse_size(size).is_none() {
                return Err(ConfigError::Invalid(format!(
                    "size must be WIDTHxHEIGHT, got {:?}",
                    size
                )));
            }
        }

        Ok(())
    }
}

/// Parses a "WIDTHxHEIGHT" string such as "640x480" into dimensions.
/// Returns `None` unless both dimensions are positive integers.
pub fn parse_size(s: &str) -> Option<(u32, u32)> {
    let (w, h) = s.split_once('x')?;
    let w: u32 = w.parse().ok()?;
    let h: u32 = h.parse().ok()?;
    if w == 0 || h == 0 {
        return None;
    }
    Some((w, h))
}
