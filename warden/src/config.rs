//! Runtime configuration.
//!
//! Loaded from an optional TOML file; every field has a default so an empty
//! or absent file is valid.
//!
//! ```toml
//! [channel]
//! response_timeout_ms = 5000
//! settle_ms = 250
//!
//! [directory]
//! default_op_level = 4
//! ban_source = "Server"
//! ```

use log::{info, warn};
use serde::Deserialize;
use shared::{OpLevel, DEFAULT_BAN_REASON, DEFAULT_BAN_SOURCE};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub directory: DirectorySettings,
}

impl Config {
    /// Reads `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No config at {}, using defaults", path.display());
                return Ok(Config::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        Self::parse(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}

/// Console command delivery.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    /// How long to wait for the first response line (default: 5000).
    /// Past this the command's effect is reported as unknown.
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
    /// Quiet period that ends a response when no rule recognises it (default: 250).
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    /// Commands allowed to wait in one server's queue (default: 64).
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl ChannelConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: default_response_timeout_ms(),
            settle_ms: default_settle_ms(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_response_timeout_ms() -> u64 {
    5000
}

fn default_settle_ms() -> u64 {
    250
}

fn default_queue_capacity() -> usize {
    64
}

/// Values used when the directory has to fill in a record itself.
#[derive(Debug, Clone, Deserialize)]
pub struct DirectorySettings {
    /// Level given to players opped through the directory (default: 4).
    #[serde(default = "default_op_level")]
    pub default_op_level: u8,
    /// Recorded as the issuer of bans made through the directory.
    #[serde(default = "default_ban_source")]
    pub ban_source: String,
    #[serde(default = "default_ban_reason")]
    pub default_ban_reason: String,
}

impl DirectorySettings {
    /// Configured level, or the server default when out of range
    pub fn op_level(&self) -> OpLevel {
        OpLevel::try_from(self.default_op_level).unwrap_or_else(|e| {
            warn!("directory.default_op_level: {}; using {}", e, OpLevel::MAX);
            OpLevel::default()
        })
    }
}

impl Default for DirectorySettings {
    fn default() -> Self {
        Self {
            default_op_level: default_op_level(),
            ban_source: default_ban_source(),
            default_ban_reason: default_ban_reason(),
        }
    }
}

fn default_op_level() -> u8 {
    OpLevel::MAX
}

fn default_ban_source() -> String {
    DEFAULT_BAN_SOURCE.to_string()
}

fn default_ban_reason() -> String {
    DEFAULT_BAN_REASON.to_string()
}
