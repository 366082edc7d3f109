//! Optional TOML configuration file for the broker.
//!
//! Every setting can also be given on the command line; flags win over the
//! file, and the file wins over built-in defaults.  Example:
//!
//! ```toml
//! [broker]
//! socket = "/run/systemd/clevis-unlock.sock"
//! iterations = 5
//! start_delay_secs = 10
//!
//! [logging]
//! level = "debug"
//! ```
//!
//! A static key may be set with `key = "..."`, but the file then holds a
//! secret and must be protected accordingly.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::domain::BrokerConfig;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level file schema.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub broker: BrokerSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// `[broker]` table.  Absent keys leave the setting to flags or defaults.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BrokerSection {
    /// Primary socket path.
    pub socket: Option<PathBuf>,
    /// Control socket path.
    pub control: Option<PathBuf>,
    /// Static key.
    pub key: Option<String>,
    /// Number of unlock requests to serve.
    pub iterations: Option<u32>,
    /// Start delay in seconds.
    pub start_delay_secs: Option<u64>,
    /// Key table capacity.
    pub capacity: Option<usize>,
}

/// `[logging]` table.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct LoggingSection {
    /// `tracing` level used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl FileConfig {
    /// Parses a config file's contents.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for invalid TOML or unknown keys.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Reads and parses the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Parse`] if it is not valid.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Applies the file's `[broker]` settings on top of `config`.
    pub fn apply_to(&self, config: &mut BrokerConfig) {
        let broker = &self.broker;
        if let Some(socket) = &broker.socket {
            config.socket_path = socket.clone();
        }
        if let Some(control) = &broker.control {
            config.control_path = Some(control.clone());
        }
        if let Some(key) = &broker.key {
            config.set_static_key(key.as_bytes());
        }
        if let Some(iterations) = broker.iterations {
            config.max_iterations = iterations;
        }
        if let Some(secs) = broker.start_delay_secs {
            config.start_delay = Duration::from_secs(secs);
        }
        if let Some(capacity) = broker.capacity {
            config.table_capacity = capacity;
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
