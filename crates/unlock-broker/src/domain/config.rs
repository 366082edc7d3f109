//! Broker configuration types.
//!
//! [`BrokerConfig`] is the single source of truth for all runtime settings.
//! It is built by `main.rs` from CLI flags and an optional config file, or
//! directly by tests.
//!
//! Keeping configuration as a plain struct (no environment reads, no files)
//! lets tests run a complete broker against sockets in a temporary directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use unlock_core::{derive_control_path, DEFAULT_CAPACITY};
use zeroize::Zeroizing;

/// Number of unlock requests served before the broker exits.
pub const DEFAULT_MAX_ITERATIONS: u32 = 3;

/// Time to hold back the first accept unless keys arrive earlier.
pub const DEFAULT_START_DELAY: Duration = Duration::from_secs(0);

/// All runtime configuration for the broker.
///
/// # Example
///
/// ```rust
/// use std::path::Path;
/// use unlock_broker::domain::BrokerConfig;
///
/// let cfg = BrokerConfig::new("/run/unlock.sock");
/// assert_eq!(cfg.max_iterations, 3);
/// assert_eq!(cfg.control_path(), Path::new("/run/unlock.control.sock"));
/// ```
#[derive(Clone)]
pub struct BrokerConfig {
    /// Primary socket that systemd-cryptsetup connects to.
    pub socket_path: PathBuf,

    /// Explicit control socket path.  `None` derives it from `socket_path`.
    pub control_path: Option<PathBuf>,

    /// Key sent to every client regardless of device.
    ///
    /// When set, the key table is never consulted (control messages are still
    /// accepted and stored).
    pub static_key: Option<Zeroizing<Vec<u8>>>,

    /// Number of accepted unlock requests before the broker shuts down.
    pub max_iterations: u32,

    /// How long to wait before the first accept.
    ///
    /// The wait ends early as soon as a control message delivers a key.
    pub start_delay: Duration,

    /// Maximum number of `(device, key)` entries the table holds.
    pub table_capacity: usize,
}

impl BrokerConfig {
    /// Returns a configuration with default settings for `socket_path`.
    ///
    /// | Field           | Default                     |
    /// |-----------------|-----------------------------|
    /// | control_path    | derived (`.control.sock`)   |
    /// | static_key      | none                        |
    /// | max_iterations  | 3                           |
    /// | start_delay     | 0 seconds                   |
    /// | table_capacity  | 1024                        |
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            control_path: None,
            static_key: None,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            start_delay: DEFAULT_START_DELAY,
            table_capacity: DEFAULT_CAPACITY,
        }
    }

    /// Control socket path actually used: the override, or the derived one.
    pub fn control_path(&self) -> PathBuf {
        self.control_path
            .clone()
            .unwrap_or_else(|| derive_control_path(&self.socket_path))
    }

    /// Primary socket path.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Sets a static key, replacing any previous one.
    ///
    /// An empty key clears it, so requests fall back to the key table.
    pub fn with_static_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.set_static_key(key);
        self
    }

    /// In-place form of [`BrokerConfig::with_static_key`].
    pub fn set_static_key(&mut self, key: impl Into<Vec<u8>>) {
        let key = Zeroizing::new(key.into());
        self.static_key = if key.is_empty() { None } else { Some(key) };
    }
}

impl std::fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("socket_path", &self.socket_path)
            .field("control_path", &self.control_path())
            .field("static_key", &self.static_key.as_ref().map(|_| "<redacted>"))
            .field("max_iterations", &self.max_iterations)
            .field("start_delay", &self.start_delay)
            .field("table_capacity", &self.table_capacity)
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
