//! Driver configuration.
//!
//! Built once at startup and handed to [`TeeDriver::new`](crate::TeeDriver::new)
//! by value. Nothing reads it from ambient state, so several drivers with
//! different settings can live in one process.
//!
//! ```toml
//! username = "admin"
//! password = "admin"
//! keep_files = true
//! tee_buffer = 65536
//! wait_for_sink = false
//! sink_timeout_secs = 30
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::driver::DEFAULT_TEE_BUFFER;

/// Default login, matching the stock ftp2printer setup.
pub const DEFAULT_USERNAME: &str = "admin";

/// Default upper bound on waiting for an upload sink.
pub const DEFAULT_SINK_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for this schema.
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Process-wide driver options.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Login name handed to the protocol engine. Opaque to the driver.
    pub username: String,
    /// Login password handed to the protocol engine. Opaque to the driver.
    pub password: String,
    /// Persist uploads to the backing filesystem in addition to the sink.
    pub keep_files: bool,
    /// Bytes one tee branch may buffer ahead of the other.
    pub tee_buffer: usize,
    /// Make `put` wait for the sink when uploads are not persisted.
    pub wait_for_sink: bool,
    /// Upper bound for `wait_for_sink`, in seconds.
    pub sink_timeout_secs: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            username: DEFAULT_USERNAME.to_string(),
            password: DEFAULT_USERNAME.to_string(),
            keep_files: false,
            tee_buffer: DEFAULT_TEE_BUFFER,
            wait_for_sink: false,
            sink_timeout_secs: DEFAULT_SINK_TIMEOUT.as_secs(),
        }
    }
}

// Hand-rolled so passwords never end up in logs.
impl std::fmt::Debug for DriverConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverConfig")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("keep_files", &self.keep_files)
            .field("tee_buffer", &self.tee_buffer)
            .field("wait_for_sink", &self.wait_for_sink)
            .field("sink_timeout_secs", &self.sink_timeout_secs)
            .finish()
    }
}

impl DriverConfig {
    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Read and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Enable or disable persistence.
    pub fn with_keep_files(mut self, keep_files: bool) -> Self {
        self.keep_files = keep_files;
        self
    }

    /// Set the per-branch tee buffer.
    pub fn with_tee_buffer(mut self, bytes: usize) -> Self {
        self.tee_buffer = bytes;
        self
    }

    /// Make `put` wait for the sink (bounded by `timeout`) when not persisting.
    pub fn with_wait_for_sink(mut self, timeout: Duration) -> Self {
        self.wait_for_sink = true;
        self.sink_timeout_secs = timeout.as_secs();
        self
    }

    /// Upper bound for waiting on a sink.
    pub fn sink_timeout(&self) -> Duration {
        Duration::from_secs(self.sink_timeout_secs)
    }
}
