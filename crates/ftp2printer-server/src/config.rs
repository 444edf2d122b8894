//! Host configuration file.
//!
//! ```toml
//! root = "/var/spool/ftp2printer"
//!
//! [driver]
//! keep_files = true
//!
//! [sink]
//! kind = "command"
//! program = "lp"
//! args = ["-d", "office"]
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use ftp2printer_driver::{ConfigError, DriverConfig};

use crate::constants::DEFAULT_STORAGE_ROOT;

/// Where uploads go besides the backing directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SinkConfig {
    /// Read and drop every upload.
    #[default]
    Discard,
    /// Write every upload to a new file in `dir`.
    Spool { dir: PathBuf },
    /// Pipe every upload into a fresh `program` process.
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

/// Complete host configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Directory backing the driver. `~` is expanded.
    pub root: String,
    pub driver: DriverConfig,
    pub sink: SinkConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            root: DEFAULT_STORAGE_ROOT.to_string(),
            driver: DriverConfig::default(),
            sink: SinkConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Parse a TOML document. Missing sections take their defaults.
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

    /// The backing directory with `~` expanded.
    pub fn root_dir(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.root).as_ref())
    }
}
