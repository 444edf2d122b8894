//! # ftp2printer-server
//!
//! Host-side pieces around [`ftp2printer_driver`]: the TOML configuration
//! file, the sinks that actually print or spool uploads, and the defaults
//! the `ftp2printer` binary starts from.

pub mod config;
pub mod constants;
pub mod sinks;

pub use config::{ServerConfig, SinkConfig};
pub use sinks::{CommandSink, SpoolSink, build_sink};
