//! Host defaults.

use std::time::Duration;

/// Banner shown to clients and logged at startup.
pub const WELCOME_MESSAGE: &str = "Welcome to ftp2printer.";

/// Config file read when `--config` is not given and the file exists.
pub const DEFAULT_CONFIG_PATH: &str = "~/.config/ftp2printer/config.toml";

/// Directory served when neither the config nor `--root` names one.
pub const DEFAULT_STORAGE_ROOT: &str = ".";

/// How long the host waits for running print sinks before cancelling them.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Environment variable carrying the protocol path to command sinks.
pub const UPLOAD_PATH_ENV: &str = "FTP2PRINTER_PATH";
