//! ftp2printer binary.
//!
//! Drives the storage driver from the command line, with the same
//! configuration and sinks a protocol engine would use.
//!
//! ## Usage
//!
//! ```bash
//! # Send a document to the configured sink (and keep a copy)
//! ftp2printer --keep-files put report.pdf /inbox/report.pdf
//!
//! # Browse what was kept
//! ftp2printer ls /inbox
//! ftp2printer get /inbox/report.pdf copy.pdf
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use ftp2printer_driver::{FileAttr, LocalBackend, TeeDriver};
use ftp2printer_server::constants::{DEFAULT_CONFIG_PATH, SHUTDOWN_GRACE, WELCOME_MESSAGE};
use ftp2printer_server::{ServerConfig, build_sink};

/// Tee uploads into a printer sink and an optional local copy.
#[derive(Parser, Debug)]
#[command(name = "ftp2printer")]
#[command(about = "Storage driver front end for ftp2printer")]
struct Args {
    /// Config file (default: ~/.config/ftp2printer/config.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory backing the driver
    #[arg(long)]
    root: Option<String>,

    /// Keep uploaded files in the backing directory
    #[arg(long)]
    keep_files: bool,

    /// Login name handed to the protocol engine
    #[arg(long)]
    username: Option<String>,

    /// Login password handed to the protocol engine
    #[arg(long)]
    password: Option<String>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Upload a local file
    Put {
        local: PathBuf,
        remote: String,
        /// -1 overwrites, anything else appends
        #[arg(long, default_value_t = -1, allow_hyphen_values = true)]
        offset: i64,
    },
    /// Download a file (to stdout without LOCAL)
    Get {
        remote: String,
        local: Option<PathBuf>,
        #[arg(long, default_value_t = 0)]
        offset: u64,
    },
    /// List a directory
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },
    /// Show attributes of a path
    Stat { path: String },
    /// Create a directory and its parents
    Mkdir { path: String },
    /// Remove a file
    Rm { path: String },
    /// Remove a directory recursively
    Rmdir { path: String },
    /// Rename a file or directory
    Mv { from: String, to: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;

    let root = config.root_dir();
    tracing::info!("{} serving {}", WELCOME_MESSAGE, root.display());
    tracing::debug!(?config, "effective configuration");

    let fs = Arc::new(LocalBackend::new(&root));
    let sink = build_sink(&config.sink);
    let driver = TeeDriver::new(fs, "/", sink, config.driver);

    let result = run(&driver, args.command).await;

    let cancelled = driver.shutdown(SHUTDOWN_GRACE).await;
    if cancelled > 0 {
        tracing::warn!("{} uploads were cancelled at shutdown", cancelled);
    }
    result
}

/// File config first, then CLI overrides.
fn load_config(args: &Args) -> Result<ServerConfig> {
    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => {
            let default_path = PathBuf::from(shellexpand::tilde(DEFAULT_CONFIG_PATH).as_ref());
            if default_path.exists() {
                ServerConfig::load(&default_path)
                    .with_context(|| format!("loading {}", default_path.display()))?
            } else {
                ServerConfig::default()
            }
        }
    };

    if let Some(root) = &args.root {
        config.root = root.clone();
    }
    if args.keep_files {
        config.driver.keep_files = true;
    }
    if let Some(username) = &args.username {
        config.driver.username = username.clone();
    }
    if let Some(password) = &args.password {
        config.driver.password = password.clone();
    }
    Ok(config)
}

async fn run(driver: &TeeDriver, command: Cmd) -> Result<()> {
    match command {
        Cmd::Put {
            local,
            remote,
            offset,
        } => {
            let file = tokio::fs::File::open(&local)
                .await
                .with_context(|| format!("opening {}", local.display()))?;
            let stored = driver.put(&remote, file, offset).await?;
            if driver.config().keep_files {
                println!("{} bytes stored in {}", stored, remote);
            } else {
                println!("{} handed to sink", remote);
            }
        }
        Cmd::Get {
            remote,
            local,
            offset,
        } => {
            let (remaining, mut file) = driver.get(&remote, offset).await?;
            let copied = match local {
                Some(path) => {
                    let mut out = tokio::fs::File::create(&path)
                        .await
                        .with_context(|| format!("creating {}", path.display()))?;
                    let n = tokio::io::copy(&mut file, &mut out).await?;
                    out.flush().await?;
                    n
                }
                None => {
                    let mut out = tokio::io::stdout();
                    let n = tokio::io::copy(&mut file, &mut out).await?;
                    out.flush().await?;
                    n
                }
            };
            tracing::debug!("copied {} of {} bytes", copied, remaining);
        }
        Cmd::Ls { path } => {
            let mut entries = Vec::new();
            driver
                .list_dir(&path, &mut |attr: FileAttr| {
                    entries.push(attr);
                    Ok(())
                })
                .await?;
            for attr in &entries {
                println!("{}", format_entry(attr));
            }
        }
        Cmd::Stat { path } => {
            let attr = driver.stat(&path).await?;
            println!("{}", format_entry(&attr));
        }
        Cmd::Mkdir { path } => driver.make_dir(&path).await?,
        Cmd::Rm { path } => driver.delete_file(&path).await?,
        Cmd::Rmdir { path } => driver.delete_dir(&path).await?,
        Cmd::Mv { from, to } => driver.rename(Path::new(&from), Path::new(&to)).await?,
    }
    Ok(())
}

/// One `ls -l` style line.
fn format_entry(attr: &FileAttr) -> String {
    let kind = if attr.is_dir() {
        'd'
    } else if attr.is_symlink() {
        'l'
    } else {
        '-'
    };
    format!("{}{:04o} {:>12} {}", kind, attr.perm & 0o7777, attr.size, attr.name)
}
