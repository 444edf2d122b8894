//! Print-side upload sinks.

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::process::Command;
use tracing::debug;

use ftp2printer_driver::{DiscardSink, UploadSink};

use crate::config::SinkConfig;
use crate::constants::UPLOAD_PATH_ENV;

/// Build the sink a configuration asks for.
pub fn build_sink(config: &SinkConfig) -> Arc<dyn UploadSink> {
    match config {
        SinkConfig::Discard => Arc::new(DiscardSink),
        SinkConfig::Spool { dir } => {
            let dir = shellexpand::tilde(&dir.to_string_lossy()).into_owned();
            Arc::new(SpoolSink::new(PathBuf::from(dir)))
        }
        SinkConfig::Command { program, args } => Arc::new(CommandSink::new(program, args.clone())),
    }
}

/// Writes every upload to its own file in a spool directory.
///
/// Files are named `<uuid>-<upload name>` so repeated uploads of one path
/// never collide.
#[derive(Debug, Clone)]
pub struct SpoolSink {
    dir: PathBuf,
}

impl SpoolSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn target(&self, path: &Path) -> PathBuf {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        self.dir.join(format!("{}-{}", uuid::Uuid::new_v4(), name))
    }
}

#[async_trait]
impl UploadSink for SpoolSink {
    async fn consume(
        &self,
        path: &Path,
        stream: &mut (dyn AsyncRead + Send + Unpin),
    ) -> io::Result<u64> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let target = self.target(path);
        let mut file = tokio::fs::File::create(&target).await?;
        let n = tokio::io::copy(stream, &mut file).await?;
        file.flush().await?;
        debug!("spooled {} to {}", path.display(), target.display());
        Ok(n)
    }
}

/// Pipes every upload into the stdin of a new process, `lp` style.
///
/// The protocol path is passed in `FTP2PRINTER_PATH`. A non-zero exit
/// status counts as a failed upload.
#[derive(Debug, Clone)]
pub struct CommandSink {
    program: String,
    args: Vec<String>,
}

impl CommandSink {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl UploadSink for CommandSink {
    async fn consume(
        &self,
        path: &Path,
        stream: &mut (dyn AsyncRead + Send + Unpin),
    ) -> io::Result<u64> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env(UPLOAD_PATH_ENV, path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::other("child stdin not captured"))?;

        let copied = tokio::io::copy(stream, &mut stdin).await;
        // Closing stdin is what tells the child the job is complete.
        drop(stdin);
        let status = child.wait().await?;

        let n = copied?;
        if !status.success() {
            return Err(io::Error::other(format!(
                "{} exited with {}",
                self.program, status
            )));
        }
        Ok(n)
    }
}
