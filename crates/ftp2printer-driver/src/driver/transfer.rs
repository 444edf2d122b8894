//! Downloads, uploads and sink supervision.
//!
//! Every upload is split with [`tee`]: one branch goes to the configured
//! [`UploadSink`](super::UploadSink) on a tracked task, the other is written
//! to the backend when `keep_files` is set and dropped otherwise. A dropped
//! branch never holds the sink back.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncSeekExt, AsyncWriteExt};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::error::{DriverError, DriverResult};
use super::tee::{TeeReader, tee};
use super::TeeDriver;
use crate::vfs::{FileAttr, FileHandle, OpenFlags, VfsError};

/// Where an upload lands in its destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOffset {
    /// Replace the destination from scratch.
    Overwrite,
    /// Append to the destination. The value is what the client believes is
    /// already stored; it only has to be within the current size.
    Append(u64),
}

impl From<i64> for PutOffset {
    /// Negative raw offsets (the protocol's `-1`) mean overwrite.
    fn from(raw: i64) -> Self {
        u64::try_from(raw).map_or(Self::Overwrite, Self::Append)
    }
}

impl TeeDriver {
    /// Open `path` for reading positioned at `offset`.
    ///
    /// Returns the number of bytes left after `offset` together with the
    /// handle. Dropping the handle closes it.
    #[tracing::instrument(skip_all, name = "driver.get")]
    pub async fn get(
        &self,
        path: impl AsRef<Path>,
        offset: u64,
    ) -> DriverResult<(u64, FileHandle)> {
        let real = self.resolver.resolve(path)?;
        let mut file = self.fs.open(&real, OpenFlags::read()).await?;
        let size = file.stat().await?.size;
        if offset > size {
            return Err(DriverError::OffsetOutOfRange { offset, size });
        }
        file.seek(SeekFrom::Start(offset)).await?;
        debug!("get {} from {} ({} bytes left)", real.display(), offset, size - offset);
        Ok((size - offset, file))
    }

    /// Accept an upload into `path`.
    ///
    /// `source` is always handed to the sink in full. With `keep_files` set
    /// it is also written to the backend, honouring `offset` (negative to
    /// overwrite, otherwise append), and the number of bytes written is
    /// returned. Without `keep_files` the call returns `0` as soon as the
    /// sink is running, or once it finishes when `wait_for_sink` is set.
    #[tracing::instrument(skip_all, name = "driver.put")]
    pub async fn put<R>(&self, path: impl AsRef<Path>, source: R, offset: i64) -> DriverResult<u64>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let real = self.resolver.resolve(path)?;
        let offset = PutOffset::from(offset);
        debug!("put {} ({:?}, keep_files={})", real.display(), offset, self.config.keep_files);

        let (to_sink, to_disk) = tee(source, self.config.tee_buffer);
        let sink_task = self.spawn_sink(real.clone(), to_sink);

        if !self.config.keep_files {
            drop(to_disk);
            if self.config.wait_for_sink {
                let timeout = self.config.sink_timeout();
                if tokio::time::timeout(timeout, sink_task).await.is_err() {
                    warn!("sink for {} still running after {:?}", real.display(), timeout);
                }
            }
            return Ok(0);
        }

        self.persist(&real, to_disk, offset).await
    }

    /// Number of sink tasks that have not finished yet.
    pub fn in_flight_uploads(&self) -> usize {
        self.uploads.len()
    }

    /// Wait up to `timeout` for running sinks, then cancel the rest.
    ///
    /// Returns the number of sinks that had to be cancelled. Uploads started
    /// after this call are still tracked but no longer waited for.
    pub async fn shutdown(&self, timeout: Duration) -> usize {
        self.uploads.close();
        if tokio::time::timeout(timeout, self.uploads.wait()).await.is_ok() {
            info!("driver shut down with no uploads in flight");
            return 0;
        }

        let pending = self.uploads.len();
        warn!("cancelling {} upload sinks still running after {:?}", pending, timeout);
        self.cancel.cancel();
        self.uploads.wait().await;
        pending
    }

    fn spawn_sink(&self, path: PathBuf, mut branch: TeeReader) -> JoinHandle<()> {
        let sink = Arc::clone(&self.sink);
        let cancel = self.cancel.child_token();

        self.uploads.spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    warn!("sink for {} cancelled", path.display());
                }
                result = sink.consume(&path, &mut branch) => match result {
                    Ok(bytes) => info!(bytes, "sink consumed {}", path.display()),
                    Err(e) => warn!("sink for {} failed: {}", path.display(), e),
                },
            }
        })
    }

    async fn persist(
        &self,
        real: &Path,
        mut branch: TeeReader,
        offset: PutOffset,
    ) -> DriverResult<u64> {
        let existing = match self.fs.stat(real).await {
            Ok(attr) => Some(attr),
            Err(VfsError::NotFound(_)) => None,
            Err(e) => return Err(e.into()),
        };
        if existing.as_ref().is_some_and(FileAttr::is_dir) {
            return Err(DriverError::DestinationIsDirectory(real.display().to_string()));
        }

        let offset = match offset {
            PutOffset::Append(_) if existing.is_none() => PutOffset::Overwrite,
            offset => offset,
        };

        let mut file = match offset {
            PutOffset::Overwrite => {
                if existing.is_some() {
                    match self.fs.remove(real).await {
                        Ok(()) | Err(VfsError::NotFound(_)) => {}
                        Err(e) => return Err(e.into()),
                    }
                }
                self.fs.create(real).await?
            }
            PutOffset::Append(offset) => {
                let mut file = self.fs.open(real, OpenFlags::append()).await?;
                let size = file.stat().await?.size;
                if offset > size {
                    return Err(DriverError::OffsetBeyondFileSize { offset, size });
                }
                file.seek(SeekFrom::End(0)).await?;
                file
            }
        };

        let written = tokio::io::copy(&mut branch, &mut file).await?;
        file.shutdown().await?;
        debug!("stored {} bytes in {}", written, real.display());
        Ok(written)
    }
}
