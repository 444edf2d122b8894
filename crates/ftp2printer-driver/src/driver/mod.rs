//! Storage driver for the protocol engine.
//!
//! [`TeeDriver`] confines every protocol path under one root of a
//! [`VfsOps`] backend and splits each upload between an [`UploadSink`] and,
//! when `keep_files` is set, the backend itself.
//!
//! # Architecture
//!
//! ```text
//! protocol engine ──► StorageDriver ──► TeeDriver
//!                                        ├── PathResolver   (root confinement)
//!                                        ├── metadata ops   (stat, list, rm, mv, mkdir)
//!                                        └── transfer ops
//!                                             get ──► VfsOps::open + seek
//!                                             put ──► tee ─┬─► UploadSink   (tracked task)
//!                                                          └─► VfsOps::create / append
//! ```

mod error;
mod metadata;
mod resolver;
mod sink;
mod tee;
mod transfer;

pub use error::{DriverError, DriverResult};
pub use resolver::PathResolver;
pub use sink::{DiscardSink, UploadSink};
pub use tee::{DEFAULT_TEE_BUFFER, TeeReader, tee};
pub use transfer::PutOffset;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::DriverConfig;
use crate::vfs::{FileAttr, VfsOps};

/// Stream type crossing the [`StorageDriver`] boundary.
pub type ByteStream = Box<dyn AsyncRead + Send + Unpin>;

/// Visitor for [`StorageDriver::list_dir`]. An error aborts the listing.
pub type ListVisitor<'a> = dyn FnMut(FileAttr) -> DriverResult<()> + Send + 'a;

/// Operations a protocol engine needs from its storage.
///
/// Paths are protocol paths, always interpreted relative to the driver root.
#[async_trait]
pub trait StorageDriver: Send + Sync {
    /// Attributes of a path.
    async fn stat(&self, path: &Path) -> DriverResult<FileAttr>;

    /// Feed the entries of a directory to `visit`. A file lists as itself.
    async fn list_dir(&self, path: &Path, visit: &mut ListVisitor<'_>) -> DriverResult<()>;

    /// Remove a directory and everything below it.
    async fn delete_dir(&self, path: &Path) -> DriverResult<()>;

    /// Remove a single file.
    async fn delete_file(&self, path: &Path) -> DriverResult<()>;

    /// Rename a file or directory.
    async fn rename(&self, from: &Path, to: &Path) -> DriverResult<()>;

    /// Create a directory and its missing parents.
    async fn make_dir(&self, path: &Path) -> DriverResult<()>;

    /// Check that `path` is a directory a session may change into.
    async fn change_dir(&self, path: &Path) -> DriverResult<()>;

    /// Open a file for download at `offset`. Returns the bytes left to read.
    async fn get(&self, path: &Path, offset: u64) -> DriverResult<(u64, ByteStream)>;

    /// Accept an upload. `offset` is `-1` to overwrite or the byte count the
    /// client believes is already stored to append.
    async fn put(&self, path: &Path, stream: ByteStream, offset: i64) -> DriverResult<u64>;
}

/// Driver that tees every upload into a sink and, optionally, the backend.
pub struct TeeDriver {
    fs: Arc<dyn VfsOps>,
    resolver: PathResolver,
    sink: Arc<dyn UploadSink>,
    config: DriverConfig,
    uploads: TaskTracker,
    cancel: CancellationToken,
}

impl std::fmt::Debug for TeeDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TeeDriver")
            .field("root", &self.resolver.root())
            .field("config", &self.config)
            .field("in_flight_uploads", &self.uploads.len())
            .finish_non_exhaustive()
    }
}

impl TeeDriver {
    /// Create a driver over `fs`, confined to `root` inside it.
    pub fn new(
        fs: Arc<dyn VfsOps>,
        root: impl Into<PathBuf>,
        sink: Arc<dyn UploadSink>,
        config: DriverConfig,
    ) -> Self {
        Self {
            fs,
            resolver: PathResolver::new(root),
            sink,
            config,
            uploads: TaskTracker::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// The configuration this driver was built with.
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }
}

#[async_trait]
impl StorageDriver for TeeDriver {
    async fn stat(&self, path: &Path) -> DriverResult<FileAttr> {
        TeeDriver::stat(self, path).await
    }

    async fn list_dir(&self, path: &Path, visit: &mut ListVisitor<'_>) -> DriverResult<()> {
        TeeDriver::list_dir(self, path, visit).await
    }

    async fn delete_dir(&self, path: &Path) -> DriverResult<()> {
        TeeDriver::delete_dir(self, path).await
    }

    async fn delete_file(&self, path: &Path) -> DriverResult<()> {
        TeeDriver::delete_file(self, path).await
    }

    async fn rename(&self, from: &Path, to: &Path) -> DriverResult<()> {
        TeeDriver::rename(self, from, to).await
    }

    async fn make_dir(&self, path: &Path) -> DriverResult<()> {
        TeeDriver::make_dir(self, path).await
    }

    async fn change_dir(&self, path: &Path) -> DriverResult<()> {
        TeeDriver::change_dir(self, path).await
    }

    async fn get(&self, path: &Path, offset: u64) -> DriverResult<(u64, ByteStream)> {
        let (remaining, file) = TeeDriver::get(self, path, offset).await?;
        let stream: ByteStream = Box::new(file);
        Ok((remaining, stream))
    }

    async fn put(&self, path: &Path, stream: ByteStream, offset: i64) -> DriverResult<u64> {
        TeeDriver::put(self, path, stream, offset).await
    }
}
