//! # ftp2printer-driver
//!
//! Storage driver behind the ftp2printer protocol engine.
//!
//! Every protocol path is confined to one root inside a [`VfsOps`] backend.
//! Every upload is tee'd: one copy always goes to an [`UploadSink`] (the
//! printer side), the other is persisted only when `keep_files` is set.
//!
//! ```no_run
//! use std::sync::Arc;
//! use ftp2printer_driver::{DiscardSink, DriverConfig, LocalBackend, TeeDriver};
//!
//! # async fn demo() -> Result<(), ftp2printer_driver::DriverError> {
//! let fs = Arc::new(LocalBackend::new("/var/spool/ftp"));
//! let config = DriverConfig::default().with_keep_files(true);
//! let driver = TeeDriver::new(fs, "/", Arc::new(DiscardSink), config);
//!
//! driver.put("/job.ps", &b"%!PS-Adobe-3.0\n"[..], -1).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod driver;
pub mod vfs;

pub use config::{ConfigError, DriverConfig};
pub use driver::{
    ByteStream, DEFAULT_TEE_BUFFER, DiscardSink, DriverError, DriverResult, ListVisitor,
    PathResolver, PutOffset, StorageDriver, TeeDriver, TeeReader, UploadSink, tee,
};
pub use vfs::{
    FileAttr, FileHandle, FileType, LocalBackend, MemoryBackend, OpenFlags, VfsError, VfsFile,
    VfsOps, VfsResult,
};
