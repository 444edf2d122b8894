//! Virtual Filesystem abstraction.
//!
//! This is the backing store the driver confines protocol paths to.
//! Key components:
//!
//! - [`VfsOps`] - Core trait for filesystem operations
//! - [`VfsFile`] - Streaming handle returned by `open` and `create`
//! - [`MemoryBackend`] - In-memory filesystem (for testing, ephemeral hosts)
//! - [`LocalBackend`] - Local filesystem access (with path security)
//!
//! ## Design Decisions
//!
//! - **Path-based**: Operations take paths relative to the backend root.
//! - **Streaming handles**: Uploads and downloads are copied through
//!   `AsyncRead`/`AsyncWrite` handles instead of buffered in memory.
//! - **Replace, never share**: `create` gives every writer its own node, so
//!   concurrent overwrites of one path cannot interleave.

pub mod backends;
mod error;
mod ops;
mod types;

pub use backends::{LocalBackend, MemoryBackend};
pub use error::{VfsError, VfsResult};
pub use ops::{FileHandle, VfsFile, VfsOps, WalkVisitor};
pub use types::{FileAttr, FileType, OpenFlags, WalkControl};
