//! VFS operations trait.
//!
//! Path-based operations plus streaming file handles. Protocol paths are
//! resolved by the driver before they reach a backend; backends only ever
//! see paths relative to their own root.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncSeek, AsyncWrite};

use super::types::{FileAttr, OpenFlags, WalkControl};
use super::VfsResult;

/// An open file in a backend.
///
/// Handles are released when dropped. Writers should be shut down
/// (`AsyncWriteExt::shutdown`) before being dropped so buffered bytes reach
/// the backing store.
#[async_trait]
pub trait VfsFile: AsyncRead + AsyncWrite + AsyncSeek + Send + Sync + Unpin {
    /// Attributes of the node this handle refers to.
    async fn stat(&self) -> VfsResult<FileAttr>;
}

/// Boxed file handle returned by backends.
pub type FileHandle = Box<dyn VfsFile>;

/// Visitor called by [`VfsOps::walk`] with the entry path and its attributes.
pub type WalkVisitor<'a> = dyn FnMut(&Path, &FileAttr) -> VfsResult<WalkControl> + Send + 'a;

/// Core VFS operations trait.
#[async_trait]
pub trait VfsOps: Send + Sync {
    // ========================================================================
    // Reading
    // ========================================================================

    /// Get attributes without following a trailing symlink.
    async fn stat(&self, path: &Path) -> VfsResult<FileAttr>;

    /// Read directory entries, sorted by name.
    async fn read_dir(&self, path: &Path) -> VfsResult<Vec<FileAttr>>;

    /// Open an existing file.
    ///
    /// Fails with `IsADirectory` for directories.
    async fn open(&self, path: &Path, flags: OpenFlags) -> VfsResult<FileHandle>;

    // ========================================================================
    // Writing
    // ========================================================================

    /// Create a fresh, empty file opened for writing.
    ///
    /// A file already at `path` is replaced. Handles opened on the old file
    /// keep pointing at the old node, so two writers never share one.
    /// The parent directory must exist.
    async fn create(&self, path: &Path) -> VfsResult<FileHandle>;

    /// Remove a file or an empty directory.
    async fn remove(&self, path: &Path) -> VfsResult<()>;

    /// Remove a path and everything under it.
    async fn remove_all(&self, path: &Path) -> VfsResult<()>;

    /// Rename a file or directory.
    async fn rename(&self, from: &Path, to: &Path) -> VfsResult<()>;

    /// Create a directory and all missing parents. Succeeds if it exists.
    async fn mkdir_all(&self, path: &Path) -> VfsResult<()>;

    // ========================================================================
    // Metadata
    // ========================================================================

    /// Returns true if this filesystem is read-only.
    fn read_only(&self) -> bool;

    // ========================================================================
    // Convenience methods (default implementations)
    // ========================================================================

    /// Get attributes, following a trailing symlink.
    ///
    /// The reported name stays the one `path` ends in. Backends without
    /// symlinks can rely on the default.
    async fn stat_follow(&self, path: &Path) -> VfsResult<FileAttr> {
        self.stat(path).await
    }

    /// Check if a path exists.
    async fn exists(&self, path: &Path) -> bool {
        self.stat(path).await.is_ok()
    }

    /// Walk the tree rooted at `root` depth-first in lexical order.
    ///
    /// The root itself is visited first, with a trailing symlink followed so
    /// a link to a directory walks the directory. Returning [`WalkControl::SkipDir`]
    /// for a directory prunes its subtree; any error aborts the walk.
    async fn walk(&self, root: &Path, visit: &mut WalkVisitor<'_>) -> VfsResult<()> {
        let attr = self.stat_follow(root).await?;
        let mut stack: Vec<(PathBuf, FileAttr)> = vec![(root.to_path_buf(), attr)];

        while let Some((path, attr)) = stack.pop() {
            let control = visit(&path, &attr)?;
            if !attr.is_dir() || control == WalkControl::SkipDir {
                continue;
            }

            let children = self.read_dir(&path).await?;
            // Reverse so the smallest name is popped first.
            for child in children.into_iter().rev() {
                stack.push((path.join(&child.name), child));
            }
        }

        Ok(())
    }
}
