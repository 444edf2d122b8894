//! In-memory filesystem backend.
//!
//! Used for testing and for hosts that never persist uploads to disk.
//! All data is ephemeral.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::io::{self, SeekFrom};
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::SystemTime;
use tokio::io::{AsyncRead, AsyncSeek, AsyncWrite, ReadBuf};

use crate::vfs::error::{VfsError, VfsResult};
use crate::vfs::ops::{FileHandle, VfsFile, VfsOps};
use crate::vfs::types::{FileAttr, FileType, OpenFlags};

/// Contents of a file. Shared between the tree and open handles.
#[derive(Debug)]
struct FileNode {
    data: Vec<u8>,
    perm: u32,
    mtime: SystemTime,
}

impl FileNode {
    fn new() -> Self {
        Self {
            data: Vec::new(),
            perm: 0o644,
            mtime: SystemTime::now(),
        }
    }

    fn attr(&self, name: String) -> FileAttr {
        FileAttr {
            name,
            size: self.data.len() as u64,
            kind: FileType::File,
            perm: self.perm,
            mtime: self.mtime,
        }
    }
}

/// Entry in the memory filesystem.
#[derive(Debug, Clone)]
enum Entry {
    File(Arc<RwLock<FileNode>>),
    Directory { perm: u32, mtime: SystemTime },
}

impl Entry {
    fn directory() -> Self {
        Entry::Directory {
            perm: 0o755,
            mtime: SystemTime::now(),
        }
    }

    fn attr(&self, name: String) -> FileAttr {
        match self {
            Entry::File(node) => node.read().attr(name),
            Entry::Directory { perm, mtime } => FileAttr {
                name,
                size: 0,
                kind: FileType::Directory,
                perm: *perm,
                mtime: *mtime,
            },
        }
    }
}

/// In-memory filesystem backend.
///
/// Thread-safe via internal `RwLock`. Paths are kept in a sorted map so
/// directory listings and subtree removal are range scans. File contents are
/// reference counted: an open handle keeps its node alive even after the path
/// is removed or replaced.
#[derive(Debug)]
pub struct MemoryBackend {
    entries: RwLock<BTreeMap<PathBuf, Entry>>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Create a new empty in-memory filesystem.
    pub fn new() -> Self {
        let mut entries = BTreeMap::new();
        // Root directory always exists
        entries.insert(PathBuf::new(), Entry::directory());
        Self {
            entries: RwLock::new(entries),
        }
    }

    /// Normalize a path: remove leading `/`, resolve `.` and `..`.
    ///
    /// `..` at the root stays at the root.
    fn normalize(path: &Path) -> PathBuf {
        let mut result = PathBuf::new();
        for component in path.components() {
            match component {
                Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
                Component::ParentDir => {
                    result.pop();
                }
                Component::Normal(s) => result.push(s),
            }
        }
        result
    }

    /// Get the path string for error messages.
    fn path_str(path: &Path) -> String {
        format!("/{}", path.display())
    }

    /// Name reported for a normalized path.
    fn name_of(path: &Path) -> String {
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "/".to_string())
    }

    /// Require the parent of `path` to be an existing directory.
    fn check_parent(entries: &BTreeMap<PathBuf, Entry>, path: &Path) -> VfsResult<()> {
        let parent = path.parent().unwrap_or(Path::new(""));
        match entries.get(parent) {
            Some(Entry::Directory { .. }) => Ok(()),
            Some(Entry::File(_)) => Err(VfsError::not_a_directory(Self::path_str(parent))),
            None => Err(VfsError::not_found(Self::path_str(parent))),
        }
    }

    /// Entries strictly below `dir`.
    ///
    /// Paths order component by component, so a subtree is the contiguous
    /// run of keys right after `dir`.
    fn subtree<'a>(
        entries: &'a BTreeMap<PathBuf, Entry>,
        dir: &'a Path,
    ) -> impl Iterator<Item = (&'a PathBuf, &'a Entry)> + 'a {
        entries
            .range::<Path, _>((Bound::Excluded(dir), Bound::Unbounded))
            .take_while(move |(k, _)| k.starts_with(dir))
    }

    /// All keys strictly below `dir`.
    fn descendants(entries: &BTreeMap<PathBuf, Entry>, dir: &Path) -> Vec<PathBuf> {
        Self::subtree(entries, dir).map(|(k, _)| k.clone()).collect()
    }
}

/// Open handle on an in-memory file.
#[derive(Debug)]
struct MemoryFile {
    node: Arc<RwLock<FileNode>>,
    name: String,
    pos: u64,
    flags: OpenFlags,
}

impl MemoryFile {
    fn new(node: Arc<RwLock<FileNode>>, name: String, flags: OpenFlags) -> Self {
        Self {
            node,
            name,
            pos: 0,
            flags,
        }
    }
}

impl AsyncRead for MemoryFile {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if !this.flags.read {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "handle not opened for reading",
            )));
        }

        let node = this.node.read();
        let start = (this.pos as usize).min(node.data.len());
        let end = (start + buf.remaining()).min(node.data.len());
        buf.put_slice(&node.data[start..end]);
        this.pos = end as u64;
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for MemoryFile {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if !this.flags.write {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "handle not opened for writing",
            )));
        }

        let mut node = this.node.write();
        if this.flags.append {
            this.pos = node.data.len() as u64;
        }
        let offset = this.pos as usize;
        if offset + buf.len() > node.data.len() {
            node.data.resize(offset + buf.len(), 0);
        }
        node.data[offset..offset + buf.len()].copy_from_slice(buf);
        node.mtime = SystemTime::now();
        this.pos += buf.len() as u64;
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

impl AsyncSeek for MemoryFile {
    fn start_seek(self: Pin<&mut Self>, position: SeekFrom) -> io::Result<()> {
        let this = self.get_mut();
        let len = this.node.read().data.len() as i128;
        let target = match position {
            SeekFrom::Start(n) => n as i128,
            SeekFrom::End(n) => len + n as i128,
            SeekFrom::Current(n) => this.pos as i128 + n as i128,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of file",
            ));
        }
        this.pos = target as u64;
        Ok(())
    }

    fn poll_complete(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        Poll::Ready(Ok(self.pos))
    }
}

#[async_trait]
impl VfsFile for MemoryFile {
    async fn stat(&self) -> VfsResult<FileAttr> {
        Ok(self.node.read().attr(self.name.clone()))
    }
}

#[async_trait]
impl VfsOps for MemoryBackend {
    async fn stat(&self, path: &Path) -> VfsResult<FileAttr> {
        let normalized = Self::normalize(path);
        let entries = self.entries.read();

        entries
            .get(&normalized)
            .map(|e| e.attr(Self::name_of(&normalized)))
            .ok_or_else(|| VfsError::not_found(Self::path_str(&normalized)))
    }

    async fn read_dir(&self, path: &Path) -> VfsResult<Vec<FileAttr>> {
        let normalized = Self::normalize(path);
        let entries = self.entries.read();

        // Verify the path is a directory
        match entries.get(&normalized) {
            Some(Entry::Directory { .. }) => {}
            Some(Entry::File(_)) => {
                return Err(VfsError::not_a_directory(Self::path_str(&normalized)));
            }
            None => {
                return Err(VfsError::not_found(Self::path_str(&normalized)));
            }
        }

        // Direct children of the subtree, already sorted by name.
        let result = Self::subtree(&entries, &normalized)
            .filter(|(entry_path, _)| entry_path.parent() == Some(normalized.as_path()))
            .map(|(entry_path, entry)| entry.attr(Self::name_of(entry_path)))
            .collect();

        Ok(result)
    }

    async fn open(&self, path: &Path, flags: OpenFlags) -> VfsResult<FileHandle> {
        let normalized = Self::normalize(path);
        let entries = self.entries.read();

        match entries.get(&normalized) {
            Some(Entry::File(node)) => Ok(Box::new(MemoryFile::new(
                Arc::clone(node),
                Self::name_of(&normalized),
                flags,
            ))),
            Some(Entry::Directory { .. }) => {
                Err(VfsError::is_a_directory(Self::path_str(&normalized)))
            }
            None => Err(VfsError::not_found(Self::path_str(&normalized))),
        }
    }

    async fn create(&self, path: &Path) -> VfsResult<FileHandle> {
        let normalized = Self::normalize(path);
        if normalized.as_os_str().is_empty() {
            return Err(VfsError::is_a_directory("/"));
        }

        let mut entries = self.entries.write();
        Self::check_parent(&entries, &normalized)?;

        if let Some(Entry::Directory { .. }) = entries.get(&normalized) {
            return Err(VfsError::is_a_directory(Self::path_str(&normalized)));
        }

        let node = Arc::new(RwLock::new(FileNode::new()));
        entries.insert(normalized.clone(), Entry::File(Arc::clone(&node)));

        Ok(Box::new(MemoryFile::new(
            node,
            Self::name_of(&normalized),
            OpenFlags {
                read: false,
                write: true,
                append: false,
            },
        )))
    }

    async fn remove(&self, path: &Path) -> VfsResult<()> {
        let normalized = Self::normalize(path);

        if normalized.as_os_str().is_empty() {
            return Err(VfsError::permission_denied("cannot remove root"));
        }

        let mut entries = self.entries.write();

        match entries.get(&normalized) {
            Some(Entry::Directory { .. }) => {
                if Self::subtree(&entries, &normalized).next().is_some() {
                    return Err(VfsError::directory_not_empty(Self::path_str(&normalized)));
                }
            }
            Some(Entry::File(_)) => {}
            None => return Err(VfsError::not_found(Self::path_str(&normalized))),
        }

        entries.remove(&normalized);
        Ok(())
    }

    async fn remove_all(&self, path: &Path) -> VfsResult<()> {
        let normalized = Self::normalize(path);

        if normalized.as_os_str().is_empty() {
            return Err(VfsError::permission_denied("cannot remove root"));
        }

        let mut entries = self.entries.write();

        if entries.remove(&normalized).is_none() {
            return Err(VfsError::not_found(Self::path_str(&normalized)));
        }
        for child in Self::descendants(&entries, &normalized) {
            entries.remove(&child);
        }
        Ok(())
    }

    async fn rename(&self, from: &Path, to: &Path) -> VfsResult<()> {
        let from_normalized = Self::normalize(from);
        let to_normalized = Self::normalize(to);

        if from_normalized.as_os_str().is_empty() || to_normalized.as_os_str().is_empty() {
            return Err(VfsError::permission_denied("cannot rename root"));
        }
        if to_normalized.starts_with(&from_normalized) && to_normalized != from_normalized {
            return Err(VfsError::invalid_path(format!(
                "cannot move {} into itself",
                Self::path_str(&from_normalized)
            )));
        }

        let mut entries = self.entries.write();

        if !entries.contains_key(&from_normalized) {
            return Err(VfsError::not_found(Self::path_str(&from_normalized)));
        }
        Self::check_parent(&entries, &to_normalized)?;
        if from_normalized == to_normalized {
            return Ok(());
        }

        // Same rules as rename(2): like replaces like, directories only when empty.
        let source_is_dir = matches!(entries.get(&from_normalized), Some(Entry::Directory { .. }));
        match entries.get(&to_normalized) {
            Some(Entry::Directory { .. }) if !source_is_dir => {
                return Err(VfsError::is_a_directory(Self::path_str(&to_normalized)));
            }
            Some(Entry::File(_)) if source_is_dir => {
                return Err(VfsError::not_a_directory(Self::path_str(&to_normalized)));
            }
            Some(Entry::Directory { .. }) => {
                if Self::subtree(&entries, &to_normalized).next().is_some() {
                    return Err(VfsError::directory_not_empty(Self::path_str(&to_normalized)));
                }
            }
            _ => {}
        }

        // Remove source entry
        let Some(entry) = entries.remove(&from_normalized) else {
            return Err(VfsError::not_found(Self::path_str(&from_normalized)));
        };

        // If it's a directory, we need to rename all children too
        if matches!(entry, Entry::Directory { .. }) {
            for child in Self::descendants(&entries, &from_normalized) {
                if let Some(child_entry) = entries.remove(&child) {
                    if let Ok(relative) = child.strip_prefix(&from_normalized) {
                        entries.insert(to_normalized.join(relative), child_entry);
                    }
                }
            }
        }

        // Insert at new location (possibly overwriting)
        entries.insert(to_normalized, entry);
        Ok(())
    }

    async fn mkdir_all(&self, path: &Path) -> VfsResult<()> {
        let normalized = Self::normalize(path);
        let mut entries = self.entries.write();

        let mut current = PathBuf::new();
        for component in normalized.components() {
            current.push(component);
            match entries.get(&current) {
                Some(Entry::Directory { .. }) => {}
                Some(Entry::File(_)) => {
                    return Err(VfsError::already_exists(Self::path_str(&current)));
                }
                None => {
                    entries.insert(current.clone(), Entry::directory());
                }
            }
        }
        Ok(())
    }

    fn read_only(&self) -> bool {
        false
    }
}
