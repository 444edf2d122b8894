//! Local filesystem backend.
//!
//! Provides access to real filesystem paths, with path security
//! to prevent escaping the root directory.

use async_trait::async_trait;
use std::io::{self, SeekFrom};
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncSeek, AsyncWrite, ReadBuf};

use crate::vfs::error::{VfsError, VfsResult, io_at};
use crate::vfs::ops::{FileHandle, VfsFile, VfsOps};
use crate::vfs::types::{FileAttr, FileType, OpenFlags};

/// How many times `create` retries the unlink/exclusive-create dance when
/// other writers keep recreating the same path.
const CREATE_ATTEMPTS: usize = 8;

/// Local filesystem backend.
///
/// All operations are relative to `root`. For example, if `root` is
/// `/var/spool/ftp`, then `stat("inbox/job.pdf")` stats
/// `/var/spool/ftp/inbox/job.pdf`.
///
/// Path security is enforced: attempts to escape via `..` or via symlinks
/// that point outside the root are rejected with `PathEscapesRoot`.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
    read_only: bool,
}

impl LocalBackend {
    /// Create a new local filesystem rooted at the given path.
    ///
    /// The root is canonicalized at construction time to handle symlinks
    /// (e.g. macOS `/tmp` → `/private/tmp`).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root: PathBuf = root.into();
        let root = dunce::canonicalize(&root).unwrap_or(root);
        Self {
            root,
            read_only: false,
        }
    }

    /// Create a read-only local filesystem.
    pub fn read_only(root: impl Into<PathBuf>) -> Self {
        let mut backend = Self::new(root);
        backend.read_only = true;
        backend
    }

    /// Set whether this filesystem is read-only.
    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    /// Get the root path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lexically normalize a backend path: drop `/` and `.`, apply `..`.
    fn lexical(path: &Path) -> VfsResult<PathBuf> {
        let mut result = PathBuf::new();
        for component in path.components() {
            match component {
                Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
                Component::ParentDir => {
                    if !result.pop() {
                        return Err(VfsError::path_escapes_root(path.display().to_string()));
                    }
                }
                Component::Normal(s) => result.push(s),
            }
        }
        Ok(result)
    }

    /// Resolve a relative path to an absolute path within the root.
    ///
    /// Intermediate symlinks are followed and must stay under the root. The
    /// final component is not followed, so `stat` and `remove` act on a
    /// symlink itself.
    fn resolve(&self, path: &Path) -> VfsResult<PathBuf> {
        let relative = Self::lexical(path)?;

        let mut components: Vec<_> = relative.components().collect();
        let Some(last) = components.pop() else {
            return Ok(self.root.clone());
        };

        let mut current = self.root.clone();
        for component in components {
            let next = current.join(component);
            match std::fs::symlink_metadata(&next) {
                Ok(meta) if meta.file_type().is_symlink() => {
                    let target = dunce::canonicalize(&next).map_err(io_at(&next))?;
                    if !target.starts_with(&self.root) {
                        return Err(VfsError::path_escapes_root(format!(
                            "{} is not under {}",
                            target.display(),
                            self.root.display()
                        )));
                    }
                    current = target;
                }
                // Missing components are appended lexically; the operation
                // itself reports NotFound.
                Ok(_) | Err(_) => current = next,
            }
        }

        Ok(current.join(last))
    }

    /// Follow a final-component symlink and verify the target stays under root.
    fn confine_target(&self, full: &Path) -> VfsResult<PathBuf> {
        let target = dunce::canonicalize(full).map_err(io_at(full))?;
        if !target.starts_with(&self.root) {
            return Err(VfsError::path_escapes_root(format!(
                "{} is not under {}",
                target.display(),
                self.root.display()
            )));
        }
        Ok(target)
    }

    /// Check if write operations are allowed.
    fn check_writable(&self) -> VfsResult<()> {
        if self.read_only {
            Err(VfsError::ReadOnly)
        } else {
            Ok(())
        }
    }

    /// Name reported for `path`: its last component, `/` for the root.
    fn name_of(path: &Path) -> String {
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "/".to_string())
    }

    /// Convert std::fs::Metadata to FileAttr.
    fn metadata_to_attr(name: String, meta: &std::fs::Metadata) -> FileAttr {
        let kind = if meta.is_dir() {
            FileType::Directory
        } else if meta.file_type().is_symlink() {
            FileType::Symlink
        } else {
            FileType::File
        };

        FileAttr {
            name,
            size: meta.len(),
            kind,
            perm: meta.permissions().mode(),
            mtime: meta.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH),
        }
    }
}

/// Open file on the local filesystem.
#[derive(Debug)]
struct LocalFile {
    file: fs::File,
    name: String,
}

impl AsyncRead for LocalFile {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().file).poll_read(cx, buf)
    }
}

impl AsyncWrite for LocalFile {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().file).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().file).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().file).poll_shutdown(cx)
    }
}

impl AsyncSeek for LocalFile {
    fn start_seek(self: Pin<&mut Self>, position: SeekFrom) -> io::Result<()> {
        Pin::new(&mut self.get_mut().file).start_seek(position)
    }

    fn poll_complete(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        Pin::new(&mut self.get_mut().file).poll_complete(cx)
    }
}

#[async_trait]
impl VfsFile for LocalFile {
    async fn stat(&self) -> VfsResult<FileAttr> {
        let meta = self.file.metadata().await?;
        Ok(LocalBackend::metadata_to_attr(self.name.clone(), &meta))
    }
}

#[async_trait]
impl VfsOps for LocalBackend {
    async fn stat(&self, path: &Path) -> VfsResult<FileAttr> {
        let full_path = self.resolve(path)?;
        let meta = fs::symlink_metadata(&full_path)
            .await
            .map_err(io_at(&full_path))?;
        Ok(Self::metadata_to_attr(Self::name_of(&full_path), &meta))
    }

    async fn stat_follow(&self, path: &Path) -> VfsResult<FileAttr> {
        let full_path = self.resolve(path)?;
        let target = self.confine_target(&full_path)?;
        let meta = fs::metadata(&target).await.map_err(io_at(&full_path))?;
        Ok(Self::metadata_to_attr(Self::name_of(&full_path), &meta))
    }

    async fn read_dir(&self, path: &Path) -> VfsResult<Vec<FileAttr>> {
        let full_path = self.resolve(path)?;
        let full_path = self.confine_target(&full_path)?;
        let mut entries = Vec::new();
        let mut dir = fs::read_dir(&full_path).await.map_err(io_at(&full_path))?;

        while let Some(entry) = dir.next_entry().await.map_err(io_at(&full_path))? {
            let meta = entry.metadata().await.map_err(io_at(&entry.path()))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            entries.push(Self::metadata_to_attr(name, &meta));
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn open(&self, path: &Path, flags: OpenFlags) -> VfsResult<FileHandle> {
        if flags.write {
            self.check_writable()?;
        }
        let full_path = self.resolve(path)?;
        let target = self.confine_target(&full_path)?;

        let meta = fs::metadata(&target).await.map_err(io_at(&full_path))?;
        if meta.is_dir() {
            return Err(VfsError::is_a_directory(full_path.display().to_string()));
        }

        let file = fs::OpenOptions::new()
            .read(flags.read)
            .write(flags.write)
            .append(flags.append)
            .open(&target)
            .await
            .map_err(io_at(&full_path))?;

        Ok(Box::new(LocalFile {
            file,
            name: Self::name_of(&full_path),
        }))
    }

    async fn create(&self, path: &Path) -> VfsResult<FileHandle> {
        self.check_writable()?;
        let full_path = self.resolve(path)?;
        let name = Self::name_of(&full_path);

        // Exclusive creation guarantees this handle owns a fresh inode. An
        // existing file is unlinked first; a writer still holding it keeps
        // writing to the orphaned inode.
        for _ in 0..CREATE_ATTEMPTS {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&full_path)
                .await
            {
                Ok(file) => return Ok(Box::new(LocalFile { file, name })),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    match fs::remove_file(&full_path).await {
                        Ok(()) => {}
                        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                        Err(e) => return Err(VfsError::from_io(e, &full_path)),
                    }
                }
                Err(e) => return Err(VfsError::from_io(e, &full_path)),
            }
        }

        Err(VfsError::other(format!(
            "could not create {} after {} attempts",
            full_path.display(),
            CREATE_ATTEMPTS
        )))
    }

    async fn remove(&self, path: &Path) -> VfsResult<()> {
        self.check_writable()?;
        let full_path = self.resolve(path)?;
        if full_path == self.root {
            return Err(VfsError::permission_denied("cannot remove root"));
        }

        let meta = fs::symlink_metadata(&full_path)
            .await
            .map_err(io_at(&full_path))?;
        if meta.is_dir() {
            fs::remove_dir(&full_path).await.map_err(io_at(&full_path))
        } else {
            fs::remove_file(&full_path).await.map_err(io_at(&full_path))
        }
    }

    async fn remove_all(&self, path: &Path) -> VfsResult<()> {
        self.check_writable()?;
        let full_path = self.resolve(path)?;
        if full_path == self.root {
            return Err(VfsError::permission_denied("cannot remove root"));
        }

        let meta = fs::symlink_metadata(&full_path)
            .await
            .map_err(io_at(&full_path))?;
        if meta.is_dir() {
            fs::remove_dir_all(&full_path)
                .await
                .map_err(io_at(&full_path))
        } else {
            fs::remove_file(&full_path).await.map_err(io_at(&full_path))
        }
    }

    async fn rename(&self, from: &Path, to: &Path) -> VfsResult<()> {
        self.check_writable()?;
        let from_path = self.resolve(from)?;
        let to_path = self.resolve(to)?;

        fs::rename(&from_path, &to_path)
            .await
            .map_err(io_at(&from_path))
    }

    async fn mkdir_all(&self, path: &Path) -> VfsResult<()> {
        self.check_writable()?;
        let full_path = self.resolve(path)?;
        fs::create_dir_all(&full_path)
            .await
            .map_err(io_at(&full_path))
    }

    fn read_only(&self) -> bool {
        self.read_only
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use crate::vfs::types::WalkControl;

    fn setup() -> (LocalBackend, TempDir) {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::new(dir.path());
        (backend, dir)
    }

    async fn write_file(backend: &LocalBackend, path: &str, data: &[u8]) {
        let mut file = backend.create(Path::new(path)).await.unwrap();
        file.write_all(data).await.unwrap();
        file.shutdown().await.unwrap();
    }

    async fn read_file(backend: &LocalBackend, path: &str) -> Vec<u8> {
        let mut file = backend
            .open(Path::new(path), OpenFlags::read())
            .await
            .unwrap();
        let mut data = Vec::new();
        file.read_to_end(&mut data).await.unwrap();
        data
    }

    #[tokio::test]
    async fn test_create_and_read() {
        let (backend, _dir) = setup();

        write_file(&backend, "test.txt", b"hello world").await;

        assert_eq!(read_file(&backend, "test.txt").await, b"hello world");
        let attr = backend.stat(Path::new("test.txt")).await.unwrap();
        assert!(attr.is_file());
        assert_eq!(attr.name, "test.txt");
        assert_eq!(attr.size, 11);
    }

    #[tokio::test]
    async fn test_create_replaces_existing_node() {
        let (backend, _dir) = setup();

        let mut first = backend.create(Path::new("job.txt")).await.unwrap();
        let mut second = backend.create(Path::new("job.txt")).await.unwrap();

        second.write_all(b"second").await.unwrap();
        second.shutdown().await.unwrap();
        // The first writer lost the path; its bytes go to an unlinked inode.
        first.write_all(b"first writer, late").await.unwrap();
        first.shutdown().await.unwrap();

        assert_eq!(read_file(&backend, "job.txt").await, b"second");
    }

    #[tokio::test]
    async fn test_append_handle() {
        let (backend, _dir) = setup();
        write_file(&backend, "log.txt", b"abc").await;

        let mut file = backend
            .open(Path::new("log.txt"), OpenFlags::append())
            .await
            .unwrap();
        assert_eq!(file.stat().await.unwrap().size, 3);
        file.write_all(b"def").await.unwrap();
        file.shutdown().await.unwrap();

        assert_eq!(read_file(&backend, "log.txt").await, b"abcdef");
    }

    #[tokio::test]
    async fn test_open_directory_fails() {
        let (backend, _dir) = setup();
        backend.mkdir_all(Path::new("spool")).await.unwrap();

        let result = backend.open(Path::new("spool"), OpenFlags::read()).await;
        assert!(matches!(result, Err(VfsError::IsADirectory(_))));
    }

    #[tokio::test]
    async fn test_mkdir_and_read_dir() {
        let (backend, _dir) = setup();

        backend.mkdir_all(Path::new("a/b/c")).await.unwrap();
        // Idempotent
        backend.mkdir_all(Path::new("a/b/c")).await.unwrap();
        write_file(&backend, "a/z.txt", b"z").await;

        let entries = backend.read_dir(Path::new("a")).await.unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["b", "z.txt"]);
        assert!(entries[0].is_dir());
        assert!(entries[1].is_file());
    }

    #[tokio::test]
    async fn test_read_only() {
        let (mut backend, _dir) = setup();
        backend.set_read_only(true);

        let result = backend.create(Path::new("test.txt")).await;
        assert!(matches!(result, Err(VfsError::ReadOnly)));
        assert!(backend.read_only());
    }

    #[tokio::test]
    async fn test_path_escape_blocked() {
        let (backend, _dir) = setup();

        let result = backend.stat(Path::new("../../../etc/passwd")).await;
        assert!(matches!(result, Err(VfsError::PathEscapesRoot(_))));
    }

    #[tokio::test]
    async fn test_symlink_escape_blocked() {
        let outside = TempDir::new().unwrap();
        std::fs::write(outside.path().join("secret.txt"), "secret").unwrap();

        let (backend, dir) = setup();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("escape")).unwrap();
        std::os::unix::fs::symlink(
            outside.path().join("secret.txt"),
            dir.path().join("secret-link"),
        )
        .unwrap();

        let through_dir = backend.stat(Path::new("escape/secret.txt")).await;
        assert!(matches!(through_dir, Err(VfsError::PathEscapesRoot(_))));

        let through_file = backend
            .open(Path::new("secret-link"), OpenFlags::read())
            .await;
        assert!(matches!(through_file, Err(VfsError::PathEscapesRoot(_))));

        // The link itself is still visible and removable.
        let attr = backend.stat(Path::new("secret-link")).await.unwrap();
        assert!(attr.is_symlink());
        backend.remove(Path::new("secret-link")).await.unwrap();
        assert!(outside.path().join("secret.txt").exists());
    }

    #[tokio::test]
    async fn test_stat_follow_and_walk_through_link() {
        let (backend, dir) = setup();
        backend.mkdir_all(Path::new("real")).await.unwrap();
        write_file(&backend, "real/a.txt", b"a").await;
        std::os::unix::fs::symlink(dir.path().join("real"), dir.path().join("link")).unwrap();

        let attr = backend.stat_follow(Path::new("link")).await.unwrap();
        assert!(attr.is_dir());
        assert_eq!(attr.name, "link");
        assert!(backend.stat(Path::new("link")).await.unwrap().is_symlink());

        let mut seen = Vec::new();
        backend
            .walk(Path::new("/link"), &mut |path: &Path, _attr: &FileAttr| {
                seen.push(path.display().to_string());
                Ok(WalkControl::Continue)
            })
            .await
            .unwrap();
        assert_eq!(seen, vec!["/link", "/link/a.txt"]);

        let outside = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("escape")).unwrap();
        let result = backend.stat_follow(Path::new("escape")).await;
        assert!(matches!(result, Err(VfsError::PathEscapesRoot(_))));
    }

    #[tokio::test]
    async fn test_remove_and_remove_all() {
        let (backend, _dir) = setup();
        backend.mkdir_all(Path::new("tree/deep")).await.unwrap();
        write_file(&backend, "tree/deep/f.txt", b"x").await;

        let not_empty = backend.remove(Path::new("tree")).await;
        assert!(matches!(not_empty, Err(VfsError::DirectoryNotEmpty(_))));

        backend.remove_all(Path::new("tree")).await.unwrap();
        assert!(!backend.exists(Path::new("tree")).await);

        let root = backend.remove_all(Path::new("/")).await;
        assert!(matches!(root, Err(VfsError::PermissionDenied(_))));
    }

    #[tokio::test]
    async fn test_rename() {
        let (backend, _dir) = setup();
        write_file(&backend, "old.txt", b"content").await;

        backend
            .rename(Path::new("old.txt"), Path::new("new.txt"))
            .await
            .unwrap();

        assert!(matches!(
            backend.stat(Path::new("old.txt")).await,
            Err(VfsError::NotFound(_))
        ));
        assert_eq!(read_file(&backend, "new.txt").await, b"content");
    }

    #[tokio::test]
    async fn test_rename_missing_source() {
        let (backend, _dir) = setup();

        let result = backend
            .rename(Path::new("ghost.txt"), Path::new("new.txt"))
            .await;
        assert!(matches!(result, Err(VfsError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_walk_lexical_preorder() {
        let (backend, _dir) = setup();
        backend.mkdir_all(Path::new("d/b")).await.unwrap();
        write_file(&backend, "d/a.txt", b"").await;
        write_file(&backend, "d/b/c.txt", b"").await;
        write_file(&backend, "d/e.txt", b"").await;

        let mut seen = Vec::new();
        backend
            .walk(Path::new("/d"), &mut |path, _attr| {
                seen.push(path.to_string_lossy().into_owned());
                Ok(WalkControl::Continue)
            })
            .await
            .unwrap();

        assert_eq!(seen, vec!["/d", "/d/a.txt", "/d/b", "/d/b/c.txt", "/d/e.txt"]);
    }
}
