//! Directory and metadata operations.

use std::path::Path;
use tracing::debug;

use super::error::{DriverError, DriverResult};
use super::{ListVisitor, TeeDriver};
use crate::vfs::{FileAttr, VfsError, VfsResult, WalkControl};

impl TeeDriver {
    /// Attributes of `path`, straight from the backend.
    #[tracing::instrument(skip_all, name = "driver.stat")]
    pub async fn stat(&self, path: impl AsRef<Path>) -> DriverResult<FileAttr> {
        let real = self.resolver.resolve(path)?;
        debug!("stat {}", real.display());
        Ok(self.fs.stat(&real).await?)
    }

    /// Deliver the direct children of a directory to `visit`, in name order.
    ///
    /// The directory's own entry is not delivered. Listing a file delivers
    /// the file. The first error returned by `visit` stops the listing and is
    /// returned unchanged.
    #[tracing::instrument(skip_all, name = "driver.list_dir")]
    pub async fn list_dir(
        &self,
        path: impl AsRef<Path>,
        visit: &mut ListVisitor<'_>,
    ) -> DriverResult<()> {
        let base = self.resolver.resolve(path)?;
        debug!("list {}", base.display());

        let mut aborted: Option<DriverError> = None;
        let mut filter = |entry: &Path, attr: &FileAttr| -> VfsResult<WalkControl> {
            let rel = entry.strip_prefix(&base).unwrap_or(entry);
            let is_base = rel.as_os_str().is_empty();

            if is_base {
                if attr.is_dir() {
                    return Ok(WalkControl::Continue);
                }
            } else if rel != Path::new(&attr.name) {
                // Below depth one.
                return Ok(WalkControl::SkipDir);
            }

            if let Err(err) = visit(attr.clone()) {
                aborted = Some(err);
                return Err(VfsError::other("listing aborted by visitor"));
            }

            if is_base {
                Ok(WalkControl::Continue)
            } else {
                Ok(WalkControl::SkipDir)
            }
        };

        let walked = self.fs.walk(&base, &mut filter).await;
        if let Some(err) = aborted {
            return Err(err);
        }
        Ok(walked?)
    }

    /// Remove a directory recursively.
    #[tracing::instrument(skip_all, name = "driver.delete_dir")]
    pub async fn delete_dir(&self, path: impl AsRef<Path>) -> DriverResult<()> {
        let real = self.resolver.resolve(path)?;
        let attr = self.fs.stat(&real).await?;
        if !attr.is_dir() {
            return Err(DriverError::NotADirectory(real.display().to_string()));
        }
        debug!("rmdir {}", real.display());
        Ok(self.fs.remove_all(&real).await?)
    }

    /// Remove a file.
    #[tracing::instrument(skip_all, name = "driver.delete_file")]
    pub async fn delete_file(&self, path: impl AsRef<Path>) -> DriverResult<()> {
        let real = self.resolver.resolve(path)?;
        let attr = self.fs.stat(&real).await?;
        if attr.is_dir() {
            return Err(DriverError::NotAFile(real.display().to_string()));
        }
        debug!("rm {}", real.display());
        Ok(self.fs.remove(&real).await?)
    }

    /// Rename `from` to `to`. Existence is left to the backend to check.
    #[tracing::instrument(skip_all, name = "driver.rename")]
    pub async fn rename(&self, from: impl AsRef<Path>, to: impl AsRef<Path>) -> DriverResult<()> {
        let from = self.resolver.resolve(from)?;
        let to = self.resolver.resolve(to)?;
        debug!("mv {} -> {}", from.display(), to.display());
        Ok(self.fs.rename(&from, &to).await?)
    }

    /// Create a directory and any missing parents. Existing directories are
    /// left alone.
    #[tracing::instrument(skip_all, name = "driver.make_dir")]
    pub async fn make_dir(&self, path: impl AsRef<Path>) -> DriverResult<()> {
        let real = self.resolver.resolve(path)?;
        debug!("mkdir {}", real.display());
        Ok(self.fs.mkdir_all(&real).await?)
    }

    /// Succeeds only if `path` is an existing directory.
    #[tracing::instrument(skip_all, name = "driver.change_dir")]
    pub async fn change_dir(&self, path: impl AsRef<Path>) -> DriverResult<()> {
        let real = self.resolver.resolve(path)?;
        let attr = self.fs.stat(&real).await?;
        if !attr.is_dir() {
            return Err(DriverError::NotADirectory(real.display().to_string()));
        }
        Ok(())
    }
}
