//! Protocol path confinement.
//!
//! Protocol paths are relative to the driver root no matter how they are
//! spelled: `/a/b`, `a/b` and `./a//b` all land on `<root>/a/b`. Resolution
//! is purely lexical, which is all a protocol path needs; symlink confinement
//! is the backend's job.

use std::path::{Component, Path, PathBuf};

use super::error::{DriverError, DriverResult};

/// Maps protocol paths to backing paths under a fixed root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathResolver {
    root: PathBuf,
}

impl Default for PathResolver {
    fn default() -> Self {
        Self::new("/")
    }
}

impl PathResolver {
    /// Anchor resolution at `root`, normalized to an absolute path without a
    /// trailing slash.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root: PathBuf = root.into();
        let s = root.to_string_lossy();
        let s = s.trim_end_matches('/');
        let root = if s.is_empty() {
            PathBuf::from("/")
        } else if !s.starts_with('/') {
            PathBuf::from(format!("/{}", s))
        } else {
            PathBuf::from(s)
        };
        Self { root }
    }

    /// The root every resolved path starts with.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a protocol path.
    ///
    /// Empty and `.` segments are dropped and `..` pops one segment. A `..`
    /// with nothing left to pop fails with [`DriverError::PathEscapesRoot`].
    pub fn resolve(&self, path: impl AsRef<Path>) -> DriverResult<PathBuf> {
        let path = path.as_ref();
        let mut relative = PathBuf::new();
        for component in path.components() {
            match component {
                Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
                Component::ParentDir => {
                    if !relative.pop() {
                        return Err(DriverError::PathEscapesRoot(path.display().to_string()));
                    }
                }
                Component::Normal(segment) => relative.push(segment),
            }
        }
        Ok(self.root.join(relative))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::{Arbitrary, Gen, quickcheck};

    #[test]
    fn test_root_normalization() {
        assert_eq!(PathResolver::new("").root(), Path::new("/"));
        assert_eq!(PathResolver::new("/").root(), Path::new("/"));
        assert_eq!(PathResolver::new("spool/").root(), Path::new("/spool"));
        assert_eq!(PathResolver::new("/srv/ftp//").root(), Path::new("/srv/ftp"));
    }

    #[test]
    fn test_resolve_spellings() {
        let resolver = PathResolver::new("/srv");
        for spelling in ["/a/b", "a/b", "./a//b", "a/./b/", "a/c/../b"] {
            assert_eq!(
                resolver.resolve(spelling).unwrap(),
                PathBuf::from("/srv/a/b"),
                "{spelling}"
            );
        }
        assert_eq!(resolver.resolve("").unwrap(), PathBuf::from("/srv"));
        assert_eq!(resolver.resolve("/").unwrap(), PathBuf::from("/srv"));
    }

    #[test]
    fn test_resolve_rejects_climbing_out() {
        let resolver = PathResolver::new("/srv");
        for path in ["..", "/..", "a/../..", "../srv/a", "a/b/../../../etc/passwd"] {
            assert!(
                matches!(resolver.resolve(path), Err(DriverError::PathEscapesRoot(_))),
                "{path}"
            );
        }
        assert_eq!(resolver.resolve("a/..").unwrap(), PathBuf::from("/srv"));
    }

    #[derive(Debug, Clone)]
    struct Segment(&'static str);

    impl Arbitrary for Segment {
        fn arbitrary(g: &mut Gen) -> Self {
            const SEGMENTS: &[&str] = &["..", ".", "", "a", "b", "../..", "/"];
            Segment(g.choose(SEGMENTS).copied().unwrap_or("a"))
        }
    }

    /// Depth walk over the joined string; `None` once it drops below root.
    fn model_depth(path: &str) -> Option<usize> {
        let mut depth = 0usize;
        for segment in path.split('/') {
            match segment {
                "" | "." => {}
                ".." => depth = depth.checked_sub(1)?,
                _ => depth += 1,
            }
        }
        Some(depth)
    }

    quickcheck! {
        fn prop_resolve_stays_under_root(segments: Vec<Segment>) -> bool {
            let resolver = PathResolver::new("/srv/ftp");
            let path = segments.iter().map(|s| s.0).collect::<Vec<_>>().join("/");

            match (resolver.resolve(&path), model_depth(&path)) {
                (Ok(resolved), Some(depth)) => {
                    resolved.starts_with("/srv/ftp")
                        && resolved.components().count() == 3 + depth
                }
                (Err(DriverError::PathEscapesRoot(_)), None) => true,
                _ => false,
            }
        }
    }
}
