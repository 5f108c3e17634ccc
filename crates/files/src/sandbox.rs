//! Directory-scoped file system access.
//!
//! [`SandboxRoot`] resolves caller-supplied relative paths against a fixed base directory and
//! refuses anything that would land outside it:
//!
//! - absolute paths and platform prefixes
//! - `..` components
//! - symlinks whose target resolves outside the root
//!
//! The root is canonicalised once at construction, so later containment checks compare
//! canonical paths.

use crate::{FilesError, FilesResult};
use std::fs::Metadata;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::fs::{self, File};

/// A base directory that all file operations are confined to.
#[derive(Debug, Clone)]
pub struct SandboxRoot {
    root: PathBuf,
}

impl SandboxRoot {
    /// Creates a sandbox rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns `FilesError::InvalidRootDirectory` if the directory does not exist, is not a
    /// directory, or cannot be canonicalised.
    pub fn new(root: &Path) -> FilesResult<Self> {
        if !root.exists() {
            return Err(FilesError::InvalidRootDirectory(format!(
                "Directory does not exist: {}",
                root.display()
            )));
        }

        if !root.is_dir() {
            return Err(FilesError::InvalidRootDirectory(format!(
                "Path is not a directory: {}",
                root.display()
            )));
        }

        let root = root.canonicalize().map_err(|e| {
            FilesError::InvalidRootDirectory(format!(
                "Cannot canonicalize path {}: {}",
                root.display(),
                e
            ))
        })?;

        Ok(Self { root })
    }

    /// Returns the canonicalised root directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves `path` to an absolute location inside the root.
    ///
    /// The deepest existing ancestor of the target (or the target itself) is canonicalised and
    /// must still lie inside the root, which catches symlinks pointing elsewhere. A dangling
    /// symlink anywhere along the way is refused.
    pub async fn resolve(&self, path: &str) -> FilesResult<PathBuf> {
        let joined = self.join(path)?;

        let mut ancestor = joined.as_path();
        loop {
            match fs::canonicalize(ancestor).await {
                Ok(real) => {
                    if !real.starts_with(&self.root) {
                        return Err(FilesError::InvalidPath(format!(
                            "{} escapes the storage root",
                            path
                        )));
                    }
                    break;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    if fs::symlink_metadata(ancestor).await.is_ok() {
                        return Err(FilesError::InvalidPath(format!(
                            "{} passes through a dangling symlink",
                            path
                        )));
                    }
                    match ancestor.parent() {
                        Some(parent) => ancestor = parent,
                        None => break,
                    }
                }
                Err(e) => return Err(FilesError::io("resolve", path, e)),
            }
        }

        Ok(joined)
    }

    /// Opens an existing file for reading.
    pub async fn open(&self, path: &str) -> FilesResult<File> {
        let resolved = self.resolve(path).await?;
        File::open(&resolved)
            .await
            .map_err(|e| FilesError::io("open", path, e))
    }

    /// Creates `path`, truncating it if it already exists. The parent directory must exist.
    pub async fn create(&self, path: &str) -> FilesResult<File> {
        let resolved = self.resolve(path).await?;
        File::create(&resolved)
            .await
            .map_err(|e| FilesError::io("create", path, e))
    }

    pub async fn stat(&self, path: &str) -> FilesResult<Metadata> {
        let resolved = self.resolve(path).await?;
        fs::metadata(&resolved)
            .await
            .map_err(|e| FilesError::io("stat", path, e))
    }

    /// Removes a file. Directories are refused with `FilesError::IsDirectory`.
    pub async fn remove(&self, path: &str) -> FilesResult<()> {
        let resolved = self.resolve(path).await?;
        let metadata = fs::symlink_metadata(&resolved)
            .await
            .map_err(|e| FilesError::io("remove", path, e))?;

        if metadata.is_dir() {
            return Err(FilesError::IsDirectory(path.to_owned()));
        }
        fs::remove_file(&resolved)
            .await
            .map_err(|e| FilesError::io("remove", path, e))
    }

    /// Creates a single directory. An existing directory at `path` is not an error.
    pub async fn mkdir(&self, path: &str) -> FilesResult<()> {
        let resolved = self.resolve(path).await?;
        match fs::create_dir(&resolved).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                match fs::metadata(&resolved).await {
                    Ok(metadata) if metadata.is_dir() => Ok(()),
                    _ => Err(FilesError::io("mkdir", path, e)),
                }
            }
            Err(e) => Err(FilesError::io("mkdir", path, e)),
        }
    }

    fn join(&self, path: &str) -> FilesResult<PathBuf> {
        if path.is_empty() {
            return Err(FilesError::InvalidPath("path is empty".into()));
        }

        let mut joined = self.root.clone();
        for component in Path::new(path).components() {
            match component {
                Component::Normal(part) => joined.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(FilesError::InvalidPath(format!(
                        "{} must be relative and must not contain '..'",
                        path
                    )));
                }
            }
        }

        if joined == self.root {
            return Err(FilesError::InvalidPath(format!(
                "{} does not name an entry below the root",
                path
            )));
        }

        Ok(joined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs as std_fs;
    use tempfile::TempDir;

    fn sandbox() -> (TempDir, SandboxRoot) {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("attachments");
        std_fs::create_dir_all(&root).unwrap();
        let sandbox = SandboxRoot::new(&root).unwrap();
        (temp, sandbox)
    }

    #[test]
    fn test_new_root_not_exists() {
        let temp = TempDir::new().unwrap();
        let result = SandboxRoot::new(&temp.path().join("missing"));
        assert!(matches!(result, Err(FilesError::InvalidRootDirectory(_))));
    }

    #[test]
    fn test_new_root_not_directory() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("file.txt");
        std_fs::write(&file, "not a directory").unwrap();

        let result = SandboxRoot::new(&file);
        assert!(matches!(result, Err(FilesError::InvalidRootDirectory(_))));
    }

    #[test]
    fn test_new_root_is_canonical() {
        let (temp, sandbox) = sandbox();
        let expected = temp.path().join("attachments").canonicalize().unwrap();
        assert_eq!(sandbox.root(), expected);
    }

    #[tokio::test]
    async fn test_resolve_nested_path() {
        let (_temp, sandbox) = sandbox();
        let resolved = sandbox.resolve("posts/2024/cover.png").await.unwrap();
        assert!(resolved.starts_with(sandbox.root()));
        assert!(resolved.ends_with("posts/2024/cover.png"));
    }

    #[tokio::test]
    async fn test_resolve_rejects_traversal() {
        let (_temp, sandbox) = sandbox();

        for path in ["../outside.txt", "posts/../../outside.txt", "/etc/passwd", "", "."] {
            let result = sandbox.resolve(path).await;
            assert!(
                matches!(result, Err(FilesError::InvalidPath(_))),
                "expected {:?} to be rejected",
                path
            );
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_resolve_rejects_escaping_symlink() {
        let (temp, sandbox) = sandbox();
        let outside = temp.path().join("outside.txt");
        std_fs::write(&outside, b"secret").unwrap();
        std::os::unix::fs::symlink(&outside, sandbox.root().join("link.txt")).unwrap();

        let result = sandbox.open("link.txt").await;
        assert!(matches!(result, Err(FilesError::InvalidPath(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_create_rejects_dangling_symlink() {
        let (temp, sandbox) = sandbox();
        let outside = temp.path().join("outside.txt");
        std::os::unix::fs::symlink(&outside, sandbox.root().join("link.txt")).unwrap();

        let result = sandbox.create("link.txt").await;

        assert!(matches!(result, Err(FilesError::InvalidPath(_))));
        assert!(!outside.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_create_rejects_dangling_symlinked_directory() {
        let (temp, sandbox) = sandbox();
        let outside = temp.path().join("outside");
        std::os::unix::fs::symlink(&outside, sandbox.root().join("linkdir")).unwrap();

        let result = sandbox.create("linkdir/a.txt").await;

        assert!(matches!(result, Err(FilesError::InvalidPath(_))));
        assert!(!outside.exists());
    }

    #[tokio::test]
    async fn test_stat_missing_is_not_found() {
        let (_temp, sandbox) = sandbox();
        let result = sandbox.stat("missing.txt").await;
        assert!(matches!(result, Err(FilesError::NotFound(path)) if path == "missing.txt"));
    }

    #[tokio::test]
    async fn test_create_requires_parent() {
        let (_temp, sandbox) = sandbox();
        let result = sandbox.create("no-such-dir/file.txt").await;
        assert!(matches!(result, Err(FilesError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_mkdir_is_idempotent() {
        let (_temp, sandbox) = sandbox();
        sandbox.mkdir("plants").await.unwrap();
        sandbox.mkdir("plants").await.unwrap();
        assert!(sandbox.root().join("plants").is_dir());
    }

    #[tokio::test]
    async fn test_mkdir_over_file_fails() {
        let (_temp, sandbox) = sandbox();
        std_fs::write(sandbox.root().join("plants"), b"file").unwrap();

        let result = sandbox.mkdir("plants").await;
        assert!(matches!(result, Err(FilesError::Io { op: "mkdir", .. })));
    }

    #[tokio::test]
    async fn test_remove_file() {
        let (_temp, sandbox) = sandbox();
        std_fs::write(sandbox.root().join("a.txt"), b"a").unwrap();

        sandbox.remove("a.txt").await.unwrap();

        assert!(!sandbox.root().join("a.txt").exists());
        assert!(matches!(
            sandbox.remove("a.txt").await,
            Err(FilesError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_remove_refuses_directory() {
        let (_temp, sandbox) = sandbox();
        std_fs::create_dir(sandbox.root().join("empty")).unwrap();

        let result = sandbox.remove("empty").await;

        assert!(matches!(result, Err(FilesError::IsDirectory(_))));
        assert!(sandbox.root().join("empty").is_dir());
    }
}
