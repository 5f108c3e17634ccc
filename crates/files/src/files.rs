//! Path-scoped file client
//!
//! This module provides [`FileClient`], the entry point for reading, writing, inspecting and
//! removing attachment files. It combines three pieces:
//!
//! - [`SandboxRoot`] confines every path to the configured storage root
//! - [`PathLockTable`] serialises writers per path while letting readers overlap
//! - [`ReadHandle`] streams file contents through a dedicated worker task
//!
//! # Locking
//!
//! | Operation | Lock                                                         |
//! |-----------|--------------------------------------------------------------|
//! | `get`     | shared to stat, then shared for the lifetime of the handle   |
//! | `put`     | exclusive                                                    |
//! | `delete`  | shared to stat, then exclusive to remove                     |
//! | `stat`    | shared                                                       |
//! | `mkdir`   | none                                                         |
//!
//! `delete` uses two separate critical sections. A file removed by someone else in between is
//! reported as [`FilesError::NotFound`].
//!
//! Because an open handle keeps its shared lock until it is closed, a `put` or `delete` on the
//! same path waits for every open handle on that path.

use crate::config::FilesConfig;
use crate::handle::ReadHandle;
use crate::lock::{LockMode, PathLockTable};
use crate::sandbox::SandboxRoot;
use crate::sniff::sniff_content_type;
use crate::{FilesError, FilesResult};
use chrono::{DateTime, Utc};
use std::fs::Metadata;
use std::path::Path;
use tokio::io::{AsyncRead, AsyncWriteExt, BufWriter};

/// Metadata for a stored file
#[derive(Debug, Clone, serde::Serialize, PartialEq, Eq)]
pub struct FileInfo {
    /// Final component of the requested path
    pub name: String,

    /// Size of the file in bytes
    pub size: u64,

    /// Permission bits
    pub mode: u32,

    /// Last modification time (UTC)
    pub mod_time: DateTime<Utc>,

    /// Detected media type (MIME type)
    ///
    /// This is a best-effort detection and should not be considered authoritative.
    pub content_type: String,
}

impl FileInfo {
    fn from_metadata(path: &str, metadata: &Metadata, content_type: String) -> FilesResult<Self> {
        let name = Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_owned());

        let modified = metadata
            .modified()
            .map_err(|e| FilesError::io("stat", path, e))?;

        Ok(Self {
            name,
            size: metadata.len(),
            mode: permission_bits(metadata),
            mod_time: DateTime::<Utc>::from(modified),
            content_type,
        })
    }
}

#[cfg(unix)]
fn permission_bits(metadata: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn permission_bits(metadata: &Metadata) -> u32 {
    if metadata.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

/// Client for concurrent file access beneath one storage root
///
/// Each client owns its own lock table. Clones share it, so all clones of a client coordinate
/// with each other; independently constructed clients do not.
#[derive(Debug, Clone)]
pub struct FileClient {
    sandbox: SandboxRoot,
    locks: PathLockTable,
    config: FilesConfig,
}

impl FileClient {
    /// Creates a new `FileClient` for the configured root directory
    ///
    /// # Errors
    ///
    /// Returns `FilesError::InvalidRootDirectory` if the root does not exist, is not a
    /// directory, or cannot be canonicalised.
    pub fn new(config: FilesConfig) -> FilesResult<Self> {
        let sandbox = SandboxRoot::new(config.root_dir())?;
        tracing::debug!(root = %sandbox.root().display(), "file client ready");

        Ok(Self {
            sandbox,
            locks: PathLockTable::new(),
            config,
        })
    }

    /// Returns the canonicalised storage root
    #[must_use]
    pub fn root(&self) -> &Path {
        self.sandbox.root()
    }

    /// Returns the lock table shared by this client and its clones
    #[must_use]
    pub fn lock_table(&self) -> &PathLockTable {
        &self.locks
    }

    /// Opens `path` for reading
    ///
    /// # Errors
    ///
    /// - `FilesError::NotFound` if the path does not exist
    /// - `FilesError::IsDirectory` if the path is a directory
    /// - `FilesError::InvalidPath` if the sandbox rejects the path
    pub async fn get(&self, path: &str) -> FilesResult<ReadHandle> {
        {
            let _guard = self.locks.acquire(path, LockMode::Shared).await;
            self.stat_regular(path).await?;
        }

        ReadHandle::open(self.locks.clone(), self.sandbox.clone(), path.to_owned()).await
    }

    /// Writes the full contents of `source` to `path`, replacing any existing file
    ///
    /// The parent directory must already exist. Returns the number of bytes written.
    pub async fn put<R>(&self, path: &str, source: &mut R) -> FilesResult<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let _guard = self.locks.acquire(path, LockMode::Exclusive).await;

        match self.sandbox.stat(path).await {
            Ok(metadata) if metadata.is_dir() => {
                return Err(FilesError::IsDirectory(path.to_owned()))
            }
            Ok(_) | Err(FilesError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let file = self.sandbox.create(path).await?;
        let mut writer = BufWriter::with_capacity(self.config.copy_buffer_size(), file);

        let written = tokio::io::copy(source, &mut writer)
            .await
            .map_err(|e| FilesError::io("write", path, e))?;
        writer
            .flush()
            .await
            .map_err(|e| FilesError::io("write", path, e))?;

        tracing::debug!(path = %path, bytes = written, "file written");
        Ok(written)
    }

    /// Removes the file at `path`
    ///
    /// # Errors
    ///
    /// - `FilesError::NotFound` if the path does not exist (or vanished before removal)
    /// - `FilesError::IsDirectory` if the path is a directory, including one that replaced the
    ///   file between the check and the removal
    pub async fn delete(&self, path: &str) -> FilesResult<()> {
        {
            let _guard = self.locks.acquire(path, LockMode::Shared).await;
            self.stat_regular(path).await?;
        }

        let _guard = self.locks.acquire(path, LockMode::Exclusive).await;
        // mkdir takes no lock, so the path may have changed kind since the check above.
        self.stat_regular(path).await?;
        self.sandbox.remove(path).await?;

        tracing::debug!(path = %path, "file deleted");
        Ok(())
    }

    /// Returns metadata and the detected content type for the file at `path`
    pub async fn stat(&self, path: &str) -> FilesResult<FileInfo> {
        let _guard = self.locks.acquire(path, LockMode::Shared).await;
        let metadata = self.stat_regular(path).await?;

        let mut file = self.sandbox.open(path).await?;
        let content_type = sniff_content_type(&mut file, self.config.sniff_len())
            .await
            .map_err(|e| FilesError::io("read", path, e))?;

        FileInfo::from_metadata(path, &metadata, content_type)
    }

    /// Creates the directory `path`. Its parent must exist; an existing directory is fine.
    pub async fn mkdir(&self, path: &str) -> FilesResult<()> {
        self.sandbox.mkdir(path).await
    }

    async fn stat_regular(&self, path: &str) -> FilesResult<Metadata> {
        let metadata = self.sandbox.stat(path).await?;
        if metadata.is_dir() {
            return Err(FilesError::IsDirectory(path.to_owned()));
        }
        Ok(metadata)
    }
}
