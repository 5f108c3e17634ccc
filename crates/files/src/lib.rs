//! Herbarium File Access
//!
//! This crate provides path-scoped concurrent access to attachment files (post images,
//! plant catalog photos, uploaded documents) stored beneath a single sandboxed directory.
//!
//! ## Design Principles
//!
//! - Every file is addressed by a path relative to the sandbox root
//! - Readers of one path run concurrently; writers of one path are mutually exclusive
//! - Per-path lock bookkeeping never outlives the operations that need it
//! - An open [`ReadHandle`] is served by one background task that owns the descriptor
//!
//! ## Locking Model
//!
//! ```text
//! get     ── shared (brief, stat) ──▶ worker ── shared (held until close) ──▶ close
//! stat    ── shared (brief)
//! put     ── exclusive (brief)
//! delete  ── shared (brief, stat) ──▶ exclusive (brief, remove)
//! mkdir   ── no lock
//! ```
//!
//! An open read handle keeps its shared lock for its whole lifetime, so a `put` or
//! `delete` on the same path waits until every handle on that path is closed.
//!
//! ## Example Usage
//!
//! ```no_run
//! use herbarium_files::{FileClient, FilesConfig};
//!
//! # async fn run() -> Result<(), herbarium_files::FilesError> {
//! let client = FileClient::new(FilesConfig::with_root("attachments"))?;
//!
//! let written = client.put("plants/fern.txt", &mut &b"Polypodium vulgare"[..]).await?;
//! assert_eq!(written, 18);
//!
//! let mut handle = client.get("plants/fern.txt").await?;
//! let mut buf = [0u8; 10];
//! let outcome = handle.read(&mut buf).await?;
//! assert_eq!(&buf[..outcome.n], b"Polypodium");
//! handle.close().await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod constants;
mod files;
mod handle;
mod lock;
mod sandbox;
mod sniff;

pub use config::{root_dir_from_env_value, FilesConfig};
pub use constants::{
    DEFAULT_COPY_BUFFER_SIZE, DEFAULT_ROOT_DIR, DEFAULT_SNIFF_LEN, FILES_ROOT_ENV,
    READ_CHUNK_SIZE,
};
pub use files::{FileClient, FileInfo};
pub use handle::{ReadHandle, ReadOutcome};
pub use lock::{LockMode, PathLockGuard, PathLockTable};
pub use sandbox::SandboxRoot;
pub use sniff::detect_content_type;

/// Errors that can occur during file operations
#[derive(Debug, thiserror::Error)]
pub enum FilesError {
    /// Root directory does not exist or is not a directory
    #[error("Invalid root directory: {0}")]
    InvalidRootDirectory(String),

    /// Configuration value rejected at startup
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Path rejected by the sandbox (absolute, traversal, or escaping the root)
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Path does not exist under the sandbox root
    #[error("File not found: {0}")]
    NotFound(String),

    /// Operation requires a regular file but the path is a directory
    #[error("Path is a directory: {0}")]
    IsDirectory(String),

    /// Read handle has already been closed or its worker has shut down
    #[error("Read handle is closed")]
    Closed,

    /// I/O error from the underlying file system
    #[error("Failed to {op} {path}: {source}")]
    Io {
        op: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl FilesError {
    /// Wraps an I/O error with the failing operation and path.
    ///
    /// `NotFound` from the file system is surfaced as [`FilesError::NotFound`] so callers
    /// can branch on it without inspecting error kinds.
    pub(crate) fn io(op: &'static str, path: &str, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            return FilesError::NotFound(path.to_owned());
        }
        FilesError::Io {
            op,
            path: path.to_owned(),
            source,
        }
    }
}

pub type FilesResult<T> = std::result::Result<T, FilesError>;
