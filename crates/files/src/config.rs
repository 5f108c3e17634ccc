//! File access configuration.
//!
//! Configuration is resolved once at process startup and then passed into
//! [`crate::FileClient::new`]. Nothing in this crate reads environment variables while serving
//! requests; the binary reads [`crate::FILES_ROOT_ENV`] and hands the value to
//! [`root_dir_from_env_value`].

use crate::constants::{DEFAULT_COPY_BUFFER_SIZE, DEFAULT_ROOT_DIR, DEFAULT_SNIFF_LEN};
use crate::{FilesError, FilesResult};
use std::path::{Path, PathBuf};

/// File access configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct FilesConfig {
    root_dir: PathBuf,
    sniff_len: usize,
    copy_buffer_size: usize,
}

impl FilesConfig {
    /// Create a new `FilesConfig`.
    ///
    /// # Errors
    ///
    /// Returns `FilesError::InvalidConfig` if `sniff_len` or `copy_buffer_size` is zero.
    pub fn new(
        root_dir: impl Into<PathBuf>,
        sniff_len: usize,
        copy_buffer_size: usize,
    ) -> FilesResult<Self> {
        if sniff_len == 0 {
            return Err(FilesError::InvalidConfig(
                "sniff_len must be greater than zero".into(),
            ));
        }
        if copy_buffer_size == 0 {
            return Err(FilesError::InvalidConfig(
                "copy_buffer_size must be greater than zero".into(),
            ));
        }

        Ok(Self {
            root_dir: root_dir.into(),
            sniff_len,
            copy_buffer_size,
        })
    }

    /// Configuration rooted at `root_dir` with default tuning.
    pub fn with_root(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            sniff_len: DEFAULT_SNIFF_LEN,
            copy_buffer_size: DEFAULT_COPY_BUFFER_SIZE,
        }
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn sniff_len(&self) -> usize {
        self.sniff_len
    }

    pub fn copy_buffer_size(&self) -> usize {
        self.copy_buffer_size
    }
}

/// Parse the storage root from an optional environment value.
///
/// If `value` is `None` or empty/whitespace, returns [`DEFAULT_ROOT_DIR`].
pub fn root_dir_from_env_value(value: Option<String>) -> PathBuf {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ROOT_DIR))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_zero_sniff_len() {
        let result = FilesConfig::new("attachments", 0, 1024);
        assert!(matches!(result, Err(FilesError::InvalidConfig(_))));
    }

    #[test]
    fn test_new_rejects_zero_copy_buffer() {
        let result = FilesConfig::new("attachments", 512, 0);
        assert!(matches!(result, Err(FilesError::InvalidConfig(_))));
    }

    #[test]
    fn test_with_root_uses_defaults() {
        let config = FilesConfig::with_root("attachments");
        assert_eq!(config.root_dir(), Path::new("attachments"));
        assert_eq!(config.sniff_len(), DEFAULT_SNIFF_LEN);
        assert_eq!(config.copy_buffer_size(), DEFAULT_COPY_BUFFER_SIZE);
    }

    #[test]
    fn test_root_dir_from_env_value() {
        assert_eq!(root_dir_from_env_value(None), PathBuf::from(DEFAULT_ROOT_DIR));
        assert_eq!(
            root_dir_from_env_value(Some("   ".into())),
            PathBuf::from(DEFAULT_ROOT_DIR)
        );
        assert_eq!(
            root_dir_from_env_value(Some(" /srv/herbarium ".into())),
            PathBuf::from("/srv/herbarium")
        );
    }
}
