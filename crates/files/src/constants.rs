/// Environment variable naming the attachment storage root.
pub const FILES_ROOT_ENV: &str = "HERBARIUM_FILES_ROOT";

/// Storage root used when no override is configured.
pub const DEFAULT_ROOT_DIR: &str = "files";

/// Number of leading bytes inspected when detecting a content type.
pub const DEFAULT_SNIFF_LEN: usize = 512;

/// Buffer size used when copying an upload stream into storage.
pub const DEFAULT_COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Chunk size requested by [`crate::ReadHandle::read_to_end`].
pub const READ_CHUNK_SIZE: usize = 64 * 1024;
