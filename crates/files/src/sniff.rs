//! Best-effort content type detection.

use tokio::io::{AsyncRead, AsyncReadExt};

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
const OCTET_STREAM: &str = "application/octet-stream";

/// Detects a MIME type from the leading bytes of a file.
///
/// Binary formats are recognised by their magic numbers. Anything else that is valid UTF-8,
/// including an empty head or one truncated in the middle of a character, is reported as
/// plain text. The result is never authoritative.
pub fn detect_content_type(head: &[u8]) -> &'static str {
    if let Some(kind) = infer::get(head) {
        return kind.mime_type();
    }

    match std::str::from_utf8(head) {
        Ok(_) => TEXT_PLAIN,
        // error_len() is None when the input only ends mid-character.
        Err(e) if e.error_len().is_none() => TEXT_PLAIN,
        Err(_) => OCTET_STREAM,
    }
}

/// Reads up to `limit` bytes from `reader` and detects their content type.
pub(crate) async fn sniff_content_type<R>(reader: &mut R, limit: usize) -> std::io::Result<String>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut head = Vec::with_capacity(limit);
    reader.take(limit as u64).read_to_end(&mut head).await?;
    Ok(detect_content_type(&head).to_owned())
}
