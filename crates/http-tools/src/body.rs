//! Size-limited response body reading.

use crate::error::{HttpToolsError, Result};

/// Read a response body, enforcing `max_bytes` when set.
///
/// # Errors
///
/// Returns [`HttpToolsError::TooLarge`] when the declared or streamed length exceeds the limit,
/// and [`HttpToolsError::Transport`] on read failures.
pub async fn read_body_limited(
    mut response: reqwest::Response,
    max_bytes: Option<usize>,
) -> Result<Vec<u8>> {
    let Some(max) = max_bytes else {
        return Ok(response.bytes().await?.to_vec());
    };

    if let Some(len) = response.content_length()
        && len > max as u64
    {
        return Err(HttpToolsError::TooLarge(format!(
            "{len} bytes (limit {max})"
        )));
    }

    let mut out: Vec<u8> = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        if out.len().saturating_add(chunk.len()) > max {
            return Err(HttpToolsError::TooLarge(format!("exceeded {max} bytes")));
        }
        out.extend_from_slice(&chunk);
    }
    Ok(out)
}
