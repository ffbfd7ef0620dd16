use std::path::Path;

use tokio::io::AsyncWriteExt;

use crate::error::{FetchError, FetchResult};

/// Stream a URL into `dest`, reporting `written / content_length` after each
/// chunk when the server declares a body length.
///
/// Any non-200 response fails with [`FetchError::HttpStatus`]; transport
/// failures map to [`FetchError::Network`]. A partial file is left in place —
/// callers that need atomicity remove it themselves.
pub async fn fetch(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
    headers: &[(&str, &str)],
    progress: impl Fn(f64),
) -> FetchResult<()> {
    let mut request = client.get(url);
    for (name, value) in headers {
        request = request.header(*name, *value);
    }

    let mut response = request
        .send()
        .await
        .map_err(|e| FetchError::Network(e.to_string()))?;

    if response.status() != reqwest::StatusCode::OK {
        return Err(FetchError::HttpStatus {
            url: url.to_string(),
            status: response.status().to_string(),
        });
    }

    let total = response.content_length().unwrap_or(0);
    let mut written = 0u64;
    let mut file = tokio::fs::File::create(dest).await?;

    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| FetchError::Network(e.to_string()))?
    {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
        if total > 0 {
            progress((written as f64 / total as f64).min(1.0));
        }
    }

    file.flush().await?;
    Ok(())
}
