use std::sync::Arc;

use futures::StreamExt;
use tracing::info;

use super::error::ScheduleError;

/// Maximum allowed download size for the schedule zip (256 MB)
const MAX_DOWNLOAD_SIZE: u64 = 256 * 1024 * 1024;
/// Maximum length for cached HTTP header values (ETag, Last-Modified)
const MAX_HEADER_LENGTH: usize = 1024;

/// A downloaded schedule zip together with the validators needed for
/// conditional re-fetching.
pub struct CachedFeed {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub body: Arc<Vec<u8>>,
}

/// Download the schedule feed, revalidating against `cached` when present.
/// `Ok(None)` means the upstream copy is unchanged and `cached` is still
/// current.
pub async fn download_feed(
    client: &reqwest::Client,
    url: &str,
    cached: Option<&CachedFeed>,
) -> Result<Option<CachedFeed>, ScheduleError> {
    let mut request = client.get(url);
    if let Some(cached) = cached {
        if let Some(etag) = &cached.etag {
            request = request.header("If-None-Match", etag);
        }
        if let Some(last_modified) = &cached.last_modified {
            request = request.header("If-Modified-Since", last_modified);
        }
    }

    let response = request
        .timeout(std::time::Duration::from_secs(600))
        .send()
        .await?;

    if response.status() == reqwest::StatusCode::NOT_MODIFIED {
        if cached.is_none() {
            return Err(ScheduleError::NetworkMessage(
                "Got 304 Not Modified without a cached feed".into(),
            ));
        }
        info!("Schedule feed not modified, using cached version");
        return Ok(None);
    }

    if !response.status().is_success() {
        return Err(ScheduleError::NetworkMessage(format!(
            "Feed download HTTP {}",
            response.status()
        )));
    }

    // Check Content-Length before downloading
    if let Some(content_length) = response.content_length() {
        if content_length > MAX_DOWNLOAD_SIZE {
            return Err(ScheduleError::NetworkMessage(format!(
                "Feed download too large: {} bytes (max {} bytes)",
                content_length, MAX_DOWNLOAD_SIZE
            )));
        }
    }

    // Save validators for future conditional requests (limited to MAX_HEADER_LENGTH)
    let etag = header_value(&response, "etag");
    let last_modified = header_value(&response, "last-modified");

    // Stream into memory with a hard size limit
    let mut body: Vec<u8> = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if (body.len() + chunk.len()) as u64 > MAX_DOWNLOAD_SIZE {
            return Err(ScheduleError::NetworkMessage(format!(
                "Feed download exceeded size limit at {} bytes (max {} bytes)",
                body.len() + chunk.len(),
                MAX_DOWNLOAD_SIZE
            )));
        }
        body.extend_from_slice(&chunk);
    }

    info!(size_mb = body.len() / (1024 * 1024), "Downloaded schedule feed");

    Ok(Some(CachedFeed {
        etag,
        last_modified,
        body: Arc::new(body),
    }))
}

fn header_value(response: &reqwest::Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|s| s.len() <= MAX_HEADER_LENGTH)
        .map(|s| s.to_string())
}
