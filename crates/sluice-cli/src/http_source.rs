//! HTTP/HTTPS media source backed by reqwest.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{StreamExt, TryStreamExt};
use sluice_core::error::TransferError;
use sluice_core::source::{ByteStream, MediaInfo, MediaSource};

pub struct HttpSource {
    client: reqwest::Client,
}

impl HttpSource {
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self { client })
    }
}

/// Map a reqwest transport error onto the engine's error classes.
fn classify_request_error(e: reqwest::Error) -> TransferError {
    if e.is_timeout() || e.is_connect() {
        TransferError::transient(e.to_string())
    } else {
        TransferError::fatal(e.to_string())
    }
}

/// Map a non-success HTTP status onto the engine's error classes.
fn classify_status(resp: &reqwest::Response) -> Option<TransferError> {
    let status = resp.status();
    if status.is_success() {
        return None;
    }
    Some(if status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status == reqwest::StatusCode::SERVICE_UNAVAILABLE
    {
        let retry_after = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs);
        TransferError::RateLimited { retry_after }
    } else if status.is_server_error() {
        TransferError::transient(format!("server returned {status}"))
    } else {
        TransferError::fatal(format!("server returned {status}"))
    })
}

#[async_trait]
impl MediaSource for HttpSource {
    async fn probe(&self, locator: &str) -> Result<MediaInfo, TransferError> {
        let resp = self
            .client
            .head(locator)
            .send()
            .await
            .map_err(classify_request_error)?;
        if let Some(err) = classify_status(&resp) {
            return Err(err);
        }
        // Read the header directly: a HEAD response has no body, so the
        // body-based `content_length()` accessor reports zero.
        let total_size = resp
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .ok_or_else(|| TransferError::fatal("source did not report a content length"))?;

        let suggested_name = resp
            .url()
            .path_segments()
            .and_then(|mut s| s.next_back())
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        Ok(MediaInfo {
            total_size,
            suggested_name,
        })
    }

    async fn open_range(
        &self,
        locator: &str,
        offset: u64,
        length: u64,
    ) -> Result<ByteStream, TransferError> {
        let end = offset + length - 1;
        let resp = self
            .client
            .get(locator)
            .header(reqwest::header::RANGE, format!("bytes={offset}-{end}"))
            .send()
            .await
            .map_err(classify_request_error)?;
        if let Some(err) = classify_status(&resp) {
            return Err(err);
        }

        // Dropping the returned stream drops the response body, which closes
        // the connection.
        Ok(resp
            .bytes_stream()
            .map_err(|e| TransferError::transient(e.to_string()))
            .boxed())
    }
}
