//! Part fetch worker: pulls one byte range into its scratch file, with
//! retry classification and cancellation baked in.
//!
//! Cancellation is checked at every await point and the byte stream is
//! dropped on the spot, which severs the transport instead of draining it.

use std::path::Path;

use futures_util::StreamExt;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::TransferError;
use crate::manifest::{JobId, ManifestStore};
use crate::planner::PartSpan;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::source::MediaSource;

/// Fetch one part to `path`, retrying per `policy`. Returns the bytes written
/// once the file is durable on disk.
///
/// `prior_retries` is the part's persisted retry count from earlier runs;
/// attempts burned before a restart stay burned, so a flaky part cannot
/// reset its budget by crashing the process. Rate-limit waits do not
/// consume an attempt: the provider asked us to pace, we did not fail.
/// Every real failure restarts the part from byte zero; partial scratch
/// data is never trusted across attempts.
pub async fn fetch_part(
    source: &dyn MediaSource,
    store: &ManifestStore,
    job_id: JobId,
    locator: &str,
    span: PartSpan,
    path: &Path,
    prior_retries: u32,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<u64, TransferError> {
    let mut attempt: u32 = prior_retries.saturating_add(1);
    loop {
        match fetch_once(source, locator, span, path, cancel).await {
            Ok(written) => return Ok(written),
            Err(err) if err.is_cancelled() => return Err(err),
            Err(err) => {
                let rate_limited = matches!(err, TransferError::RateLimited { .. });
                match policy.decide(attempt, &err) {
                    RetryDecision::NoRetry => {
                        warn!(job = job_id, part = span.index, attempt, error = %err, "part failed");
                        return Err(err);
                    }
                    RetryDecision::RetryAfter(delay) => {
                        debug!(
                            job = job_id,
                            part = span.index,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "retrying part"
                        );
                        if !rate_limited {
                            attempt += 1;
                            if let Err(e) = store.bump_part_retry(job_id, span.index as i64).await {
                                warn!(job = job_id, part = span.index, error = %e, "retry count not recorded");
                            }
                        }
                        tokio::select! {
                            _ = cancel.cancelled() => return Err(TransferError::Cancelled),
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            }
        }
    }
}

async fn fetch_once(
    source: &dyn MediaSource,
    locator: &str,
    span: PartSpan,
    path: &Path,
    cancel: &CancellationToken,
) -> Result<u64, TransferError> {
    let mut stream = tokio::select! {
        _ = cancel.cancelled() => return Err(TransferError::Cancelled),
        r = source.open_range(locator, span.offset, span.length) => r?,
    };

    // A fresh attempt always truncates; partial bytes from a failed attempt
    // are never appended to.
    let mut file = File::create(path).await.map_err(TransferError::from_io)?;
    let mut written: u64 = 0;

    loop {
        let chunk = tokio::select! {
            // Dropping `stream` here closes the underlying transport.
            _ = cancel.cancelled() => return Err(TransferError::Cancelled),
            chunk = stream.next() => chunk,
        };
        let Some(chunk) = chunk else { break };
        let mut bytes = chunk?;

        let remaining = span.length - written;
        if bytes.len() as u64 > remaining {
            bytes.truncate(remaining as usize);
        }
        file.write_all(&bytes).await.map_err(TransferError::from_io)?;
        written += bytes.len() as u64;
        if written == span.length {
            break;
        }
    }

    if written < span.length {
        return Err(TransferError::transient(format!(
            "short read: got {} of {} bytes",
            written, span.length
        )));
    }

    // Durability before the part can be marked Done.
    file.sync_all().await.map_err(TransferError::from_io)?;
    Ok(written)
}
