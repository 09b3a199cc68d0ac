//! Download phase: dispatches part workers under the job's concurrency
//! limit and folds their results back into the manifest.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::TransferError;
use crate::manifest::{JobId, JobRecord};
use crate::scratch;
use crate::worker::fetch_part;

use super::resume::PendingPart;
use super::JobContext;

/// Fetch all `pending` parts with at most `worker_limit` in flight.
///
/// The first non-cancellation failure aborts the remaining workers via a
/// child token, so sibling parts stop promptly while the caller's own token
/// stays distinguishable from a user cancel.
pub(super) async fn run(
    ctx: &Arc<JobContext>,
    job_id: JobId,
    job: &JobRecord,
    pending: Vec<PendingPart>,
    worker_limit: usize,
    cancel: &CancellationToken,
) -> Result<(), TransferError> {
    let job_dir = scratch::job_dir(&ctx.config.scratch_dir, job_id);
    let policy = ctx.config.retry_policy();
    let semaphore = Arc::new(Semaphore::new(worker_limit.max(1)));
    let abort = cancel.child_token();
    debug!(job = job_id, parts = pending.len(), workers = worker_limit, "download phase");

    let mut tasks = JoinSet::new();
    for part in pending {
        let PendingPart { span, retries } = part;
        let ctx = Arc::clone(ctx);
        let locator = job.locator.clone();
        let path = scratch::part_path(&job_dir, span.index);
        let semaphore = Arc::clone(&semaphore);
        let abort = abort.clone();
        tasks.spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(p) => p,
                Err(_) => return (span, Err(TransferError::Cancelled)),
            };
            if abort.is_cancelled() {
                return (span, Err(TransferError::Cancelled));
            }
            if let Err(e) = ctx.store.mark_part_in_flight(job_id, span.index as i64).await {
                return (span, Err(TransferError::Fatal(format!("manifest: {e:#}"))));
            }
            let res = fetch_part(
                ctx.source.as_ref(),
                &ctx.store,
                job_id,
                &locator,
                span,
                &path,
                retries,
                &policy,
                &abort,
            )
            .await;
            (span, res)
        });
    }

    let mut first_failure: Option<TransferError> = None;
    while let Some(joined) = tasks.join_next().await {
        let (span, res) = match joined {
            Ok(v) => v,
            Err(e) => {
                // A panicked worker counts as a failed part.
                warn!(job = job_id, error = %e, "part worker panicked");
                if first_failure.is_none() {
                    first_failure = Some(TransferError::fatal(format!("worker panicked: {e}")));
                    abort.cancel();
                }
                continue;
            }
        };
        match res {
            Ok(written) => {
                ctx.store
                    .mark_part_done(job_id, span.index as i64, written as i64)
                    .await
                    .map_err(|e| TransferError::Fatal(format!("manifest: {e:#}")))?;
                debug!(job = job_id, part = span.index, bytes = written, "part done");
            }
            Err(err) if err.is_cancelled() => {
                // Severed mid-write; the scratch bytes are untrustworthy.
                if let Err(e) = ctx.store.reset_part_pending(job_id, span.index as i64).await {
                    warn!(job = job_id, part = span.index, error = %e, "part not reset");
                }
            }
            Err(err) => {
                if let Err(e) = ctx.store.mark_part_failed(job_id, span.index as i64).await {
                    warn!(job = job_id, part = span.index, error = %e, "part failure not recorded");
                }
                if first_failure.is_none() {
                    first_failure = Some(err);
                    // Stop sibling parts; the job is going to fail anyway.
                    abort.cancel();
                }
            }
        }
    }

    if cancel.is_cancelled() {
        return Err(TransferError::Cancelled);
    }
    match first_failure {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
