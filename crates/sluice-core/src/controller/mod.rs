//! Per-job controller: drives one job through its lifecycle phases.
//!
//! Phase order is Queued -> Planning -> Resuming -> Downloading ->
//! Assembling -> Tiering -> Completed. Every transition is written to the
//! manifest before the phase's work begins, so a crash is always attributed
//! to the phase that was running.

mod download;
mod resume;

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::budget::FetchBudget;
use crate::config::EngineConfig;
use crate::error::TransferError;
use crate::manifest::{JobId, JobState, ManifestStore};
use crate::planner::plan_parts;
use crate::scratch;
use crate::source::MediaSource;
use crate::tiering;

/// Shared dependencies handed to every controller.
pub struct JobContext {
    pub store: ManifestStore,
    pub source: Arc<dyn MediaSource>,
    pub config: EngineConfig,
    pub budget: Arc<FetchBudget>,
}

/// Run one job to a terminal state and return it.
///
/// The watch channel mirrors every state transition for in-process
/// observers; the manifest remains the durable source of truth.
pub async fn run_job(
    ctx: Arc<JobContext>,
    job_id: JobId,
    cancel: CancellationToken,
    state_tx: watch::Sender<JobState>,
) -> JobState {
    let final_state = match drive(&ctx, job_id, &cancel, &state_tx).await {
        Ok(()) => JobState::Completed,
        Err(err) if err.is_cancelled() => {
            info!(job = job_id, "job cancelled, cleaning up");
            cancel_cleanup(&ctx, job_id, &state_tx).await;
            JobState::Cancelled
        }
        Err(err) => {
            error!(job = job_id, error = %err, "job failed");
            if let Err(e) = ctx.store.fail_job(job_id, &err.to_string()).await {
                error!(job = job_id, error = %e, "failure not recorded in manifest");
            }
            JobState::Failed
        }
    };
    let _ = state_tx.send(final_state);
    final_state
}

async fn drive(
    ctx: &Arc<JobContext>,
    job_id: JobId,
    cancel: &CancellationToken,
    state_tx: &watch::Sender<JobState>,
) -> Result<(), TransferError> {
    // Admission control: park here (still Queued) until the global budget
    // has at least one slot for this job.
    let job = load(ctx, job_id).await?;
    let desired = job
        .worker_limit
        .map(|n| n.max(1) as usize)
        .unwrap_or(ctx.config.max_fetches_per_job)
        .max(1);
    let reservation = tokio::select! {
        _ = cancel.cancelled() => return Err(TransferError::Cancelled),
        r = ctx.budget.reserve_at_least_one(desired) => r,
    };
    debug!(job = job_id, slots = reservation.slots(), "admitted");

    // Planning: probe the source and lay down the part plan, once. A job
    // that already has a plan (restart) keeps it; plans are immutable.
    if job.total_size.is_none() {
        transition(ctx, state_tx, job_id, JobState::Planning).await?;
        let info = tokio::select! {
            _ = cancel.cancelled() => return Err(TransferError::Cancelled),
            r = ctx.source.probe(&job.locator) => r?,
        };
        let spans = plan_parts(info.total_size, job.part_size.max(1) as u64);
        ctx.store
            .record_plan(job_id, info.total_size as i64, &spans)
            .await
            .map_err(manifest_err)?;
        info!(
            job = job_id,
            total = info.total_size,
            parts = spans.len(),
            "planned"
        );
    }

    // Resuming: reconcile the manifest against what is physically on the
    // scratch volume. Runs on fresh jobs too (it is a no-op there), so the
    // code path is always exercised.
    transition(ctx, state_tx, job_id, JobState::Resuming).await?;
    let (job, parts) = ctx
        .store
        .load_job(job_id)
        .await
        .map_err(manifest_err)?
        .ok_or_else(|| TransferError::fatal(format!("job {job_id} vanished from manifest")))?;

    // A previous run may have died between archiving and recording Completed;
    // the archived artifact settles it.
    let archive_path = ctx.config.archive_dir.join(&job.target_name);
    if let Some(total) = job.total_size {
        if scratch::part_len(&archive_path) == Some(total as u64) {
            info!(job = job_id, "artifact already archived");
            ctx.store.prune_parts(job_id).await.map_err(manifest_err)?;
            if let Err(e) = scratch::remove_job_dir(&ctx.config.scratch_dir, job_id).await {
                warn!(job = job_id, error = %e, "scratch dir not removed");
            }
            transition(ctx, state_tx, job_id, JobState::Completed).await?;
            return Ok(());
        }
    }
    let job_dir = scratch::ensure_job_dir(&ctx.config.scratch_dir, job_id)
        .await
        .map_err(|e| TransferError::Fatal(format!("storage: {e:#}")))?;
    let recon = resume::reconcile(&ctx.store, job_id, &job, &parts, &job_dir).await?;

    let artifact = if recon.assembled {
        // A verified assembled artifact from a previous run; skip straight
        // to tiering.
        info!(job = job_id, "assembled artifact found, skipping download");
        scratch::assembled_path(&job_dir, &job.target_name)
    } else {
        if !recon.pending.is_empty() {
            transition(ctx, state_tx, job_id, JobState::Downloading).await?;
            let worker_limit = reservation.slots().min(desired).max(1);
            download::run(ctx, job_id, &job, recon.pending, worker_limit, cancel).await?;
        }

        transition(ctx, state_tx, job_id, JobState::Assembling).await?;
        let all_spans = plan_parts(
            job.total_size.unwrap_or(0) as u64,
            job.part_size.max(1) as u64,
        );
        scratch::assemble(&job_dir, &all_spans, &job.target_name)
            .await
            .map_err(|e| TransferError::Corrupt(format!("{e:#}")))?
    };

    // Tiering holds no fetch slots; release them for queued jobs.
    drop(reservation);

    transition(ctx, state_tx, job_id, JobState::Tiering).await?;
    let (attempts, base_delay) = ctx.config.tiering_retry();
    tiering::relocate_with_retry(&artifact, &archive_path, attempts, base_delay, cancel).await?;

    // Terminal cleanup: part rows and the scratch directory are garbage now.
    ctx.store.prune_parts(job_id).await.map_err(manifest_err)?;
    if let Err(e) = scratch::remove_job_dir(&ctx.config.scratch_dir, job_id).await {
        warn!(job = job_id, error = %e, "scratch dir not removed");
    }
    transition(ctx, state_tx, job_id, JobState::Completed).await?;
    info!(job = job_id, archive = %archive_path.display(), "job completed");
    Ok(())
}

/// Cancellation cleanup: discard all scratch state and part rows, keep the
/// job row as a record that the job existed and was cancelled.
async fn cancel_cleanup(ctx: &JobContext, job_id: JobId, state_tx: &watch::Sender<JobState>) {
    if let Err(e) = ctx.store.set_state(job_id, JobState::Cancelling).await {
        error!(job = job_id, error = %e, "cancelling state not recorded");
    }
    let _ = state_tx.send(JobState::Cancelling);

    if let Err(e) = scratch::remove_job_dir(&ctx.config.scratch_dir, job_id).await {
        warn!(job = job_id, error = %e, "scratch dir not removed");
    }
    if let Err(e) = ctx.store.prune_parts(job_id).await {
        error!(job = job_id, error = %e, "part rows not pruned");
    }
    if let Err(e) = ctx.store.set_state(job_id, JobState::Cancelled).await {
        error!(job = job_id, error = %e, "cancelled state not recorded");
    }
}

async fn load(ctx: &JobContext, job_id: JobId) -> Result<crate::manifest::JobRecord, TransferError> {
    ctx.store
        .get_job(job_id)
        .await
        .map_err(manifest_err)?
        .ok_or_else(|| TransferError::fatal(format!("job {job_id} not found")))
}

/// Durably record a state transition, then mirror it to watchers.
async fn transition(
    ctx: &JobContext,
    state_tx: &watch::Sender<JobState>,
    job_id: JobId,
    state: JobState,
) -> Result<(), TransferError> {
    ctx.store
        .set_state(job_id, state)
        .await
        .map_err(manifest_err)?;
    let _ = state_tx.send(state);
    debug!(job = job_id, state = state.as_str(), "transition");
    Ok(())
}

fn manifest_err(e: anyhow::Error) -> TransferError {
    TransferError::Fatal(format!("manifest: {e:#}"))
}
