//! Engine facade: job admission, cancellation, status, and crash recovery.

use std::sync::Arc;

use anyhow::{bail, Result};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::budget::FetchBudget;
use crate::config::EngineConfig;
use crate::controller::{run_job, JobContext};
use crate::manifest::{JobId, JobRecord, JobState, ManifestStore, PartState};
use crate::registry::{JobHandle, JobRegistry};
use crate::scratch;
use crate::source::MediaSource;

/// Result of a cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The job was cancelled and its scratch state discarded.
    Cancelled,
    /// The job was already in a terminal state; nothing changed.
    NoOp,
}

/// Progress of one part, for the status surface.
#[derive(Debug, Clone)]
pub struct PartProgress {
    pub index: u64,
    pub state: PartState,
    pub bytes_done: u64,
    pub length: u64,
}

/// Snapshot of one job.
#[derive(Debug, Clone)]
pub struct JobStatus {
    pub id: JobId,
    pub target_name: String,
    pub state: JobState,
    pub bytes_done: u64,
    pub bytes_total: Option<u64>,
    pub parts: Vec<PartProgress>,
    pub error: Option<String>,
}

/// Front door of the transfer engine. Cheap to clone; all clones share the
/// same budget, manifest, and controller registry.
#[derive(Clone)]
pub struct Engine {
    ctx: Arc<JobContext>,
    registry: Arc<JobRegistry>,
}

impl Engine {
    pub fn new(config: EngineConfig, store: ManifestStore, source: Arc<dyn MediaSource>) -> Self {
        let budget = Arc::new(FetchBudget::new(config.max_total_fetches));
        Self {
            ctx: Arc::new(JobContext {
                store,
                source,
                config,
                budget,
            }),
            registry: Arc::new(JobRegistry::new()),
        }
    }

    /// Enqueue a new transfer and start its controller. Returns immediately
    /// with the job id; the controller may still be parked in admission.
    pub async fn enqueue(&self, locator: &str, target_name: &str) -> Result<JobId> {
        self.enqueue_with_limit(locator, target_name, None).await
    }

    /// Enqueue with a per-job override of the worker concurrency limit.
    pub async fn enqueue_with_limit(
        &self,
        locator: &str,
        target_name: &str,
        worker_limit: Option<i64>,
    ) -> Result<JobId> {
        let id = self
            .ctx
            .store
            .add_job(
                locator,
                target_name,
                self.ctx.config.part_size as i64,
                worker_limit,
            )
            .await?;
        info!(job = id, locator, target = target_name, "enqueued");
        self.spawn_controller(id, JobState::Queued);
        Ok(id)
    }

    fn spawn_controller(&self, id: JobId, initial: JobState) {
        let cancel = CancellationToken::new();
        let (tx, rx) = watch::channel(initial);
        self.registry.register(
            id,
            JobHandle {
                cancel: cancel.clone(),
                state: rx,
            },
        );
        let ctx = Arc::clone(&self.ctx);
        let registry = Arc::clone(&self.registry);
        tokio::spawn(async move {
            run_job(ctx, id, cancel, tx).await;
            registry.remove(id);
        });
    }

    /// Cancel a job. Resolves only after the job has actually stopped:
    /// transports severed, scratch wiped, manifest updated.
    pub async fn cancel(&self, id: JobId) -> Result<CancelOutcome> {
        if let Some(handle) = self.registry.get(id) {
            // Already terminal: the controller just hasn't deregistered yet.
            if handle.state.borrow().is_terminal() {
                return Ok(CancelOutcome::NoOp);
            }
            handle.cancel.cancel();
            let mut state = handle.state;
            loop {
                let current = *state.borrow();
                if current.is_terminal() {
                    break;
                }
                if state.changed().await.is_err() {
                    break;
                }
            }
            // The controller may have raced to Completed/Failed before the
            // token landed; the manifest has the authoritative answer.
            let job = self
                .ctx
                .store
                .get_job(id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("job {id} not found"))?;
            return Ok(match job.state {
                JobState::Cancelled => CancelOutcome::Cancelled,
                _ => CancelOutcome::NoOp,
            });
        }

        // No live controller: the job is dormant (terminal, or waiting for a
        // restart). Clean it up directly.
        let Some(job) = self.ctx.store.get_job(id).await? else {
            bail!("job {id} not found");
        };
        if job.state.is_terminal() {
            return Ok(CancelOutcome::NoOp);
        }
        if let Err(e) = scratch::remove_job_dir(&self.ctx.config.scratch_dir, id).await {
            warn!(job = id, error = %e, "scratch dir not removed");
        }
        self.ctx.store.prune_parts(id).await?;
        self.ctx.store.set_state(id, JobState::Cancelled).await?;
        info!(job = id, "dormant job cancelled");
        Ok(CancelOutcome::Cancelled)
    }

    /// Permanently remove a terminal job's manifest record and any scratch
    /// leftovers. Archive artifacts are untouched. Running jobs are
    /// rejected; cancel them first.
    pub async fn remove(&self, id: JobId) -> Result<()> {
        if let Some(handle) = self.registry.get(id) {
            if !handle.state.borrow().is_terminal() {
                bail!("job {id} is still running; cancel it first");
            }
        }
        let Some(job) = self.ctx.store.get_job(id).await? else {
            bail!("job {id} not found");
        };
        if !job.state.is_terminal() {
            bail!("job {id} is {}; cancel it first", job.state.as_str());
        }
        if let Err(e) = scratch::remove_job_dir(&self.ctx.config.scratch_dir, id).await {
            warn!(job = id, error = %e, "scratch dir not removed");
        }
        self.ctx.store.remove_job(id).await?;
        info!(job = id, "job removed");
        Ok(())
    }

    /// Status snapshot of one job, with per-part progress while it runs.
    pub async fn status(&self, id: JobId) -> Result<JobStatus> {
        let Some(job) = self.ctx.store.get_job(id).await? else {
            bail!("job {id} not found");
        };
        let parts = self.ctx.store.get_parts(id).await?;
        let job_dir = scratch::job_dir(&self.ctx.config.scratch_dir, id);

        let mut bytes_done = 0u64;
        let mut progress = Vec::with_capacity(parts.len());
        for part in &parts {
            let length = part.length as u64;
            let done = match part.state {
                PartState::Done => length,
                PartState::InFlight => {
                    // Best-effort: file length of the in-flight part.
                    let path = scratch::part_path(&job_dir, part.index as u64);
                    scratch::part_len(&path).unwrap_or(0).min(length)
                }
                _ => 0,
            };
            bytes_done += done;
            progress.push(PartProgress {
                index: part.index as u64,
                state: part.state,
                bytes_done: done,
                length,
            });
        }
        // A completed job has pruned its part rows; it is all-done by definition.
        if job.state == JobState::Completed {
            bytes_done = job.total_size.unwrap_or(0) as u64;
        }

        Ok(JobStatus {
            id: job.id,
            target_name: job.target_name.clone(),
            state: job.state,
            bytes_done,
            bytes_total: job.total_size.map(|t| t as u64),
            parts: progress,
            error: job.error,
        })
    }

    /// All known jobs, oldest first.
    pub async fn list_jobs(&self) -> Result<Vec<JobRecord>> {
        self.ctx.store.list_jobs().await
    }

    /// Pick up where a previous process left off: finish interrupted
    /// cancellations, requeue jobs that died mid-phase, and start controllers
    /// for everything still active. Returns the number of jobs resumed.
    pub async fn recover(&self) -> Result<usize> {
        // A job stuck in Cancelling means the process died mid-cleanup;
        // cancellation wins over resume.
        for job in self
            .ctx
            .store
            .list_jobs_in_state(JobState::Cancelling)
            .await?
        {
            info!(job = job.id, "finishing interrupted cancellation");
            if let Err(e) = scratch::remove_job_dir(&self.ctx.config.scratch_dir, job.id).await {
                warn!(job = job.id, error = %e, "scratch dir not removed");
            }
            self.ctx.store.prune_parts(job.id).await?;
            self.ctx.store.set_state(job.id, JobState::Cancelled).await?;
        }

        let requeued = self.ctx.store.reset_interrupted_jobs().await?;
        if requeued > 0 {
            info!(requeued, "requeued interrupted jobs");
        }

        let mut resumed = 0usize;
        for job in self.ctx.store.list_active_jobs().await? {
            if self.registry.contains(job.id) {
                continue;
            }
            self.spawn_controller(job.id, job.state);
            resumed += 1;
        }
        Ok(resumed)
    }

    /// Number of controllers currently running in this process.
    pub fn active_jobs(&self) -> usize {
        self.registry.len()
    }
}
