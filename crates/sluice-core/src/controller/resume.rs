//! Resume reconciliation: decide, part by part, what the scratch volume can
//! be trusted to already hold.
//!
//! The rule is conservative: a part counts as done only when the manifest
//! says Done AND the part file's length matches the plan. Anything else is
//! re-fetched from byte zero. Running this twice in a row yields the same
//! answer, so a crash during resume itself is harmless.

use std::path::Path;

use tracing::{debug, info, warn};

use crate::error::TransferError;
use crate::manifest::{JobId, JobRecord, ManifestStore, PartRecord, PartState};
use crate::planner::PartSpan;
use crate::scratch;

/// One part that still needs fetching, with the retry attempts it already
/// burned in previous runs (the budget survives restarts).
pub(super) struct PendingPart {
    pub span: PartSpan,
    pub retries: u32,
}

pub(super) struct Reconciled {
    /// Parts that still need fetching, in index order.
    pub pending: Vec<PendingPart>,
    /// True when a fully assembled artifact already sits in the job dir.
    pub assembled: bool,
}

pub(super) async fn reconcile(
    store: &ManifestStore,
    job_id: JobId,
    job: &JobRecord,
    parts: &[PartRecord],
    job_dir: &Path,
) -> Result<Reconciled, TransferError> {
    // A whole-artifact short circuit: assembly already ran and all parts are
    // recorded Done, so only tiering remains.
    if let Some(total) = job.total_size {
        let artifact = scratch::assembled_path(job_dir, &job.target_name);
        let all_done = !parts.is_empty() && parts.iter().all(|p| p.state == PartState::Done);
        if all_done && scratch::part_len(&artifact) == Some(total as u64) {
            return Ok(Reconciled {
                pending: Vec::new(),
                assembled: true,
            });
        }
    }

    let mut pending = Vec::new();
    let mut kept = 0usize;
    for part in parts {
        let span = PartSpan {
            index: part.index as u64,
            offset: part.offset as u64,
            length: part.length as u64,
        };
        let retries = part.retry_count.max(0) as u32;
        let path = scratch::part_path(job_dir, span.index);
        match part.state {
            PartState::Done => {
                if scratch::part_len(&path) == Some(span.length) {
                    kept += 1;
                    continue;
                }
                // Manifest and disk disagree; the bytes lose.
                warn!(
                    job = job_id,
                    part = part.index,
                    expected = span.length,
                    found = scratch::part_len(&path).unwrap_or(0),
                    "done part fails length check, re-fetching"
                );
                store
                    .reset_part_pending(job_id, part.index)
                    .await
                    .map_err(|e| TransferError::Fatal(format!("manifest: {e:#}")))?;
                pending.push(PendingPart { span, retries });
            }
            PartState::Pending => pending.push(PendingPart { span, retries }),
            PartState::InFlight | PartState::Failed => {
                debug!(job = job_id, part = part.index, state = part.state.as_str(), "resetting part");
                store
                    .reset_part_pending(job_id, part.index)
                    .await
                    .map_err(|e| TransferError::Fatal(format!("manifest: {e:#}")))?;
                pending.push(PendingPart { span, retries });
            }
        }
    }

    if kept > 0 {
        info!(
            job = job_id,
            kept,
            pending = pending.len(),
            "resume kept verified parts"
        );
    }
    Ok(Reconciled {
        pending,
        assembled: false,
    })
}
