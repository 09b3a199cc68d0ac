//! Job/part write operations. Each call is durable before it returns.

use anyhow::Result;

use super::db::{unix_timestamp, ManifestStore};
use super::types::{JobId, JobState, PartState};
use crate::planner::PartSpan;

impl ManifestStore {
    /// Insert a new queued job with minimal information.
    ///
    /// Total size and the part layout are filled in by `record_plan` once the
    /// source has been probed.
    pub async fn add_job(
        &self,
        locator: &str,
        target_name: &str,
        part_size: i64,
        worker_limit: Option<i64>,
    ) -> Result<JobId> {
        let now = unix_timestamp();
        let row_id = sqlx::query(
            r#"
            INSERT INTO jobs (
                locator, target_name, total_size, part_size,
                state, error, worker_limit, created_at, updated_at
            ) VALUES (?1, ?2, NULL, ?3, ?4, NULL, ?5, ?6, ?7)
            "#,
        )
        .bind(locator)
        .bind(target_name)
        .bind(part_size)
        .bind(JobState::Queued.as_str())
        .bind(worker_limit)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(row_id)
    }

    /// Persist the part plan for a job: total size plus one Pending row per
    /// part. Replaces any previous plan in the same transaction, so a crash
    /// can never leave a half-written layout behind.
    pub async fn record_plan(&self, id: JobId, total_size: i64, spans: &[PartSpan]) -> Result<()> {
        let now = unix_timestamp();
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            UPDATE jobs
            SET total_size = ?1,
                updated_at = ?2
            WHERE id = ?3
            "#,
        )
        .bind(total_size)
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM parts WHERE job_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        for span in spans {
            sqlx::query(
                r#"
                INSERT INTO parts (job_id, idx, start_offset, length, state, retry_count, bytes_on_disk)
                VALUES (?1, ?2, ?3, ?4, ?5, 0, 0)
                "#,
            )
            .bind(id)
            .bind(span.index as i64)
            .bind(span.offset as i64)
            .bind(span.length as i64)
            .bind(PartState::Pending.as_str())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Update the state of an existing job.
    pub async fn set_state(&self, id: JobId, state: JobState) -> Result<()> {
        let now = unix_timestamp();
        sqlx::query(
            r#"
            UPDATE jobs
            SET state = ?1,
                updated_at = ?2
            WHERE id = ?3
            "#,
        )
        .bind(state.as_str())
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Mark a job Failed with a human-readable cause. The part rows are kept
    /// so a later restart can resume whatever did complete.
    pub async fn fail_job(&self, id: JobId, error: &str) -> Result<()> {
        let now = unix_timestamp();
        sqlx::query(
            r#"
            UPDATE jobs
            SET state = ?1,
                error = ?2,
                updated_at = ?3
            WHERE id = ?4
            "#,
        )
        .bind(JobState::Failed.as_str())
        .bind(error)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn mark_part_in_flight(&self, id: JobId, idx: i64) -> Result<()> {
        self.set_part_state(id, idx, PartState::InFlight).await
    }

    /// Record a part as Done with the byte count that is now durable on the
    /// scratch volume. Callers must fsync the part file first.
    pub async fn mark_part_done(&self, id: JobId, idx: i64, bytes_on_disk: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE parts
            SET state = ?1,
                bytes_on_disk = ?2
            WHERE job_id = ?3 AND idx = ?4
            "#,
        )
        .bind(PartState::Done.as_str())
        .bind(bytes_on_disk)
        .bind(id)
        .bind(idx)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_part_failed(&self, id: JobId, idx: i64) -> Result<()> {
        self.set_part_state(id, idx, PartState::Failed).await
    }

    /// Reset a part to Pending and discard its recorded byte count. Used when
    /// resume finds the scratch bytes untrustworthy or a fetch was severed.
    pub async fn reset_part_pending(&self, id: JobId, idx: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE parts
            SET state = ?1,
                bytes_on_disk = 0
            WHERE job_id = ?2 AND idx = ?3
            "#,
        )
        .bind(PartState::Pending.as_str())
        .bind(id)
        .bind(idx)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Increment a part's persisted retry counter.
    pub async fn bump_part_retry(&self, id: JobId, idx: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE parts
            SET retry_count = retry_count + 1
            WHERE job_id = ?1 AND idx = ?2
            "#,
        )
        .bind(id)
        .bind(idx)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Delete all part rows of a job (terminal-state garbage collection).
    pub async fn prune_parts(&self, id: JobId) -> Result<()> {
        sqlx::query("DELETE FROM parts WHERE job_id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Permanently remove a job and its parts from the database.
    ///
    /// File cleanup is handled separately by higher layers.
    pub async fn remove_job(&self, id: JobId) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM parts WHERE job_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM jobs WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Normalize jobs stranded in a mid-flight state (e.g. after a crash)
    /// back to Queued so they get rescheduled. Returns the number reset.
    pub async fn reset_interrupted_jobs(&self) -> Result<u64> {
        let now = unix_timestamp();
        let r = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'queued',
                updated_at = ?1
            WHERE state IN ('planning', 'resuming', 'downloading', 'assembling', 'tiering')
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected())
    }

    async fn set_part_state(&self, id: JobId, idx: i64, state: PartState) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE parts
            SET state = ?1
            WHERE job_id = ?2 AND idx = ?3
            "#,
        )
        .bind(state.as_str())
        .bind(id)
        .bind(idx)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
