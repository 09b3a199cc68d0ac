//! Job/part read operations, plus the resume-time load that normalizes
//! stale InFlight rows.

use anyhow::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::db::ManifestStore;
use super::types::{JobId, JobRecord, JobState, PartRecord, PartState};

fn job_from_row(row: &SqliteRow) -> JobRecord {
    let state: String = row.get("state");
    JobRecord {
        id: row.get("id"),
        locator: row.get("locator"),
        target_name: row.get("target_name"),
        total_size: row.get("total_size"),
        part_size: row.get("part_size"),
        state: JobState::from_str(&state),
        error: row.get("error"),
        worker_limit: row.get("worker_limit"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn part_from_row(row: &SqliteRow) -> PartRecord {
    let state: String = row.get("state");
    PartRecord {
        job_id: row.get("job_id"),
        index: row.get("idx"),
        offset: row.get("start_offset"),
        length: row.get("length"),
        state: PartState::from_str(&state),
        retry_count: row.get("retry_count"),
        bytes_on_disk: row.get("bytes_on_disk"),
    }
}

impl ManifestStore {
    /// Fetch a single job record.
    pub async fn get_job(&self, id: JobId) -> Result<Option<JobRecord>> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(job_from_row))
    }

    /// Fetch a job's parts ordered by index. Read-only view for the status
    /// surface; does not normalize stale states.
    pub async fn get_parts(&self, id: JobId) -> Result<Vec<PartRecord>> {
        let rows = sqlx::query("SELECT * FROM parts WHERE job_id = ?1 ORDER BY idx")
            .bind(id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(part_from_row).collect())
    }

    /// Load a job and its parts for the controller, resetting any InFlight
    /// parts to Pending in the same transaction. An InFlight row can only be
    /// observed here if a previous run died mid-fetch, so its scratch bytes
    /// are untrustworthy.
    pub async fn load_job(&self, id: JobId) -> Result<Option<(JobRecord, Vec<PartRecord>)>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            UPDATE parts
            SET state = ?1,
                bytes_on_disk = 0
            WHERE job_id = ?2 AND state = ?3
            "#,
        )
        .bind(PartState::Pending.as_str())
        .bind(id)
        .bind(PartState::InFlight.as_str())
        .execute(&mut *tx)
        .await?;

        let job_row = sqlx::query("SELECT * FROM jobs WHERE id = ?1")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(job_row) = job_row else {
            tx.commit().await?;
            return Ok(None);
        };
        let part_rows = sqlx::query("SELECT * FROM parts WHERE job_id = ?1 ORDER BY idx")
            .bind(id)
            .fetch_all(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(Some((
            job_from_row(&job_row),
            part_rows.iter().map(part_from_row).collect(),
        )))
    }

    /// All jobs, oldest first.
    pub async fn list_jobs(&self) -> Result<Vec<JobRecord>> {
        let rows = sqlx::query("SELECT * FROM jobs ORDER BY created_at, id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(job_from_row).collect())
    }

    /// Jobs not yet in a terminal state, oldest first. These are the jobs a
    /// restart must pick back up.
    pub async fn list_active_jobs(&self) -> Result<Vec<JobRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM jobs
            WHERE state NOT IN ('completed', 'cancelled', 'failed')
            ORDER BY created_at, id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(job_from_row).collect())
    }

    /// Jobs currently in a specific state.
    pub async fn list_jobs_in_state(&self, state: JobState) -> Result<Vec<JobRecord>> {
        let rows = sqlx::query("SELECT * FROM jobs WHERE state = ?1 ORDER BY created_at, id")
            .bind(state.as_str())
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(job_from_row).collect())
    }
}
