//! Scratch-volume layout and part-file assembly.
//!
//! Each job owns one directory under the scratch root. Parts land in
//! individually named files and are stitched into the final artifact only
//! once all of them are Done.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tokio::fs::{File, OpenOptions};
use tracing::debug;

use crate::manifest::JobId;
use crate::planner::PartSpan;

/// Directory holding all scratch files of one job.
pub fn job_dir(scratch_root: &Path, id: JobId) -> PathBuf {
    scratch_root.join(format!("job-{id}"))
}

/// Path of one part file inside a job directory.
pub fn part_path(dir: &Path, index: u64) -> PathBuf {
    dir.join(format!("part-{index:05}"))
}

/// Path of the assembled artifact inside a job directory.
pub fn assembled_path(dir: &Path, target_name: &str) -> PathBuf {
    dir.join(target_name)
}

/// Length of a file on disk, or None if it does not exist.
pub fn part_len(path: &Path) -> Option<u64> {
    std::fs::metadata(path).ok().map(|m| m.len())
}

pub async fn ensure_job_dir(scratch_root: &Path, id: JobId) -> Result<PathBuf> {
    let dir = job_dir(scratch_root, id);
    tokio::fs::create_dir_all(&dir)
        .await
        .with_context(|| format!("creating scratch dir {}", dir.display()))?;
    Ok(dir)
}

/// Remove a job's scratch directory. Missing directories are fine.
pub async fn remove_job_dir(scratch_root: &Path, id: JobId) -> Result<()> {
    let dir = job_dir(scratch_root, id);
    match tokio::fs::remove_dir_all(&dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("removing scratch dir {}", dir.display())),
    }
}

/// Concatenate all part files into the final artifact, in index order.
///
/// Writes to a temporary name first and renames into place, so a crash
/// mid-assembly never leaves a plausible-looking artifact behind. Part files
/// are deleted once the rename lands.
pub async fn assemble(dir: &Path, spans: &[PartSpan], target_name: &str) -> Result<PathBuf> {
    let final_path = assembled_path(dir, target_name);
    let tmp_path = dir.join(format!("{target_name}.assembling"));

    let mut out = File::create(&tmp_path)
        .await
        .with_context(|| format!("creating {}", tmp_path.display()))?;

    for span in spans {
        let path = part_path(dir, span.index);
        let mut part = OpenOptions::new()
            .read(true)
            .open(&path)
            .await
            .with_context(|| format!("opening part {}", path.display()))?;
        let copied = tokio::io::copy(&mut part, &mut out)
            .await
            .with_context(|| format!("appending part {}", path.display()))?;
        if copied != span.length {
            bail!(
                "part {} is {} bytes, expected {}",
                path.display(),
                copied,
                span.length
            );
        }
    }

    out.sync_all()
        .await
        .with_context(|| format!("syncing {}", tmp_path.display()))?;
    drop(out);

    tokio::fs::rename(&tmp_path, &final_path)
        .await
        .with_context(|| format!("renaming into {}", final_path.display()))?;
    debug!(path = %final_path.display(), parts = spans.len(), "assembled artifact");

    for span in spans {
        let path = part_path(dir, span.index);
        if let Err(e) = tokio::fs::remove_file(&path).await {
            debug!(path = %path.display(), error = %e, "leaving stale part file");
        }
    }

    Ok(final_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::plan_parts;

    async fn write_part(dir: &Path, index: u64, data: &[u8]) {
        tokio::fs::write(part_path(dir, index), data).await.unwrap();
    }

    #[tokio::test]
    async fn assemble_concatenates_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path();
        let spans = plan_parts(10, 4);
        write_part(dir, 0, b"aaaa").await;
        write_part(dir, 1, b"bbbb").await;
        write_part(dir, 2, b"cc").await;

        let out = assemble(dir, &spans, "out.bin").await.unwrap();
        let data = tokio::fs::read(&out).await.unwrap();
        assert_eq!(data, b"aaaabbbbcc");
        // Parts are gone after assembly.
        assert!(part_len(&part_path(dir, 0)).is_none());
        assert!(part_len(&part_path(dir, 1)).is_none());
    }

    #[tokio::test]
    async fn assemble_rejects_wrong_part_length() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path();
        let spans = plan_parts(8, 4);
        write_part(dir, 0, b"aaaa").await;
        write_part(dir, 1, b"bb").await;

        let err = assemble(dir, &spans, "out.bin").await.unwrap_err();
        assert!(err.to_string().contains("expected 4"));
        // The final artifact must not exist after a failed assembly.
        assert!(part_len(&assembled_path(dir, "out.bin")).is_none());
    }

    #[tokio::test]
    async fn job_dir_lifecycle() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = ensure_job_dir(tmp.path(), 7).await.unwrap();
        assert!(dir.ends_with("job-7"));
        assert!(dir.is_dir());
        remove_job_dir(tmp.path(), 7).await.unwrap();
        assert!(!dir.exists());
        // Removing again is a no-op.
        remove_job_dir(tmp.path(), 7).await.unwrap();
    }
}
