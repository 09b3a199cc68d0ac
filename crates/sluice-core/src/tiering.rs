//! Archive relocation: move the assembled artifact from the scratch volume
//! to the archive volume.
//!
//! Same-volume moves are a rename. Cross-volume moves copy to a staging name,
//! verify length and checksum, rename into place, and only then delete the
//! scratch copy. The scratch original is never removed before the archive
//! copy is verified.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};
use tokio::fs::OpenOptions;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::TransferError;

/// Relocate `scratch` to `archive` once. Rename first; fall back to
/// copy-verify-delete when the volumes differ.
pub async fn relocate(scratch: &Path, archive: &Path) -> Result<()> {
    if let Some(parent) = archive.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating {}", parent.display()))?;
    }

    match tokio::fs::rename(scratch, archive).await {
        Ok(()) => {
            debug!(to = %archive.display(), "renamed artifact into archive");
            Ok(())
        }
        Err(e) => {
            // Typically EXDEV: scratch and archive are different filesystems.
            debug!(error = %e, "rename failed, copying across volumes");
            copy_verify_delete(scratch, archive).await
        }
    }
}

/// Copy `scratch` to a staging file next to `archive`, verify the copy byte
/// for byte, rename it into place, then delete the scratch original.
pub(crate) async fn copy_verify_delete(scratch: &Path, archive: &Path) -> Result<()> {
    let staging = staging_path(archive);

    tokio::fs::copy(scratch, &staging)
        .await
        .with_context(|| format!("copying to {}", staging.display()))?;

    let out = OpenOptions::new()
        .write(true)
        .open(&staging)
        .await
        .with_context(|| format!("reopening {}", staging.display()))?;
    out.sync_all()
        .await
        .with_context(|| format!("syncing {}", staging.display()))?;
    drop(out);

    let src_len = tokio::fs::metadata(scratch).await?.len();
    let dst_len = tokio::fs::metadata(&staging).await?.len();
    if src_len != dst_len {
        bail!(
            "archive copy is {} bytes, expected {} ({})",
            dst_len,
            src_len,
            staging.display()
        );
    }

    let src = scratch.to_path_buf();
    let dst = staging.clone();
    let (src_sum, dst_sum) = tokio::task::spawn_blocking(move || {
        let a = file_digest(&src)?;
        let b = file_digest(&dst)?;
        anyhow::Ok((a, b))
    })
    .await
    .context("digest task panicked")??;
    if src_sum != dst_sum {
        bail!("archive copy digest mismatch ({})", staging.display());
    }

    tokio::fs::rename(&staging, archive)
        .await
        .with_context(|| format!("renaming into {}", archive.display()))?;

    if let Err(e) = tokio::fs::remove_file(scratch).await {
        warn!(path = %scratch.display(), error = %e, "scratch artifact not removed");
    }
    info!(to = %archive.display(), bytes = src_len, "artifact archived");
    Ok(())
}

fn staging_path(archive: &Path) -> PathBuf {
    let mut s = archive.as_os_str().to_os_string();
    s.push(".tier");
    PathBuf::from(s)
}

/// SHA-256 of a whole file as lowercase hex. Blocking; callers on the
/// runtime wrap it in `spawn_blocking`.
fn file_digest(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)
        .with_context(|| format!("hashing {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 128 * 1024];
    loop {
        let n = std::io::Read::read(&mut file, &mut buf)
            .with_context(|| format!("hashing {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Relocation with exponential backoff. Tiering failures are usually
/// transient volume trouble, so a handful of attempts before failing the job.
pub async fn relocate_with_retry(
    scratch: &Path,
    archive: &Path,
    max_attempts: u32,
    base_delay: Duration,
    cancel: &CancellationToken,
) -> Result<(), TransferError> {
    let max_attempts = max_attempts.max(1);
    for attempt in 1..=max_attempts {
        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }
        match relocate(scratch, archive).await {
            Ok(()) => return Ok(()),
            Err(e) if attempt < max_attempts => {
                let delay = base_delay.saturating_mul(1 << (attempt - 1).min(8));
                warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "tiering attempt failed"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(TransferError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) => return Err(TransferError::Fatal(format!("tiering: {e:#}"))),
        }
    }
    Err(TransferError::Fatal("tiering: attempts exhausted".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn relocate_moves_file() {
        let tmp = tempfile::tempdir().unwrap();
        let scratch = tmp.path().join("scratch/a.bin");
        let archive = tmp.path().join("archive/a.bin");
        tokio::fs::create_dir_all(scratch.parent().unwrap()).await.unwrap();
        tokio::fs::write(&scratch, b"payload").await.unwrap();

        relocate(&scratch, &archive).await.unwrap();
        assert!(!scratch.exists());
        assert_eq!(tokio::fs::read(&archive).await.unwrap(), b"payload");
    }

    #[tokio::test]
    async fn copy_verify_delete_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let scratch = tmp.path().join("src.bin");
        let archive = tmp.path().join("deep/dst.bin");
        tokio::fs::write(&scratch, vec![42u8; 200_000]).await.unwrap();
        tokio::fs::create_dir_all(archive.parent().unwrap()).await.unwrap();

        copy_verify_delete(&scratch, &archive).await.unwrap();
        assert!(!scratch.exists());
        let data = tokio::fs::read(&archive).await.unwrap();
        assert_eq!(data.len(), 200_000);
        assert!(data.iter().all(|&b| b == 42));
        // No staging leftovers.
        assert!(!staging_path(&archive).exists());
    }

    #[test]
    fn digest_tracks_content_not_path() {
        let tmp = tempfile::tempdir().unwrap();
        let a = tmp.path().join("a");
        let b = tmp.path().join("b");
        let c = tmp.path().join("c");
        std::fs::write(&a, vec![9u8; 300_000]).unwrap();
        std::fs::write(&b, vec![9u8; 300_000]).unwrap();
        let mut tweaked = vec![9u8; 300_000];
        tweaked[150_000] = 8;
        std::fs::write(&c, tweaked).unwrap();

        let da = file_digest(&a).unwrap();
        assert_eq!(da, file_digest(&b).unwrap());
        assert_ne!(da, file_digest(&c).unwrap());
    }

    #[tokio::test]
    async fn retry_gives_up_with_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("does-not-exist.bin");
        let archive = tmp.path().join("out.bin");
        let cancel = CancellationToken::new();

        let err = relocate_with_retry(&missing, &archive, 2, Duration::from_millis(1), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Fatal(_)));
    }

    #[tokio::test]
    async fn retry_observes_cancellation() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("does-not-exist.bin");
        let archive = tmp.path().join("out.bin");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = relocate_with_retry(&missing, &archive, 5, Duration::from_secs(10), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }
}
