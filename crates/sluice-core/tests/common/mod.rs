//! Shared harness for engine integration tests.

pub mod fake_source;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use sluice_core::config::{EngineConfig, RetryConfig};
use sluice_core::engine::Engine;
use sluice_core::manifest::{JobId, JobState, ManifestStore};
use sluice_core::source::MediaSource;

pub struct Harness {
    pub engine: Engine,
    pub store: ManifestStore,
    pub scratch: PathBuf,
    pub archive: PathBuf,
    _tmp: tempfile::TempDir,
}

/// Small parts and fast retries so tests finish quickly.
pub fn test_config(root: &Path, part_size: u64) -> EngineConfig {
    EngineConfig {
        part_size,
        max_total_fetches: 8,
        max_fetches_per_job: 4,
        scratch_dir: root.join("scratch"),
        archive_dir: root.join("archive"),
        retry: Some(RetryConfig {
            max_attempts: 4,
            base_delay_secs: 0.005,
            max_delay_secs: 1,
            rate_limit_floor_secs: 0,
        }),
        tiering: None,
    }
}

pub async fn harness(source: Arc<dyn MediaSource>, part_size: u64) -> Harness {
    harness_with(source, part_size, |_| {}).await
}

pub async fn harness_with(
    source: Arc<dyn MediaSource>,
    part_size: u64,
    tweak: impl FnOnce(&mut EngineConfig),
) -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = test_config(tmp.path(), part_size);
    tweak(&mut config);
    let scratch = config.scratch_dir.clone();
    let archive = config.archive_dir.clone();
    let store = ManifestStore::open_at(tmp.path().join("manifest.db"))
        .await
        .unwrap();
    let engine = Engine::new(config, store.clone(), source);
    Harness {
        engine,
        store,
        scratch,
        archive,
        _tmp: tmp,
    }
}

/// Poll the manifest until the job reaches `state` or the deadline passes.
pub async fn wait_for_state(store: &ManifestStore, id: JobId, state: JobState, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let job = store.get_job(id).await.unwrap().unwrap();
        if job.state == state {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {id} stuck in {:?} waiting for {:?}",
            job.state,
            state
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Poll until the job is in any terminal state and return it.
pub async fn wait_terminal(store: &ManifestStore, id: JobId, timeout: Duration) -> JobState {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let job = store.get_job(id).await.unwrap().unwrap();
        if job.state.is_terminal() {
            return job.state;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {id} not terminal, still {:?}",
            job.state
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
