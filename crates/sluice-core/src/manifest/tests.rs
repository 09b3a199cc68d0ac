use super::db::open_memory;
use super::types::{JobState, PartState};
use crate::planner::plan_parts;

#[tokio::test]
async fn plan_roundtrip() {
    let store = open_memory().await.unwrap();
    let id = store
        .add_job("src://file/1", "movie.mkv", 30, None)
        .await
        .unwrap();

    let spans = plan_parts(100, 30);
    store.record_plan(id, 100, &spans).await.unwrap();

    let (job, parts) = store.load_job(id).await.unwrap().unwrap();
    assert_eq!(job.locator, "src://file/1");
    assert_eq!(job.target_name, "movie.mkv");
    assert_eq!(job.total_size, Some(100));
    assert_eq!(job.state, JobState::Queued);
    assert_eq!(parts.len(), 4);
    assert_eq!(parts[3].offset, 90);
    assert_eq!(parts[3].length, 10);
    assert!(parts.iter().all(|p| p.state == PartState::Pending));

    store.mark_part_done(id, 1, 30).await.unwrap();
    let parts = store.get_parts(id).await.unwrap();
    assert_eq!(parts[1].state, PartState::Done);
    assert_eq!(parts[1].bytes_on_disk, 30);
    assert_eq!(parts[0].state, PartState::Pending);
}

#[tokio::test]
async fn load_job_resets_stale_in_flight() {
    let store = open_memory().await.unwrap();
    let id = store.add_job("src://file/2", "a.bin", 10, None).await.unwrap();
    store.record_plan(id, 20, &plan_parts(20, 10)).await.unwrap();

    store.mark_part_in_flight(id, 0).await.unwrap();
    store.mark_part_done(id, 1, 10).await.unwrap();

    let (_, parts) = store.load_job(id).await.unwrap().unwrap();
    // A part observed InFlight at load time belonged to a dead run.
    assert_eq!(parts[0].state, PartState::Pending);
    assert_eq!(parts[0].bytes_on_disk, 0);
    assert_eq!(parts[1].state, PartState::Done);
}

#[tokio::test]
async fn remove_job_clears_parts() {
    let store = open_memory().await.unwrap();
    let id = store.add_job("src://file/3", "b.bin", 10, None).await.unwrap();
    store.record_plan(id, 30, &plan_parts(30, 10)).await.unwrap();

    store.remove_job(id).await.unwrap();
    assert!(store.get_job(id).await.unwrap().is_none());
    assert!(store.get_parts(id).await.unwrap().is_empty());
}

#[tokio::test]
async fn reset_interrupted_jobs_requeues_mid_flight_states() {
    let store = open_memory().await.unwrap();
    let a = store.add_job("src://a", "a.bin", 10, None).await.unwrap();
    let b = store.add_job("src://b", "b.bin", 10, None).await.unwrap();
    let c = store.add_job("src://c", "c.bin", 10, None).await.unwrap();

    store.set_state(a, JobState::Downloading).await.unwrap();
    store.set_state(b, JobState::Tiering).await.unwrap();
    store.set_state(c, JobState::Completed).await.unwrap();

    let reset = store.reset_interrupted_jobs().await.unwrap();
    assert_eq!(reset, 2);
    assert_eq!(store.get_job(a).await.unwrap().unwrap().state, JobState::Queued);
    assert_eq!(store.get_job(b).await.unwrap().unwrap().state, JobState::Queued);
    assert_eq!(
        store.get_job(c).await.unwrap().unwrap().state,
        JobState::Completed
    );
}

#[tokio::test]
async fn fail_job_records_error() {
    let store = open_memory().await.unwrap();
    let id = store.add_job("src://d", "d.bin", 10, None).await.unwrap();
    store.fail_job(id, "source: not found").await.unwrap();

    let job = store.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.error.as_deref(), Some("source: not found"));

    let active = store.list_active_jobs().await.unwrap();
    assert!(active.iter().all(|j| j.id != id));
}
