
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use jobclaim::error::CoordinatorError;
use jobclaim::scheduler::{lifecycle, ExecutionResult, StreamKind, WorkItemState};
use jobclaim::store::{InMemoryJobStore, JobStore};
use jobclaim::stream::{is_last_update_too_old, StreamFreshnessCache, StreamRefresher};
use jobclaim::worker::StreamBuffers;
use jobclaim::config::StreamConfig;
use test_harness::{fast_stream_config, submit_running, RacingStore};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

type Store = InMemoryJobStore<WorkItemState>;

fn cache(store: &Arc<Store>) -> StreamFreshnessCache<WorkItemState> {
    StreamFreshnessCache::new(fast_stream_config(), store.clone())
}

#[test]
fn test_last_update_too_old_table() {
    let window = Duration::from_millis(2000);
    let t = Utc::now();

    assert!(!is_last_update_too_old(None, None, window));
    assert!(!is_last_update_too_old(Some(t), None, window));
    assert!(is_last_update_too_old(None, Some(t), window));
    assert!(is_last_update_too_old(
        Some(t),
        Some(t + chrono::Duration::milliseconds(2500)),
        window
    ));
    assert!(!is_last_update_too_old(
        Some(t),
        Some(t + chrono::Duration::milliseconds(1000)),
        window
    ));
    // update written after the request
    assert!(!is_last_update_too_old(
        Some(t + chrono::Duration::milliseconds(100)),
        Some(t),
        window
    ));
}

#[tokio::test]
async fn test_update_necessary_only_for_running_jobs() {
    let store = Arc::new(Store::new());
    let cache = cache(&store);
    let mut job = submit_running(store.as_ref(), "alice").await;

    // never written
    assert!(cache.is_update_necessary(&job));

    lifecycle::record_streams(&mut job, "out".to_string(), String::new());
    assert!(!cache.is_update_necessary(&job));

    job.last_stream_update_at = Some(Utc::now() - chrono::Duration::seconds(10));
    assert!(cache.is_update_necessary(&job));

    lifecycle::mark_done(&mut job, ExecutionResult::Ok).unwrap();
    assert!(!cache.is_update_necessary(&job));
}

#[tokio::test]
async fn test_fetch_finished_job_returns_stored_streams() {
    let store = Arc::new(Store::new());
    let job = submit_running(store.as_ref(), "alice").await;
    store
        .run_isolated(
            job.id,
            Box::new(|j| {
                lifecycle::record_streams(j, "final out".to_string(), "final err".to_string());
                lifecycle::mark_done(j, ExecutionResult::Ok)
            }),
        )
        .await
        .unwrap();
    let cache = cache(&store);

    assert_eq!(cache.fetch_output(job.id).await.unwrap(), "final out");
    assert_eq!(cache.fetch_error(job.id).await.unwrap(), "final err");

    // reading finished output records no refresh request
    let stored = store.find_by_id(job.id).await.unwrap().unwrap();
    assert!(stored.last_stream_refresh_request_at.is_none());
}

#[tokio::test]
async fn test_fetch_unknown_job() {
    let store = Arc::new(Store::new());
    let result = cache(&store).fetch_output(Uuid::new_v4()).await;
    assert!(matches!(result, Err(CoordinatorError::JobNotFound(_))));
}

#[tokio::test]
async fn test_fetch_waits_for_execution_side_refresh() {
    let store = Arc::new(Store::new());
    let job = submit_running(store.as_ref(), "alice").await;

    let buffers = StreamBuffers::new();
    buffers.append_output("line 1\nline 2\n");
    buffers.append_error("warning\n");
    let refresher = StreamRefresher::new(store.clone(), buffers, &fast_stream_config());
    let token = CancellationToken::new();
    let watcher = {
        let token = token.clone();
        let job_id = job.id;
        tokio::spawn(async move { refresher.run(job_id, token).await })
    };

    let cache = cache(&store);
    let output = cache.fetch_fresh_stream(job.id, StreamKind::Output).await.unwrap();
    assert_eq!(output, "line 1\nline 2\n");

    let stored = store.find_by_id(job.id).await.unwrap().unwrap();
    assert!(stored.last_stream_refresh_request_at.is_some());
    assert!(stored.last_stream_update_at >= stored.last_stream_refresh_request_at);
    assert_eq!(stored.error_stream, "warning\n");

    token.cancel();
    watcher.await.unwrap();
}

#[tokio::test]
async fn test_fetch_returns_when_job_stops_running() {
    let store = Arc::new(Store::new());
    let job = submit_running(store.as_ref(), "alice").await;
    let cache = cache(&store);

    let canceler = {
        let store = store.clone();
        let job_id = job.id;
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            store
                .run_isolated(job_id, Box::new(lifecycle::cancel::<WorkItemState>))
                .await
                .unwrap();
        })
    };

    let output = cache.fetch_output(job.id).await.unwrap();
    assert!(output.is_empty());
    canceler.await.unwrap();

    let stored = store.find_by_id(job.id).await.unwrap().unwrap();
    assert_eq!(stored.execution_state, WorkItemState::CancelRequested);
}

#[tokio::test]
async fn test_fetch_times_out_without_refresher() {
    let store = Arc::new(Store::new());
    let job = submit_running(store.as_ref(), "alice").await;
    let cache = cache(&store);

    match cache.fetch_output(job.id).await {
        Err(CoordinatorError::Timeout {
            job_id,
            checks,
            elapsed,
        }) => {
            assert_eq!(job_id, job.id);
            assert_eq!(checks, fast_stream_config().max_poll_checks);
            assert!(elapsed >= Duration::from_millis(100));
        }
        other => panic!("expected Timeout, got {:?}", other),
    }
}

#[tokio::test]
async fn test_fetch_aborted_by_shutdown() {
    let store = Arc::new(Store::new());
    let job = submit_running(store.as_ref(), "alice").await;
    let shutdown = CancellationToken::new();
    let cache = cache(&store).with_shutdown(shutdown.clone());

    shutdown.cancel();
    let result = cache.fetch_output(job.id).await;
    assert!(matches!(result, Err(CoordinatorError::ShuttingDown)));
}

#[tokio::test]
async fn test_refresher_writes_only_on_request() {
    let store = Arc::new(Store::new());
    let job = submit_running(store.as_ref(), "alice").await;
    let buffers = StreamBuffers::new();
    buffers.append_output("partial");
    let refresher = StreamRefresher::new(store.clone(), buffers, &fast_stream_config());

    assert!(!refresher.refresh_if_requested(job.id).await.unwrap());

    store
        .run_isolated(
            job.id,
            Box::new(|j| {
                j.last_stream_refresh_request_at = Some(Utc::now());
                Ok(())
            }),
        )
        .await
        .unwrap();
    assert!(refresher.refresh_if_requested(job.id).await.unwrap());

    let stored = store.find_by_id(job.id).await.unwrap().unwrap();
    assert_eq!(stored.output_stream, "partial");

    // answered requests are not answered again
    assert!(!refresher.refresh_if_requested(job.id).await.unwrap());
}

async fn request_refresh<S: jobclaim::scheduler::JobState>(store: &dyn JobStore<S>, job_id: Uuid) {
    store
        .run_isolated(
            job_id,
            Box::new(|j| {
                j.last_stream_refresh_request_at = Some(Utc::now());
                Ok(())
            }),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_refresher_write_retries_follow_config() {
    let store = Arc::new(RacingStore::<WorkItemState>::new());
    let job = submit_running(store.as_ref(), "alice").await;
    request_refresh(store.as_ref(), job.id).await;

    let config = StreamConfig {
        stream_write_retries: 1,
        ..fast_stream_config()
    };
    let refresher = StreamRefresher::new(store.clone(), StreamBuffers::new(), &config);

    store.conflict_next(5);
    let saves_before = store.save_count();
    match refresher.refresh_if_requested(job.id).await {
        Err(CoordinatorError::RetriesExhausted { attempts, .. }) => assert_eq!(attempts, 2),
        other => panic!("expected RetriesExhausted, got {:?}", other),
    }
    assert_eq!(store.save_count() - saves_before, 2);
}

#[tokio::test]
async fn test_refresher_of_superseded_execution_writes_nothing() {
    let store = Arc::new(Store::new());
    let job = submit_running(store.as_ref(), "alice").await;
    let current = Uuid::new_v4();
    store
        .run_isolated(
            job.id,
            Box::new(move |j| lifecycle::bind_execution(j, current)),
        )
        .await
        .unwrap();
    request_refresh(store.as_ref(), job.id).await;

    let buffers = StreamBuffers::new();
    buffers.append_output("stale");
    let stale = StreamRefresher::new(store.clone(), buffers.clone(), &fast_stream_config())
        .for_execution(Uuid::new_v4());
    assert!(!stale.refresh_if_requested(job.id).await.unwrap());
    assert!(store.find_by_id(job.id).await.unwrap().unwrap().output_stream.is_empty());

    let live = StreamRefresher::new(store.clone(), buffers, &fast_stream_config())
        .for_execution(current);
    assert!(live.refresh_if_requested(job.id).await.unwrap());
    assert_eq!(store.find_by_id(job.id).await.unwrap().unwrap().output_stream, "stale");
}
