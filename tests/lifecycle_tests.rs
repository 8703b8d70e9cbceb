use jobclaim::error::CoordinatorError;
use jobclaim::scheduler::lifecycle;
use jobclaim::scheduler::{ExecutionResult, ScanJob, ScanJobState, WorkItem, WorkItemState};
use uuid::Uuid;

fn ready_scan_job() -> ScanJob {
    let mut job = ScanJob::new("alice", "echo scan");
    lifecycle::approve(&mut job).unwrap();
    job
}

fn started_scan_job() -> ScanJob {
    let mut job = ready_scan_job();
    lifecycle::claim(&mut job).unwrap();
    job
}

#[test]
fn test_approve_moves_to_ready() {
    let job = ready_scan_job();
    assert_eq!(job.execution_state, ScanJobState::ReadyToStart);
}

#[test]
fn test_double_approve_rejected_and_state_unchanged() {
    let mut job = ready_scan_job();
    let before = job.clone();

    let err = lifecycle::approve(&mut job).unwrap_err();
    assert!(matches!(err, CoordinatorError::InvalidState { .. }));
    assert_eq!(job, before);
}

#[test]
fn test_claim_sets_started_at() {
    let job = started_scan_job();
    assert_eq!(job.execution_state, ScanJobState::Started);
    assert!(job.started_at.is_some());
}

#[test]
fn test_claim_requires_ready() {
    let mut job = ScanJob::new("alice", "echo");
    assert!(lifecycle::claim(&mut job).is_err());
    assert_eq!(job.execution_state, ScanJobState::Initializing);
    assert!(job.started_at.is_none());
}

#[test]
fn test_mark_done_maps_result_per_flavor() {
    let mut job = started_scan_job();
    lifecycle::mark_done(&mut job, ExecutionResult::Ok).unwrap();
    assert_eq!(job.execution_state, ScanJobState::Ended);
    assert_eq!(job.execution_result, ExecutionResult::Ok);
    assert!(job.ended_at.is_some());

    let mut item = WorkItem::new("bob", "true");
    lifecycle::approve(&mut item).unwrap();
    lifecycle::claim(&mut item).unwrap();
    lifecycle::mark_done(&mut item, ExecutionResult::Failed).unwrap();
    assert_eq!(item.execution_state, WorkItemState::Failed);
}

#[test]
fn test_mark_done_rejects_none_result() {
    let mut job = started_scan_job();
    assert!(lifecycle::mark_done(&mut job, ExecutionResult::None).is_err());
    assert_eq!(job.execution_state, ScanJobState::Started);
}

#[test]
fn test_cancel_forces_failed_result() {
    let mut job = started_scan_job();
    lifecycle::cancel(&mut job).unwrap();

    assert_eq!(job.execution_state, ScanJobState::CancelRequested);
    assert_eq!(job.execution_result, ExecutionResult::Failed);
    assert!(job.ended_at.is_some());
}

#[test]
fn test_cancel_of_ended_job_rejected() {
    let mut job = started_scan_job();
    lifecycle::mark_done(&mut job, ExecutionResult::Ok).unwrap();
    let before = job.clone();

    match lifecycle::cancel(&mut job) {
        Err(CoordinatorError::InvalidState { reason, .. }) => {
            assert!(reason.contains("already ended"), "reason: {}", reason);
        }
        other => panic!("expected InvalidState, got {:?}", other),
    }
    assert_eq!(job, before);
}

#[test]
fn test_cancel_of_job_with_result_rejected() {
    let mut job = started_scan_job();
    job.execution_result = ExecutionResult::Ok;

    match lifecycle::cancel(&mut job) {
        Err(CoordinatorError::InvalidState { reason, .. }) => {
            assert!(reason.contains("already has a result"), "reason: {}", reason);
        }
        other => panic!("expected InvalidState, got {:?}", other),
    }
    assert_eq!(job.execution_state, ScanJobState::Started);
}

#[test]
fn test_cancel_twice_rejected() {
    let mut job = started_scan_job();
    lifecycle::cancel(&mut job).unwrap();
    assert!(lifecycle::cancel(&mut job).is_err());
}

#[test]
fn test_restart_resets_from_any_state() {
    let mut job = started_scan_job();
    lifecycle::mark_done(&mut job, ExecutionResult::Failed).unwrap();
    let first_start = job.started_at.unwrap();

    std::thread::sleep(std::time::Duration::from_millis(5));
    lifecycle::restart(&mut job);

    assert_eq!(job.execution_state, ScanJobState::Started);
    assert_eq!(job.execution_result, ExecutionResult::None);
    assert!(job.ended_at.is_none());
    assert!(job.started_at.unwrap() > first_start);
}

#[test]
fn test_bind_execution_needs_running_job() {
    let mut job = ready_scan_job();
    let err = lifecycle::bind_execution(&mut job, Uuid::new_v4()).unwrap_err();
    assert!(matches!(err, CoordinatorError::InvalidState { .. }));
    assert!(job.current_execution.is_none());

    let mut job = started_scan_job();
    let execution_id = Uuid::new_v4();
    lifecycle::bind_execution(&mut job, execution_id).unwrap();
    assert!(job.is_owned_by(execution_id));
    assert!(!job.is_owned_by(Uuid::new_v4()));
}

#[test]
fn test_restart_releases_previous_execution() {
    let mut job = started_scan_job();
    let execution_id = Uuid::new_v4();
    lifecycle::bind_execution(&mut job, execution_id).unwrap();

    lifecycle::restart(&mut job);
    assert!(!job.is_owned_by(execution_id));
    assert!(job.current_execution.is_none());
}

#[test]
fn test_confirm_canceled_only_after_request() {
    let mut item = WorkItem::new("bob", "true");
    assert!(lifecycle::confirm_canceled(&mut item).is_err());

    lifecycle::approve(&mut item).unwrap();
    lifecycle::claim(&mut item).unwrap();
    lifecycle::cancel(&mut item).unwrap();
    lifecycle::confirm_canceled(&mut item).unwrap();
    assert_eq!(item.execution_state, WorkItemState::Canceled);
    assert_eq!(item.execution_result, ExecutionResult::Failed);
}

#[test]
fn test_record_streams_sets_update_time() {
    let mut job = started_scan_job();
    assert!(job.last_stream_update_at.is_none());

    lifecycle::record_streams(&mut job, "out".to_string(), "err".to_string());
    assert_eq!(job.output_stream, "out");
    assert_eq!(job.error_stream, "err");
    assert!(job.last_stream_update_at.is_some());
    assert_eq!(job.execution_state, ScanJobState::Started);
}
