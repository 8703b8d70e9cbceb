
use std::sync::Arc;
use std::time::Duration;

use jobclaim::admin::AtomicProcessingSwitch;
use jobclaim::config::{CoordinatorConfig, ExecutorConfig};
use jobclaim::node::Node;
use jobclaim::notify::{BroadcastNotificationSink, JobEventKind};
use jobclaim::scheduler::{CancelOutcome, ExecutionResult, JobState, ScanJobState, WorkItemState};
use jobclaim::store::{InMemoryJobStore, JobStore};
use test_harness::{
    fast_cancel_config, fast_claim_config, fast_stream_config, submit_ready, wait_until,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct TestCluster<S: JobState> {
    store: Arc<InMemoryJobStore<S>>,
    nodes: Vec<Arc<Node<S>>>,
    handles: Vec<JoinHandle<()>>,
    events: BroadcastNotificationSink,
    shutdown: CancellationToken,
}

impl<S: JobState> TestCluster<S> {
    fn start(instances: usize) -> Self {
        let store = Arc::new(InMemoryJobStore::<S>::new());
        let events = BroadcastNotificationSink::new(1024);
        let switch = Arc::new(AtomicProcessingSwitch::default());
        let shutdown = CancellationToken::new();

        let mut nodes = Vec::new();
        let mut handles = Vec::new();
        for i in 0..instances {
            let config = CoordinatorConfig::new(format!("node-{}", i + 1))
                .with_claim(fast_claim_config())
                .with_stream(fast_stream_config())
                .with_cancel(fast_cancel_config())
                .with_executor(ExecutorConfig::default());
            let node = Arc::new(Node::new(
                config,
                store.clone(),
                Arc::new(events.clone()),
                switch.clone(),
                shutdown.child_token(),
            ));
            let runner = node.clone();
            handles.push(tokio::spawn(async move {
                runner.run().await.unwrap();
            }));
            nodes.push(node);
        }

        Self {
            store,
            nodes,
            handles,
            events,
            shutdown,
        }
    }

    async fn stop(self) {
        self.shutdown.cancel();
        for handle in self.handles {
            tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .expect("node should stop")
                .unwrap();
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cluster_runs_each_job_once() {
    let cluster = TestCluster::<ScanJobState>::start(3);
    let mut started = cluster.events.subscribe();

    let mut ids = Vec::new();
    for i in 0..6 {
        let job = submit_ready(cluster.store.as_ref(), "alice", &format!("echo job-{}", i)).await;
        ids.push((job.id, format!("job-{}\n", i)));
    }

    let store = cluster.store.clone();
    wait_until(Duration::from_secs(10), move || {
        let store = store.clone();
        async move { store.all_jobs().await.iter().all(|j| j.is_terminal()) }
    })
    .await;

    for (id, expected_output) in &ids {
        let job = cluster.store.find_by_id(*id).await.unwrap().unwrap();
        assert_eq!(job.execution_state, ScanJobState::Ended);
        assert_eq!(job.execution_result, ExecutionResult::Ok);
        assert_eq!(&job.output_stream, expected_output);
    }

    let mut started_ids = Vec::new();
    while let Ok(event) = started.try_recv() {
        if event.kind == JobEventKind::JobStarted {
            started_ids.push(event.job_id);
        }
    }
    started_ids.sort();
    let mut expected: Vec<_> = ids.iter().map(|(id, _)| *id).collect();
    expected.sort();
    assert_eq!(started_ids, expected, "each job started exactly once");

    cluster.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancel_running_work_item() {
    let cluster = TestCluster::<WorkItemState>::start(2);
    let job = submit_ready(cluster.store.as_ref(), "alice", "echo begin; sleep 30").await;

    let store = cluster.store.clone();
    let job_id = job.id;
    wait_until(Duration::from_secs(5), move || {
        let store = store.clone();
        async move {
            store
                .find_by_id(job_id)
                .await
                .unwrap()
                .is_some_and(|j| j.execution_state == WorkItemState::Running)
        }
    })
    .await;

    // only the node running the job can stop it; ask every node
    let mut owner = None;
    for node in &cluster.nodes {
        if node.launcher.running_count().await > 0 {
            owner = Some(node.clone());
        }
    }
    let owner = owner.expect("one node runs the job");

    let outcome = owner.cancel.cancel(job.id).await.unwrap();
    assert!(matches!(outcome, CancelOutcome::Canceled(_)));

    let store = cluster.store.clone();
    wait_until(Duration::from_secs(5), move || {
        let store = store.clone();
        async move {
            store
                .find_by_id(job_id)
                .await
                .unwrap()
                .is_some_and(|j| j.execution_state == WorkItemState::Canceled)
        }
    })
    .await;

    let canceled = cluster.store.find_by_id(job.id).await.unwrap().unwrap();
    assert_eq!(canceled.execution_result, ExecutionResult::Failed);

    cluster.stop().await;
}

#[tokio::test]
async fn test_node_stops_on_shutdown_without_jobs() {
    let cluster = TestCluster::<ScanJobState>::start(1);
    tokio::time::sleep(Duration::from_millis(50)).await;
    cluster.stop().await;
}

fn assert_send<T: Send>(_: &T) {}

#[test]
fn test_node_run_can_be_spawned() {
    let node = Node::<WorkItemState>::new(
        CoordinatorConfig::new("node-send"),
        Arc::new(InMemoryJobStore::<WorkItemState>::new()),
        Arc::new(BroadcastNotificationSink::new(16)),
        Arc::new(AtomicProcessingSwitch::default()),
        CancellationToken::new(),
    );
    let run = node.run();
    assert_send(&run);
}
