mod test_harness;

use std::time::Duration;

use test_harness::{
    assert_eventually, closed_addr, job_config, test_master_config, video_source, FakeWorker,
    TestMaster,
};
use transcode_cluster::liveness::LivenessMonitor;
use transcode_cluster::registry::{NodeCandidate, NodeStatus};
use transcode_cluster::scheduler::{TaskRef, TaskStatus};
use transcode_cluster::worker::MasterClient;
use transcode_cluster::Master;

const WAIT: Duration = Duration::from_secs(3);

#[tokio::test]
async fn test_dead_worker_is_reclaimed() {
    let master = TestMaster::start().await;
    let mut worker = FakeWorker::join(master.addr, "w1").await;
    let job_id = master.submit("movie", 1).await;
    worker.next_task(WAIT).await.expect("task should be pushed");
    let node_id = worker.node_id();

    worker.kill().await;

    let m = &master;
    let (node, job) = (node_id.as_str(), job_id.as_str());
    assert_eventually(
        || async move { !m.has_node(node).await },
        WAIT,
        "dead node should be reclaimed",
    )
    .await;
    assert_eventually(
        || async move { m.task_status(job, 0).await == Some(TaskStatus::Todo) },
        WAIT,
        "task of a dead node should be requeued",
    )
    .await;
    master.assert_invariants().await;

    master.shutdown().await;
}

#[tokio::test]
async fn test_task_moves_to_surviving_worker() {
    let master = TestMaster::start().await;
    let mut w1 = FakeWorker::join(master.addr, "w1").await;
    let job_id = master.submit("movie", 1).await;
    let task = w1.next_task(WAIT).await.expect("task should be pushed");

    let mut w2 = FakeWorker::join(master.addr, "w2").await;
    w1.kill().await;

    let moved = w2
        .next_task(WAIT)
        .await
        .expect("task should move to the live worker");
    assert_eq!(moved.task_ref(), task.task_ref());
    assert_eq!(
        master.task_status(&job_id, 0).await,
        Some(TaskStatus::Computing)
    );
    master.assert_invariants().await;

    master.shutdown().await;
}

#[tokio::test]
async fn test_failed_push_requeues_task() {
    let master = TestMaster::start().await;
    let job_id = master.submit("movie", 1).await;

    // A client whose callback port has nothing behind it.
    let dead = closed_addr().await;
    let mut client = MasterClient::new(master.addr, "ghost", dead.port());
    let node_id = client.connect(NodeStatus::Free).await.unwrap();

    let m = &master;
    let (node, job) = (node_id.as_str(), job_id.as_str());
    assert_eventually(
        || async move {
            !m.has_node(node).await && m.task_status(job, 0).await == Some(TaskStatus::Todo)
        },
        WAIT,
        "unreachable node should be dropped and its task requeued",
    )
    .await;
    master.assert_invariants().await;

    master.shutdown().await;
}

#[tokio::test]
async fn test_sweep_reports_only_unreachable_nodes() {
    let master = Master::new(test_master_config());
    let alive = FakeWorker::start("127.0.0.1:9".parse().unwrap(), "alive").await;
    let dead = closed_addr().await;

    let alive_id = master
        .connect_node(None, "alive".to_string(), alive.callback_addr, NodeStatus::Paused)
        .await
        .unwrap();
    let dead_id = master
        .connect_node(None, "dead".to_string(), dead, NodeStatus::Paused)
        .await
        .unwrap();

    let monitor = LivenessMonitor::new(master.clone());
    let reclaimed = monitor.sweep().await;
    assert_eq!(reclaimed, vec![dead_id.clone()]);

    let state = master.state();
    let state = state.lock().await;
    assert!(state.registry().contains(&alive_id));
    assert!(!state.registry().contains(&dead_id));
}

#[tokio::test]
async fn test_sweep_requeues_work_of_lost_node() {
    let master = Master::new(test_master_config());
    let dead = closed_addr().await;
    let job_id = master
        .submit_job(job_config("movie"), "movie", 0, &video_source(2))
        .await
        .unwrap();

    // Match inside the state directly so the push never happens.
    let node_id = {
        let state = master.state();
        let mut state = state.lock().await;
        let (id, _) = state
            .register_node(NodeCandidate {
                name: "dead".to_string(),
                address: dead,
            })
            .unwrap();
        let assignment = state
            .apply_status_report(&id, NodeStatus::Free)
            .unwrap()
            .expect("free node should be matched");
        assert_eq!(assignment.task_ref(), TaskRef::new(job_id.clone(), 0));
        id
    };

    let reclaimed = LivenessMonitor::new(master.clone()).sweep().await;
    assert_eq!(reclaimed, vec![node_id]);

    let state = master.state();
    let state = state.lock().await;
    assert!(state.registry().is_empty());
    assert_eq!(
        state.task_status(&TaskRef::new(job_id.clone(), 0)),
        Some(TaskStatus::Todo)
    );
    assert_eq!(state.jobs().get_job(&job_id).unwrap().remaining_tasks(), 2);
}

#[tokio::test]
async fn test_worker_that_refused_a_push_gets_work_later() {
    let master = TestMaster::start().await;
    let mut worker = FakeWorker::start(master.addr, "busy").await;
    // Refuses pushes while it still thinks it is working.
    worker.handler.set_status(NodeStatus::Working).await;
    let node_id = worker.client.connect(NodeStatus::Free).await.unwrap();
    let job_id = master.submit("movie", 1).await;

    let m = &master;
    let (node, job) = (node_id.as_str(), job_id.as_str());
    assert_eventually(
        || async move { m.node_status(node).await == Some(NodeStatus::NotConnected) },
        WAIT,
        "refused push should leave the node NOT_CONNECTED",
    )
    .await;
    assert_eq!(master.task_status(job, 0).await, Some(TaskStatus::Todo));
    assert!(master.has_node(node).await);

    // It never reports on its own; the next probe brings it back.
    worker.handler.set_status(NodeStatus::Free).await;
    let task = worker
        .next_task(WAIT)
        .await
        .expect("revived worker should get the task");
    assert_eq!(task.task_ref(), TaskRef::new(job_id.clone(), 0));
    assert_eq!(
        master.task_status(&job_id, 0).await,
        Some(TaskStatus::Computing)
    );
    master.assert_invariants().await;

    master.shutdown().await;
}
