//! Test harness for master/worker integration tests.
//!
//! Starts a master on an ephemeral port and fake workers that serve a real
//! callback port, so tasks travel over the same protocol as in production.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use transcode_cluster::config::MasterConfig;
use transcode_cluster::media::{FileInfo, StreamInfo};
use transcode_cluster::protocol::ProtocolServer;
use transcode_cluster::registry::NodeStatus;
use transcode_cluster::scheduler::{
    ClusterState, JobConfig, RateControl, TaskDefinition, TaskReport, TaskStatus,
};
use transcode_cluster::worker::{CallbackHandler, MasterClient};
use transcode_cluster::Master;

/// Master configuration with short timeouts for faster tests.
pub fn test_master_config() -> MasterConfig {
    MasterConfig::new("127.0.0.1:0".parse().unwrap())
        .with_task_duration_ms(1000)
        .with_output_folder("target/test-jobs")
        .with_liveness(100, 200)
        .with_dispatch_timeout_ms(500)
}

/// Video-only source that splits into `tasks` slices of one second.
pub fn video_source(tasks: u64) -> FileInfo {
    FileInfo {
        duration_ms: tasks * 1000,
        streams: vec![StreamInfo::video(0, 25.0)],
    }
}

pub fn job_config(name: &str) -> JobConfig {
    JobConfig::new(format!("/media/{name}.mkv"), RateControl::Crf, 23)
}

/// Handle to a running master
pub struct TestMaster {
    pub master: Master,
    pub addr: SocketAddr,
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl TestMaster {
    pub async fn start() -> Self {
        Self::start_with(test_master_config()).await
    }

    pub async fn start_with(config: MasterConfig) -> Self {
        let master = Master::new(config);
        let server = ProtocolServer::bind(
            master.config().listen_addr,
            master.clone(),
            master.config().request_timeout(),
        )
        .await
        .expect("master should bind");
        let addr = server.local_addr().unwrap();

        let shutdown = CancellationToken::new();
        let serving = master.clone();
        let token = shutdown.clone();
        let handle = tokio::spawn(async move {
            serving.serve(server, token).await;
        });

        Self {
            master,
            addr,
            shutdown,
            handle,
        }
    }

    pub async fn submit(&self, name: &str, tasks: u64) -> String {
        self.master
            .submit_job(job_config(name), name, 0, &video_source(tasks))
            .await
            .expect("job should be accepted")
    }

    pub async fn task_status(&self, job_id: &str, task_id: u32) -> Option<TaskStatus> {
        let state = self.master.state();
        let state = state.lock().await;
        state
            .jobs()
            .get_job(job_id)
            .and_then(|job| job.task(task_id))
            .map(|t| t.status)
    }

    pub async fn node_status(&self, node_id: &str) -> Option<NodeStatus> {
        let state = self.master.state();
        let state = state.lock().await;
        state.registry().lookup(node_id).ok().map(|n| n.status)
    }

    pub async fn has_node(&self, node_id: &str) -> bool {
        let state = self.master.state();
        let state = state.lock().await;
        state.registry().contains(node_id)
    }

    pub async fn assert_invariants(&self) {
        let state = self.master.state();
        let state = state.lock().await;
        check_invariants(&state);
    }

    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        let _ = (&mut self.handle).await;
    }
}

impl Drop for TestMaster {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// A worker that accepts tasks on a real callback port and reports back
/// through [`MasterClient`].
pub struct FakeWorker {
    pub client: MasterClient,
    pub handler: CallbackHandler,
    pub tasks: mpsc::Receiver<TaskDefinition>,
    pub callback_addr: SocketAddr,
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl FakeWorker {
    /// Start the callback server and connect to the master as FREE.
    pub async fn join(master_addr: SocketAddr, name: &str) -> Self {
        let mut worker = Self::start(master_addr, name).await;
        worker
            .client
            .connect(NodeStatus::Free)
            .await
            .expect("worker should connect");
        worker
    }

    /// Start the callback server without connecting.
    pub async fn start(master_addr: SocketAddr, name: &str) -> Self {
        let (handler, tasks) = CallbackHandler::new(4);
        let server = ProtocolServer::bind(
            "127.0.0.1:0".parse().unwrap(),
            handler.clone(),
            Duration::from_secs(1),
        )
        .await
        .expect("callback server should bind");
        let callback_addr = server.local_addr().unwrap();

        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let handle = tokio::spawn(async move {
            server.run(token).await;
        });

        let client = MasterClient::new(master_addr, name, callback_addr.port())
            .with_timeout(Duration::from_secs(2));

        Self {
            client,
            handler,
            tasks,
            callback_addr,
            shutdown,
            handle,
        }
    }

    pub fn node_id(&self) -> String {
        self.client.node_id().unwrap_or_default().to_string()
    }

    /// Wait for the master to push a task.
    pub async fn next_task(&mut self, within: Duration) -> Option<TaskDefinition> {
        tokio::time::timeout(within, self.tasks.recv())
            .await
            .ok()
            .flatten()
    }

    pub async fn report_progress(&self, task: &TaskDefinition, progress: f64) {
        let report = TaskReport {
            task: task.task_ref(),
            progress,
        };
        self.client
            .report(NodeStatus::Working, Some(report))
            .await
            .expect("progress report should be acknowledged");
    }

    /// Report the task done and become available again.
    pub async fn finish(&self, task: &TaskDefinition) {
        self.handler.set_status(NodeStatus::Free).await;
        let report = TaskReport {
            task: task.task_ref(),
            progress: 100.0,
        };
        self.client
            .report(NodeStatus::Free, Some(report))
            .await
            .expect("completion report should be acknowledged");
    }

    /// Stop answering on the callback port.
    pub async fn kill(&mut self) {
        self.shutdown.cancel();
        let _ = (&mut self.handle).await;
    }
}

impl Drop for FakeWorker {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// An address on which nothing listens.
pub async fn closed_addr() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// A task is COMPUTING exactly when one node holds it.
pub fn check_invariants(state: &ClusterState) {
    for job in state.jobs().all_jobs() {
        for task in job.tasks() {
            let task_ref = task.task_ref();
            let holders = state
                .registry()
                .nodes()
                .filter(|n| n.current_task.as_ref() == Some(&task_ref))
                .count();
            match task.status {
                TaskStatus::Computing => assert_eq!(
                    holders, 1,
                    "computing task {task_ref} must be held by exactly one node"
                ),
                _ => assert_eq!(
                    holders, 0,
                    "task {task_ref} in {} must not be held by a node",
                    task.status
                ),
            }
        }
    }
    for node in state.registry().nodes() {
        if node.current_task.is_some() {
            assert_ne!(node.status, NodeStatus::Free, "node {} holds a task while FREE", node.id);
        }
    }
}

/// Wait for a condition to become true with timeout
pub async fn wait_for<F, Fut>(
    condition: F,
    timeout_duration: Duration,
    poll_interval: Duration,
) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    while start.elapsed() < timeout_duration {
        if condition().await {
            return true;
        }
        tokio::time::sleep(poll_interval).await;
    }
    false
}

/// Assert a condition eventually becomes true
pub async fn assert_eventually<F, Fut>(condition: F, timeout_duration: Duration, message: &str)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let result = wait_for(condition, timeout_duration, Duration::from_millis(20)).await;
    assert!(result, "{}", message);
}
