use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::MasterConfig;
use crate::error::Result;
use crate::liveness::LivenessMonitor;
use crate::media::FileInfo;
use crate::protocol::dispatcher;
use crate::protocol::{ProtocolServer, Request, RequestHandler, Response};
use crate::registry::{NodeCandidate, NodeStatus};
use crate::scheduler::{Assignment, ClusterState, Job, JobConfig, StatusReport};

/// Handle to the master's cluster state.
///
/// All state changes go through one mutex around [`ClusterState`]. Pushing a
/// task to a worker happens on a spawned task after the lock is released, so
/// a slow worker never holds up scheduling.
#[derive(Clone)]
pub struct Master {
    state: Arc<Mutex<ClusterState>>,
    config: Arc<MasterConfig>,
}

impl Master {
    pub fn new(config: MasterConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(ClusterState::new(config.selection))),
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &MasterConfig {
        &self.config
    }

    /// Shared state, for inspection.
    pub fn state(&self) -> Arc<Mutex<ClusterState>> {
        self.state.clone()
    }

    /// Run the master until `shutdown` is cancelled.
    ///
    /// Binds the node-facing listener and starts the liveness monitor.
    ///
    /// # Errors
    ///
    /// Returns an error only if the listening socket cannot be opened.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let server = ProtocolServer::bind(
            self.config.listen_addr,
            self.clone(),
            self.config.request_timeout(),
        )
        .await?;
        self.serve(server, shutdown).await;
        Ok(())
    }

    /// Run on an already bound server.
    pub async fn serve(self, server: ProtocolServer<Master>, shutdown: CancellationToken) {
        let monitor = LivenessMonitor::new(self.clone());
        let monitor_shutdown = shutdown.clone();
        let monitor_handle = tokio::spawn(async move {
            monitor.run(monitor_shutdown).await;
        });

        server.run(shutdown).await;
        let _ = monitor_handle.await;
    }

    /// Derive the job's tasks from `info`, queue it and schedule.
    pub async fn submit_job(
        &self,
        config: JobConfig,
        name: &str,
        priority: i32,
        info: &FileInfo,
    ) -> Result<String> {
        let job = Job::new(config, name, &self.config.plan, info)?.with_priority(priority);
        let job_id = job.id.clone();

        let assignments = {
            let mut state = self.state.lock().await;
            let first = state.add_job(job);
            self.drain(&mut state, first.into_iter().collect())
        };
        self.launch(assignments);
        Ok(job_id)
    }

    pub async fn cancel_job(&self, job_id: &str) -> Result<usize> {
        self.state.lock().await.cancel_job(job_id)
    }

    pub async fn connect_node(
        &self,
        node_id: Option<&str>,
        name: String,
        address: SocketAddr,
        status: NodeStatus,
    ) -> Result<String> {
        let candidate = NodeCandidate { name, address };
        let (id, assignments) = {
            let mut state = self.state.lock().await;
            let (id, first) = state.connect_node(node_id, candidate, status)?;
            (id, self.drain(&mut state, first))
        };
        self.launch(assignments);
        Ok(id)
    }

    pub async fn apply_report(&self, report: &StatusReport) -> Result<()> {
        let assignments = {
            let mut state = self.state.lock().await;
            let first = state.apply_report(report)?;
            self.drain(&mut state, first)
        };
        self.launch(assignments);
        Ok(())
    }

    /// Requeue the node's task and forget the node.
    pub async fn reclaim_node(&self, node_id: &str) -> Result<()> {
        let assignments = {
            let mut state = self.state.lock().await;
            let first = state.reclaim_node(node_id)?;
            self.drain(&mut state, first.into_iter().collect())
        };
        self.launch(assignments);
        Ok(())
    }

    /// Apply the status a probe returned for a NOT_CONNECTED node.
    pub async fn refresh_node(
        &self,
        node_id: &str,
        addr: SocketAddr,
        status: NodeStatus,
    ) -> Result<()> {
        let assignments = {
            let mut state = self.state.lock().await;
            let first = state.refresh_status(node_id, addr, status)?;
            self.drain(&mut state, first.into_iter().collect())
        };
        self.launch(assignments);
        Ok(())
    }

    /// Reclaim a node whose probe at `addr` failed, unless it has moved.
    /// Returns whether the node was reclaimed.
    pub async fn reclaim_unreachable(&self, node_id: &str, addr: SocketAddr) -> Result<bool> {
        let (reclaimed, assignments) = {
            let mut state = self.state.lock().await;
            let (reclaimed, first) = state.reclaim_unreachable(node_id, addr)?;
            (reclaimed, self.drain(&mut state, first.into_iter().collect()))
        };
        self.launch(assignments);
        Ok(reclaimed)
    }

    /// A single scheduling pass. Returns whether a task was dispatched.
    pub async fn rebalance(&self) -> bool {
        let assignment = self.state.lock().await.rebalance();
        let matched = assignment.is_some();
        self.launch(assignment.into_iter().collect());
        matched
    }

    pub async fn node_addresses(&self) -> Vec<(String, SocketAddr)> {
        self.state.lock().await.node_addresses()
    }

    fn drain(&self, state: &mut ClusterState, mut assignments: Vec<Assignment>) -> Vec<Assignment> {
        if self.config.drain_matches {
            while let Some(next) = state.rebalance() {
                assignments.push(next);
            }
        }
        assignments
    }

    fn launch(&self, assignments: Vec<Assignment>) {
        for assignment in assignments {
            let master = self.clone();
            tokio::spawn(async move {
                master.push(assignment).await;
            });
        }
    }

    async fn push(&self, assignment: Assignment) {
        match dispatcher::push_task(&assignment, self.config.dispatch_timeout()).await {
            Ok(()) => {
                self.state.lock().await.confirm_dispatch(&assignment);
            }
            Err(e) => {
                tracing::warn!(
                    node_id = %assignment.node_id,
                    task = %assignment.task_ref(),
                    error = %e,
                    "Task push failed"
                );
                let (reverted, assignments) = {
                    let mut state = self.state.lock().await;
                    let (reverted, next) = state.dispatch_failed(&assignment);
                    (reverted, self.drain(&mut state, next.into_iter().collect()))
                };
                self.launch(assignments);
                if reverted {
                    self.recheck(assignment.node_id, assignment.address);
                }
            }
        }
    }

    /// Probe a node right away. A node that answers with a status gets it
    /// applied; one that does not answer is reclaimed.
    fn recheck(&self, node_id: String, addr: SocketAddr) {
        let master = self.clone();
        let limit = self.config.probe_timeout();
        tokio::spawn(async move {
            let outcome = match dispatcher::probe(addr, limit).await {
                Ok(Some(status)) => master.refresh_node(&node_id, addr, status).await,
                Ok(None) => {
                    tracing::info!(node_id = %node_id, "Node reachable after failed push");
                    Ok(())
                }
                Err(e) => {
                    tracing::warn!(node_id = %node_id, error = %e, "Node unreachable, reclaiming");
                    master.reclaim_unreachable(&node_id, addr).await.map(|_| ())
                }
            };
            if let Err(e) = outcome {
                tracing::debug!(node_id = %node_id, error = %e, "Node already gone");
            }
        });
    }
}

impl RequestHandler for Master {
    async fn handle(&self, request: Request, peer: SocketAddr) -> Response {
        match request {
            Request::Connect {
                node_id,
                name,
                callback_port,
                status,
            } => {
                let address = SocketAddr::new(peer.ip(), callback_port);
                match self
                    .connect_node(node_id.as_deref(), name, address, status)
                    .await
                {
                    Ok(node_id) => Response::Identified { node_id },
                    Err(e) => {
                        tracing::warn!(peer = %peer, error = %e, "Connect refused");
                        Response::reject(e)
                    }
                }
            }
            Request::StatusReport(report) => match self.apply_report(&report).await {
                Ok(()) => Response::Ack,
                Err(e) => {
                    tracing::warn!(node_id = %report.node_id, error = %e, "Status report dropped");
                    Response::reject(e)
                }
            },
            Request::Disconnect { node_id } => match self.reclaim_node(&node_id).await {
                Ok(()) => {
                    tracing::info!(node_id = %node_id, "Node disconnected");
                    Response::Ack
                }
                Err(e) => {
                    tracing::warn!(node_id = %node_id, error = %e, "Disconnect refused");
                    Response::reject(e)
                }
            },
            Request::AssignTask { .. } | Request::StatusRequest => {
                Response::bad_request(format!("{} is not accepted by the master", request.kind()))
            }
            Request::Malformed { reason } => Response::bad_request(reason),
        }
    }
}
