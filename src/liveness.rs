//! Periodic reachability check of registered nodes.
//!
//! Each sweep snapshots the registry, probes every node concurrently outside
//! the cluster lock, then reclaims the ones that did not answer so their
//! tasks go back to the queue. A node left NOT_CONNECTED by a failed push
//! picks up the status it returns to the probe.

use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::master::Master;
use crate::protocol::dispatcher;

pub struct LivenessMonitor {
    master: Master,
    interval: Duration,
    probe_timeout: Duration,
}

impl LivenessMonitor {
    pub fn new(master: Master) -> Self {
        let interval = master.config().liveness_interval();
        let probe_timeout = master.config().probe_timeout();
        Self {
            master,
            interval,
            probe_timeout,
        }
    }

    /// Sweep every interval until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        // The first tick completes immediately.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!("Liveness monitor stopped");
                    break;
                }
                _ = interval.tick() => {
                    let reclaimed = self.sweep().await;
                    if !reclaimed.is_empty() {
                        tracing::info!(count = reclaimed.len(), "Reclaimed unreachable nodes");
                    }
                }
            }
        }
    }

    /// Probe all nodes once. Statuses returned by NOT_CONNECTED nodes are
    /// applied and unreachable nodes reclaimed. Returns the identifiers of
    /// reclaimed nodes.
    pub async fn sweep(&self) -> Vec<String> {
        let nodes = self.master.node_addresses().await;
        let mut probes = JoinSet::new();
        for (node_id, addr) in nodes {
            let limit = self.probe_timeout;
            probes.spawn(async move {
                let result = dispatcher::probe(addr, limit).await;
                (node_id, addr, result)
            });
        }

        let mut unreachable = Vec::new();
        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok((node_id, addr, Ok(Some(status)))) => {
                    tracing::trace!(node_id = %node_id, status = %status, "Node alive");
                    if let Err(e) = self.master.refresh_node(&node_id, addr, status).await {
                        tracing::debug!(node_id = %node_id, error = %e, "Node left during sweep");
                    }
                }
                Ok((node_id, _, Ok(None))) => {
                    tracing::trace!(node_id = %node_id, "Node alive");
                }
                Ok((node_id, addr, Err(e))) => {
                    tracing::warn!(node_id = %node_id, addr = %addr, error = %e, "Node unreachable");
                    unreachable.push((node_id, addr));
                }
                Err(e) => {
                    tracing::error!(error = %e, "Probe task failed");
                }
            }
        }

        let mut reclaimed = Vec::new();
        for (node_id, addr) in unreachable {
            match self.master.reclaim_unreachable(&node_id, addr).await {
                Ok(true) => reclaimed.push(node_id),
                Ok(false) => {}
                Err(e) => {
                    tracing::debug!(node_id = %node_id, error = %e, "Node left before it was reclaimed");
                }
            }
        }
        reclaimed
    }
}
