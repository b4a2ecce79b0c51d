//! Shared cluster state and the matching algorithm.
//!
//! Every method here is synchronous and expects the caller to hold the single
//! cluster-wide lock. Methods that may create a new match return the
//! [`Assignment`]s they produced; pushing those to workers is the caller's job
//! and must happen after the lock is released.

use std::net::SocketAddr;

use crate::config::SelectionPolicy;
use crate::error::{ClusterError, Result};
use crate::registry::{NodeCandidate, NodeRegistry, NodeStatus};
use crate::scheduler::job::Job;
use crate::scheduler::queue::JobQueue;
use crate::scheduler::report::{StatusReport, TaskReport};
use crate::scheduler::task::{TaskDefinition, TaskRef, TaskStatus};

/// A task matched to a node, ready to be pushed over the network.
#[derive(Debug, Clone)]
pub struct Assignment {
    pub node_id: String,
    pub address: SocketAddr,
    pub task: TaskDefinition,
}

impl Assignment {
    pub fn task_ref(&self) -> TaskRef {
        self.task.task_ref()
    }
}

#[derive(Debug, Default)]
pub struct ClusterState {
    jobs: JobQueue,
    registry: NodeRegistry,
    selection: SelectionPolicy,
}

impl ClusterState {
    pub fn new(selection: SelectionPolicy) -> Self {
        Self {
            jobs: JobQueue::new(),
            registry: NodeRegistry::new(),
            selection,
        }
    }

    pub fn jobs(&self) -> &JobQueue {
        &self.jobs
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    /// Queue a job whose tasks are already derived, then rebalance.
    pub fn add_job(&mut self, job: Job) -> Option<Assignment> {
        let job_id = job.id.clone();
        let tasks = job.task_count();
        if !self.jobs.add_job(job) {
            tracing::warn!(job_id = %job_id, "Job already queued");
            return None;
        }
        tracing::info!(job_id = %job_id, tasks, "Job submitted");
        self.rebalance()
    }

    /// Cancel a job. Tasks already running on nodes are left to finish.
    pub fn cancel_job(&mut self, job_id: &str) -> Result<usize> {
        let job = self
            .jobs
            .get_job_mut(job_id)
            .ok_or_else(|| ClusterError::JobNotFound(job_id.to_string()))?;
        let canceled = job.cancel();
        tracing::info!(job_id = %job_id, canceled, "Job canceled");
        Ok(canceled)
    }

    /// Register a new node and rebalance.
    pub fn register_node(
        &mut self,
        candidate: NodeCandidate,
    ) -> Result<(String, Option<Assignment>)> {
        let id = self.registry.register(candidate)?;
        Ok((id, self.rebalance()))
    }

    /// Handle a worker's connect request.
    ///
    /// A known identifier is confirmed and the node's details refreshed; an
    /// absent or unknown one leads to a fresh registration. The offered status
    /// is then applied as if it were a status report.
    pub fn connect_node(
        &mut self,
        node_id: Option<&str>,
        candidate: NodeCandidate,
        status: NodeStatus,
    ) -> Result<(String, Vec<Assignment>)> {
        let mut assignments = Vec::new();

        let id = match node_id.filter(|id| self.registry.contains(id)) {
            Some(known) => {
                let known = known.to_string();
                let current = self.registry.lookup(&known)?.address;
                if current.ip() != candidate.address.ip() {
                    return Err(ClusterError::DuplicateNode(candidate.address));
                }
                self.registry.relocate(&known, candidate.address)?;
                self.registry.lookup_mut(&known)?.name = candidate.name;
                tracing::info!(node_id = %known, "Node reconnected");
                known
            }
            None => {
                let (id, assignment) = self.register_node(candidate)?;
                assignments.extend(assignment);
                id
            }
        };

        assignments.extend(self.apply_status_report(&id, status)?);
        Ok((id, assignments))
    }

    /// Apply a full status report: task progress first, then node status.
    /// Nothing is mutated if the report is inconsistent with the registry.
    pub fn apply_report(&mut self, report: &StatusReport) -> Result<Vec<Assignment>> {
        let node = self.registry.lookup(&report.node_id)?;
        if let Some(task) = &report.task {
            Self::check_assignment(&report.node_id, node.current_task.as_ref(), &task.task)?;
        }

        let mut assignments = Vec::new();
        if let Some(task) = &report.task {
            assignments.extend(self.apply_task_report(&report.node_id, task)?);
        }
        assignments.extend(self.apply_status_report(&report.node_id, report.status)?);
        Ok(assignments)
    }

    fn check_assignment(node_id: &str, assigned: Option<&TaskRef>, reported: &TaskRef) -> Result<()> {
        match assigned {
            None => Err(ClusterError::NoActiveTask(node_id.to_string())),
            Some(assigned) if assigned != reported => Err(ClusterError::TaskMismatch {
                node_id: node_id.to_string(),
                assigned: assigned.to_string(),
                reported: reported.to_string(),
            }),
            Some(_) => Ok(()),
        }
    }

    /// Record progress for the node's current task. At 100% the task is
    /// completed, the node freed and a rebalance performed.
    pub fn apply_task_report(
        &mut self,
        node_id: &str,
        report: &TaskReport,
    ) -> Result<Option<Assignment>> {
        let node = self.registry.lookup(node_id)?;
        Self::check_assignment(node_id, node.current_task.as_ref(), &report.task)?;

        let task_ref = report.task.clone();
        let job = self
            .jobs
            .get_job_mut(&task_ref.job_id)
            .ok_or_else(|| ClusterError::JobNotFound(task_ref.job_id.clone()))?;
        let progress = report.progress.clamp(0.0, 100.0);

        let node = self.registry.lookup_mut(node_id)?;
        node.awaiting_ack = false;

        if progress < 100.0 {
            job.set_progress(task_ref.task_id, progress);
            tracing::debug!(node_id = %node_id, task = %task_ref, progress, "Task progress");
            return Ok(None);
        }

        let job_done = job.complete_task(task_ref.task_id);
        node.current_task = None;
        node.status = NodeStatus::Free;
        tracing::info!(node_id = %node_id, task = %task_ref, "Task completed");
        if job_done {
            tracing::info!(job_id = %task_ref.job_id, "Job completed");
        }

        Ok(self.rebalance())
    }

    /// Update a node's status and rebalance.
    ///
    /// FREE from a node that still holds an acknowledged task means the
    /// worker gave the task up; it is requeued. FREE while the push is still
    /// unacknowledged, and WORKING without a task, are ignored.
    pub fn apply_status_report(
        &mut self,
        node_id: &str,
        status: NodeStatus,
    ) -> Result<Option<Assignment>> {
        let node = self.registry.lookup_mut(node_id)?;

        match (status, node.current_task.clone()) {
            (NodeStatus::Free, Some(_)) if node.awaiting_ack => {
                tracing::debug!(node_id = %node_id, "Ignoring FREE status while task push is in flight");
                return Ok(None);
            }
            (NodeStatus::Free, Some(task)) => {
                node.current_task = None;
                node.status = NodeStatus::Free;
                if let Some(job) = self.jobs.get_job_mut(&task.job_id) {
                    job.requeue_task(task.task_id);
                }
                tracing::warn!(node_id = %node_id, task = %task, "Node dropped its task, requeued");
            }
            (NodeStatus::Working, None) => {
                tracing::warn!(node_id = %node_id, "Ignoring WORKING status from node without a task");
                return Ok(None);
            }
            (status, _) => {
                if node.status != status {
                    tracing::info!(node_id = %node_id, from = %node.status, to = %status, "Node status changed");
                }
                node.status = status;
            }
        }

        Ok(self.rebalance())
    }

    /// Requeue the node's task, if any, then remove the node and rebalance.
    pub fn reclaim_node(&mut self, node_id: &str) -> Result<Option<Assignment>> {
        let node = self.registry.lookup(node_id)?;

        if let Some(task) = node.current_task.clone() {
            if let Some(job) = self.jobs.get_job_mut(&task.job_id) {
                if job.requeue_task(task.task_id) {
                    tracing::info!(node_id = %node_id, task = %task, "Task requeued");
                }
            }
            self.registry.set_assigned_task(node_id, None)?;
        }
        self.registry.remove(node_id);

        Ok(self.rebalance())
    }

    /// One scheduling pass: match the next pending task with the first free
    /// node. At most one match is made per call.
    pub fn rebalance(&mut self) -> Option<Assignment> {
        let Some(task) = self.jobs.find_next_pending(self.selection) else {
            tracing::debug!("No pending task");
            return None;
        };
        let Some(node_id) = self.registry.find_free_node().map(|n| n.id.clone()) else {
            tracing::debug!("No free node");
            return None;
        };
        self.dispatch(&task, &node_id)
    }

    /// Assign a TODO task to a FREE node: the task becomes COMPUTING and the
    /// node WORKING. Returns the assignment to push.
    pub fn dispatch(&mut self, task: &TaskRef, node_id: &str) -> Option<Assignment> {
        let node = self.registry.lookup(node_id).ok()?;
        if node.status != NodeStatus::Free || node.current_task.is_some() {
            return None;
        }

        let job = self.jobs.get_job_mut(&task.job_id)?;
        if !job.start_task(task.task_id, node_id) {
            return None;
        }
        let definition = TaskDefinition::new(job.task(task.task_id)?, &job.config);

        let node = self.registry.lookup_mut(node_id).ok()?;
        node.status = NodeStatus::Working;
        node.current_task = Some(task.clone());
        node.awaiting_ack = true;
        tracing::info!(node_id = %node_id, task = %task, "Task dispatched");

        Some(Assignment {
            node_id: node_id.to_string(),
            address: node.address,
            task: definition,
        })
    }

    /// The worker acknowledged the push.
    pub fn confirm_dispatch(&mut self, assignment: &Assignment) {
        if let Ok(node) = self.registry.lookup_mut(&assignment.node_id) {
            if node.current_task.as_ref() == Some(&assignment.task_ref()) {
                node.awaiting_ack = false;
            }
        }
    }

    /// The push failed or was rejected. If the node still holds the task and
    /// has not reported on it yet, the task goes back to TODO and the node to
    /// NOT_CONNECTED until it reports again. Returns whether anything was
    /// reverted, and the follow-up match.
    pub fn dispatch_failed(&mut self, assignment: &Assignment) -> (bool, Option<Assignment>) {
        let task = assignment.task_ref();
        let Ok(node) = self.registry.lookup_mut(&assignment.node_id) else {
            return (false, None);
        };
        if node.current_task.as_ref() != Some(&task) {
            return (false, None);
        }
        if !node.awaiting_ack {
            // Progress was already reported, so the task did arrive.
            tracing::debug!(node_id = %assignment.node_id, task = %task, "Push error after progress, keeping task");
            return (false, None);
        }

        node.current_task = None;
        node.awaiting_ack = false;
        node.status = NodeStatus::NotConnected;
        if let Some(job) = self.jobs.get_job_mut(&task.job_id) {
            job.requeue_task(task.task_id);
        }
        tracing::warn!(node_id = %assignment.node_id, task = %task, "Dispatch failed, task requeued");

        (true, self.rebalance())
    }

    /// Apply the status a NOT_CONNECTED node returned to a probe, as long as
    /// it still listens on `addr`. Nodes in any other state keep reporting
    /// for themselves and are left alone.
    pub fn refresh_status(
        &mut self,
        node_id: &str,
        addr: SocketAddr,
        status: NodeStatus,
    ) -> Result<Option<Assignment>> {
        let node = self.registry.lookup(node_id)?;
        if node.address != addr || node.status != NodeStatus::NotConnected {
            return Ok(None);
        }
        tracing::info!(node_id = %node_id, status = %status, "Node back after failed push");
        self.apply_status_report(node_id, status)
    }

    /// Reclaim a node whose probe at `addr` failed. A node that moved to
    /// another address since is kept. Returns whether it was reclaimed, and
    /// the follow-up match.
    pub fn reclaim_unreachable(
        &mut self,
        node_id: &str,
        addr: SocketAddr,
    ) -> Result<(bool, Option<Assignment>)> {
        if self.registry.lookup(node_id)?.address != addr {
            tracing::debug!(node_id = %node_id, stale = %addr, "Node moved since probe, kept");
            return Ok((false, None));
        }
        Ok((true, self.reclaim_node(node_id)?))
    }

    /// Snapshot of every registered node's id and callback address.
    pub fn node_addresses(&self) -> Vec<(String, SocketAddr)> {
        self.registry
            .nodes()
            .map(|n| (n.id.clone(), n.address))
            .collect()
    }

    /// Status of a task, if it exists.
    pub fn task_status(&self, task: &TaskRef) -> Option<TaskStatus> {
        self.jobs.task(task).map(|t| t.status)
    }
}
