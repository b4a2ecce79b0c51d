use serde::{Deserialize, Serialize};

use crate::registry::NodeStatus;
use crate::scheduler::task::TaskRef;

/// Progress of the task a node is working on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskReport {
    pub task: TaskRef,
    /// Percentage in `0..=100`; 100 means the task is done.
    pub progress: f64,
}

/// A node's view of itself, optionally with task progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub node_id: String,
    pub status: NodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<TaskReport>,
}

impl StatusReport {
    pub fn new(node_id: impl Into<String>, status: NodeStatus) -> Self {
        Self {
            node_id: node_id.into(),
            status,
            task: None,
        }
    }

    pub fn with_progress(mut self, task: TaskRef, progress: f64) -> Self {
        self.task = Some(TaskReport { task, progress });
        self
    }
}
