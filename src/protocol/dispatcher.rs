//! Outbound exchanges from the master to a worker's callback listener.

use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{ClusterError, Result};
use crate::protocol::codec::send_request;
use crate::protocol::{Request, Response};
use crate::registry::NodeStatus;
use crate::scheduler::state::Assignment;

/// Push a task to the node named in `assignment` and wait for its
/// acknowledgement.
pub async fn push_task(assignment: &Assignment, limit: Duration) -> Result<()> {
    let request = Request::AssignTask {
        task: assignment.task.clone(),
    };

    let response = send_request(assignment.address, &request, limit)
        .await
        .map_err(|e| ClusterError::DispatchUnreachable {
            node_id: assignment.node_id.clone(),
            addr: assignment.address,
            reason: e.to_string(),
        })?;

    match response {
        Response::Ack => {
            tracing::debug!(node_id = %assignment.node_id, task = %assignment.task_ref(), "Task acknowledged");
            Ok(())
        }
        Response::Reject { reason } | Response::BadRequest { reason } => {
            Err(ClusterError::DispatchRejected {
                node_id: assignment.node_id.clone(),
                reason,
            })
        }
        other => Err(ClusterError::DispatchRejected {
            node_id: assignment.node_id.clone(),
            reason: format!("unexpected response {other:?}"),
        }),
    }
}

/// Check that a node answers within `limit`. Returns the status it reports,
/// or `None` if it answered without one.
pub async fn probe(addr: SocketAddr, limit: Duration) -> Result<Option<NodeStatus>> {
    match send_request(addr, &Request::StatusRequest, limit).await? {
        Response::Status { status } => Ok(Some(status)),
        other => {
            tracing::debug!(addr = %addr, response = ?other, "Probe answered without a status");
            Ok(None)
        }
    }
}
