use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{ClusterError, Result};
use crate::protocol::{send_request, Request, Response};
use crate::registry::NodeStatus;
use crate::scheduler::report::{StatusReport, TaskReport};

/// Worker-side connection details for talking to the master.
#[derive(Debug, Clone)]
pub struct MasterClient {
    master_addr: SocketAddr,
    name: String,
    callback_port: u16,
    timeout: Duration,
    node_id: Option<String>,
}

impl MasterClient {
    pub fn new(master_addr: SocketAddr, name: impl Into<String>, callback_port: u16) -> Self {
        Self {
            master_addr,
            name: name.into(),
            callback_port,
            timeout: Duration::from_secs(5),
            node_id: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Identifier assigned by the master, once connected.
    pub fn node_id(&self) -> Option<&str> {
        self.node_id.as_deref()
    }

    /// Announce this worker. Reuses the previous identifier on reconnect.
    pub async fn connect(&mut self, status: NodeStatus) -> Result<String> {
        let request = Request::Connect {
            node_id: self.node_id.clone(),
            name: self.name.clone(),
            callback_port: self.callback_port,
            status,
        };
        match self.exchange(&request).await? {
            Response::Identified { node_id } => {
                tracing::info!(node_id = %node_id, master = %self.master_addr, "Connected to master");
                self.node_id = Some(node_id.clone());
                Ok(node_id)
            }
            other => Err(unexpected(other)),
        }
    }

    pub async fn report(&self, status: NodeStatus, task: Option<TaskReport>) -> Result<()> {
        let mut report = StatusReport::new(self.require_id()?, status);
        report.task = task;
        match self.exchange(&Request::StatusReport(report)).await? {
            Response::Ack => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    pub async fn disconnect(&mut self) -> Result<()> {
        let node_id = self.require_id()?.to_string();
        match self.exchange(&Request::Disconnect { node_id }).await? {
            Response::Ack => {
                self.node_id = None;
                Ok(())
            }
            other => Err(unexpected(other)),
        }
    }

    fn require_id(&self) -> Result<&str> {
        self.node_id
            .as_deref()
            .ok_or_else(|| ClusterError::UnknownNode(self.name.clone()))
    }

    async fn exchange(&self, request: &Request) -> Result<Response> {
        match send_request(self.master_addr, request, self.timeout).await? {
            Response::Reject { reason } => Err(ClusterError::Rejected(reason)),
            Response::BadRequest { reason } => Err(ClusterError::MalformedRequest(reason)),
            response => Ok(response),
        }
    }
}

fn unexpected(response: Response) -> ClusterError {
    ClusterError::MalformedRequest(format!("unexpected response {response:?}"))
}
