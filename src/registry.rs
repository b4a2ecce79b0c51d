//! Authoritative set of worker nodes known to the master.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ClusterError, Result};
use crate::identity;
use crate::scheduler::task::TaskRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    NotConnected,
    Free,
    Working,
    Paused,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeStatus::NotConnected => write!(f, "not_connected"),
            NodeStatus::Free => write!(f, "free"),
            NodeStatus::Working => write!(f, "working"),
            NodeStatus::Paused => write!(f, "paused"),
        }
    }
}

/// A worker as offered on first contact, before it has an identifier.
#[derive(Debug, Clone)]
pub struct NodeCandidate {
    pub name: String,
    /// Address of the worker's callback listener
    pub address: SocketAddr,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub id: String,
    pub name: String,
    pub address: SocketAddr,
    pub status: NodeStatus,
    pub current_task: Option<TaskRef>,
    /// A task push to this node has not been acknowledged yet.
    pub awaiting_ack: bool,
    pub registered_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: HashMap<String, Node>,
    by_address: HashMap<SocketAddr, String>,
    order: Vec<String>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node under a freshly generated identifier, in NOT_CONNECTED
    /// status. Fails if a node already listens at the same address.
    pub fn register(&mut self, candidate: NodeCandidate) -> Result<String> {
        if self.by_address.contains_key(&candidate.address) {
            tracing::warn!(name = %candidate.name, addr = %candidate.address, "Node already registered");
            return Err(ClusterError::DuplicateNode(candidate.address));
        }

        let mut id = identity::node_id(&candidate.name);
        while self.nodes.contains_key(&id) {
            id = identity::node_id(&candidate.name);
        }

        let node = Node {
            id: id.clone(),
            name: candidate.name,
            address: candidate.address,
            status: NodeStatus::NotConnected,
            current_task: None,
            awaiting_ack: false,
            registered_at: Utc::now(),
        };
        tracing::info!(node_id = %id, name = %node.name, addr = %node.address, "Node registered");

        self.by_address.insert(node.address, id.clone());
        self.order.push(id.clone());
        self.nodes.insert(id.clone(), node);
        Ok(id)
    }

    pub fn lookup(&self, id: &str) -> Result<&Node> {
        self.nodes
            .get(id)
            .ok_or_else(|| ClusterError::UnknownNode(id.to_string()))
    }

    pub fn lookup_mut(&mut self, id: &str) -> Result<&mut Node> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| ClusterError::UnknownNode(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Remove a node from every index.
    pub fn remove(&mut self, id: &str) -> Option<Node> {
        let Some(node) = self.nodes.remove(id) else {
            tracing::warn!(node_id = %id, "Cannot remove node, not registered");
            return None;
        };
        self.by_address.remove(&node.address);
        self.order.retain(|n| n != id);
        tracing::info!(node_id = %id, name = %node.name, "Node removed");
        Some(node)
    }

    /// Move a known node to a new callback address.
    pub fn relocate(&mut self, id: &str, address: SocketAddr) -> Result<()> {
        if let Some(owner) = self.by_address.get(&address) {
            if owner != id {
                return Err(ClusterError::DuplicateNode(address));
            }
            return Ok(());
        }
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| ClusterError::UnknownNode(id.to_string()))?;
        self.by_address.remove(&node.address);
        node.address = address;
        self.by_address.insert(address, id.to_string());
        Ok(())
    }

    pub fn set_status(&mut self, id: &str, status: NodeStatus) -> Result<()> {
        self.lookup_mut(id)?.status = status;
        Ok(())
    }

    pub fn set_assigned_task(&mut self, id: &str, task: Option<TaskRef>) -> Result<()> {
        self.lookup_mut(id)?.current_task = task;
        Ok(())
    }

    /// First FREE node in registration order.
    pub fn find_free_node(&self) -> Option<&Node> {
        self.nodes().find(|n| n.status == NodeStatus::Free)
    }

    /// Nodes in registration order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.order.iter().filter_map(|id| self.nodes.get(id))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
