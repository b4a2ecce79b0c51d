use std::net::SocketAddr;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("Node already registered at {0}")]
    DuplicateNode(SocketAddr),

    #[error("Unknown node: {0}")]
    UnknownNode(String),

    #[error("Node {0} has no active task")]
    NoActiveTask(String),

    #[error("Node {node_id} reported task {reported} but is assigned {assigned}")]
    TaskMismatch {
        node_id: String,
        assigned: String,
        reported: String,
    },

    #[error("Could not reach node {node_id} at {addr}: {reason}")]
    DispatchUnreachable {
        node_id: String,
        addr: SocketAddr,
        reason: String,
    },

    #[error("Node {node_id} rejected task: {reason}")]
    DispatchRejected { node_id: String, reason: String },

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Invalid job: {0}")]
    InvalidJob(String),

    #[error("Media inspection failed: {0}")]
    MediaInspection(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ClusterError>;
