//! Node-facing wire protocol.
//!
//! Every exchange is one request and one response over a fresh TCP
//! connection. Messages are JSON documents terminated by a newline.
//!
//! | Request          | Sent by | Answered with                  |
//! |------------------|---------|--------------------------------|
//! | `connect`        | worker  | `identified` / `reject`        |
//! | `status_report`  | worker  | `ack` / `reject`               |
//! | `disconnect`     | worker  | `ack` / `reject`               |
//! | `assign_task`    | master  | `ack` / `reject`               |
//! | `status_request` | master  | `status`                       |
//!
//! Anything a peer does not understand is answered with `bad_request`.

pub mod codec;
pub mod dispatcher;
pub mod server;

use serde::{Deserialize, Serialize};

use crate::registry::NodeStatus;
use crate::scheduler::report::StatusReport;
use crate::scheduler::task::TaskDefinition;

pub use codec::{read_request, read_response, send_request, write_message, MAX_FRAME_LEN};
pub use server::{ProtocolServer, RequestHandler};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// A worker announces itself. `node_id` is set when reconnecting.
    Connect {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        node_id: Option<String>,
        name: String,
        callback_port: u16,
        status: NodeStatus,
    },
    StatusReport(StatusReport),
    Disconnect {
        node_id: String,
    },
    AssignTask {
        task: TaskDefinition,
    },
    StatusRequest,
    /// Produced locally for input that does not decode; never sent.
    #[serde(skip)]
    Malformed {
        reason: String,
    },
}

impl Request {
    pub fn decode(bytes: &[u8]) -> Self {
        serde_json::from_slice(bytes).unwrap_or_else(|e| Request::Malformed {
            reason: e.to_string(),
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Request::Connect { .. } => "connect",
            Request::StatusReport(_) => "status_report",
            Request::Disconnect { .. } => "disconnect",
            Request::AssignTask { .. } => "assign_task",
            Request::StatusRequest => "status_request",
            Request::Malformed { .. } => "malformed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Identified { node_id: String },
    Ack,
    Reject { reason: String },
    Status { status: NodeStatus },
    BadRequest { reason: String },
}

impl Response {
    pub fn reject(err: impl std::fmt::Display) -> Self {
        Response::Reject {
            reason: err.to_string(),
        }
    }

    pub fn bad_request(reason: impl Into<String>) -> Self {
        Response::BadRequest {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::task::TaskRef;

    #[test]
    fn connect_wire_shape() {
        let req = Request::Connect {
            node_id: None,
            name: "worker1".to_string(),
            callback_port: 1338,
            status: NodeStatus::Free,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["type"], "connect");
        assert_eq!(json["callback_port"], 1338);
        assert_eq!(json["status"], "FREE");
        assert!(json.get("node_id").is_none());
    }

    #[test]
    fn status_report_fields_are_inlined() {
        let report = StatusReport::new("abc", NodeStatus::Working)
            .with_progress(TaskRef::new("job", 3), 42.5);
        let bytes = serde_json::to_vec(&Request::StatusReport(report.clone())).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["type"], "status_report");
        assert_eq!(json["node_id"], "abc");
        assert_eq!(json["task"]["progress"], 42.5);

        assert_eq!(Request::decode(&bytes), Request::StatusReport(report));
    }

    #[test]
    fn unknown_type_is_malformed() {
        let req = Request::decode(br#"{"type": "make_coffee"}"#);
        assert_eq!(req.kind(), "malformed");
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(
            Request::decode(b"\x00\x01 not json"),
            Request::Malformed { .. }
        ));
    }

    #[test]
    fn missing_fields_are_malformed() {
        assert!(matches!(
            Request::decode(br#"{"type": "disconnect"}"#),
            Request::Malformed { .. }
        ));
    }

    #[test]
    fn malformed_cannot_be_sent() {
        let req = Request::Malformed {
            reason: "x".to_string(),
        };
        assert!(serde_json::to_vec(&req).is_err());
    }

    #[test]
    fn response_wire_shape() {
        let json = serde_json::to_value(Response::Ack).unwrap();
        assert_eq!(json, serde_json::json!({"type": "ack"}));

        let json = serde_json::to_value(Response::bad_request("nope")).unwrap();
        assert_eq!(json["type"], "bad_request");
        assert_eq!(json["reason"], "nope");
    }
}
