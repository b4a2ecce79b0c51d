use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};

use crate::protocol::{Request, RequestHandler, Response};
use crate::registry::NodeStatus;
use crate::scheduler::task::TaskDefinition;

/// Serves the worker's callback port.
///
/// Accepted tasks are forwarded on a channel to whatever runs the encoder.
/// The handler only accepts a task while the worker is FREE.
#[derive(Clone)]
pub struct CallbackHandler {
    status: Arc<RwLock<NodeStatus>>,
    tasks: mpsc::Sender<TaskDefinition>,
}

impl CallbackHandler {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<TaskDefinition>) {
        let (tasks, rx) = mpsc::channel(capacity.max(1));
        let handler = Self {
            status: Arc::new(RwLock::new(NodeStatus::Free)),
            tasks,
        };
        (handler, rx)
    }

    pub async fn status(&self) -> NodeStatus {
        *self.status.read().await
    }

    pub async fn set_status(&self, status: NodeStatus) {
        *self.status.write().await = status;
    }

    async fn accept(&self, task: TaskDefinition) -> Response {
        let mut status = self.status.write().await;
        if *status != NodeStatus::Free {
            return Response::reject(format!("worker is {}", *status));
        }

        let task_ref = task.task_ref();
        match self.tasks.try_send(task) {
            Ok(()) => {
                *status = NodeStatus::Working;
                tracing::info!(task = %task_ref, "Task accepted");
                Response::Ack
            }
            Err(e) => {
                tracing::warn!(task = %task_ref, error = %e, "Task channel unavailable");
                Response::reject("worker cannot take tasks")
            }
        }
    }
}

impl RequestHandler for CallbackHandler {
    async fn handle(&self, request: Request, peer: SocketAddr) -> Response {
        match request {
            Request::AssignTask { task } => self.accept(task).await,
            Request::StatusRequest => Response::Status {
                status: self.status().await,
            },
            Request::Malformed { reason } => Response::bad_request(reason),
            other => {
                tracing::debug!(peer = %peer, kind = other.kind(), "Request not served by workers");
                Response::bad_request(format!("{} is not accepted by workers", other.kind()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::task::{TaskKind, TaskRef};
    use crate::scheduler::RateControl;

    fn definition() -> TaskDefinition {
        TaskDefinition {
            job_id: "job".to_string(),
            task_id: 1,
            source_file: "in.mkv".into(),
            output_file: "out/1.mkv".into(),
            rate_control: RateControl::Crf,
            rate: 23,
            passes: 1,
            preset: Default::default(),
            extra_args: Vec::new(),
            kind: TaskKind::Video {
                stream_index: 0,
                start_ms: 0,
                end_ms: 1000,
                estimated_frames: 24,
            },
        }
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:9".parse().unwrap()
    }

    #[tokio::test]
    async fn free_worker_accepts_one_task() {
        let (handler, mut rx) = CallbackHandler::new(4);

        let first = handler
            .handle(Request::AssignTask { task: definition() }, peer())
            .await;
        assert_eq!(first, Response::Ack);
        assert_eq!(handler.status().await, NodeStatus::Working);
        assert_eq!(rx.recv().await.unwrap().task_ref(), TaskRef::new("job", 1));

        let second = handler
            .handle(Request::AssignTask { task: definition() }, peer())
            .await;
        assert!(matches!(second, Response::Reject { .. }));
    }

    #[tokio::test]
    async fn paused_worker_rejects() {
        let (handler, _rx) = CallbackHandler::new(1);
        handler.set_status(NodeStatus::Paused).await;
        let resp = handler
            .handle(Request::AssignTask { task: definition() }, peer())
            .await;
        assert!(matches!(resp, Response::Reject { .. }));
    }

    #[tokio::test]
    async fn status_request_reports_current_status() {
        let (handler, _rx) = CallbackHandler::new(1);
        let resp = handler.handle(Request::StatusRequest, peer()).await;
        assert_eq!(
            resp,
            Response::Status {
                status: NodeStatus::Free
            }
        );
    }

    #[tokio::test]
    async fn master_requests_are_bad_requests() {
        let (handler, _rx) = CallbackHandler::new(1);
        let resp = handler
            .handle(
                Request::Disconnect {
                    node_id: "x".to_string(),
                },
                peer(),
            )
            .await;
        assert!(matches!(resp, Response::BadRequest { .. }));
    }
}
