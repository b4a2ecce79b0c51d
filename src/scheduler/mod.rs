//! Job model, task decomposition and the task-to-node matching algorithm.

pub mod job;
pub mod queue;
pub mod report;
pub mod state;
pub mod task;

pub use job::{EncoderPreset, Job, JobConfig, JobStatus, RateControl};
pub use queue::JobQueue;
pub use report::{StatusReport, TaskReport};
pub use state::{Assignment, ClusterState};
pub use task::{Task, TaskDefinition, TaskKind, TaskRef, TaskStatus};
