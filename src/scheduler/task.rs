use std::fmt;

use serde::{Deserialize, Serialize};

use crate::scheduler::job::{EncoderPreset, JobConfig, RateControl};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Todo,
    Computing,
    Completed,
    Canceled,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Todo => write!(f, "todo"),
            TaskStatus::Computing => write!(f, "computing"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Canceled => write!(f, "canceled"),
        }
    }
}

/// Globally unique handle to a task: its job plus its index within the job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskRef {
    pub job_id: String,
    pub task_id: u32,
}

impl TaskRef {
    pub fn new(job_id: impl Into<String>, task_id: u32) -> Self {
        Self {
            job_id: job_id.into(),
            task_id,
        }
    }
}

impl fmt::Display for TaskRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = self.job_id.get(..8).unwrap_or(&self.job_id);
        write!(f, "{}#{}", short, self.task_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioCodec {
    Vorbis,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TaskKind {
    /// A time slice of a video stream.
    Video {
        stream_index: u32,
        start_ms: u64,
        end_ms: u64,
        estimated_frames: u64,
    },
    /// A whole audio stream.
    Audio {
        stream_index: u32,
        codec: AudioCodec,
        channels: u16,
        sample_rate: u32,
        rate: u32,
        rate_control: RateControl,
    },
}

#[derive(Debug, Clone)]
pub struct Task {
    pub task_id: u32,
    pub job_id: String,
    pub status: TaskStatus,
    pub progress: f64,
    pub assigned_node: Option<String>,
    pub output_file: String,
    pub kind: TaskKind,
}

impl Task {
    pub fn new(task_id: u32, job_id: String, output_file: String, kind: TaskKind) -> Self {
        Self {
            task_id,
            job_id,
            status: TaskStatus::Todo,
            progress: 0.0,
            assigned_node: None,
            output_file,
            kind,
        }
    }

    pub fn task_ref(&self) -> TaskRef {
        TaskRef::new(self.job_id.clone(), self.task_id)
    }

    pub fn is_video(&self) -> bool {
        matches!(self.kind, TaskKind::Video { .. })
    }

    /// Length of source timeline covered by this task, if it is a video slice.
    pub fn duration_ms(&self) -> Option<u64> {
        match self.kind {
            TaskKind::Video {
                start_ms, end_ms, ..
            } => Some(end_ms - start_ms),
            TaskKind::Audio { .. } => None,
        }
    }

    pub(crate) fn start(&mut self, node_id: &str) {
        self.status = TaskStatus::Computing;
        self.progress = 0.0;
        self.assigned_node = Some(node_id.to_string());
    }

    pub(crate) fn requeue(&mut self) {
        self.status = TaskStatus::Todo;
        self.progress = 0.0;
        self.assigned_node = None;
    }

    pub(crate) fn complete(&mut self) {
        self.status = TaskStatus::Completed;
        self.progress = 100.0;
        self.assigned_node = None;
    }
}

/// Everything a worker needs to run one task; pushed with a task assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub job_id: String,
    pub task_id: u32,
    pub source_file: String,
    pub output_file: String,
    pub rate_control: RateControl,
    pub rate: u32,
    pub passes: u8,
    pub preset: EncoderPreset,
    pub extra_args: Vec<String>,
    pub kind: TaskKind,
}

impl TaskDefinition {
    pub fn new(task: &Task, config: &JobConfig) -> Self {
        Self {
            job_id: task.job_id.clone(),
            task_id: task.task_id,
            source_file: config.source_file.clone(),
            output_file: task.output_file.clone(),
            rate_control: config.rate_control,
            rate: config.rate,
            passes: config.passes,
            preset: config.preset,
            extra_args: config.extra_args.clone(),
            kind: task.kind.clone(),
        }
    }

    pub fn task_ref(&self) -> TaskRef {
        TaskRef::new(self.job_id.clone(), self.task_id)
    }
}
