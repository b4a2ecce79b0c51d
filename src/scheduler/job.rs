use std::cmp::Ordering;
use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::TaskPlan;
use crate::error::{ClusterError, Result};
use crate::identity;
use crate::media::{FileInfo, StreamKind};
use crate::scheduler::task::{AudioCodec, Task, TaskKind, TaskStatus};

/// A trailing slice shorter than this fraction of the job is merged into the
/// slice before it.
pub const ABSORB_RATIO: f64 = 0.15;

const PARTS_FOLDER: &str = "parts";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateControl {
    Vbr,
    Crf,
}

impl RateControl {
    pub fn max_passes(&self) -> u8 {
        match self {
            RateControl::Vbr => 2,
            RateControl::Crf => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderPreset {
    Ultrafast,
    Superfast,
    Veryfast,
    Faster,
    Fast,
    #[default]
    Medium,
    Slow,
    Slower,
    Veryslow,
    Placebo,
}

/// Encoding parameters of a job. Opaque to the scheduler; passed through to
/// workers with every task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    pub source_file: String,
    pub rate_control: RateControl,
    /// kbps for VBR, quality factor for CRF
    pub rate: u32,
    pub passes: u8,
    pub preset: EncoderPreset,
    pub extra_args: Vec<String>,
}

impl JobConfig {
    pub fn new(source_file: impl Into<String>, rate_control: RateControl, rate: u32) -> Self {
        Self {
            source_file: source_file.into(),
            rate_control,
            rate,
            passes: 1,
            preset: EncoderPreset::default(),
            extra_args: Vec::new(),
        }
    }

    pub fn with_passes(mut self, passes: u8) -> Self {
        self.passes = passes.clamp(1, self.rate_control.max_passes());
        self
    }

    pub fn with_preset(mut self, preset: EncoderPreset) -> Self {
        self.preset = preset;
        self
    }

    pub fn with_extra_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Todo,
    Computing,
    Completed,
    Canceled,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Todo => write!(f, "todo"),
            JobStatus::Computing => write!(f, "computing"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Canceled => write!(f, "canceled"),
        }
    }
}

/// Slice `[0, total_ms)` into consecutive ranges of `task_ms`.
///
/// When the time left after the current slice would be at most
/// [`ABSORB_RATIO`] of `total_ms`, the current slice is stretched to
/// `total_ms` and slicing stops.
pub fn split_timeline(total_ms: u64, task_ms: u64) -> Vec<(u64, u64)> {
    let mut slices = Vec::new();
    if task_ms == 0 {
        return slices;
    }

    let mut current = 0u64;
    let mut remaining = total_ms;
    while remaining > 0 {
        let start = current;
        if (remaining as f64 - task_ms as f64) / total_ms as f64 <= ABSORB_RATIO {
            slices.push((start, total_ms));
            remaining = 0;
        } else {
            slices.push((start, current + task_ms));
            remaining -= task_ms;
            current += task_ms;
        }
    }
    slices
}

/// Whole seconds of `ms` times `frame_rate`, rounded down.
pub fn estimate_frames(ms: u64, frame_rate: f64) -> u64 {
    ((ms / 1000) as f64 * frame_rate).floor() as u64
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub name: String,
    pub config: JobConfig,
    pub status: JobStatus,
    pub priority: i32,
    pub duration_ms: u64,
    pub frame_rate: f64,
    pub frame_count: u64,
    pub output_folder: String,
    pub output_file_name: String,
    pub created_at: DateTime<Utc>,
    /// Submission order, set by the job queue.
    pub(crate) sequence: u64,
    video_tasks: Vec<Task>,
    audio_tasks: Vec<Task>,
}

impl Job {
    /// Build a job and derive all of its tasks from the inspected source.
    pub fn new(
        config: JobConfig,
        name: impl Into<String>,
        plan: &TaskPlan,
        info: &FileInfo,
    ) -> Result<Self> {
        let name = name.into();
        if plan.task_duration_ms == 0 {
            return Err(ClusterError::InvalidJob(
                "task duration must be greater than zero".to_string(),
            ));
        }
        if info.streams.is_empty() {
            return Err(ClusterError::InvalidJob(format!(
                "{} has no audio or video stream",
                config.source_file
            )));
        }

        let frame_rate = info.main_frame_rate().unwrap_or(0.0);
        let output_folder = plan.output_folder.join(&name);
        let stem = Path::new(&config.source_file)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| name.clone());

        let mut job = Self {
            id: identity::job_id(&config.source_file, &name),
            name,
            config,
            status: JobStatus::Todo,
            priority: 0,
            duration_ms: info.duration_ms,
            frame_rate,
            frame_count: estimate_frames(info.duration_ms, frame_rate),
            output_folder: output_folder.to_string_lossy().into_owned(),
            output_file_name: format!("{stem}.mkv"),
            created_at: Utc::now(),
            sequence: 0,
            video_tasks: Vec::new(),
            audio_tasks: Vec::new(),
        };
        job.create_tasks(plan.task_duration_ms, info);
        Ok(job)
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    fn create_tasks(&mut self, task_ms: u64, info: &FileInfo) {
        let parts = Path::new(&self.output_folder).join(PARTS_FOLDER);
        let mut next_id = 0u32;

        for stream in &info.streams {
            match stream.kind {
                StreamKind::Video { frame_rate } => {
                    for (start_ms, end_ms) in split_timeline(self.duration_ms, task_ms) {
                        let output = parts.join(format!("part-{next_id}.mpeg.ts"));
                        self.video_tasks.push(Task::new(
                            next_id,
                            self.id.clone(),
                            output.to_string_lossy().into_owned(),
                            TaskKind::Video {
                                stream_index: stream.index,
                                start_ms,
                                end_ms,
                                estimated_frames: estimate_frames(end_ms - start_ms, frame_rate),
                            },
                        ));
                        next_id += 1;
                    }
                }
                StreamKind::Audio { .. } => {
                    let output = parts.join(format!("audio-{next_id}.ogg"));
                    self.audio_tasks.push(Task::new(
                        next_id,
                        self.id.clone(),
                        output.to_string_lossy().into_owned(),
                        TaskKind::Audio {
                            stream_index: stream.index,
                            codec: AudioCodec::Vorbis,
                            channels: 2,
                            sample_rate: 44_100,
                            rate: 3,
                            rate_control: RateControl::Crf,
                        },
                    ));
                    next_id += 1;
                }
            }
        }
    }

    pub fn video_tasks(&self) -> &[Task] {
        &self.video_tasks
    }

    pub fn audio_tasks(&self) -> &[Task] {
        &self.audio_tasks
    }

    /// All tasks, audio first, each sequence in creation order.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.audio_tasks.iter().chain(self.video_tasks.iter())
    }

    pub fn task(&self, task_id: u32) -> Option<&Task> {
        self.tasks().find(|t| t.task_id == task_id)
    }

    fn task_mut(&mut self, task_id: u32) -> Option<&mut Task> {
        self.audio_tasks
            .iter_mut()
            .chain(self.video_tasks.iter_mut())
            .find(|t| t.task_id == task_id)
    }

    pub fn task_count(&self) -> usize {
        self.audio_tasks.len() + self.video_tasks.len()
    }

    /// First task still waiting to be dispatched.
    pub fn next_pending_task(&self) -> Option<&Task> {
        match self.status {
            JobStatus::Completed | JobStatus::Canceled => None,
            _ => self.tasks().find(|t| t.status == TaskStatus::Todo),
        }
    }

    /// Number of tasks not yet handed out.
    pub fn remaining_tasks(&self) -> usize {
        self.tasks()
            .filter(|t| t.status == TaskStatus::Todo)
            .count()
    }

    /// Scheduling preference: lower priority value first, then fewer
    /// remaining tasks, then shorter jobs, then earlier submission.
    pub fn preference_cmp(&self, other: &Job) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| self.remaining_tasks().cmp(&other.remaining_tasks()))
            .then_with(|| self.duration_ms.cmp(&other.duration_ms))
            .then_with(|| self.sequence.cmp(&other.sequence))
    }

    /// Hand a TODO task to `node_id`. The first dispatch moves the job to
    /// computing.
    pub(crate) fn start_task(&mut self, task_id: u32, node_id: &str) -> bool {
        match self.task_mut(task_id) {
            Some(task) if task.status == TaskStatus::Todo => task.start(node_id),
            _ => return false,
        }
        if self.status == JobStatus::Todo {
            self.status = JobStatus::Computing;
            tracing::info!(job_id = %self.id, name = %self.name, "Job started");
        }
        true
    }

    pub(crate) fn requeue_task(&mut self, task_id: u32) -> bool {
        match self.task_mut(task_id) {
            Some(task) if task.status == TaskStatus::Computing => {
                task.requeue();
                true
            }
            _ => false,
        }
    }

    pub(crate) fn set_progress(&mut self, task_id: u32, progress: f64) {
        if let Some(task) = self.task_mut(task_id) {
            task.progress = progress;
        }
    }

    /// Mark a task completed. Returns true if this completed the whole job.
    pub(crate) fn complete_task(&mut self, task_id: u32) -> bool {
        if let Some(task) = self.task_mut(task_id) {
            task.complete();
        }
        if self.status != JobStatus::Computing {
            return false;
        }
        if self.tasks().all(|t| t.status == TaskStatus::Completed) {
            self.status = JobStatus::Completed;
            return true;
        }
        false
    }

    /// Cancel the job. Tasks not yet dispatched are canceled; tasks in flight
    /// run to completion. Returns the number of tasks canceled.
    pub(crate) fn cancel(&mut self) -> usize {
        self.status = JobStatus::Canceled;
        let mut canceled = 0;
        for task in self
            .audio_tasks
            .iter_mut()
            .chain(self.video_tasks.iter_mut())
        {
            if task.status == TaskStatus::Todo {
                task.status = TaskStatus::Canceled;
                canceled += 1;
            }
        }
        canceled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::StreamInfo;

    fn movie(duration_ms: u64) -> FileInfo {
        FileInfo {
            duration_ms,
            streams: vec![StreamInfo::video(0, 25.0), StreamInfo::audio(1, 6, 48_000)],
        }
    }

    fn plan(task_ms: u64) -> TaskPlan {
        TaskPlan {
            task_duration_ms: task_ms,
            output_folder: "out".into(),
        }
    }

    #[test]
    fn split_absorbs_short_tail() {
        let slices = split_timeline(7_211_548, 300_000);
        assert_eq!(slices.len(), 21);
        for (i, (start, end)) in slices.iter().take(20).enumerate() {
            assert_eq!(*start, i as u64 * 300_000);
            assert_eq!(*end, (i as u64 + 1) * 300_000);
        }
        assert_eq!(slices[20], (6_000_000, 7_211_548));
    }

    #[test]
    fn split_shorter_than_one_task() {
        assert_eq!(split_timeline(120_000, 300_000), vec![(0, 120_000)]);
    }

    #[test]
    fn split_empty_inputs() {
        assert!(split_timeline(0, 300_000).is_empty());
        assert!(split_timeline(1000, 0).is_empty());
    }

    #[test]
    fn frame_estimate_uses_whole_seconds() {
        assert_eq!(estimate_frames(300_000, 25.0), 7500);
        assert_eq!(estimate_frames(1_999, 30.0), 30);
        assert_eq!(estimate_frames(1_211_548, 23.976), 29_034);
    }

    #[test]
    fn job_derives_tasks() {
        let config = JobConfig::new("/media/My.Movie.mkv", RateControl::Vbr, 1000).with_passes(2);
        let job = Job::new(config, "movie", &plan(300_000), &movie(7_211_548)).unwrap();

        assert_eq!(job.status, JobStatus::Todo);
        assert_eq!(job.video_tasks().len(), 21);
        assert_eq!(job.audio_tasks().len(), 1);
        assert_eq!(job.task_count(), 22);
        assert_eq!(job.frame_count, 7211 * 25);
        assert_eq!(job.output_file_name, "My.Movie.mkv");
        assert_eq!(job.config.passes, 2);

        // video stream comes first in the file, so it owns ids 0..=20
        assert_eq!(job.audio_tasks()[0].task_id, 21);
        assert!(job.video_tasks()[3].output_file.ends_with("part-3.mpeg.ts"));
        assert!(job.audio_tasks()[0].output_file.ends_with("audio-21.ogg"));

        // combined order: audio first
        let order: Vec<u32> = job.tasks().map(|t| t.task_id).collect();
        assert_eq!(order[0], 21);
        assert_eq!(order[1], 0);
    }

    #[test]
    fn passes_clamped_by_rate_control() {
        let config = JobConfig::new("a.mkv", RateControl::Crf, 23).with_passes(2);
        assert_eq!(config.passes, 1);
    }

    #[test]
    fn job_rejects_zero_task_duration() {
        let config = JobConfig::new("a.mkv", RateControl::Crf, 23);
        let err = Job::new(config, "a", &plan(0), &movie(1000)).unwrap_err();
        assert!(matches!(err, ClusterError::InvalidJob(_)));
    }

    #[test]
    fn job_lifecycle() {
        let config = JobConfig::new("a.mkv", RateControl::Crf, 23);
        let info = FileInfo {
            duration_ms: 320_000,
            streams: vec![StreamInfo::video(0, 25.0)],
        };
        let mut job = Job::new(config, "a", &plan(300_000), &info).unwrap();
        assert_eq!(job.task_count(), 1);

        assert!(job.start_task(0, "node"));
        assert_eq!(job.status, JobStatus::Computing);
        assert!(!job.start_task(0, "other"));

        assert!(job.requeue_task(0));
        assert_eq!(job.status, JobStatus::Computing);
        assert_eq!(job.remaining_tasks(), 1);

        job.start_task(0, "node");
        assert!(job.complete_task(0));
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.next_pending_task().is_none());
    }

    #[test]
    fn cancel_leaves_in_flight_tasks() {
        let config = JobConfig::new("a.mkv", RateControl::Crf, 23);
        let mut job = Job::new(config, "a", &plan(300_000), &movie(900_000)).unwrap();
        let first = job.next_pending_task().unwrap().task_id;
        job.start_task(first, "node");

        let canceled = job.cancel();
        assert_eq!(canceled, job.task_count() - 1);
        assert!(job.next_pending_task().is_none());
        assert!(!job.complete_task(first));
        assert_eq!(job.status, JobStatus::Canceled);
    }
}
