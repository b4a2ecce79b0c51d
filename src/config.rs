use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// How the scheduler picks the next pending task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionPolicy {
    /// Jobs in submission order, tasks in job order.
    #[default]
    Fifo,
    /// Jobs ordered by priority, then remaining tasks, then duration.
    Priority,
}

/// Parameters for splitting a job into tasks.
#[derive(Debug, Clone)]
pub struct TaskPlan {
    /// Target length of a video slice in milliseconds
    pub task_duration_ms: u64,
    /// Root folder, relative to the shared storage, that receives job outputs
    pub output_folder: PathBuf,
}

impl Default for TaskPlan {
    fn default() -> Self {
        Self {
            task_duration_ms: 5 * 60 * 1000,
            output_folder: PathBuf::from("jobs"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MasterConfig {
    pub listen_addr: SocketAddr,
    pub plan: TaskPlan,
    pub liveness_interval_ms: u64,
    pub probe_timeout_ms: u64,
    /// Upper bound on one outbound task push (connect, write, acknowledgement)
    pub dispatch_timeout_ms: u64,
    /// Upper bound on reading the single request of an inbound connection
    pub request_timeout_ms: u64,
    pub selection: SelectionPolicy,
    /// Keep rebalancing after an event until no further match is possible.
    /// When false, each event performs at most one match.
    pub drain_matches: bool,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 1337)),
            plan: TaskPlan::default(),
            liveness_interval_ms: 5000,
            probe_timeout_ms: 2000,
            dispatch_timeout_ms: 10_000,
            request_timeout_ms: 5000,
            selection: SelectionPolicy::Fifo,
            drain_matches: true,
        }
    }
}

impl MasterConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Default::default()
        }
    }

    pub fn with_task_duration_ms(mut self, task_duration_ms: u64) -> Self {
        self.plan.task_duration_ms = task_duration_ms;
        self
    }

    pub fn with_output_folder(mut self, folder: impl Into<PathBuf>) -> Self {
        self.plan.output_folder = folder.into();
        self
    }

    pub fn with_liveness(mut self, interval_ms: u64, probe_timeout_ms: u64) -> Self {
        self.liveness_interval_ms = interval_ms;
        self.probe_timeout_ms = probe_timeout_ms;
        self
    }

    pub fn with_dispatch_timeout_ms(mut self, dispatch_timeout_ms: u64) -> Self {
        self.dispatch_timeout_ms = dispatch_timeout_ms;
        self
    }

    pub fn with_selection(mut self, selection: SelectionPolicy) -> Self {
        self.selection = selection;
        self
    }

    pub fn with_drain_matches(mut self, drain: bool) -> Self {
        self.drain_matches = drain;
        self
    }

    pub fn liveness_interval(&self) -> Duration {
        Duration::from_millis(self.liveness_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
