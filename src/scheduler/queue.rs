use crate::config::SelectionPolicy;
use crate::scheduler::job::{Job, JobStatus};
use crate::scheduler::task::{Task, TaskRef};

/// Submitted jobs in submission order.
#[derive(Debug, Default)]
pub struct JobQueue {
    jobs: Vec<Job>,
    next_sequence: u64,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a job. Returns false if a job with the same id is already queued.
    pub fn add_job(&mut self, mut job: Job) -> bool {
        if self.get_job(&job.id).is_some() {
            return false;
        }
        job.sequence = self.next_sequence;
        self.next_sequence += 1;
        self.jobs.push(job);
        true
    }

    pub fn get_job(&self, id: &str) -> Option<&Job> {
        self.jobs.iter().find(|j| j.id == id)
    }

    pub(crate) fn get_job_mut(&mut self, id: &str) -> Option<&mut Job> {
        self.jobs.iter_mut().find(|j| j.id == id)
    }

    pub fn task(&self, task: &TaskRef) -> Option<&Task> {
        self.get_job(&task.job_id)?.task(task.task_id)
    }

    /// Jobs in submission order.
    pub fn all_jobs(&self) -> &[Job] {
        &self.jobs
    }

    /// Jobs sorted by [`Job::preference_cmp`].
    pub fn jobs_by_preference(&self) -> Vec<&Job> {
        let mut jobs: Vec<&Job> = self.jobs.iter().collect();
        jobs.sort_by(|a, b| a.preference_cmp(b));
        jobs
    }

    /// Next task waiting for a node.
    ///
    /// With [`SelectionPolicy::Fifo`] jobs are scanned in submission order;
    /// with [`SelectionPolicy::Priority`] in preference order. Within a job,
    /// tasks are scanned in the job's combined task order.
    pub fn find_next_pending(&self, policy: SelectionPolicy) -> Option<TaskRef> {
        match policy {
            SelectionPolicy::Fifo => self
                .jobs
                .iter()
                .find_map(|job| job.next_pending_task().map(Task::task_ref)),
            SelectionPolicy::Priority => self
                .jobs_by_preference()
                .into_iter()
                .find_map(|job| job.next_pending_task().map(Task::task_ref)),
        }
    }

    pub fn count_by_status(&self, status: JobStatus) -> usize {
        self.jobs.iter().filter(|j| j.status == status).count()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
