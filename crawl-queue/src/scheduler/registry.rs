//! Registry of in-flight per-job tasks.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

struct RunningTask {
    token: CancellationToken,
    started: Instant,
    deadline: Option<Instant>,
    expired: bool,
}

/// Tracks the cancellation handle and deadline of every dispatched job.
///
/// Entries are removed by the supervising task after the job's terminal
/// status has been written, so an empty registry means nothing is in flight.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: DashMap<String, RunningTask>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job and return its token, a child of `parent`.
    pub fn register(
        &self,
        job_id: &str,
        parent: &CancellationToken,
        timeout: Option<Duration>,
    ) -> CancellationToken {
        let token = parent.child_token();
        let started = Instant::now();
        self.tasks.insert(
            job_id.to_string(),
            RunningTask {
                token: token.clone(),
                started,
                deadline: timeout.map(|t| started + t),
                expired: false,
            },
        );
        token
    }

    pub fn remove(&self, job_id: &str) {
        self.tasks.remove(job_id);
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.tasks.contains_key(job_id)
    }

    /// How long `job_id` has been running.
    pub fn elapsed(&self, job_id: &str) -> Option<Duration> {
        self.tasks.get(job_id).map(|t| t.started.elapsed())
    }

    /// Cancel tasks whose deadline is at or before `now`.
    ///
    /// Returns the ids cancelled by this call; each task is reported once.
    pub fn cancel_expired(&self, now: Instant) -> Vec<String> {
        let mut expired = Vec::new();
        for mut entry in self.tasks.iter_mut() {
            let task = entry.value_mut();
            if task.expired || !task.deadline.is_some_and(|d| d <= now) {
                continue;
            }
            task.expired = true;
            task.token.cancel();
            expired.push(entry.key().clone());
        }
        expired
    }

    /// Cancel every registered task. Returns how many were registered.
    pub fn cancel_all(&self) -> usize {
        let mut count = 0;
        for entry in self.tasks.iter() {
            entry.token.cancel();
            count += 1;
        }
        count
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
