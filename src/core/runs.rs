//! In-memory table of job runs.
//!
//! Every accepted trigger creates a `JobRun` here before the background task
//! starts, and the runner writes the terminal state back when the task ends.
//! Nothing is persisted: the table lives for the lifetime of the process.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::models::{JobRun, RunStatus};

/// Runs kept per job name; older ones are dropped.
const HISTORY_PER_JOB: usize = 10;

/// Thread-safe store of recent runs, keyed by job name.
///
/// Overlapping runs of the same job each get their own entry, so a late
/// finisher never overwrites another run's status.
#[derive(Clone, Default)]
pub struct RunTracker {
    inner: Arc<RwLock<HashMap<String, Vec<JobRun>>>>,
}

impl RunTracker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Record a new `Running` run for `job_name` and return it.
    pub async fn start(&self, job_name: &str) -> JobRun {
        let run = JobRun::new(job_name);
        let mut map = self.inner.write().await;
        let runs = map.entry(job_name.to_string()).or_default();
        runs.push(run.clone());
        if runs.len() > HISTORY_PER_JOB {
            let excess = runs.len() - HISTORY_PER_JOB;
            runs.drain(..excess);
        }
        run
    }

    /// Replace the stored copy of `run`. Unknown runs are ignored.
    pub async fn update(&self, run: &JobRun) {
        let mut map = self.inner.write().await;
        if let Some(slot) = map
            .get_mut(&run.job_name)
            .and_then(|runs| runs.iter_mut().find(|r| r.run_id == run.run_id))
        {
            *slot = run.clone();
        }
    }

    pub async fn get(&self, job_name: &str, run_id: Uuid) -> Option<JobRun> {
        let map = self.inner.read().await;
        map.get(job_name)?
            .iter()
            .find(|r| r.run_id == run_id)
            .cloned()
    }

    /// Most recently started run of a job.
    pub async fn latest(&self, job_name: &str) -> Option<JobRun> {
        let map = self.inner.read().await;
        map.get(job_name)?.last().cloned()
    }

    /// Recent runs of a job, oldest first.
    pub async fn history(&self, job_name: &str) -> Vec<JobRun> {
        let map = self.inner.read().await;
        map.get(job_name).cloned().unwrap_or_default()
    }

    /// Number of runs still executing across all jobs.
    pub async fn active_count(&self) -> usize {
        let map = self.inner.read().await;
        map.values()
            .flatten()
            .filter(|r| r.status == RunStatus::Running)
            .count()
    }
}
