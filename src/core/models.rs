use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::time::SystemTime;
use uuid::Uuid;

/// A registered job, resolved from configuration at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct JobDescriptor {
    pub name: String,
    pub executable: PathBuf,
    pub args: Vec<String>,
    pub working_directory: PathBuf,
    pub output_directory: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Running => write!(f, "Running"),
            RunStatus::Succeeded => write!(f, "Succeeded"),
            RunStatus::Failed => write!(f, "Failed"),
            RunStatus::TimedOut => write!(f, "TimedOut"),
        }
    }
}

/// One execution attempt of a job.
#[derive(Debug, Clone, Serialize)]
pub struct JobRun {
    pub run_id: Uuid,
    pub job_name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub pid: Option<u32>,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// Outcome of the archive step, set only for runs that reached it.
    pub archive_message: Option<String>,
}

impl JobRun {
    pub fn new(job_name: &str) -> Self {
        Self {
            run_id: Uuid::now_v7(),
            job_name: job_name.to_string(),
            started_at: Utc::now(),
            finished_at: None,
            status: RunStatus::Running,
            pid: None,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            archive_message: None,
        }
    }
}

/// A live archive file in the archive store.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ArchiveEntry {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    pub size_mb: f64,
    pub formatted_size: String,
    pub created_time: String,
    #[serde(skip)]
    pub created: SystemTime,
}

/// Result of compressing a job's output directory.
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveReport {
    pub success: bool,
    pub message: String,
    pub path: Option<PathBuf>,
}
