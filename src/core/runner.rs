//! Executes registered jobs as child processes.
//!
//! A trigger records a `Running` entry in the run tracker and hands the job
//! to a detached task. That task owns the child process: it captures stdout
//! and stderr, enforces the timeout by killing the child's process group,
//! archives the output directory on a zero exit code, and writes the terminal
//! state back to the tracker. Nothing here propagates to the caller of
//! `trigger`.

use chrono::Utc;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use std::os::unix::process::CommandExt;
use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::core::archive::ArchiveManager;
use crate::core::models::{JobDescriptor, JobRun, RunStatus};
use crate::core::notifications::{JobEvent, NotificationChannel};
use crate::core::registry::JobRegistry;
use crate::core::runs::RunTracker;
use crate::error::{Error, Result};

/// How long to keep draining stdout/stderr after the child has exited.
/// Bounds the wait when a detached grandchild still holds the pipes.
const PIPE_DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Bytes of stdout and of stderr kept per run; earlier output is dropped.
const OUTPUT_TAIL_BYTES: usize = 64 * 1024;

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// What happened to a job's child process.
#[derive(Debug)]
pub enum ProcessOutcome {
    Exited {
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },
    TimedOut {
        stdout: String,
        stderr: String,
    },
}

#[derive(Clone)]
pub struct JobRunner {
    registry: Arc<JobRegistry>,
    runs: RunTracker,
    archives: ArchiveManager,
    notifier: Option<Arc<dyn NotificationChannel>>,
    timeout: Duration,
}

impl JobRunner {
    pub fn new(
        registry: Arc<JobRegistry>,
        runs: RunTracker,
        archives: ArchiveManager,
        notifier: Option<Arc<dyn NotificationChannel>>,
        timeout: Duration,
    ) -> Self {
        Self {
            registry,
            runs,
            archives,
            notifier,
            timeout,
        }
    }

    /// Accept a trigger for `job_name` and start it in the background.
    ///
    /// Returns as soon as the run is recorded; the returned copy is in the
    /// `Running` state.
    pub async fn trigger(&self, job_name: &str) -> Result<JobRun> {
        let job = self.registry.get(job_name)?.clone();
        let run = self.runs.start(&job.name).await;

        info!(job = %job.name, run_id = %run.run_id, "Run accepted");

        let runner = self.clone();
        let accepted = run.clone();
        tokio::spawn(async move {
            runner.execute(job, run).await;
        });

        Ok(accepted)
    }

    /// Drive one run to a terminal state and return it.
    pub async fn execute(&self, job: JobDescriptor, run: JobRun) -> JobRun {
        let span = info_span!("job_run", job = %job.name, run_id = %run.run_id);
        self.execute_inner(job, run).instrument(span).await
    }

    async fn execute_inner(&self, job: JobDescriptor, mut run: JobRun) -> JobRun {
        let run_id = run.run_id.to_string();
        let start = Instant::now();

        self.notify(JobEvent::Started {
            job_name: job.name.clone(),
            run_id: run_id.clone(),
        });

        let child = match spawn_job(&job) {
            Ok(child) => child,
            Err(e) => {
                error!(error = %e, "Failed to start job");
                run.status = RunStatus::Failed;
                run.stderr = e.to_string();
                return self.finish(run, start).await;
            }
        };

        run.pid = child.id();
        self.runs.update(&run).await;
        info!(
            executable = %job.executable.display(),
            pid = ?run.pid,
            timeout_secs = self.timeout.as_secs(),
            "Job started"
        );

        match wait_with_timeout(child, self.timeout).await {
            Ok(ProcessOutcome::Exited {
                exit_code,
                stdout,
                stderr,
            }) => {
                run.exit_code = exit_code;
                run.stdout = stdout;
                run.stderr = stderr;

                if exit_code == Some(0) {
                    run.status = RunStatus::Succeeded;
                    let report = self.archives.compress(&job).await;
                    run.archive_message = Some(report.message);
                } else {
                    run.status = RunStatus::Failed;
                }
            }
            Ok(ProcessOutcome::TimedOut { stdout, stderr }) => {
                warn!(timeout_secs = self.timeout.as_secs(), "Job timed out and was killed");
                run.status = RunStatus::TimedOut;
                run.stdout = stdout;
                run.stderr = stderr;
            }
            Err(e) => {
                error!(error = %e, "Failed waiting for job");
                run.status = RunStatus::Failed;
                run.stderr = e.to_string();
            }
        }

        self.finish(run, start).await
    }

    async fn finish(&self, mut run: JobRun, start: Instant) -> JobRun {
        run.finished_at = Some(Utc::now());
        self.runs.update(&run).await;

        let elapsed = start.elapsed();
        if !run.stdout.is_empty() {
            debug!(stdout = %run.stdout, "Job stdout");
        }
        if !run.stderr.is_empty() {
            warn!(stderr = %run.stderr, "Job stderr");
        }
        info!(
            status = %run.status,
            exit_code = ?run.exit_code,
            elapsed_ms = elapsed.as_millis() as u64,
            archive = run.archive_message.as_deref().unwrap_or("-"),
            "Run finished"
        );

        let job_name = run.job_name.clone();
        let run_id = run.run_id.to_string();
        let event = match run.status {
            RunStatus::Succeeded => JobEvent::Succeeded {
                job_name,
                run_id,
                duration_secs: elapsed.as_secs(),
                archive_message: run.archive_message.clone().unwrap_or_default(),
            },
            RunStatus::TimedOut => JobEvent::TimedOut {
                job_name,
                run_id,
                timeout_secs: self.timeout.as_secs(),
            },
            _ => JobEvent::Failed {
                job_name,
                run_id,
                exit_code: run.exit_code,
                error: last_lines(&run.stderr, 10),
            },
        };
        self.notify(event);

        run
    }

    fn notify(&self, event: JobEvent) {
        if let Some(notifier) = &self.notifier {
            let notifier = notifier.clone();
            tokio::spawn(async move {
                if let Err(e) = notifier.notify(event).await {
                    warn!(error = %e, "Failed to send notification");
                }
            });
        }
    }
}

/// Start the job's executable in its own process group.
pub fn spawn_job(job: &JobDescriptor) -> Result<Child> {
    let mut command = std::process::Command::new(&job.executable);
    command
        .args(&job.args)
        .current_dir(&job.working_directory)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0);

    Command::from(command)
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| Error::Spawn {
            executable: job.executable.clone(),
            source,
        })
}

/// Wait for the child, killing its whole process group if `limit` elapses.
/// The child is always reaped before this returns.
pub async fn wait_with_timeout(mut child: Child, limit: Duration) -> Result<ProcessOutcome> {
    let stdout = tokio::spawn(read_pipe(child.stdout.take()));
    let stderr = tokio::spawn(read_pipe(child.stderr.take()));

    let status = match tokio::time::timeout(limit, child.wait()).await {
        Ok(status) => Some(status?),
        Err(_) => {
            kill_process_group(&mut child).await;
            None
        }
    };

    let stdout = collect_pipe(stdout).await;
    let stderr = collect_pipe(stderr).await;

    Ok(match status {
        Some(status) => ProcessOutcome::Exited {
            exit_code: status.code(),
            stdout,
            stderr,
        },
        None => ProcessOutcome::TimedOut { stdout, stderr },
    })
}

async fn kill_process_group(child: &mut Child) {
    if let Some(pid) = child.id() {
        // The group id equals the child's pid because of process_group(0).
        if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            debug!(pid, error = %e, "killpg failed");
        }
    }

    let _ = child.start_kill();
    if let Err(e) = child.wait().await {
        warn!(error = %e, "Failed to reap killed job");
    }
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> String {
    match pipe {
        Some(pipe) => read_tail(pipe, OUTPUT_TAIL_BYTES).await,
        None => String::new(),
    }
}

/// Read `pipe` to the end, keeping only its last `limit` bytes.
async fn read_tail<R: AsyncRead + Unpin>(mut pipe: R, limit: usize) -> String {
    let mut tail: VecDeque<u8> = VecDeque::with_capacity(limit.min(READ_CHUNK_SIZE));
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];
    let mut dropped = 0usize;

    loop {
        match pipe.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                tail.extend(&chunk[..n]);
                if tail.len() > limit {
                    let excess = tail.len() - limit;
                    tail.drain(..excess);
                    dropped += excess;
                }
            }
            Err(e) => {
                debug!(error = %e, "Error reading job output");
                break;
            }
        }
    }

    let bytes = Vec::from(tail);
    let text = String::from_utf8_lossy(&bytes);
    if dropped == 0 {
        text.into_owned()
    } else {
        format!("[{} earlier bytes dropped]\n{}", dropped, text)
    }
}

async fn collect_pipe(handle: JoinHandle<String>) -> String {
    let abort = handle.abort_handle();
    match tokio::time::timeout(PIPE_DRAIN_GRACE, handle).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            debug!(error = %e, "Output reader task failed");
            String::new()
        }
        Err(_) => {
            abort.abort();
            warn!("Job output pipe still open after exit; output dropped");
            String::new()
        }
    }
}

fn last_lines(text: &str, count: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    lines[lines.len().saturating_sub(count)..].join("\n")
}
