#![allow(dead_code)]

use jobdrop::config::{AppConfig, JobConfig};
use jobdrop::context::AppContext;
use jobdrop::core::{JobRun, RunStatus};
use jobdrop::web::WebServer;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;

/// A control server on an ephemeral port with shell-script jobs.
pub struct TestServer {
    pub base_url: String,
    pub ctx: AppContext,
    pub temp: TempDir,
    server: Arc<WebServer>,
}

impl TestServer {
    /// `jobs` are `(name, shell script)` pairs. Each job runs in its own
    /// working directory and writes its results to `out/` there.
    pub async fn start(jobs: &[(&str, &str)], timeout: Duration) -> Self {
        let temp = tempfile::tempdir().unwrap();

        let mut config = AppConfig {
            archive_directory: temp.path().join("archives"),
            job_timeout_secs: timeout.as_secs().max(1),
            ..AppConfig::default()
        };

        for (name, script) in jobs {
            let work = temp.path().join("work").join(name);
            std::fs::create_dir_all(&work).unwrap();
            config.jobs.insert(
                name.to_string(),
                JobConfig {
                    executable: PathBuf::from("/bin/sh"),
                    args: vec!["-c".to_string(), script.to_string()],
                    working_directory: Some(work.clone()),
                    output_directory: work.join("out"),
                },
            );
        }

        let ctx = AppContext::new(config);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Arc::new(WebServer::new(ctx.clone(), addr));

        tokio::spawn({
            let server = server.clone();
            async move { server.serve(listener).await }
        });

        Self {
            base_url: format!("http://{}", addr),
            ctx,
            temp,
            server,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.temp.path().join("archives")
    }

    pub fn work_dir(&self, job: &str) -> PathBuf {
        self.temp.path().join("work").join(job)
    }

    /// Wait until `job` has `count` runs and all of them are terminal.
    pub async fn wait_for_runs(&self, job: &str, count: usize) -> Vec<JobRun> {
        for _ in 0..400 {
            let history = self.ctx.runs.history(job).await;
            if history.len() >= count && history.iter().all(|r| r.status.is_terminal()) {
                return history;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("timed out waiting for {} run(s) of {}", count, job);
    }

    pub async fn wait_for_status(&self, job: &str, status: RunStatus) -> JobRun {
        let run = self.wait_for_runs(job, 1).await.pop().unwrap();
        assert_eq!(run.status, status, "stderr: {}", run.stderr);
        run
    }

    pub fn shutdown(&self) {
        self.server.shutdown();
    }
}

pub fn write_file(path: &Path, content: &[u8]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

/// Entry names and contents of a zip held in memory, sorted by name.
pub fn zip_entries(bytes: &[u8]) -> Vec<(String, String)> {
    use std::io::Read;

    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
    let mut entries = Vec::new();
    for i in 0..archive.len() {
        let mut file = archive.by_index(i).unwrap();
        let mut content = String::new();
        file.read_to_string(&mut content).unwrap();
        entries.push((file.name().to_string(), content));
    }
    entries.sort();
    entries
}
