//! Static mapping from job name to what to execute and where its output lands.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::config::AppConfig;
use crate::core::models::JobDescriptor;
use crate::error::{Error, Result};

#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: BTreeMap<String, JobDescriptor>,
}

impl JobRegistry {
    pub fn from_config(config: &AppConfig) -> Self {
        let jobs = config
            .jobs
            .iter()
            .map(|(name, job)| {
                let working_directory = job
                    .working_directory
                    .clone()
                    .unwrap_or_else(|| default_working_directory(&job.executable));

                let descriptor = JobDescriptor {
                    name: name.clone(),
                    executable: job.executable.clone(),
                    args: job.args.clone(),
                    working_directory,
                    output_directory: job.output_directory.clone(),
                };
                (name.clone(), descriptor)
            })
            .collect();

        Self { jobs }
    }

    pub fn get(&self, name: &str) -> Result<&JobDescriptor> {
        self.jobs
            .get(name)
            .ok_or_else(|| Error::JobNotFound(name.to_string()))
    }

    /// Registered job names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.jobs.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

fn default_working_directory(executable: &Path) -> PathBuf {
    match executable.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
