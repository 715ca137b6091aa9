use std::sync::Arc;

use crate::config::AppConfig;
use crate::core::notifications::create_notifier;
use crate::core::{ArchiveManager, JobRegistry, JobRunner, RetentionManager, RunTracker};

/// Shared handles built once at startup from the immutable configuration.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub registry: Arc<JobRegistry>,
    pub runs: RunTracker,
    pub archives: ArchiveManager,
    pub runner: JobRunner,
}

impl AppContext {
    pub fn new(config: AppConfig) -> Self {
        let registry = Arc::new(JobRegistry::from_config(&config));
        let runs = RunTracker::new();
        let archives = ArchiveManager::new(config.archive_directory.clone());
        let runner = JobRunner::new(
            registry.clone(),
            runs.clone(),
            archives.clone(),
            create_notifier(&config.notifications),
            config.job_timeout(),
        );

        Self {
            config: Arc::new(config),
            registry,
            runs,
            archives,
            runner,
        }
    }

    pub fn retention(&self) -> RetentionManager {
        RetentionManager::new(self.archives.clone(), self.config.retention_window())
    }
}
