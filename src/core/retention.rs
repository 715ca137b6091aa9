//! Deletes archives older than the retention window.

use serde::Serialize;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

use crate::core::archive::ArchiveManager;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CleanupReport {
    #[serde(rename = "deletedCount")]
    pub deleted_count: usize,
    pub message: String,
}

const SECS_PER_DAY: u64 = 24 * 60 * 60;

pub struct RetentionManager {
    archives: ArchiveManager,
    window: Duration,
}

impl RetentionManager {
    pub fn new(archives: ArchiveManager, window: Duration) -> Self {
        Self { archives, window }
    }

    pub fn with_days(archives: ArchiveManager, days: u64) -> Self {
        Self::new(archives, Duration::from_secs(days.saturating_mul(SECS_PER_DAY)))
    }

    pub async fn cleanup(&self) -> CleanupReport {
        self.cleanup_at(SystemTime::now()).await
    }

    /// Delete every archive whose age at `now` exceeds the window.
    ///
    /// The listing only preselects candidates; each deletion rechecks the age
    /// while holding the archive's slot lock.
    pub async fn cleanup_at(&self, now: SystemTime) -> CleanupReport {
        let entries = match self.archives.list().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "Failed to list archives for cleanup");
                return CleanupReport {
                    deleted_count: 0,
                    message: format!("Cleanup failed: {}", e),
                };
            }
        };

        let mut deleted_count = 0;
        for entry in entries {
            // Files stamped in the future count as brand new.
            let age = now.duration_since(entry.created).unwrap_or_default();
            if age <= self.window {
                continue;
            }

            match self.archives.remove_expired(&entry, now, self.window).await {
                Ok(Some(age)) => {
                    deleted_count += 1;
                    info!(
                        archive = %entry.name,
                        age_days = age.as_secs() / SECS_PER_DAY,
                        "Deleted expired archive"
                    );
                }
                Ok(None) => debug!(archive = %entry.name, "Archive no longer expired, kept"),
                Err(e) => warn!(archive = %entry.name, error = %e, "Failed to delete archive"),
            }
        }

        CleanupReport {
            deleted_count,
            message: format!(
                "Removed {} archive(s) older than {} day(s)",
                deleted_count,
                self.window_days()
            ),
        }
    }

    fn window_days(&self) -> u64 {
        self.window.as_secs() / SECS_PER_DAY
    }
}
