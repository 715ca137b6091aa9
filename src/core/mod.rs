pub mod archive;
pub mod models;
pub mod notifications;
pub mod registry;
pub mod retention;
pub mod runner;
pub mod runs;

pub use archive::{ArchiveManager, format_size};
pub use models::{ArchiveEntry, ArchiveReport, JobDescriptor, JobRun, RunStatus};
pub use registry::JobRegistry;
pub use retention::{CleanupReport, RetentionManager};
pub use runner::JobRunner;
pub use runs::RunTracker;
