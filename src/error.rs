//! Crate error type.

use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Archive not found: {0}")]
    ArchiveNotFound(String),

    #[error("Failed to spawn {}: {source}", executable.display())]
    Spawn {
        executable: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Output directory does not exist: {}", .0.display())]
    MissingOutputDirectory(PathBuf),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),

    #[error("Invalid header value: {0}")]
    InvalidHeader(String),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, Error>;
