//! Archive store management.
//!
//! Each job owns exactly one archive slot, `<archive_dir>/<job>.zip`. A new
//! archive is written to a hidden temporary file in the same directory and
//! renamed over the slot, so readers only ever see a complete archive.
//! Writers for the same slot are serialized.

use chrono::{DateTime, Local};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, ErrorKind, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};
use zip::{CompressionMethod, ZipWriter, write::SimpleFileOptions};

use crate::core::models::{ArchiveEntry, ArchiveReport, JobDescriptor};
use crate::error::{Error, Result};

const ARCHIVE_EXTENSION: &str = "zip";

/// Buffer size for archive I/O (128KB)
const BUFFER_SIZE: usize = 128 * 1024;

const TEMP_PREFIX: &str = ".";
const TEMP_SUFFIX: &str = ".partial";

#[derive(Clone)]
pub struct ArchiveManager {
    archive_dir: Arc<PathBuf>,
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

/// Counts gathered while writing an archive.
struct WriteResult {
    file_count: usize,
    size: u64,
}

impl ArchiveManager {
    pub fn new(archive_dir: impl Into<PathBuf>) -> Self {
        Self {
            archive_dir: Arc::new(archive_dir.into()),
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn archive_name(job_name: &str) -> String {
        format!("{}.{}", job_name, ARCHIVE_EXTENSION)
    }

    pub fn archive_path(&self, job_name: &str) -> PathBuf {
        self.archive_dir.join(Self::archive_name(job_name))
    }

    /// Snapshot the job's output directory into its archive slot.
    ///
    /// Never fails: problems are reported through `ArchiveReport::success`.
    pub async fn compress(&self, job: &JobDescriptor) -> ArchiveReport {
        let name = Self::archive_name(&job.name);
        let _guard = self.lock(&name).await;

        let source = job.output_directory.clone();
        let archive_dir = self.archive_dir.to_path_buf();
        let destination = self.archive_path(&job.name);
        let start = Instant::now();

        info!(
            job = %job.name,
            source = %source.display(),
            archive = %destination.display(),
            "Compressing output directory"
        );

        let result = {
            let destination = destination.clone();
            tokio::task::spawn_blocking(move || write_archive(&source, &archive_dir, &destination))
                .await
                .map_err(Error::from)
                .and_then(|r| r)
        };

        match result {
            Ok(written) => {
                let message = format!(
                    "Archived {} ({} files, {})",
                    name,
                    written.file_count,
                    format_size(written.size)
                );
                info!(
                    job = %job.name,
                    files = written.file_count,
                    bytes = written.size,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Archive complete"
                );
                ArchiveReport {
                    success: true,
                    message,
                    path: Some(destination),
                }
            }
            Err(e) => {
                warn!(job = %job.name, error = %e, "Archive failed");
                ArchiveReport {
                    success: false,
                    message: format!("Failed to archive {}: {}", name, e),
                    path: None,
                }
            }
        }
    }

    /// Every archive currently in the store, sorted by name.
    pub async fn list(&self) -> Result<Vec<ArchiveEntry>> {
        let archive_dir = self.archive_dir.to_path_buf();
        tokio::task::spawn_blocking(move || list_archives(&archive_dir)).await?
    }

    pub async fn find(&self, name: &str) -> Result<ArchiveEntry> {
        self.list()
            .await?
            .into_iter()
            .find(|entry| entry.name == name)
            .ok_or_else(|| Error::ArchiveNotFound(name.to_string()))
    }

    /// Delete an archive if it is still older than `window` at `now`.
    ///
    /// The age is read again under the slot lock, so an archive published
    /// after `entry` was listed is kept. Returns the age of the deleted file,
    /// or `None` when the file was kept or already gone.
    pub async fn remove_expired(
        &self,
        entry: &ArchiveEntry,
        now: SystemTime,
        window: Duration,
    ) -> Result<Option<Duration>> {
        let _guard = self.lock(&entry.name).await;

        let created = match tokio::fs::metadata(&entry.path).await {
            Ok(metadata) => created_time(&metadata),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        // Files stamped in the future count as brand new.
        let age = now.duration_since(created).unwrap_or_default();
        if age <= window {
            return Ok(None);
        }

        match tokio::fs::remove_file(&entry.path).await {
            Ok(()) => Ok(Some(age)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn lock(&self, name: &str) -> OwnedMutexGuard<()> {
        let slot = {
            let mut locks = self.locks.lock().await;
            locks.entry(name.to_string()).or_default().clone()
        };
        slot.lock_owned().await
    }
}

fn write_archive(source: &Path, archive_dir: &Path, destination: &Path) -> Result<WriteResult> {
    if !source.is_dir() {
        return Err(Error::MissingOutputDirectory(source.to_path_buf()));
    }

    fs::create_dir_all(archive_dir)?;

    let mut files = Vec::new();
    scan_files_recursive(source, &mut files)?;
    files.sort();

    // Entry names keep the output directory's own name as their first component.
    let base = source.parent().unwrap_or(source);

    let temp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .suffix(TEMP_SUFFIX)
        .tempfile_in(archive_dir)?;

    {
        let writer = BufWriter::with_capacity(BUFFER_SIZE, temp.as_file());
        let mut zip = ZipWriter::new(writer);

        for path in &files {
            let entry_name = entry_name(base, path);
            let size = fs::metadata(path)?.len();
            let options = SimpleFileOptions::default()
                .compression_method(CompressionMethod::Deflated)
                .large_file(size >= u32::MAX as u64);

            debug!(entry = %entry_name, bytes = size, "Adding archive entry");

            zip.start_file(entry_name, options)?;
            let mut reader = BufReader::with_capacity(BUFFER_SIZE, File::open(path)?);
            io::copy(&mut reader, &mut zip)?;
        }

        let mut writer = zip.finish()?;
        writer.flush()?;
    }

    temp.as_file().sync_all()?;
    temp.persist(destination).map_err(|e| Error::Io(e.error))?;

    let size = fs::metadata(destination)?.len();
    Ok(WriteResult {
        file_count: files.len(),
        size,
    })
}

fn scan_files_recursive(current: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(current)? {
        let path = entry?.path();

        // Use symlink_metadata to avoid following symlinks
        let metadata = match path.symlink_metadata() {
            Ok(m) => m,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable entry");
                continue;
            }
        };

        if metadata.is_dir() {
            scan_files_recursive(&path, files)?;
        } else if metadata.is_file() {
            files.push(path);
        }
    }

    Ok(())
}

fn entry_name(base: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(base).unwrap_or(path);
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn list_archives(archive_dir: &Path) -> Result<Vec<ArchiveEntry>> {
    let entries = match fs::read_dir(archive_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut archives = Vec::new();
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let path = entry.path();

        if name.starts_with(TEMP_PREFIX)
            || path.extension().and_then(|e| e.to_str()) != Some(ARCHIVE_EXTENSION)
        {
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(m) if m.is_file() => m,
            Ok(_) => continue,
            // Deleted between read_dir and stat
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };

        let created = created_time(&metadata);
        let size = metadata.len();

        archives.push(ArchiveEntry {
            name,
            path,
            size,
            size_mb: size_mb(size),
            formatted_size: format_size(size),
            created_time: DateTime::<Local>::from(created)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
            created,
        });
    }

    archives.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(archives)
}

/// Archives are never modified after the rename that publishes them, so the
/// modification time is their creation time.
fn created_time(metadata: &fs::Metadata) -> SystemTime {
    metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH)
}

fn size_mb(bytes: u64) -> f64 {
    (bytes as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0
}

/// Human-readable size with one decimal, e.g. `12.3 MB`.
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes < KB {
        format!("{} B", bytes)
    } else if bytes < MB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else if bytes < GB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::FileTime;
    use std::io::Read;
    use tempfile::tempdir;

    const DAY: Duration = Duration::from_secs(86_400);

    fn job(name: &str, output_directory: &Path) -> JobDescriptor {
        JobDescriptor {
            name: name.to_string(),
            executable: PathBuf::from("/bin/true"),
            args: vec![],
            working_directory: PathBuf::from("."),
            output_directory: output_directory.to_path_buf(),
        }
    }

    fn read_archive(path: &Path) -> Vec<(String, String)> {
        let mut archive = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
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

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(1023), "1023 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024 / 2), "1.5 GB");
    }

    #[test]
    fn test_size_mb_rounds_to_two_places() {
        assert_eq!(size_mb(0), 0.0);
        assert_eq!(size_mb(1024 * 1024), 1.0);
        assert_eq!(size_mb(1_234_567), 1.18);
    }

    #[test]
    fn test_entry_name_keeps_directory_name() {
        let base = Path::new("/home/me/Desktop");
        let path = Path::new("/home/me/Desktop/contents/charts/a.html");
        assert_eq!(entry_name(base, path), "contents/charts/a.html");
    }

    #[tokio::test]
    async fn test_compress_preserves_relative_paths() {
        let temp = tempdir().unwrap();
        let output = temp.path().join("contents");
        fs::create_dir_all(output.join("charts")).unwrap();
        fs::write(output.join("report.txt"), "summary").unwrap();
        fs::write(output.join("charts/hourly.html"), "<html></html>").unwrap();

        let manager = ArchiveManager::new(temp.path().join("zips"));
        let report = manager.compress(&job("contents", &output)).await;

        assert!(report.success, "{}", report.message);
        assert!(report.message.contains("2 files"));
        let path = report.path.unwrap();
        assert_eq!(path, temp.path().join("zips/contents.zip"));
        assert_eq!(
            read_archive(&path),
            vec![
                ("contents/charts/hourly.html".to_string(), "<html></html>".to_string()),
                ("contents/report.txt".to_string(), "summary".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_compress_replaces_previous_archive() {
        let temp = tempdir().unwrap();
        let output = temp.path().join("comments");
        fs::create_dir_all(&output).unwrap();
        fs::write(output.join("old.txt"), "first run").unwrap();

        let manager = ArchiveManager::new(temp.path().join("zips"));
        let descriptor = job("comments", &output);
        assert!(manager.compress(&descriptor).await.success);

        fs::remove_file(output.join("old.txt")).unwrap();
        fs::write(output.join("new.txt"), "second run").unwrap();
        let report = manager.compress(&descriptor).await;
        assert!(report.success);

        assert_eq!(
            read_archive(&report.path.unwrap()),
            vec![("comments/new.txt".to_string(), "second run".to_string())]
        );

        let listed = manager.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "comments.zip");
    }

    #[tokio::test]
    async fn test_compress_missing_directory_reports_failure() {
        let temp = tempdir().unwrap();
        let manager = ArchiveManager::new(temp.path().join("zips"));

        let report = manager
            .compress(&job("contents", &temp.path().join("nope")))
            .await;

        assert!(!report.success);
        assert!(report.path.is_none());
        assert!(report.message.contains("does not exist"));
        assert!(manager.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_compress_leaves_one_complete_archive() {
        let temp = tempdir().unwrap();
        let output = temp.path().join("contents");
        fs::create_dir_all(&output).unwrap();
        fs::write(output.join("data.csv"), "a,b\n1,2\n").unwrap();

        let manager = ArchiveManager::new(temp.path().join("zips"));
        let descriptor = job("contents", &output);

        let (a, b) = tokio::join!(manager.compress(&descriptor), manager.compress(&descriptor));
        assert!(a.success && b.success);

        let listed = manager.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(
            read_archive(&listed[0].path),
            vec![("contents/data.csv".to_string(), "a,b\n1,2\n".to_string())]
        );
        // No temporary files left behind
        assert_eq!(fs::read_dir(temp.path().join("zips")).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_list_skips_partial_and_foreign_files() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("contents.zip"), b"zip").unwrap();
        fs::write(temp.path().join(".contents.zip.abc.partial"), b"partial").unwrap();
        fs::write(temp.path().join("notes.txt"), b"text").unwrap();
        fs::create_dir(temp.path().join("dir.zip")).unwrap();

        let manager = ArchiveManager::new(temp.path());
        let listed = manager.list().await.unwrap();

        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "contents.zip");
        assert_eq!(listed[0].size, 3);
        assert_eq!(listed[0].formatted_size, "3 B");
    }

    #[tokio::test]
    async fn test_list_missing_store_is_empty() {
        let temp = tempdir().unwrap();
        let manager = ArchiveManager::new(temp.path().join("not-created-yet"));
        assert!(manager.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_find_and_remove() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("comments.zip"), b"zip").unwrap();
        let manager = ArchiveManager::new(temp.path());

        assert!(matches!(
            manager.find("contents.zip").await,
            Err(Error::ArchiveNotFound(_))
        ));

        let entry = manager.find("comments.zip").await.unwrap();
        let later = SystemTime::now() + DAY * 30;

        let kept = manager.remove_expired(&entry, SystemTime::now(), DAY).await;
        assert!(kept.unwrap().is_none());
        assert!(temp.path().join("comments.zip").exists());

        let removed = manager.remove_expired(&entry, later, DAY).await.unwrap();
        assert!(removed.unwrap() > DAY * 29);
        assert!(manager.remove_expired(&entry, later, DAY).await.unwrap().is_none());
        assert!(!temp.path().join("comments.zip").exists());
    }

    #[tokio::test]
    async fn test_remove_expired_rechecks_age_under_lock() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("contents.zip");
        fs::write(&path, b"old").unwrap();
        filetime::set_file_mtime(&path, FileTime::from_system_time(SystemTime::now() - DAY * 10))
            .unwrap();

        let manager = ArchiveManager::new(temp.path());
        let entry = manager.find("contents.zip").await.unwrap();

        // A writer holds the slot and publishes a new archive while the
        // deletion waits.
        let guard = manager.lock("contents.zip").await;
        let removal = tokio::spawn({
            let manager = manager.clone();
            async move {
                manager
                    .remove_expired(&entry, SystemTime::now(), DAY * 7)
                    .await
            }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        fs::write(&path, b"fresh").unwrap();
        drop(guard);

        assert_eq!(removal.await.unwrap().unwrap(), None);
        assert_eq!(fs::read(&path).unwrap(), b"fresh");
    }
}
