//! Archive packaging for completed multi-file jobs
//!
//! The archive for a job lives next to its artifact directory, at the
//! directory path plus the configured suffix. Packaging is idempotent: once
//! the archive exists it is never rebuilt.

use std::ffi::OsString;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use zip::CompressionMethod;
use zip::write::SimpleFileOptions;

use crate::jobs::JobStatus;
use crate::ledger::{FjallStore, LedgerError};
use crate::observability::Metrics;

pub const DEFAULT_ARCHIVE_SUFFIX: &str = ".zip";

#[derive(Debug, Error)]
pub enum PackageError {
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("artifact directory missing: {0}")]
    MissingArtifact(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("packaging task aborted: {0}")]
    Aborted(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageOutcome {
    /// A new archive was written with this many file entries
    Created { path: PathBuf, entries: usize },
    /// The archive was already there
    AlreadyExists(PathBuf),
    /// Job missing, not completed, or single-file
    NotApplicable,
}

/// `<result_path><suffix>`, e.g. `downloads/Show S01` -> `downloads/Show S01.zip`
pub fn archive_path(result_path: &Path, suffix: &str) -> PathBuf {
    let mut raw: OsString = result_path.as_os_str().to_owned();
    raw.push(suffix);
    PathBuf::from(raw)
}

pub struct PostProcessor {
    store: FjallStore,
    archive_suffix: String,
    metrics: Arc<Metrics>,
    // One build at a time, so concurrent callers never race on the same archive.
    build_lock: Mutex<()>,
}

impl PostProcessor {
    pub fn new(store: FjallStore, archive_suffix: impl Into<String>, metrics: Arc<Metrics>) -> Self {
        Self {
            store,
            archive_suffix: archive_suffix.into(),
            metrics,
            build_lock: Mutex::new(()),
        }
    }

    pub fn archive_suffix(&self) -> &str {
        &self.archive_suffix
    }

    /// Wait for any in-flight build, then keep new builds out while the
    /// guard is held. Artifact removal runs under it.
    pub async fn exclusive(&self) -> MutexGuard<'_, ()> {
        self.build_lock.lock().await
    }

    /// Build the archive for `job_id` if it applies and does not exist yet.
    pub async fn package(&self, job_id: &str) -> Result<PackageOutcome, PackageError> {
        let Some(job) = self.store.get(job_id)? else {
            return Ok(PackageOutcome::NotApplicable);
        };

        if job.status != JobStatus::Completed || !job.is_multi_file {
            return Ok(PackageOutcome::NotApplicable);
        }

        let Some(source) = job.result_path else {
            return Ok(PackageOutcome::NotApplicable);
        };

        let archive = archive_path(&source, &self.archive_suffix);
        let _guard = self.build_lock.lock().await;

        // Deleted while waiting for the lock
        if self.store.get(job_id)?.is_none() {
            return Ok(PackageOutcome::NotApplicable);
        }

        if tokio::fs::try_exists(&archive).await? {
            debug!(job_id, archive = %archive.display(), "Archive already exists");
            return Ok(PackageOutcome::AlreadyExists(archive));
        }

        match self.build(source, archive.clone()).await {
            Ok(entries) => {
                self.metrics.archive_built();
                info!(job_id, archive = %archive.display(), entries, "Archive created");
                Ok(PackageOutcome::Created {
                    path: archive,
                    entries,
                })
            }
            Err(err) => {
                self.metrics.archive_failed();
                warn!(job_id, error = %err, "Archive creation failed");
                Err(err)
            }
        }
    }

    async fn build(&self, source: PathBuf, archive: PathBuf) -> Result<usize, PackageError> {
        if !tokio::fs::metadata(&source)
            .await
            .is_ok_and(|meta| meta.is_dir())
        {
            return Err(PackageError::MissingArtifact(source));
        }

        tokio::task::spawn_blocking(move || write_archive(&source, &archive))
            .await
            .map_err(|err| PackageError::Aborted(err.to_string()))?
    }
}

/// Zip every file under `source` into `archive`, entry names relative to `source`.
///
/// Writes to `<archive>.partial` first so a crash never leaves a truncated
/// archive at the canonical path.
fn write_archive(source: &Path, archive: &Path) -> Result<usize, PackageError> {
    let partial = archive_path(archive, ".partial");

    let result = write_entries(source, &partial).and_then(|entries| {
        std::fs::rename(&partial, archive)?;
        Ok(entries)
    });

    if result.is_err() {
        let _ = std::fs::remove_file(&partial);
    }
    result
}

/// Every file under `source`, sorted, paired with its `/`-joined name
/// relative to `source`.
pub(crate) fn relative_files(source: &Path) -> Result<Vec<(PathBuf, String)>, PackageError> {
    let mut files = Vec::new();

    for entry in WalkDir::new(source).min_depth(1).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(io::Error::other)?;
        let name = relative
            .components()
            .map(|part| part.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        files.push((entry.path().to_path_buf(), name));
    }

    Ok(files)
}

fn write_entries(source: &Path, target: &Path) -> Result<usize, PackageError> {
    let mut writer = zip::ZipWriter::new(File::create(target)?);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut entries = 0;

    for (path, name) in relative_files(source)? {
        writer.start_file(name, options)?;
        let mut input = File::open(&path)?;
        io::copy(&mut input, &mut writer)?;
        entries += 1;
    }

    writer.finish()?;
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{Job, Locator};
    use tempfile::TempDir;

    struct Fixture {
        processor: PostProcessor,
        store: FjallStore,
        metrics: Arc<Metrics>,
        temp: TempDir,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let store = FjallStore::open(temp.path().join("ledger")).unwrap();
        let metrics = Arc::new(Metrics::new());
        let processor = PostProcessor::new(store.clone(), DEFAULT_ARCHIVE_SUFFIX, metrics.clone());
        Fixture {
            processor,
            store,
            metrics,
            temp,
        }
    }

    fn completed_job(id: &str, result_path: PathBuf, multi: bool) -> Job {
        let locator = Locator::parse("magnet:?dn=Season", 1024).unwrap();
        let mut job = Job::new(id, &locator);
        job.status = JobStatus::Completed;
        job.is_multi_file = multi;
        job.result_path = Some(result_path);
        job
    }

    fn populate(root: &Path) {
        std::fs::create_dir_all(root.join("extras/deep")).unwrap();
        std::fs::write(root.join("part-000.bin"), b"one").unwrap();
        std::fs::write(root.join("extras/part-001.bin"), b"two").unwrap();
        std::fs::write(root.join("extras/deep/notes.txt"), b"three").unwrap();
    }

    #[test]
    fn test_archive_path_appends_suffix() {
        assert_eq!(
            archive_path(Path::new("/data/Show S01"), ".zip"),
            PathBuf::from("/data/Show S01.zip")
        );
    }

    #[tokio::test]
    async fn test_package_multi_file_job() {
        let fx = fixture();
        let root = fx.temp.path().join("downloads/Season");
        populate(&root);
        fx.store.insert(&completed_job("job-1", root.clone(), true)).unwrap();

        let outcome = fx.processor.package("job-1").await.unwrap();
        let archive = fx.temp.path().join("downloads/Season.zip");
        assert_eq!(
            outcome,
            PackageOutcome::Created {
                path: archive.clone(),
                entries: 3
            }
        );

        let mut zip = zip::ZipArchive::new(File::open(&archive).unwrap()).unwrap();
        let mut names: Vec<String> = zip.file_names().map(String::from).collect();
        names.sort();
        assert_eq!(
            names,
            vec!["extras/deep/notes.txt", "extras/part-001.bin", "part-000.bin"]
        );

        let mut contents = String::new();
        io::Read::read_to_string(&mut zip.by_name("extras/deep/notes.txt").unwrap(), &mut contents)
            .unwrap();
        assert_eq!(contents, "three");
        assert!(!archive_path(&archive, ".partial").exists());
        assert_eq!(fx.metrics.snapshot().archives_built, 1);
    }

    #[tokio::test]
    async fn test_package_is_idempotent() {
        let fx = fixture();
        let root = fx.temp.path().join("Season");
        populate(&root);
        fx.store.insert(&completed_job("job-1", root.clone(), true)).unwrap();

        fx.processor.package("job-1").await.unwrap();
        let archive = archive_path(&root, DEFAULT_ARCHIVE_SUFFIX);
        let modified = std::fs::metadata(&archive).unwrap().modified().unwrap();

        std::fs::write(root.join("late.txt"), b"ignored").unwrap();
        let outcome = fx.processor.package("job-1").await.unwrap();
        assert_eq!(outcome, PackageOutcome::AlreadyExists(archive.clone()));
        assert_eq!(std::fs::metadata(&archive).unwrap().modified().unwrap(), modified);
        assert_eq!(fx.metrics.snapshot().archives_built, 1);
    }

    #[tokio::test]
    async fn test_not_applicable_cases() {
        let fx = fixture();
        let root = fx.temp.path().join("single.iso");
        std::fs::write(&root, b"payload").unwrap();
        fx.store.insert(&completed_job("single", root, false)).unwrap();

        let mut pending = completed_job("pending", fx.temp.path().join("dir"), true);
        pending.status = JobStatus::Pending;
        fx.store.insert(&pending).unwrap();

        for id in ["single", "pending", "missing"] {
            assert_eq!(
                fx.processor.package(id).await.unwrap(),
                PackageOutcome::NotApplicable
            );
        }
    }

    #[tokio::test]
    async fn test_missing_directory_is_reported() {
        let fx = fixture();
        let root = fx.temp.path().join("gone");
        fx.store.insert(&completed_job("job-1", root, true)).unwrap();

        let err = fx.processor.package("job-1").await.unwrap_err();
        assert!(matches!(err, PackageError::MissingArtifact(_)));
        assert_eq!(fx.metrics.snapshot().archive_failures, 1);
    }

    #[tokio::test]
    async fn test_build_waits_for_exclusive_holder() {
        let fx = fixture();
        let root = fx.temp.path().join("Season");
        populate(&root);
        fx.store.insert(&completed_job("job-1", root.clone(), true)).unwrap();

        let processor = Arc::new(fx.processor);
        let guard = processor.exclusive().await;
        let build = tokio::spawn({
            let processor = processor.clone();
            async move { processor.package("job-1").await }
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!build.is_finished());

        // Removal under the guard, as a delete does
        fx.store.remove("job-1").unwrap();
        std::fs::remove_dir_all(&root).unwrap();
        drop(guard);

        assert_eq!(build.await.unwrap().unwrap(), PackageOutcome::NotApplicable);
        assert!(!archive_path(&root, DEFAULT_ARCHIVE_SUFFIX).exists());
        assert!(!archive_path(&root, ".zip.partial").exists());
    }
}
