//! Caller-facing job operations
//!
//! [`JobService`] is what the HTTP layer talks to: submit, pause, resume,
//! restart, delete, status, file listing, artifact retrieval and bulk
//! cleanup. State
//! changes go through the ledger's atomic update; runs are handed to the
//! [`JobScheduler`].

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::TransferEngine;
use crate::jobs::{Job, JobEvent, JobFile, JobSnapshot, JobStatus, Locator, LocatorError, TransitionError};
use crate::ledger::{Change, FjallStore, LedgerError, PruneStats, StatusCounts};
use crate::observability::Metrics;
use crate::orchestrator::{
    JobOrchestrator, JobScheduler, OrchestratorConfig, RecoveryReport, ScheduleOutcome,
};
use crate::postprocess::{
    PackageError, PackageOutcome, PostProcessor, archive_path, relative_files,
};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid locator: {0}")]
    InvalidLocator(#[from] LocatorError),

    #[error("job not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Transition(#[from] TransitionError),

    #[error("job {job_id} is {status}, artifact is only available once completed")]
    NotReady { job_id: String, status: JobStatus },

    #[error("artifact unavailable: {0}")]
    ArtifactUnavailable(String),

    #[error("cleanup only applies to completed or failed jobs, got {0}")]
    InvalidCleanup(JobStatus),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("packaging error: {0}")]
    Package(#[from] PackageError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, ServiceError>;

#[derive(Debug, Clone)]
pub struct ServiceSettings {
    /// Longest accepted locator, in bytes
    pub max_locator_bytes: usize,
    /// How long a delete waits for an active run to notice
    pub delete_grace: Duration,
    pub idempotency_ttl: Duration,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            max_locator_bytes: 8 * 1024,
            delete_grace: Duration::from_secs(10),
            idempotency_ttl: Duration::from_secs(14 * 24 * 3600),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Submission {
    pub job: Job,
    /// False when an idempotency key matched an existing job
    pub created: bool,
}

/// File to stream back for a completed job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    /// Suggested download name
    pub filename: String,
    pub size: u64,
    pub is_archive: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DeleteReport {
    pub job_id: String,
    /// A run was active when the record was removed
    pub run_was_active: bool,
    /// The active run exited within the grace period
    pub run_stopped: bool,
    pub removed_paths: Vec<PathBuf>,
}

#[derive(Clone)]
pub struct JobService {
    store: FjallStore,
    scheduler: JobScheduler,
    postprocess: Arc<PostProcessor>,
    metrics: Arc<Metrics>,
    settings: ServiceSettings,
}

impl JobService {
    /// Wire store, engine, packaging, orchestrator and scheduler together.
    pub fn build(
        store: FjallStore,
        engine: Arc<dyn TransferEngine>,
        metrics: Arc<Metrics>,
        orchestrator_config: OrchestratorConfig,
        archive_suffix: &str,
        settings: ServiceSettings,
    ) -> Self {
        let postprocess = Arc::new(PostProcessor::new(
            store.clone(),
            archive_suffix,
            metrics.clone(),
        ));
        let orchestrator = Arc::new(JobOrchestrator::new(
            store.clone(),
            engine,
            postprocess.clone(),
            metrics.clone(),
            orchestrator_config,
        ));

        Self {
            store,
            scheduler: JobScheduler::new(orchestrator),
            postprocess,
            metrics,
            settings,
        }
    }

    pub fn store(&self) -> &FjallStore {
        &self.store
    }

    pub fn scheduler(&self) -> &JobScheduler {
        &self.scheduler
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Accept a locator, persist a `pending` job and schedule its run.
    pub fn submit(&self, locator: &str, idempotency_key: Option<&str>) -> Result<Submission> {
        if let Some(key) = idempotency_key {
            if let Some(existing_id) = self.store.get_idempotent(key)? {
                if let Some(job) = self.store.get(&existing_id)? {
                    info!(job_id = %job.job_id, key, "Idempotent submission, returning existing job");
                    return Ok(Submission {
                        job,
                        created: false,
                    });
                }
            }
        }

        let locator = Locator::parse(locator, self.settings.max_locator_bytes)?;
        let job = Job::new(Uuid::now_v7().to_string(), &locator);

        self.store.insert(&job)?;
        if let Some(key) = idempotency_key {
            self.store.remember_idempotency(key, &job.job_id)?;
        }

        self.metrics.job_submitted();
        info!(job_id = %job.job_id, name = %job.display_name, "Job submitted");
        self.scheduler.schedule(&job.job_id);

        Ok(Submission { job, created: true })
    }

    fn transition(&self, job_id: &str, event: JobEvent) -> Result<Job> {
        let applied = self
            .store
            .update(job_id, |job| match job.apply(event) {
                Ok(_) => Change::Write(Ok(job.clone())),
                Err(err) => Change::Keep(Err(err)),
            })?
            .ok_or_else(|| ServiceError::NotFound(job_id.to_string()))?;

        let job = applied?;
        info!(job_id, event = event.as_str(), status = %job.status, "Transition applied");

        if event.schedules_run() && self.scheduler.schedule(job_id) == ScheduleOutcome::Coalesced {
            info!(job_id, "Previous run still active, rerun queued");
        }
        Ok(job)
    }

    pub fn request_pause(&self, job_id: &str) -> Result<Job> {
        let job = self.transition(job_id, JobEvent::Pause)?;
        self.metrics.job_paused();
        Ok(job)
    }

    pub fn request_resume(&self, job_id: &str) -> Result<Job> {
        self.transition(job_id, JobEvent::Resume)
    }

    pub fn request_restart(&self, job_id: &str) -> Result<Job> {
        self.transition(job_id, JobEvent::Restart)
    }

    /// Remove the record, let an active run notice, then remove artifacts.
    pub async fn request_delete(&self, job_id: &str) -> Result<DeleteReport> {
        let job = self
            .store
            .remove(job_id)?
            .ok_or_else(|| ServiceError::NotFound(job_id.to_string()))?;

        let run_was_active = self.scheduler.is_active(job_id);
        let run_stopped = self
            .scheduler
            .wait_released(job_id, self.settings.delete_grace)
            .await;
        if !run_stopped {
            warn!(job_id, "Run did not stop within grace period, removing artifacts anyway");
        }

        let removed_paths = self.remove_artifacts(&job).await?;
        info!(job_id, removed = removed_paths.len(), "Job deleted");

        Ok(DeleteReport {
            job_id: job_id.to_string(),
            run_was_active,
            run_stopped,
            removed_paths,
        })
    }

    pub fn get_job(&self, job_id: &str) -> Result<Job> {
        self.store
            .get(job_id)?
            .ok_or_else(|| ServiceError::NotFound(job_id.to_string()))
    }

    pub fn get_status(&self, job_id: &str) -> Result<JobSnapshot> {
        Ok(JobSnapshot::from(&self.get_job(job_id)?))
    }

    /// Snapshots, newest first
    pub fn list_jobs(&self, status: Option<JobStatus>) -> Result<Vec<JobSnapshot>> {
        Ok(self
            .store
            .list(status)?
            .iter()
            .map(JobSnapshot::from)
            .collect())
    }

    pub fn stats(&self) -> Result<StatusCounts> {
        Ok(self.store.counts()?)
    }

    /// Resolve what to send for a completed job, packaging on demand.
    pub async fn fetch_artifact(&self, job_id: &str) -> Result<Artifact> {
        let job = self.get_job(job_id)?;

        if job.status != JobStatus::Completed {
            return Err(ServiceError::NotReady {
                job_id: job.job_id,
                status: job.status,
            });
        }

        let Some(result_path) = job.result_path.clone() else {
            return Err(ServiceError::ArtifactUnavailable(format!(
                "job {job_id} has no result path"
            )));
        };

        if job.is_multi_file {
            let archive = match self.postprocess.package(job_id).await {
                Ok(PackageOutcome::Created { path, .. }) => path,
                Ok(PackageOutcome::AlreadyExists(path)) => path,
                Ok(PackageOutcome::NotApplicable) => {
                    return Err(ServiceError::ArtifactUnavailable(format!(
                        "job {job_id} cannot be packaged"
                    )));
                }
                Err(PackageError::MissingArtifact(path)) => {
                    return Err(ServiceError::ArtifactUnavailable(format!(
                        "{} is missing",
                        path.display()
                    )));
                }
                Err(err) => return Err(err.into()),
            };

            let size = tokio::fs::metadata(&archive).await?.len();
            return Ok(Artifact {
                path: archive,
                filename: format!("{}{}", job.display_name, self.postprocess.archive_suffix()),
                size,
                is_archive: true,
            });
        }

        let metadata = match tokio::fs::metadata(&result_path).await {
            Ok(metadata) if metadata.is_file() => metadata,
            _ => {
                return Err(ServiceError::ArtifactUnavailable(format!(
                    "{} is missing",
                    result_path.display()
                )));
            }
        };

        let filename = result_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| job.display_name.clone());

        Ok(Artifact {
            path: result_path,
            filename,
            size: metadata.len(),
            is_archive: false,
        })
    }

    /// Files of a completed job, relative to its result path. A single-file
    /// job lists just that file.
    pub async fn list_files(&self, job_id: &str) -> Result<Vec<JobFile>> {
        let job = self.get_job(job_id)?;

        if job.status != JobStatus::Completed {
            return Err(ServiceError::NotReady {
                job_id: job.job_id,
                status: job.status,
            });
        }

        let Some(result_path) = job.result_path else {
            return Err(ServiceError::ArtifactUnavailable(format!(
                "job {job_id} has no result path"
            )));
        };

        tokio::task::spawn_blocking(move || collect_files(&result_path))
            .await
            .map_err(|err| PackageError::Aborted(err.to_string()))?
    }

    /// Bulk-remove `completed` jobs with their files, or `failed` records.
    pub async fn cleanup(&self, status: JobStatus) -> Result<usize> {
        if !status.is_terminal() {
            return Err(ServiceError::InvalidCleanup(status));
        }

        let removed = self.store.prune_by_status(&[status])?;

        if status == JobStatus::Completed {
            for job in &removed {
                // Packaging runs inside the job's run
                self.scheduler
                    .wait_released(&job.job_id, self.settings.delete_grace)
                    .await;
                if let Err(err) = self.remove_artifacts(job).await {
                    warn!(job_id = %job.job_id, error = %err, "Failed to remove artifacts");
                }
            }
        }

        info!(%status, count = removed.len(), "Cleanup finished");
        Ok(removed.len())
    }

    /// Requeue jobs interrupted by a restart of the process.
    pub fn recover(&self) -> Result<RecoveryReport> {
        Ok(self.scheduler.recover(&self.store)?)
    }

    pub fn prune_idempotency_keys(&self) -> Result<PruneStats> {
        Ok(self.store.prune_expired(self.settings.idempotency_ttl)?)
    }

    async fn remove_artifacts(&self, job: &Job) -> Result<Vec<PathBuf>> {
        let mut removed = Vec::new();
        let Some(result_path) = &job.result_path else {
            return Ok(removed);
        };

        let _guard = self.postprocess.exclusive().await;

        // Jobs with the same name complete into the same path
        if let Some(other) = self
            .store
            .list(None)?
            .into_iter()
            .find(|other| {
                other.job_id != job.job_id && other.result_path.as_ref() == Some(result_path)
            })
        {
            info!(
                job_id = %job.job_id,
                shared_with = %other.job_id,
                path = %result_path.display(),
                "Artifacts still referenced, keeping them"
            );
            return Ok(removed);
        }

        let archive = archive_path(result_path, self.postprocess.archive_suffix());
        for path in [result_path.as_path(), archive.as_path()] {
            if remove_path(path).await? {
                removed.push(path.to_path_buf());
            }
        }
        Ok(removed)
    }
}

fn collect_files(result_path: &Path) -> Result<Vec<JobFile>> {
    let metadata = match std::fs::metadata(result_path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(ServiceError::ArtifactUnavailable(format!(
                "{} is missing",
                result_path.display()
            )));
        }
        Err(err) => return Err(err.into()),
    };

    if metadata.is_file() {
        let name = result_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        return Ok(vec![JobFile::new(name, metadata.len())]);
    }

    relative_files(result_path)?
        .into_iter()
        .map(|(path, name)| -> Result<JobFile> {
            Ok(JobFile::new(name, std::fs::metadata(&path)?.len()))
        })
        .collect()
}

/// Remove a file or directory tree. Returns false if nothing was there.
async fn remove_path(path: &Path) -> io::Result<bool> {
    let metadata = match tokio::fs::symlink_metadata(path).await {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };

    if metadata.is_dir() {
        tokio::fs::remove_dir_all(path).await?;
    } else {
        tokio::fs::remove_file(path).await?;
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{SimulatedEngine, SimulationProfile};
    use tempfile::TempDir;

    fn service(temp: &TempDir) -> JobService {
        let store = FjallStore::open(temp.path().join("ledger")).unwrap();
        // Metadata never arrives, so runs just sit in the metadata phase.
        let profile = SimulationProfile {
            metadata_delay_polls: u32::MAX,
            ..SimulationProfile::default()
        };
        let config = OrchestratorConfig {
            download_dir: temp.path().join("downloads"),
            metadata_poll_interval: Duration::from_millis(5),
            download_poll_interval: Duration::from_millis(5),
            metadata_timeout: Duration::from_secs(60),
        };
        JobService::build(
            store,
            Arc::new(SimulatedEngine::new(profile)),
            Arc::new(Metrics::new()),
            config,
            ".zip",
            ServiceSettings {
                delete_grace: Duration::from_secs(2),
                ..ServiceSettings::default()
            },
        )
    }

    #[tokio::test]
    async fn test_submit_rejects_invalid_locator() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp);

        let err = service.submit("http://example.com", None).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidLocator(LocatorError::NotMagnet)));
        assert_eq!(service.stats().unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_submit_idempotent() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp);

        let first = service.submit("magnet:?dn=One", Some("key-1")).unwrap();
        let second = service.submit("magnet:?dn=Two", Some("key-1")).unwrap();
        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.job.job_id, second.job.job_id);
        assert_eq!(service.stats().unwrap().total, 1);
        assert_eq!(service.metrics().snapshot().jobs_submitted, 1);
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp);

        assert!(matches!(service.get_status("nope"), Err(ServiceError::NotFound(_))));
        assert!(matches!(service.request_pause("nope"), Err(ServiceError::NotFound(_))));
        assert!(matches!(
            service.request_delete("nope").await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_resume_of_running_job_is_rejected() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp);
        let job = service.submit("magnet:?dn=Busy", None).unwrap().job;

        let err = service.request_resume(&job.job_id).unwrap_err();
        match err {
            ServiceError::Transition(TransitionError { event, .. }) => {
                assert_eq!(event, JobEvent::Resume)
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_artifact_not_ready_until_completed() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp);
        let job = service.submit("magnet:?dn=Later", None).unwrap().job;

        let err = service.fetch_artifact(&job.job_id).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotReady { .. }));
    }

    #[tokio::test]
    async fn test_cleanup_rejects_live_statuses() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp);

        assert!(matches!(
            service.cleanup(JobStatus::Downloading).await,
            Err(ServiceError::InvalidCleanup(JobStatus::Downloading))
        ));
        assert_eq!(service.cleanup(JobStatus::Failed).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_removes_artifacts() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp);

        let root = temp.path().join("downloads/Done");
        std::fs::create_dir_all(root.join("sub")).unwrap();
        std::fs::write(root.join("sub/file.bin"), b"x").unwrap();
        std::fs::write(temp.path().join("downloads/Done.zip"), b"zip").unwrap();

        let locator = Locator::parse("magnet:?dn=Done", 1024).unwrap();
        let mut job = Job::new("done-1", &locator);
        job.status = JobStatus::Completed;
        job.is_multi_file = true;
        job.result_path = Some(root.clone());
        service.store().insert(&job).unwrap();

        let report = service.request_delete("done-1").await.unwrap();
        assert!(!report.run_was_active);
        assert!(report.run_stopped);
        assert_eq!(report.removed_paths.len(), 2);
        assert!(!root.exists());
        assert!(!temp.path().join("downloads/Done.zip").exists());
        assert!(service.store().get("done-1").unwrap().is_none());
    }
}
