//! Job runner: drives one job through metadata, download and completion

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::engine::{EngineError, TransferEngine, TransferHandle, TransferMetadata};
use crate::jobs::{Job, JobEvent, JobStatus, sanitize_path_component};
use crate::ledger::{Change, FjallStore, LedgerError};
use crate::observability::Metrics;
use crate::postprocess::{PackageOutcome, PostProcessor};
use crate::telemetry::Telemetry;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("metadata not available after {}s", .0.as_secs())]
    MetadataTimeout(Duration),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

/// How a single run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    /// Paused externally; the job stays `paused`
    Paused,
    /// The record disappeared mid-run
    Deleted,
    /// Another actor moved the job out of `downloading` (e.g. pause + resume)
    Superseded(JobStatus),
    /// The job was not `pending` when the run started
    Skipped(JobStatus),
    /// The job was marked `failed` with this reason
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub download_dir: PathBuf,
    pub metadata_poll_interval: Duration,
    pub download_poll_interval: Duration,
    pub metadata_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("data/downloads"),
            metadata_poll_interval: Duration::from_secs(1),
            download_poll_interval: Duration::from_secs(2),
            metadata_timeout: Duration::from_secs(300),
        }
    }
}

/// Decision after one atomic check of the record
enum Tick {
    Continue,
    Stop(RunOutcome),
}

fn stopped_by(status: JobStatus) -> RunOutcome {
    match status {
        JobStatus::Paused => RunOutcome::Paused,
        other => RunOutcome::Superseded(other),
    }
}

pub struct JobOrchestrator {
    store: FjallStore,
    engine: Arc<dyn TransferEngine>,
    postprocess: Arc<PostProcessor>,
    metrics: Arc<Metrics>,
    config: OrchestratorConfig,
}

impl JobOrchestrator {
    pub fn new(
        store: FjallStore,
        engine: Arc<dyn TransferEngine>,
        postprocess: Arc<PostProcessor>,
        metrics: Arc<Metrics>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            engine,
            postprocess,
            metrics,
            config,
        }
    }

    /// Drive `job_id` until it completes, fails, or is paused/deleted externally.
    ///
    /// Engine failures and metadata timeouts are recorded on the job and
    /// reported as [`RunOutcome::Failed`]; only ledger failures surface as
    /// errors.
    pub async fn run(&self, job_id: &str) -> Result<RunOutcome, RunError> {
        let started = self.store.update(job_id, |job| {
            if job.status != JobStatus::Pending {
                return Change::Keep(Err(job.status));
            }
            match job.apply(JobEvent::Start) {
                Ok(_) => {
                    job.error = None;
                    Change::Write(Ok(job.clone()))
                }
                Err(err) => Change::Keep(Err(err.from)),
            }
        })?;

        let job = match started {
            None => {
                debug!(job_id, "Job vanished before start");
                return Ok(RunOutcome::Deleted);
            }
            Some(Err(status)) => {
                debug!(job_id, %status, "Job not pending, nothing to run");
                return Ok(RunOutcome::Skipped(status));
            }
            Some(Ok(job)) => job,
        };

        info!(job_id, name = %job.display_name, "Download started");

        let handle = match self
            .engine
            .open(&job.locator, &self.config.download_dir)
            .await
        {
            Ok(handle) => handle,
            Err(err) => return self.finish(job_id, Err(err.into())),
        };

        let result = self
            .drive(job_id, handle.as_ref(), &job.display_name)
            .await;

        if let Err(err) = handle.close().await {
            warn!(job_id, error = %err, "Failed to close transfer handle");
        }

        let outcome = self.finish(job_id, result)?;

        if outcome == RunOutcome::Completed {
            match self.postprocess.package(job_id).await {
                Ok(PackageOutcome::NotApplicable) => {}
                Ok(outcome) => debug!(job_id, ?outcome, "Packaging done"),
                Err(err) => error!(job_id, error = %err, "Packaging failed, raw files remain"),
            }
        }

        Ok(outcome)
    }

    /// Turn the drive result into the run's outcome, recording failures.
    fn finish(
        &self,
        job_id: &str,
        result: Result<RunOutcome, RunError>,
    ) -> Result<RunOutcome, RunError> {
        match result {
            Ok(outcome) => {
                match &outcome {
                    RunOutcome::Completed => {}
                    RunOutcome::Paused => info!(job_id, "Download paused"),
                    RunOutcome::Deleted => info!(job_id, "Job deleted during download"),
                    other => info!(job_id, outcome = ?other, "Run stopped"),
                }
                Ok(outcome)
            }
            Err(RunError::Ledger(err)) => {
                error!(job_id, error = %err, "Ledger failure during run");
                if let Err(mark_err) = self.mark_failed(job_id, &err.to_string()) {
                    error!(job_id, error = %mark_err, "Could not record failure");
                }
                Err(RunError::Ledger(err))
            }
            Err(err) => {
                let reason = err.to_string();
                error!(job_id, error = %reason, "Download failed");
                if self.mark_failed(job_id, &reason)? {
                    Ok(RunOutcome::Failed(reason))
                } else {
                    // Paused or deleted while failing: the external request wins.
                    let status = self.store.get(job_id)?.map(|job| job.status);
                    Ok(status.map_or(RunOutcome::Deleted, stopped_by))
                }
            }
        }
    }

    fn mark_failed(&self, job_id: &str, reason: &str) -> Result<bool, LedgerError> {
        let marked = self
            .store
            .update(job_id, |job| {
                if job.apply(JobEvent::Fail).is_err() {
                    return Change::Keep(false);
                }
                job.clear_live_telemetry();
                job.error = Some(reason.to_string());
                Change::Write(true)
            })?
            .unwrap_or(false);

        if marked {
            self.metrics.job_failed();
        }
        Ok(marked)
    }

    /// Apply `update` only while the job is still `downloading`, in one
    /// read-modify-write.
    fn while_downloading(
        &self,
        job_id: &str,
        update: impl FnOnce(&mut Job),
    ) -> Result<Tick, LedgerError> {
        let tick = self.store.update(job_id, |job| {
            if job.status != JobStatus::Downloading {
                return Change::Keep(Tick::Stop(stopped_by(job.status)));
            }
            update(job);
            Change::Write(Tick::Continue)
        })?;

        Ok(tick.unwrap_or(Tick::Stop(RunOutcome::Deleted)))
    }

    fn check(&self, job_id: &str) -> Result<Tick, LedgerError> {
        Ok(match self.store.get(job_id)? {
            None => Tick::Stop(RunOutcome::Deleted),
            Some(job) if job.status == JobStatus::Downloading => Tick::Continue,
            Some(job) => Tick::Stop(stopped_by(job.status)),
        })
    }

    async fn drive(
        &self,
        job_id: &str,
        handle: &dyn TransferHandle,
        submitted_name: &str,
    ) -> Result<RunOutcome, RunError> {
        let metadata = match self.await_metadata(job_id, handle).await? {
            Ok(metadata) => metadata,
            Err(outcome) => return Ok(outcome),
        };

        let display_name = if metadata.name.trim().is_empty() {
            None
        } else {
            Some(metadata.name.clone())
        };

        let refined = self.while_downloading(job_id, |job| {
            if let Some(name) = &display_name {
                job.display_name = name.clone();
            }
            job.total_bytes = metadata.total_size;
            job.is_multi_file = metadata.is_multi_file();
        })?;
        if let Tick::Stop(outcome) = refined {
            return Ok(outcome);
        }

        info!(
            job_id,
            name = %metadata.name,
            total_bytes = metadata.total_size,
            files = metadata.file_count,
            "Metadata received"
        );

        let mut logged_decile = 0;
        loop {
            tokio::time::sleep(self.config.download_poll_interval).await;

            let snapshot = handle.status().await?;
            let telemetry = Telemetry::compute(&snapshot, metadata.total_size);
            let progress = telemetry.progress;

            if let Tick::Stop(outcome) =
                self.while_downloading(job_id, |job| job.apply_telemetry(&telemetry))?
            {
                return Ok(outcome);
            }

            let decile = (progress * 10.0).floor() as u32;
            if decile > logged_decile {
                logged_decile = decile;
                info!(
                    job_id,
                    percent = (progress * 100.0).round() as u64,
                    rate_kbs = telemetry.download_rate_kbs,
                    peers = telemetry.peer_count,
                    "Download progress"
                );
            }

            if snapshot.is_complete() || progress >= 1.0 {
                break;
            }
        }

        let name = display_name.as_deref().unwrap_or(submitted_name);
        let result_path = self
            .config
            .download_dir
            .join(sanitize_path_component(name));

        let completed = self.store.update(job_id, |job| {
            if job.apply(JobEvent::Complete).is_err() {
                return Change::Keep(Tick::Stop(stopped_by(job.status)));
            }
            job.apply_telemetry(&Telemetry::completed(metadata.total_size));
            job.completed_at = Some(Utc::now());
            job.result_path = Some(result_path.clone());
            Change::Write(Tick::Continue)
        })?;

        match completed {
            None => Ok(RunOutcome::Deleted),
            Some(Tick::Stop(outcome)) => Ok(outcome),
            Some(Tick::Continue) => {
                self.metrics.job_completed();
                info!(job_id, path = %result_path.display(), "Download completed");
                Ok(RunOutcome::Completed)
            }
        }
    }

    /// Poll until metadata is available. `Ok(Err(outcome))` means the job
    /// was paused or deleted while waiting.
    async fn await_metadata(
        &self,
        job_id: &str,
        handle: &dyn TransferHandle,
    ) -> Result<Result<TransferMetadata, RunOutcome>, RunError> {
        let deadline = Instant::now() + self.config.metadata_timeout;

        loop {
            if let Tick::Stop(outcome) = self.check(job_id)? {
                return Ok(Err(outcome));
            }

            if handle.has_metadata().await? {
                return Ok(Ok(handle.metadata().await?));
            }

            if Instant::now() >= deadline {
                return Err(RunError::MetadataTimeout(self.config.metadata_timeout));
            }

            debug!(job_id, "Waiting for metadata");
            tokio::time::sleep(self.config.metadata_poll_interval).await;
        }
    }
}
