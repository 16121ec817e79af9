use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::jobs::{Job, JobStatus};

use super::error::{LedgerError, Result};
use super::partitions::{encode_idem_key, encode_job_key};
use super::pruning::{self, PruneStats};

/// Outcome of an [`FjallStore::update`] closure
#[derive(Debug)]
pub enum Change<T> {
    /// Persist the (modified) record and return the value
    Write(T),
    /// Discard any modification and return the value
    Keep(T),
}

/// Stored value for an idempotency key
#[derive(Debug, Serialize, Deserialize)]
pub(super) struct IdempotencyEntry {
    pub job_id: String,
    pub created_at_secs: i64,
}

/// Fjall-backed persistent storage for job records and metadata
#[derive(Clone)]
pub struct FjallStore {
    keyspace: Keyspace,
    jobs: PartitionHandle,
    idempotency: PartitionHandle,
    metadata: PartitionHandle,
    write_guard: Arc<Mutex<()>>,
}

impl FjallStore {
    /// Open or create a Fjall store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening Fjall store at: {}", path.display());

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let keyspace = Config::new(path).open()?;

        let jobs = keyspace.open_partition("jobs", PartitionCreateOptions::default())?;
        let idempotency =
            keyspace.open_partition("idempotency", PartitionCreateOptions::default())?;
        let metadata = keyspace.open_partition("metadata", PartitionCreateOptions::default())?;

        info!("Fjall store opened successfully");
        Ok(Self {
            keyspace,
            jobs,
            idempotency,
            metadata,
            write_guard: Arc::new(Mutex::new(())),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>> {
        self.write_guard.lock().map_err(|_| LedgerError::Poisoned)
    }

    fn write_job(&self, job: &Job) -> Result<()> {
        let value = serde_json::to_vec(job)?;
        self.jobs.insert(encode_job_key(&job.job_id), value)?;
        Ok(())
    }

    fn read_job(&self, job_id: &str) -> Result<Option<Job>> {
        match self.jobs.get(encode_job_key(job_id))? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    /// Store a new job record. Fails if the id is already taken.
    pub fn insert(&self, job: &Job) -> Result<()> {
        let _guard = self.lock()?;
        if self.jobs.contains_key(encode_job_key(&job.job_id))? {
            return Err(LedgerError::DuplicateJob(job.job_id.clone()));
        }
        self.write_job(job)?;
        debug!(job_id = %job.job_id, "Inserted job");
        Ok(())
    }

    /// Atomic read of one job record
    pub fn get(&self, job_id: &str) -> Result<Option<Job>> {
        self.read_job(job_id)
    }

    /// Atomic read-modify-write of one job record.
    ///
    /// The closure sees the current record and decides whether its changes
    /// are persisted. Returns `Ok(None)` if the record does not exist.
    pub fn update<T>(
        &self,
        job_id: &str,
        apply: impl FnOnce(&mut Job) -> Change<T>,
    ) -> Result<Option<T>> {
        let _guard = self.lock()?;

        let Some(mut job) = self.read_job(job_id)? else {
            return Ok(None);
        };

        match apply(&mut job) {
            Change::Write(value) => {
                job.touch();
                self.write_job(&job)?;
                Ok(Some(value))
            }
            Change::Keep(value) => Ok(Some(value)),
        }
    }

    /// Remove a job record, returning what was stored
    pub fn remove(&self, job_id: &str) -> Result<Option<Job>> {
        let _guard = self.lock()?;
        let job = self.read_job(job_id)?;
        if job.is_some() {
            self.jobs.remove(encode_job_key(job_id))?;
            debug!(job_id, "Removed job");
        }
        Ok(job)
    }

    /// All jobs, newest first, optionally restricted to one status
    pub fn list(&self, status: Option<JobStatus>) -> Result<Vec<Job>> {
        let mut jobs = Vec::new();
        for item in self.jobs.iter() {
            let (_, value) = item?;
            let job: Job = serde_json::from_slice(&value)?;
            if status.is_none_or(|wanted| job.status == wanted) {
                jobs.push(job);
            }
        }
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs)
    }

    /// Number of jobs per status
    pub fn counts(&self) -> Result<StatusCounts> {
        let mut counts = StatusCounts::default();
        for item in self.jobs.iter() {
            let (_, value) = item?;
            let job: Job = serde_json::from_slice(&value)?;
            counts.record(job.status);
        }
        Ok(counts)
    }

    /// Remember an idempotency key -> job_id mapping
    pub fn remember_idempotency(&self, key: &str, job_id: &str) -> Result<()> {
        let entry = IdempotencyEntry {
            job_id: job_id.to_string(),
            created_at_secs: chrono::Utc::now().timestamp(),
        };
        self.idempotency
            .insert(encode_idem_key(key), serde_json::to_vec(&entry)?)?;
        debug!("Remembered idempotency: {} -> {}", key, job_id);
        Ok(())
    }

    /// Check if an idempotency key exists and return the associated job_id
    pub fn get_idempotent(&self, key: &str) -> Result<Option<String>> {
        match self.idempotency.get(encode_idem_key(key))? {
            Some(value) => {
                let entry: IdempotencyEntry = serde_json::from_slice(&value)?;
                Ok(Some(entry.job_id))
            }
            None => Ok(None),
        }
    }

    /// Remove every job currently in one of `statuses`, returning the removed records
    pub fn prune_by_status(&self, statuses: &[JobStatus]) -> Result<Vec<Job>> {
        let _guard = self.lock()?;
        pruning::prune_jobs_by_status(&self.jobs, statuses)
    }

    /// Drop idempotency keys older than `ttl`
    pub fn prune_expired(&self, ttl: Duration) -> Result<PruneStats> {
        info!("Starting pruning process");
        let stats = pruning::prune_expired(&self.keyspace, &self.idempotency, &self.metadata, ttl)?;
        info!("Pruning completed: {:?}", stats);
        Ok(stats)
    }

    /// Persist all pending writes to disk
    pub fn persist(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }

    /// Get internal statistics (for debugging/monitoring)
    pub fn stats(&self) -> Result<StoreStats> {
        let mut job_count = 0;
        let mut idem_count = 0;

        for item in self.jobs.iter() {
            item?;
            job_count += 1;
        }

        for item in self.idempotency.iter() {
            item?;
            idem_count += 1;
        }

        Ok(StoreStats {
            job_count,
            idem_count,
        })
    }
}

#[derive(Debug, Clone)]
pub struct StoreStats {
    pub job_count: usize,
    pub idem_count: usize,
}

/// Per-status job totals
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub total: usize,
    pub pending: usize,
    pub downloading: usize,
    pub paused: usize,
    pub completed: usize,
    pub failed: usize,
}

impl StatusCounts {
    fn record(&mut self, status: JobStatus) {
        self.total += 1;
        match status {
            JobStatus::Pending => self.pending += 1,
            JobStatus::Downloading => self.downloading += 1,
            JobStatus::Paused => self.paused += 1,
            JobStatus::Completed => self.completed += 1,
            JobStatus::Failed => self.failed += 1,
        }
    }
}
