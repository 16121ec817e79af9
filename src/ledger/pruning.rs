/// Pruning and retention policy implementation
use std::time::Duration;

use fjall::{Keyspace, PartitionHandle};
use tracing::{debug, info};

use crate::jobs::{Job, JobStatus};

use super::error::Result;
use super::partitions::encode_meta_key;
use super::store::IdempotencyEntry;

/// Default retention for idempotency keys (days)
pub const RETENTION_IDEMPOTENCY_DAYS: u64 = 14;

/// Metadata key for the last idempotency prune
pub(super) const META_LAST_PRUNE_IDEM: &str = "last_prune_idem";

/// Pruning statistics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PruneStats {
    pub idempotency_pruned: usize,
}

/// Drop idempotency keys older than `ttl` and record when it happened
pub fn prune_expired(
    keyspace: &Keyspace,
    idem_partition: &PartitionHandle,
    metadata_partition: &PartitionHandle,
    ttl: Duration,
) -> Result<PruneStats> {
    let stats = PruneStats {
        idempotency_pruned: prune_idempotency(idem_partition, metadata_partition, ttl)?,
    };

    keyspace.persist(fjall::PersistMode::SyncAll)?;
    Ok(stats)
}

fn prune_idempotency(
    idem_partition: &PartitionHandle,
    metadata_partition: &PartitionHandle,
    ttl: Duration,
) -> Result<usize> {
    let now = chrono::Utc::now().timestamp();
    let cutoff_secs = now.saturating_sub(ttl.as_secs() as i64);

    let mut expired = Vec::new();
    for item in idem_partition.iter() {
        let (key, value) = item?;
        let entry: IdempotencyEntry = serde_json::from_slice(&value)?;
        if entry.created_at_secs < cutoff_secs {
            expired.push(key);
        }
    }

    for key in &expired {
        idem_partition.remove(key.clone())?;
    }

    metadata_partition.insert(
        encode_meta_key(META_LAST_PRUNE_IDEM),
        now.to_string().as_bytes(),
    )?;

    info!("Pruned {} expired idempotency keys", expired.len());
    Ok(expired.len())
}

/// Remove every job whose status is in `statuses`.
///
/// Callers hold the store's write guard.
pub fn prune_jobs_by_status(
    jobs_partition: &PartitionHandle,
    statuses: &[JobStatus],
) -> Result<Vec<Job>> {
    let mut removed = Vec::new();

    for item in jobs_partition.iter() {
        let (key, value) = item?;
        let job: Job = serde_json::from_slice(&value)?;
        if statuses.contains(&job.status) {
            removed.push((key, job));
        }
    }

    for (key, job) in &removed {
        jobs_partition.remove(key.clone())?;
        debug!(job_id = %job.job_id, status = %job.status, "Pruned job");
    }

    Ok(removed.into_iter().map(|(_, job)| job).collect())
}
