use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::jobs::{JobEvent, JobStatus};
use crate::ledger::{Change, FjallStore, LedgerError};

use super::registry::{ActiveJobs, Claim};
use super::runner::JobOrchestrator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// A new run task was spawned
    Spawned,
    /// A run was already active; it will run once more when it finishes
    Coalesced,
}

/// Summary of startup recovery
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Jobs found `downloading` and moved back to `pending`
    pub recovered: usize,
    /// Runs scheduled for `pending` jobs
    pub scheduled: usize,
}

/// Spawns one tokio task per job run, never two for the same id
#[derive(Clone)]
pub struct JobScheduler {
    orchestrator: Arc<JobOrchestrator>,
    active: Arc<ActiveJobs>,
}

impl JobScheduler {
    pub fn new(orchestrator: Arc<JobOrchestrator>) -> Self {
        Self {
            orchestrator,
            active: ActiveJobs::new(),
        }
    }

    pub fn schedule(&self, job_id: &str) -> ScheduleOutcome {
        let mut guard = match self.active.claim(job_id) {
            Claim::Acquired(guard) => guard,
            Claim::Coalesced => {
                debug!(job_id, "Run already active, coalesced");
                return ScheduleOutcome::Coalesced;
            }
        };

        let orchestrator = self.orchestrator.clone();
        tokio::spawn(async move {
            loop {
                let job_id = guard.job_id().to_string();
                match orchestrator.run(&job_id).await {
                    Ok(outcome) => debug!(job_id, ?outcome, "Run finished"),
                    Err(err) => error!(job_id, error = %err, "Run aborted"),
                }

                if !guard.release_unless_rerun() {
                    break;
                }
                debug!(job_id, "Rerun requested while active");
            }
        });

        ScheduleOutcome::Spawned
    }

    pub fn is_active(&self, job_id: &str) -> bool {
        self.active.is_active(job_id)
    }

    pub fn active_count(&self) -> usize {
        self.active.active_count()
    }

    /// Wait for the run of `job_id` (if any) to end. False on timeout.
    pub async fn wait_released(&self, job_id: &str, timeout: Duration) -> bool {
        self.active.wait_released(job_id, timeout).await
    }

    /// Requeue work left behind by a previous process.
    ///
    /// Records still `downloading` lost their run when the process died;
    /// they go back to `pending`, then every `pending` job is scheduled.
    pub fn recover(&self, store: &FjallStore) -> Result<RecoveryReport, LedgerError> {
        let mut report = RecoveryReport::default();

        for job in store.list(Some(JobStatus::Downloading))? {
            if self.is_active(&job.job_id) {
                continue;
            }
            let moved = store.update(&job.job_id, |job| match job.apply(JobEvent::Recover) {
                Ok(_) => {
                    job.clear_live_telemetry();
                    Change::Write(true)
                }
                Err(_) => Change::Keep(false),
            })?;
            if moved == Some(true) {
                report.recovered += 1;
                warn!(job_id = %job.job_id, "Recovered interrupted download");
            }
        }

        for job in store.list(Some(JobStatus::Pending))? {
            if self.schedule(&job.job_id) == ScheduleOutcome::Spawned {
                report.scheduled += 1;
            }
        }

        info!(
            recovered = report.recovered,
            scheduled = report.scheduled,
            "Startup recovery complete"
        );
        Ok(report)
    }
}
