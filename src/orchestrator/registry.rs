use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;

/// Result of [`ActiveJobs::claim`]
pub enum Claim {
    /// No run was active; the caller now owns the run slot
    Acquired(ActiveGuard),
    /// A run is already active and has been asked to run once more
    Coalesced,
}

/// Set of job ids with a live orchestrator run.
///
/// Each entry carries a "rerun requested" flag so a schedule that arrives
/// while a run is active is folded into that run instead of starting a
/// second one.
#[derive(Default)]
pub struct ActiveJobs {
    runs: Mutex<HashMap<String, bool>>,
    released: Notify,
}

impl ActiveJobs {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn runs(&self) -> MutexGuard<'_, HashMap<String, bool>> {
        // The map holds plain flags, so a panic mid-update cannot corrupt it.
        self.runs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take the run slot for `job_id`, or flag the active run for a rerun.
    pub fn claim(self: &Arc<Self>, job_id: &str) -> Claim {
        let mut runs = self.runs();
        match runs.get_mut(job_id) {
            Some(rerun) => {
                *rerun = true;
                Claim::Coalesced
            }
            None => {
                runs.insert(job_id.to_string(), false);
                Claim::Acquired(ActiveGuard {
                    registry: Arc::clone(self),
                    job_id: job_id.to_string(),
                    released: false,
                })
            }
        }
    }

    pub fn is_active(&self, job_id: &str) -> bool {
        self.runs().contains_key(job_id)
    }

    pub fn active_count(&self) -> usize {
        self.runs().len()
    }

    /// Wait until no run is active for `job_id`. Returns false on timeout.
    pub async fn wait_released(&self, job_id: &str, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            loop {
                let notified = self.released.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                if !self.is_active(job_id) {
                    return;
                }
                notified.await;
            }
        })
        .await
        .is_ok()
    }

    fn release(&self, job_id: &str) {
        self.runs().remove(job_id);
        self.released.notify_waiters();
    }
}

/// Ownership of one job's run slot. Dropping it frees the slot.
pub struct ActiveGuard {
    registry: Arc<ActiveJobs>,
    job_id: String,
    released: bool,
}

impl ActiveGuard {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Called when a run ends. If a rerun was requested meanwhile, clears the
    /// flag, keeps the slot and returns true; otherwise frees the slot.
    pub fn release_unless_rerun(&mut self) -> bool {
        if self.released {
            return false;
        }

        let mut runs = self.registry.runs();
        if let Some(rerun) = runs.get_mut(&self.job_id) {
            if *rerun {
                *rerun = false;
                return true;
            }
        }
        runs.remove(&self.job_id);
        drop(runs);

        self.released = true;
        self.registry.released.notify_waiters();
        false
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        if !self.released {
            self.registry.release(&self.job_id);
        }
    }
}
