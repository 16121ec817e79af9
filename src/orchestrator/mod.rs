//! Job orchestration
//!
//! - [`JobOrchestrator`] runs one job: metadata wait, download loop, completion
//! - [`JobScheduler`] spawns runs and guarantees at most one per job id
//! - [`ActiveJobs`] is the guarded set of running ids behind the scheduler
//!
//! The ledger is the only state shared between a run and the outside world.
//! Pause and delete are observed by the run at its next poll.

mod registry;
mod runner;
mod scheduler;

pub use registry::{ActiveGuard, ActiveJobs, Claim};
pub use runner::{JobOrchestrator, OrchestratorConfig, RunError, RunOutcome};
pub use scheduler::{JobScheduler, RecoveryReport, ScheduleOutcome};
