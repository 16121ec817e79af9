//! Job state machine
//!
//! ```text
//! pending --start--> downloading --complete--> completed
//!    |                  |   |  |
//!    | pause      pause |   |  +--fail--> failed
//!    v                  |   |               |
//! paused <--------------+   | recover       | restart
//!    |                      v               |
//!    +------resume----> pending <-----------+
//! ```
//!
//! Deletion is valid from every state and is handled by removing the record,
//! so it is not an event here.

use thiserror::Error;

use super::model::{Job, JobStatus};

/// Events that move a job between states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobEvent {
    /// Orchestrator picked the job up
    Start,
    /// User asked to pause
    Pause,
    /// User asked to resume a paused job
    Resume,
    /// User asked to retry a failed job
    Restart,
    /// Engine reported 100%
    Complete,
    /// Unrecoverable error during a run
    Fail,
    /// A previous process died mid-run; put the job back in line
    Recover,
}

impl JobEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobEvent::Start => "start",
            JobEvent::Pause => "pause",
            JobEvent::Resume => "resume",
            JobEvent::Restart => "restart",
            JobEvent::Complete => "complete",
            JobEvent::Fail => "fail",
            JobEvent::Recover => "recover",
        }
    }

    /// Whether a successful transition needs a new orchestrator run
    pub fn schedules_run(&self) -> bool {
        matches!(self, JobEvent::Resume | JobEvent::Restart | JobEvent::Recover)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("cannot {} a job that is {from}", event.as_str())]
pub struct TransitionError {
    pub event: JobEvent,
    pub from: JobStatus,
}

impl JobStatus {
    /// Resulting status for `event`, or an error if `self` is not a valid source.
    pub fn next(self, event: JobEvent) -> Result<JobStatus, TransitionError> {
        use JobEvent::*;
        use JobStatus::*;

        let next = match (event, self) {
            (Start, Pending) => Downloading,
            (Pause, Downloading | Pending) => Paused,
            (Resume, Paused) => Pending,
            (Restart, Failed) => Pending,
            (Complete, Downloading) => Completed,
            (Fail, Downloading) => Failed,
            (Recover, Downloading) => Pending,
            (event, from) => return Err(TransitionError { event, from }),
        };

        Ok(next)
    }
}

impl Job {
    /// Validate and apply `event` to this record.
    ///
    /// On error nothing is modified. Restart additionally zeroes the
    /// telemetry of the failed run.
    pub fn apply(&mut self, event: JobEvent) -> Result<JobStatus, TransitionError> {
        let next = self.status.next(event)?;

        if event == JobEvent::Restart {
            self.progress = 0.0;
            self.downloaded_bytes = 0;
            self.error = None;
            self.clear_live_telemetry();
        }

        self.status = next;
        self.touch();
        Ok(next)
    }
}
