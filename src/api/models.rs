//! API models for the Seedbox job endpoints.
//!
//! Jobs are submitted with `POST /jobs`:
//!
//! ```json
//! { "locator": "magnet:?xt=urn:btih:...&dn=Example%20File" }
//! ```
//!
//! and tracked through [`JobSnapshot`] on `GET /jobs/{job_id}`. Every error
//! response is an [`ErrorResponse`] with a stable `code`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub use crate::jobs::{JobFile, JobSnapshot};
use crate::jobs::{Job, JobStatus};
use crate::ledger::StatusCounts;
use crate::observability::MetricsSnapshot;

#[derive(Debug, Deserialize, Clone)]
pub struct SubmitRequest {
    pub locator: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct JobAcceptedResponse {
    pub job_id: String,
    pub name: String,
    pub status: JobStatus,
    /// False when an idempotency key matched an earlier submission
    pub created: bool,
}

impl JobAcceptedResponse {
    pub fn new(job: &Job, created: bool) -> Self {
        Self {
            job_id: job.job_id.clone(),
            name: job.display_name.clone(),
            status: job.status,
            created,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JobListResponse {
    pub jobs: Vec<JobSnapshot>,
    pub counts: StatusCounts,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JobFilesResponse {
    pub job_id: String,
    pub files: Vec<JobFile>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub job_id: String,
    pub deleted: bool,
    pub artifacts_removed: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CleanupResponse {
    pub status: JobStatus,
    pub removed: usize,
}

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub counters: MetricsSnapshot,
    pub jobs: StatusCounts,
    pub active_runs: usize,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub components: HashMap<String, String>,
    pub version: String,
}
