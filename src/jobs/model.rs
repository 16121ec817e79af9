use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::telemetry::{Telemetry, UNBOUNDED_ETA};

use super::locator::Locator;

/// Lifecycle state of a transfer job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Downloading,
    Paused,
    Completed,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Pending,
        JobStatus::Downloading,
        JobStatus::Paused,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Downloading => "downloading",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Label shown to humans (`"Downloading"` etc.)
    pub fn display_label(&self) -> &'static str {
        match self {
            JobStatus::Pending => "Pending",
            JobStatus::Downloading => "Downloading",
            JobStatus::Paused => "Paused",
            JobStatus::Completed => "Completed",
            JobStatus::Failed => "Failed",
        }
    }

    /// No automatic progress happens from these states.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown job status: {s}"))
    }
}

/// Durable record for one transfer job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub locator: String,
    pub display_name: String,
    pub status: JobStatus,
    /// Fraction in [0.0, 1.0]
    pub progress: f64,
    pub download_rate_kbs: f64,
    pub upload_rate_kbs: f64,
    /// 0 until metadata arrives
    pub total_bytes: u64,
    pub downloaded_bytes: u64,
    pub peer_count: u32,
    pub seed_count: u32,
    pub eta_label: String,
    pub is_multi_file: bool,
    pub result_path: Option<PathBuf>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Reason for the last failure, cleared on restart
    #[serde(default)]
    pub error: Option<String>,
}

impl Job {
    /// New `pending` record for an accepted locator
    pub fn new(job_id: impl Into<String>, locator: &Locator) -> Self {
        let now = Utc::now();
        Self {
            job_id: job_id.into(),
            locator: locator.as_str().to_string(),
            display_name: locator.display_name().to_string(),
            status: JobStatus::Pending,
            progress: 0.0,
            download_rate_kbs: 0.0,
            upload_rate_kbs: 0.0,
            total_bytes: 0,
            downloaded_bytes: 0,
            peer_count: 0,
            seed_count: 0,
            eta_label: UNBOUNDED_ETA.to_string(),
            is_multi_file: false,
            result_path: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
            error: None,
        }
    }

    /// Copy a computed telemetry tick onto the record.
    pub fn apply_telemetry(&mut self, telemetry: &Telemetry) {
        self.progress = telemetry.progress;
        self.download_rate_kbs = telemetry.download_rate_kbs;
        self.upload_rate_kbs = telemetry.upload_rate_kbs;
        self.downloaded_bytes = telemetry.downloaded_bytes;
        self.peer_count = telemetry.peer_count;
        self.seed_count = telemetry.seed_count;
        self.eta_label = telemetry.eta_label.clone();
    }

    /// Zero the live counters (rates, swarm, ETA). Progress is kept.
    pub fn clear_live_telemetry(&mut self) {
        self.download_rate_kbs = 0.0;
        self.upload_rate_kbs = 0.0;
        self.peer_count = 0;
        self.seed_count = 0;
        self.eta_label = UNBOUNDED_ETA.to_string();
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Turns an engine- or user-supplied name into a single safe path component.
///
/// Separators, NUL and control characters become `_`; leading/trailing dots
/// and whitespace are trimmed so the result never walks out of its parent.
pub fn sanitize_path_component(name: &str) -> String {
    const NAME_MAX: usize = 255;

    let replaced: String = name
        .chars()
        .map(|c| {
            if c == '/' || c == '\\' || c == '\0' || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();

    let trimmed = replaced.trim_matches(|c: char| c == '.' || c.is_whitespace());

    let mut take = trimmed.len().min(NAME_MAX);
    while take > 0 && !trimmed.is_char_boundary(take) {
        take -= 1;
    }

    match &trimmed[..take] {
        "" => "download".to_string(),
        name => name.to_string(),
    }
}
