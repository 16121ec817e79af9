use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::humanize::format_bytes;
use crate::telemetry::{UNBOUNDED_ETA, format_rate_kbs, progress_percentage};

use super::model::{Job, JobStatus};

/// Read-only, human-oriented view of a job record.
///
/// Sizes and rates are pre-rendered so every consumer shows the same text.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct JobSnapshot {
    pub job_id: String,
    pub name: String,
    pub status: JobStatus,
    pub status_display: String,
    /// Percentage in [0, 100], one decimal
    pub progress: f64,
    pub download_speed: String,
    pub upload_speed: String,
    pub downloaded: String,
    pub size: String,
    pub peers: u32,
    pub seeds: u32,
    pub eta: String,
    pub is_multi_file: bool,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
}

/// One file of a completed job's payload
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct JobFile {
    /// Last path segment
    pub name: String,
    /// `/`-separated, relative to the job's result path
    pub path: String,
    pub size: String,
    pub size_bytes: u64,
}

impl JobFile {
    pub fn new(path: impl Into<String>, size_bytes: u64) -> Self {
        let path = path.into();
        let name = path.rsplit('/').next().unwrap_or(&path).to_string();
        Self {
            name,
            path,
            size: format_bytes(size_bytes as f64),
            size_bytes,
        }
    }
}

impl From<&Job> for JobSnapshot {
    fn from(job: &Job) -> Self {
        let eta = if job.eta_label.is_empty() {
            UNBOUNDED_ETA.to_string()
        } else {
            job.eta_label.clone()
        };

        Self {
            job_id: job.job_id.clone(),
            name: job.display_name.clone(),
            status: job.status,
            status_display: job.status.display_label().to_string(),
            progress: progress_percentage(job.progress),
            download_speed: format_rate_kbs(job.download_rate_kbs),
            upload_speed: format_rate_kbs(job.upload_rate_kbs),
            downloaded: format_bytes(job.downloaded_bytes as f64),
            size: format_bytes(job.total_bytes as f64),
            peers: job.peer_count,
            seeds: job.seed_count,
            eta,
            is_multi_file: job.is_multi_file,
            created_at: job.created_at,
            completed_at: job.completed_at,
            error: job.error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::Locator;

    #[test]
    fn test_snapshot_renders_fields() {
        let locator = Locator::parse("magnet:?dn=Big%20File", 1024).unwrap();
        let mut job = Job::new("job-1", &locator);
        job.status = JobStatus::Downloading;
        job.progress = 0.4567;
        job.download_rate_kbs = 1536.0;
        job.upload_rate_kbs = 0.0;
        job.downloaded_bytes = 1024 * 1024;
        job.total_bytes = 3 * 1024 * 1024 * 1024;
        job.peer_count = 9;
        job.seed_count = 2;
        job.eta_label = "3m".to_string();

        let snapshot = JobSnapshot::from(&job);
        assert_eq!(snapshot.name, "Big File");
        assert_eq!(snapshot.status_display, "Downloading");
        assert_eq!(snapshot.progress, 45.7);
        assert_eq!(snapshot.download_speed, "1.5 MB/s");
        assert_eq!(snapshot.upload_speed, "0 B/s");
        assert_eq!(snapshot.downloaded, "1.0 MB");
        assert_eq!(snapshot.size, "3.0 GB");
        assert_eq!(snapshot.peers, 9);
        assert_eq!(snapshot.eta, "3m");
    }

    #[test]
    fn test_empty_eta_shows_sentinel() {
        let locator = Locator::parse("magnet:?xt=urn:btih:abc", 1024).unwrap();
        let mut job = Job::new("job-2", &locator);
        job.eta_label.clear();

        let snapshot = JobSnapshot::from(&job);
        assert_eq!(snapshot.eta, UNBOUNDED_ETA);
        assert_eq!(snapshot.name, "Unknown Torrent");
        assert_eq!(snapshot.size, "0 B");
    }

    #[test]
    fn test_job_file_splits_name_and_renders_size() {
        let nested = JobFile::new("extras/deep/notes.txt", 1536);
        assert_eq!(nested.name, "notes.txt");
        assert_eq!(nested.path, "extras/deep/notes.txt");
        assert_eq!(nested.size, "1.5 KB");
        assert_eq!(nested.size_bytes, 1536);

        let top = JobFile::new("disk.iso", 0);
        assert_eq!(top.name, "disk.iso");
        assert_eq!(top.size, "0 B");
    }
}
