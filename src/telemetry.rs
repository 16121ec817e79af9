//! Telemetry derived from raw engine counters
//!
//! Everything here is pure: the orchestrator feeds in a [`StatusSnapshot`]
//! and the known total size, and stores whatever comes out. Rendering for
//! status pages (rates, sizes) goes through the same helpers so every caller
//! formats the same way.

use serde::Serialize;

use crate::engine::StatusSnapshot;
use crate::humanize::format_bytes;

/// ETA label used while the download rate is zero
pub const UNBOUNDED_ETA: &str = "∞";

/// Derived, persistable fields for one polling tick
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Telemetry {
    pub progress: f64,
    pub download_rate_kbs: f64,
    pub upload_rate_kbs: f64,
    pub downloaded_bytes: u64,
    pub peer_count: u32,
    pub seed_count: u32,
    pub eta_label: String,
}

impl Telemetry {
    /// Compute telemetry for a snapshot against the refined total size.
    pub fn compute(snapshot: &StatusSnapshot, total_bytes: u64) -> Self {
        let downloaded_bytes = if total_bytes > 0 {
            snapshot.done_bytes.min(total_bytes)
        } else {
            snapshot.done_bytes
        };

        Self {
            progress: progress_fraction(downloaded_bytes, total_bytes),
            download_rate_kbs: rate_kbs(snapshot.download_rate),
            upload_rate_kbs: rate_kbs(snapshot.upload_rate),
            downloaded_bytes,
            peer_count: snapshot.peer_count,
            seed_count: snapshot.seed_count,
            eta_label: render_eta(total_bytes, downloaded_bytes, snapshot.download_rate),
        }
    }

    /// Final telemetry written when a transfer reaches 100%.
    pub fn completed(total_bytes: u64) -> Self {
        Self {
            progress: 1.0,
            download_rate_kbs: 0.0,
            upload_rate_kbs: 0.0,
            downloaded_bytes: total_bytes,
            peer_count: 0,
            seed_count: 0,
            eta_label: format_eta(0),
        }
    }
}

/// `done / total`, clamped to [0, 1]; 0 while the total is unknown.
pub fn progress_fraction(done_bytes: u64, total_bytes: u64) -> f64 {
    if total_bytes == 0 {
        return 0.0;
    }
    (done_bytes as f64 / total_bytes as f64).clamp(0.0, 1.0)
}

/// Bytes per second to KB/s. Negative or non-finite rates count as zero.
pub fn rate_kbs(bytes_per_sec: f64) -> f64 {
    if bytes_per_sec.is_finite() && bytes_per_sec > 0.0 {
        bytes_per_sec / 1024.0
    } else {
        0.0
    }
}

/// Whole seconds left at the current rate, `None` when the rate is zero.
pub fn eta_seconds(total_bytes: u64, done_bytes: u64, rate_bytes_per_sec: f64) -> Option<u64> {
    if !(rate_bytes_per_sec.is_finite() && rate_bytes_per_sec > 0.0) {
        return None;
    }
    let remaining = total_bytes.saturating_sub(done_bytes) as f64;
    Some((remaining / rate_bytes_per_sec) as u64)
}

/// `"{s}s"` under a minute, `"{m}m"` under an hour, otherwise `"{h}h {m}m"`.
pub fn format_eta(seconds: u64) -> String {
    match seconds {
        s if s < 60 => format!("{s}s"),
        s if s < 3600 => format!("{}m", s / 60),
        s => format!("{}h {}m", s / 3600, (s % 3600) / 60),
    }
}

pub fn render_eta(total_bytes: u64, done_bytes: u64, rate_bytes_per_sec: f64) -> String {
    eta_seconds(total_bytes, done_bytes, rate_bytes_per_sec)
        .map(format_eta)
        .unwrap_or_else(|| UNBOUNDED_ETA.to_string())
}

/// Render a stored KB/s rate as `"1.5 MB/s"`.
pub fn format_rate_kbs(rate_kbs: f64) -> String {
    format!("{}/s", format_bytes(rate_kbs * 1024.0))
}

/// Progress as a percentage rounded to one decimal, clamped to [0, 100].
pub fn progress_percentage(progress: f64) -> f64 {
    let percent = (progress * 100.0).clamp(0.0, 100.0);
    (percent * 10.0).round() / 10.0
}
