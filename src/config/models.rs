use crate::engine::SimulationProfile;
use crate::humanize::ByteSize;
use crate::orchestrator::OrchestratorConfig;
use crate::postprocess::DEFAULT_ARCHIVE_SUFFIX;
use crate::service::ServiceSettings;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub downloads: DownloadsConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl Config {
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            download_dir: self.downloads.download_dir.clone(),
            metadata_poll_interval: Duration::from_millis(self.downloads.metadata_poll_interval_ms),
            download_poll_interval: Duration::from_millis(self.downloads.download_poll_interval_ms),
            metadata_timeout: Duration::from_secs(self.downloads.metadata_timeout_secs),
        }
    }

    pub fn service_settings(&self) -> ServiceSettings {
        ServiceSettings {
            max_locator_bytes: self.server.api.max_locator_bytes,
            delete_grace: Duration::from_secs(self.downloads.delete_grace_secs),
            idempotency_ttl: Duration::from_secs(
                u64::from(self.retention.idempotency_ttl_days) * 24 * 3600,
            ),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    #[serde(default = "default_fjall_path")]
    pub fjall_path: PathBuf,
    #[serde(default)]
    pub api: ApiLimits,
}

/// API request limits
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiLimits {
    /// Largest accepted request body
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: ByteSize,
    /// Largest accepted locator string
    #[serde(default = "default_max_locator_bytes")]
    pub max_locator_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            fjall_path: default_fjall_path(),
            api: ApiLimits::default(),
        }
    }
}

impl Default for ApiLimits {
    fn default() -> Self {
        Self {
            max_payload_bytes: default_max_payload_bytes(),
            max_locator_bytes: default_max_locator_bytes(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8080))
}

fn default_max_payload_bytes() -> ByteSize {
    ByteSize(64 * 1024) // 64 KB
}

fn default_max_locator_bytes() -> usize {
    8 * 1024
}

fn default_fjall_path() -> PathBuf {
    PathBuf::from("data/ledger")
}

/// Where and how transfers run
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DownloadsConfig {
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
    /// Appended to a multi-file artifact directory to name its archive
    #[serde(default = "default_archive_suffix")]
    pub archive_suffix: String,
    #[serde(default = "default_metadata_poll_interval_ms")]
    pub metadata_poll_interval_ms: u64,
    #[serde(default = "default_download_poll_interval_ms")]
    pub download_poll_interval_ms: u64,
    #[serde(default = "default_metadata_timeout_secs")]
    pub metadata_timeout_secs: u64,
    /// How long a delete waits for the active run to exit
    #[serde(default = "default_delete_grace_secs")]
    pub delete_grace_secs: u64,
    /// Requeue `downloading`/`pending` jobs at startup
    #[serde(default = "default_recover_on_startup")]
    pub recover_on_startup: bool,
}

impl Default for DownloadsConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            archive_suffix: default_archive_suffix(),
            metadata_poll_interval_ms: default_metadata_poll_interval_ms(),
            download_poll_interval_ms: default_download_poll_interval_ms(),
            metadata_timeout_secs: default_metadata_timeout_secs(),
            delete_grace_secs: default_delete_grace_secs(),
            recover_on_startup: default_recover_on_startup(),
        }
    }
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("data/downloads")
}

fn default_archive_suffix() -> String {
    DEFAULT_ARCHIVE_SUFFIX.to_string()
}

fn default_metadata_poll_interval_ms() -> u64 {
    1000
}

fn default_download_poll_interval_ms() -> u64 {
    2000
}

fn default_metadata_timeout_secs() -> u64 {
    300
}

fn default_delete_grace_secs() -> u64 {
    10
}

fn default_recover_on_startup() -> bool {
    true
}

/// Transfer engine implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    #[default]
    Simulated,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub kind: EngineKind,
    /// Used when `kind = "simulated"`
    #[serde(default)]
    pub simulated: SimulationProfile,
}

/// Retention configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetentionConfig {
    #[serde(default = "default_idempotency_ttl_days")]
    pub idempotency_ttl_days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            idempotency_ttl_days: default_idempotency_ttl_days(),
        }
    }
}

fn default_idempotency_ttl_days() -> u32 {
    crate::ledger::RETENTION_IDEMPOTENCY_DAYS as u32
}

/// Telemetry configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelemetryConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter(),
        }
    }
}

fn default_log_filter() -> String {
    "info,seedbox=debug".to_string()
}
