//! Deterministic in-process engine
//!
//! Every `status()` call advances the transfer by a fixed number of bytes.
//! When the last byte "arrives" the payload is written to disk, so archive
//! packaging and artifact serving see real files.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::traits::{EngineError, TransferEngine, TransferHandle};
use super::types::{StatusSnapshot, TransferMetadata};
use crate::humanize::ByteSize;
use crate::jobs::{Locator, sanitize_path_component};

const WRITE_CHUNK: usize = 64 * 1024;

/// Shape of every simulated transfer
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimulationProfile {
    /// Payload name; defaults to the locator's display name
    #[serde(default)]
    pub name: Option<String>,
    /// `has_metadata()` answers false this many times first
    #[serde(default = "default_metadata_delay_polls")]
    pub metadata_delay_polls: u32,
    #[serde(default = "default_total_size")]
    pub total_size: ByteSize,
    #[serde(default = "default_file_count")]
    pub file_count: usize,
    /// Progress made per `status()` call, reported as the rate in bytes/s
    #[serde(default = "default_bytes_per_poll")]
    pub bytes_per_poll: ByteSize,
    #[serde(default = "default_peers")]
    pub peers: u32,
    #[serde(default = "default_seeds")]
    pub seeds: u32,
    /// Make `open()` fail with this message
    #[serde(default)]
    pub open_error: Option<String>,
    /// Make the N-th `status()` call fail
    #[serde(default)]
    pub fail_after_polls: Option<u32>,
}

fn default_metadata_delay_polls() -> u32 {
    2
}

fn default_total_size() -> ByteSize {
    ByteSize(64 * 1024 * 1024)
}

fn default_file_count() -> usize {
    3
}

fn default_bytes_per_poll() -> ByteSize {
    ByteSize(4 * 1024 * 1024)
}

fn default_peers() -> u32 {
    12
}

fn default_seeds() -> u32 {
    4
}

impl Default for SimulationProfile {
    fn default() -> Self {
        Self {
            name: None,
            metadata_delay_polls: default_metadata_delay_polls(),
            total_size: default_total_size(),
            file_count: default_file_count(),
            bytes_per_poll: default_bytes_per_poll(),
            peers: default_peers(),
            seeds: default_seeds(),
            open_error: None,
            fail_after_polls: None,
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    opened: AtomicUsize,
    closed: AtomicUsize,
}

/// Engine producing [`SimulatedHandle`]s from a fixed profile
#[derive(Debug, Clone)]
pub struct SimulatedEngine {
    profile: SimulationProfile,
    counters: Arc<Counters>,
}

impl SimulatedEngine {
    pub fn new(profile: SimulationProfile) -> Self {
        Self {
            profile,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Handles opened so far
    pub fn opened(&self) -> usize {
        self.counters.opened.load(Ordering::SeqCst)
    }

    /// Handles closed so far (repeated closes of one handle count once)
    pub fn closed(&self) -> usize {
        self.counters.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransferEngine for SimulatedEngine {
    async fn open(
        &self,
        locator: &str,
        destination: &Path,
    ) -> Result<Box<dyn TransferHandle>, EngineError> {
        if let Some(message) = &self.profile.open_error {
            return Err(EngineError::Acquisition(message.clone()));
        }

        let name = match &self.profile.name {
            Some(name) => name.clone(),
            None => Locator::parse(locator, usize::MAX)
                .map(|parsed| parsed.display_name().to_string())
                .map_err(|e| EngineError::Acquisition(e.to_string()))?,
        };

        self.counters.opened.fetch_add(1, Ordering::SeqCst);
        info!(name, destination = %destination.display(), "Simulated transfer opened");

        Ok(Box::new(SimulatedHandle {
            profile: self.profile.clone(),
            name,
            destination: destination.to_path_buf(),
            state: Mutex::new(HandleState::default()),
            closed: AtomicBool::new(false),
            counters: self.counters.clone(),
        }))
    }
}

#[derive(Debug, Default)]
struct HandleState {
    metadata_polls: u32,
    status_polls: u32,
    done_bytes: u64,
    materialized: bool,
}

pub struct SimulatedHandle {
    profile: SimulationProfile,
    name: String,
    destination: PathBuf,
    state: Mutex<HandleState>,
    closed: AtomicBool,
    counters: Arc<Counters>,
}

impl SimulatedHandle {
    fn ensure_open(&self) -> Result<(), EngineError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineError::Closed);
        }
        Ok(())
    }

    /// Sizes of each simulated file; the remainder goes to the first file.
    fn file_sizes(&self) -> Vec<u64> {
        let count = self.profile.file_count.max(1) as u64;
        let total = self.profile.total_size.as_u64();
        let mut sizes = vec![total / count; count as usize];
        sizes[0] += total % count;
        sizes
    }

    /// Relative path of file `index` inside a multi-file payload
    fn relative_file_path(index: usize) -> PathBuf {
        let file_name = format!("part-{index:03}.bin");
        if index % 2 == 1 {
            Path::new("extras").join(file_name)
        } else {
            PathBuf::from(file_name)
        }
    }

    async fn materialize(&self) -> Result<(), EngineError> {
        let root = self.destination.join(sanitize_path_component(&self.name));
        let sizes = self.file_sizes();

        if sizes.len() == 1 {
            write_payload(&root, sizes[0]).await?;
        } else {
            for (index, size) in sizes.into_iter().enumerate() {
                write_payload(&root.join(Self::relative_file_path(index)), size).await?;
            }
        }

        debug!(path = %root.display(), "Simulated payload written");
        Ok(())
    }
}

async fn write_payload(path: &Path, size: u64) -> Result<(), EngineError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut file = tokio::fs::File::create(path).await?;
    let chunk = vec![0x5a_u8; WRITE_CHUNK];
    let mut remaining = size;
    while remaining > 0 {
        let len = remaining.min(WRITE_CHUNK as u64) as usize;
        file.write_all(&chunk[..len]).await?;
        remaining -= len as u64;
    }
    file.flush().await?;
    Ok(())
}

#[async_trait]
impl TransferHandle for SimulatedHandle {
    async fn has_metadata(&self) -> Result<bool, EngineError> {
        self.ensure_open()?;
        let mut state = self.state.lock().await;
        state.metadata_polls = state.metadata_polls.saturating_add(1);
        Ok(state.metadata_polls > self.profile.metadata_delay_polls)
    }

    async fn metadata(&self) -> Result<TransferMetadata, EngineError> {
        self.ensure_open()?;
        let state = self.state.lock().await;
        if state.metadata_polls <= self.profile.metadata_delay_polls {
            return Err(EngineError::MetadataUnavailable);
        }

        Ok(TransferMetadata {
            name: self.name.clone(),
            total_size: self.profile.total_size.as_u64(),
            file_count: self.profile.file_count.max(1),
        })
    }

    async fn status(&self) -> Result<StatusSnapshot, EngineError> {
        self.ensure_open()?;
        let mut state = self.state.lock().await;
        state.status_polls += 1;

        if let Some(limit) = self.profile.fail_after_polls {
            if state.status_polls >= limit {
                return Err(EngineError::Transfer(format!(
                    "simulated failure after {} polls",
                    state.status_polls
                )));
            }
        }

        let total = self.profile.total_size.as_u64();
        let step = self.profile.bytes_per_poll.as_u64();
        state.done_bytes = state.done_bytes.saturating_add(step).min(total);
        let complete = state.done_bytes >= total;

        if complete && !state.materialized {
            self.materialize().await?;
            state.materialized = true;
        }

        let download_rate = if complete { 0.0 } else { step as f64 };
        let progress = if total == 0 {
            1.0
        } else {
            state.done_bytes as f64 / total as f64
        };

        Ok(StatusSnapshot {
            done_bytes: state.done_bytes,
            download_rate,
            upload_rate: download_rate / 4.0,
            peer_count: self.profile.peers,
            seed_count: self.profile.seeds,
            progress,
        })
    }

    async fn close(&self) -> Result<(), EngineError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.counters.closed.fetch_add(1, Ordering::SeqCst);
            debug!(name = %self.name, "Simulated transfer closed");
        }
        Ok(())
    }
}
