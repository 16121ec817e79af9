use serde::{Deserialize, Serialize};

/// Layout information, available once the metadata phase is over
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferMetadata {
    pub name: String,
    pub total_size: u64,
    pub file_count: usize,
}

impl TransferMetadata {
    pub fn is_multi_file(&self) -> bool {
        self.file_count > 1
    }
}

/// Point-in-time byte-level status of a transfer
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub done_bytes: u64,
    /// Bytes per second
    pub download_rate: f64,
    /// Bytes per second
    pub upload_rate: f64,
    pub peer_count: u32,
    pub seed_count: u32,
    /// Engine-reported completion in [0.0, 1.0]
    pub progress: f64,
}

impl StatusSnapshot {
    pub fn is_complete(&self) -> bool {
        self.progress >= 1.0
    }
}
