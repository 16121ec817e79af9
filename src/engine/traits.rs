use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

use super::types::{StatusSnapshot, TransferMetadata};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("could not open locator: {0}")]
    Acquisition(String),
    #[error("metadata requested before it was available")]
    MetadataUnavailable,
    #[error("transfer failed: {0}")]
    Transfer(String),
    #[error("handle already closed")]
    Closed,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Factory for transfer sessions
#[async_trait]
pub trait TransferEngine: Send + Sync {
    /// Start a transfer for `locator`, saving payload under `destination`.
    async fn open(
        &self,
        locator: &str,
        destination: &Path,
    ) -> Result<Box<dyn TransferHandle>, EngineError>;
}

/// Live engine session for one transfer
#[async_trait]
pub trait TransferHandle: Send + Sync {
    async fn has_metadata(&self) -> Result<bool, EngineError>;

    /// Only valid once [`has_metadata`](Self::has_metadata) returned true.
    async fn metadata(&self) -> Result<TransferMetadata, EngineError>;

    async fn status(&self) -> Result<StatusSnapshot, EngineError>;

    /// Release engine resources. Calling it more than once is a no-op.
    async fn close(&self) -> Result<(), EngineError>;
}
