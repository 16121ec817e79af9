//! Transfer engine seam
//!
//! The orchestrator never speaks a wire protocol itself. It asks a
//! [`TransferEngine`] for a [`TransferHandle`] and polls that handle for
//! metadata and status snapshots until the transfer finishes.
//!
//! ## Key Components
//!
//! - [`TransferEngine`] / [`TransferHandle`] - Async traits every engine implements
//! - [`TransferMetadata`] / [`StatusSnapshot`] - What a handle reports
//! - [`SimulatedEngine`] - Deterministic engine for development and tests
//!
//! An event-driven engine can be adapted by caching its latest callback
//! payload inside the handle and returning it from `status()`.

mod simulated;
mod traits;
mod types;

pub use simulated::{SimulatedEngine, SimulationProfile};
pub use traits::{EngineError, TransferEngine, TransferHandle};
pub use types::{StatusSnapshot, TransferMetadata};
