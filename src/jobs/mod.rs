//! Job domain: the persisted record, its state machine, and the locator it
//! was submitted with.
//!
//! ## Key Components
//!
//! - [`Job`] - The record stored per transfer in the ledger
//! - [`JobStatus`] / [`JobEvent`] - The lifecycle and the events that drive it
//! - [`Locator`] - A validated magnet-style locator plus its display name
//! - [`JobSnapshot`] - Read-only projection with rendered telemetry
//! - [`JobFile`] - One payload file of a completed job

mod locator;
mod model;
mod policy;
mod snapshot;

pub use locator::{DEFAULT_DISPLAY_NAME, Locator, LocatorError};
pub use model::{Job, JobStatus, sanitize_path_component};
pub use policy::{JobEvent, TransitionError};
pub use snapshot::{JobFile, JobSnapshot};
