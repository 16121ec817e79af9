/// Fjall-based job record store
///
/// The ledger is the only state shared between the HTTP handlers and the
/// running orchestrators. It persists:
///
/// - Job records (status, telemetry, refined metadata, result path)
/// - Idempotency keys (deduplication for POST /jobs)
/// - Metadata (pruning timestamps)
///
/// ## Consistency
///
/// Reads are single-record and atomic. Every read-modify-write goes through
/// [`FjallStore::update`], which holds the store's write guard for the whole
/// read, decision and write, so an external pause and an orchestrator tick
/// can never interleave on the same record.
///
/// ## Usage
///
/// ```rust,ignore
/// use seedbox::ledger::{Change, FjallStore};
///
/// let store = FjallStore::open("data/ledger")?;
/// store.insert(&job)?;
/// store.update(&job.job_id, |job| {
///     job.progress = 0.5;
///     Change::Write(())
/// })?;
/// ```

pub mod error;
pub mod partitions;
pub mod pruning;
pub mod store;

pub use error::{LedgerError, Result};
pub use pruning::{PruneStats, RETENTION_IDEMPOTENCY_DAYS};
pub use store::{Change, FjallStore, StatusCounts, StoreStats};
