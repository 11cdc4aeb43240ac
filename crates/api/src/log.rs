// Path: crates/api/src/log.rs

//! The append-only log store port.
//!
//! Three logically separate stores sit behind this trait: entries keyed by
//! height, the durable [`HardState`] metadata, and snapshots. Entries and
//! metadata must reach stable storage before any message depending on them
//! is emitted; `append` does not return until the write is durable.

use async_trait::async_trait;
use hyperraft_types::error::LogStoreError;
use hyperraft_types::ledger::{Block, HardState, Snapshot};
use std::ops::RangeInclusive;

/// The heights covered by a successful append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendedRange {
    /// Height of the first appended entry.
    pub first_height: u64,
    /// Height of the last appended entry.
    pub last_height: u64,
}

/// Durable, indexed, append-only block log.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Appends `entries`, which must continue directly from the stored
    /// suffix. Fails with [`LogStoreError::OutOfOrder`] when
    /// `entries[0].height != last_height + 1`.
    async fn append(&self, entries: &[Block]) -> Result<AppendedRange, LogStoreError>;

    /// Reads the entries in `range` (inclusive). Heights above the stored
    /// suffix are simply absent from the result; heights already compacted
    /// into a snapshot fail with [`LogStoreError::NotFound`].
    async fn read(&self, range: RangeInclusive<u64>) -> Result<Vec<Block>, LogStoreError>;

    /// Atomically removes all entries at `from_height` and above. Fails with
    /// the fatal [`LogStoreError::CommittedTruncation`] when the range
    /// overlaps committed entries.
    async fn truncate_suffix(&self, from_height: u64) -> Result<(), LogStoreError>;

    /// Marks all entries up to `up_to_height` committed. Idempotent and
    /// monotonic: a lower watermark than the current one is a no-op.
    async fn mark_committed(&self, up_to_height: u64) -> Result<(), LogStoreError>;

    /// Stores a snapshot consistent with the committed prefix and compacts
    /// entries at or below its height.
    async fn store_snapshot(&self, snapshot: &Snapshot) -> Result<(), LogStoreError>;

    /// Loads the most recent snapshot, if any. Fails with the fatal
    /// [`LogStoreError::SnapshotCorrupt`] on integrity mismatch.
    async fn load_snapshot(&self) -> Result<Option<Snapshot>, LogStoreError>;

    /// Durably persists the consensus metadata.
    async fn save_hard_state(&self, state: &HardState) -> Result<(), LogStoreError>;

    /// Loads the consensus metadata persisted by the last run.
    async fn load_hard_state(&self) -> Result<Option<HardState>, LogStoreError>;

    /// The height of the last stored entry; 0 when empty.
    fn last_height(&self) -> u64;

    /// The committed watermark; 0 when nothing is committed.
    fn committed_height(&self) -> u64;
}
