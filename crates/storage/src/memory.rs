// Path: crates/storage/src/memory.rs
//! In-memory log store with the same semantics as the durable one.
//!
//! Backs unit and cluster tests where durability across restarts is not
//! under test. "Durable before acknowledge" degenerates to ordinary memory
//! writes here.

use async_trait::async_trait;
use hyperraft_api::log::{AppendedRange, LogStore};
use hyperraft_types::error::LogStoreError;
use hyperraft_types::ledger::{Block, HardState, Snapshot};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct Inner {
    index: RwLock<BTreeMap<u64, Block>>,
    hard_state: RwLock<Option<HardState>>,
    snapshot: RwLock<Option<Snapshot>>,
    last_height: AtomicU64,
    committed: AtomicU64,
    floor: AtomicU64,
}

/// Volatile log store for tests and ephemeral nodes.
#[derive(Clone, Default)]
pub struct MemoryLogStore {
    inner: Arc<Inner>,
}

impl MemoryLogStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    async fn append(&self, entries: &[Block]) -> Result<AppendedRange, LogStoreError> {
        let Some(first) = entries.first() else {
            let h = self.inner.last_height.load(Ordering::SeqCst);
            return Ok(AppendedRange {
                first_height: h,
                last_height: h,
            });
        };
        let expected = self.inner.last_height.load(Ordering::SeqCst) + 1;
        if first.header.height != expected {
            return Err(LogStoreError::OutOfOrder {
                expected,
                got: first.header.height,
            });
        }
        let mut index = self.inner.index.write();
        for (offset, block) in entries.iter().enumerate() {
            let height = first.header.height + offset as u64;
            if block.header.height != height {
                return Err(LogStoreError::OutOfOrder {
                    expected: height,
                    got: block.header.height,
                });
            }
            index.insert(height, block.clone());
        }
        let last = first.header.height + entries.len() as u64 - 1;
        self.inner.last_height.store(last, Ordering::SeqCst);
        Ok(AppendedRange {
            first_height: first.header.height,
            last_height: last,
        })
    }

    async fn read(&self, range: RangeInclusive<u64>) -> Result<Vec<Block>, LogStoreError> {
        let floor = self.inner.floor.load(Ordering::SeqCst);
        if *range.start() <= floor && floor > 0 {
            return Err(LogStoreError::NotFound(*range.start()));
        }
        let index = self.inner.index.read();
        Ok(index.range(range).map(|(_, b)| b.clone()).collect())
    }

    async fn truncate_suffix(&self, from_height: u64) -> Result<(), LogStoreError> {
        let committed = self.inner.committed.load(Ordering::SeqCst);
        if from_height <= committed {
            return Err(LogStoreError::CommittedTruncation {
                from: from_height,
                committed,
            });
        }
        let mut index = self.inner.index.write();
        index.split_off(&from_height);
        let last = index
            .keys()
            .next_back()
            .copied()
            .unwrap_or(self.inner.floor.load(Ordering::SeqCst));
        self.inner.last_height.store(last, Ordering::SeqCst);
        Ok(())
    }

    async fn mark_committed(&self, up_to_height: u64) -> Result<(), LogStoreError> {
        let clamped = up_to_height.min(self.inner.last_height.load(Ordering::SeqCst));
        self.inner.committed.fetch_max(clamped, Ordering::SeqCst);
        Ok(())
    }

    async fn store_snapshot(&self, snapshot: &Snapshot) -> Result<(), LogStoreError> {
        let last = self.inner.last_height.load(Ordering::SeqCst);
        let committed = self.inner.committed.load(Ordering::SeqCst);
        // Two legal shapes: a local snapshot of the committed prefix, or a
        // remote snapshot installed past the end of a lagging log.
        if snapshot.height <= last && snapshot.height > committed {
            return Err(LogStoreError::Backend(format!(
                "snapshot height {} covers uncommitted entries",
                snapshot.height
            )));
        }
        self.inner
            .committed
            .fetch_max(snapshot.height, Ordering::SeqCst);
        *self.inner.snapshot.write() = Some(snapshot.clone());
        let mut index = self.inner.index.write();
        *index = index.split_off(&(snapshot.height + 1));
        self.inner.floor.store(snapshot.height, Ordering::SeqCst);
        let last = index.keys().next_back().copied().unwrap_or(snapshot.height);
        self.inner.last_height.store(last, Ordering::SeqCst);
        Ok(())
    }

    async fn load_snapshot(&self) -> Result<Option<Snapshot>, LogStoreError> {
        Ok(self.inner.snapshot.read().clone())
    }

    async fn save_hard_state(&self, state: &HardState) -> Result<(), LogStoreError> {
        *self.inner.hard_state.write() = Some(state.clone());
        Ok(())
    }

    async fn load_hard_state(&self) -> Result<Option<HardState>, LogStoreError> {
        Ok(self.inner.hard_state.read().clone())
    }

    fn last_height(&self) -> u64 {
        self.inner.last_height.load(Ordering::SeqCst)
    }

    fn committed_height(&self) -> u64 {
        self.inner.committed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyperraft_types::ledger::BlockHeader;
    use hyperraft_types::{AccountId, ZERO_DIGEST};

    fn block(height: u64) -> Block {
        Block {
            header: BlockHeader {
                height,
                term: 1,
                prev_hash: ZERO_DIGEST,
                tx_root: ZERO_DIGEST,
                proposer_id: AccountId([2u8; 32]),
                timestamp_ms: height,
            },
            transactions: vec![],
            special: None,
            proposer_signature: vec![],
        }
    }

    #[tokio::test]
    async fn matches_file_store_semantics() {
        let store = MemoryLogStore::new();
        store.append(&[block(1), block(2)]).await.unwrap();
        assert!(store.append(&[block(4)]).await.is_err());
        store.mark_committed(1).await.unwrap();
        assert!(store.truncate_suffix(1).await.is_err());
        store.truncate_suffix(2).await.unwrap();
        assert_eq!(store.last_height(), 1);
    }

    #[tokio::test]
    async fn commit_watermark_clamps_to_suffix() {
        let store = MemoryLogStore::new();
        store.append(&[block(1)]).await.unwrap();
        store.mark_committed(10).await.unwrap();
        assert_eq!(store.committed_height(), 1);
    }
}
