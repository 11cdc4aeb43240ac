// Path: crates/storage/src/file.rs
//! The WAL-backed, durable [`LogStore`] implementation.
//!
//! Layout inside the store directory:
//!   - `log.wal`       : CRC-framed block entries plus commit/truncate marks
//!   - `hard_state.bin`: consensus metadata, atomically replaced
//!   - `snapshot.bin`  : the latest snapshot, atomically replaced
//!
//! File I/O runs on the blocking pool; the async trait methods never block
//! the consensus loop.

use crate::wal::{Frame, WalIterator, WalWriter};
use async_trait::async_trait;
use hyperraft_api::log::{AppendedRange, LogStore};
use hyperraft_types::codec;
use hyperraft_types::error::LogStoreError;
use hyperraft_types::ledger::{Block, HardState, Snapshot};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

fn backend(e: impl std::fmt::Display) -> LogStoreError {
    LogStoreError::Backend(e.to_string())
}

/// Writes `payload` to `path` atomically: temp file, fsync, rename.
fn write_atomic(path: &Path, payload: &[u8]) -> Result<(), LogStoreError> {
    let tmp = path.with_extension("tmp");
    {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)
            .map_err(backend)?;
        file.write_all(&crc32fast::hash(payload).to_be_bytes())
            .map_err(backend)?;
        file.write_all(payload).map_err(backend)?;
        file.sync_data().map_err(backend)?;
    }
    fs::rename(&tmp, path).map_err(backend)
}

/// Reads a payload written by [`write_atomic`], verifying its checksum.
fn read_atomic(path: &Path) -> Result<Option<Vec<u8>>, LogStoreError> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(backend(e)),
    };
    if bytes.len() < 4 {
        return Err(backend("checksummed file too short"));
    }
    let (crc_bytes, payload) = bytes.split_at(4);
    let mut crc = [0u8; 4];
    crc.copy_from_slice(crc_bytes);
    if u32::from_be_bytes(crc) != crc32fast::hash(payload) {
        return Err(backend("checksum mismatch"));
    }
    Ok(Some(payload.to_vec()))
}

struct Inner {
    wal: Mutex<WalWriter>,
    index: RwLock<BTreeMap<u64, Block>>,
    last_height: AtomicU64,
    committed: AtomicU64,
    /// Heights at or below this are compacted into the snapshot.
    floor: AtomicU64,
    hard_state_path: PathBuf,
    snapshot_path: PathBuf,
}

/// Durable log store over a directory.
#[derive(Clone)]
pub struct FileLogStore {
    inner: Arc<Inner>,
}

impl FileLogStore {
    /// Opens the store, replaying the WAL into the in-memory index.
    pub fn open(dir: &Path) -> Result<Self, LogStoreError> {
        fs::create_dir_all(dir).map_err(backend)?;
        let wal_path = dir.join("log.wal");
        let hard_state_path = dir.join("hard_state.bin");
        let snapshot_path = dir.join("snapshot.bin");

        let mut index = BTreeMap::new();
        let mut committed = 0u64;
        if wal_path.exists() {
            for frame in WalIterator::open(&wal_path)? {
                match frame? {
                    Frame::Append(block) => {
                        index.insert(block.header.height, block);
                    }
                    Frame::CommitMark(h) => committed = committed.max(h),
                    Frame::TruncateMark(from) => {
                        index.split_off(&from);
                    }
                }
            }
        }

        let mut floor = 0u64;
        if let Some(payload) = read_atomic(&snapshot_path)
            .map_err(|e| LogStoreError::SnapshotCorrupt(e.to_string()))?
        {
            let snapshot: Snapshot = codec::from_bytes_canonical(&payload)
                .map_err(LogStoreError::SnapshotCorrupt)?;
            floor = snapshot.height;
            committed = committed.max(snapshot.height);
        }

        if let Some(payload) = read_atomic(&hard_state_path)? {
            let hard_state: HardState =
                codec::from_bytes_canonical(&payload).map_err(backend)?;
            committed = committed.max(hard_state.commit_index);
        }

        let last_height = index.keys().next_back().copied().unwrap_or(floor);
        // The committed watermark can never point past the stored suffix.
        committed = committed.min(last_height);

        tracing::info!(
            target: "storage",
            last_height,
            committed,
            floor,
            "log store opened"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                wal: Mutex::new(WalWriter::open(&wal_path)?),
                index: RwLock::new(index),
                last_height: AtomicU64::new(last_height),
                committed: AtomicU64::new(committed),
                floor: AtomicU64::new(floor),
                hard_state_path,
                snapshot_path,
            }),
        })
    }
}

impl Inner {
    fn append_sync(&self, entries: Vec<Block>) -> Result<AppendedRange, LogStoreError> {
        let Some(first) = entries.first() else {
            let h = self.last_height.load(Ordering::SeqCst);
            return Ok(AppendedRange {
                first_height: h,
                last_height: h,
            });
        };
        let expected = self.last_height.load(Ordering::SeqCst) + 1;
        if first.header.height != expected {
            return Err(LogStoreError::OutOfOrder {
                expected,
                got: first.header.height,
            });
        }
        for (offset, block) in entries.iter().enumerate() {
            if block.header.height != first.header.height + offset as u64 {
                return Err(LogStoreError::OutOfOrder {
                    expected: first.header.height + offset as u64,
                    got: block.header.height,
                });
            }
        }

        self.wal.lock().append_blocks(&entries)?;

        let first_height = first.header.height;
        let last = first_height + entries.len() as u64 - 1;
        let mut index = self.index.write();
        for block in entries {
            index.insert(block.header.height, block);
        }
        self.last_height.store(last, Ordering::SeqCst);
        Ok(AppendedRange {
            first_height,
            last_height: last,
        })
    }

    fn read_sync(&self, range: RangeInclusive<u64>) -> Result<Vec<Block>, LogStoreError> {
        let floor = self.floor.load(Ordering::SeqCst);
        if *range.start() <= floor && floor > 0 {
            return Err(LogStoreError::NotFound(*range.start()));
        }
        let index = self.index.read();
        Ok(index.range(range).map(|(_, b)| b.clone()).collect())
    }

    fn truncate_sync(&self, from_height: u64) -> Result<(), LogStoreError> {
        let committed = self.committed.load(Ordering::SeqCst);
        if from_height <= committed {
            return Err(LogStoreError::CommittedTruncation {
                from: from_height,
                committed,
            });
        }
        self.wal.lock().append_truncate_mark(from_height)?;
        let mut index = self.index.write();
        index.split_off(&from_height);
        let last = index
            .keys()
            .next_back()
            .copied()
            .unwrap_or(self.floor.load(Ordering::SeqCst));
        self.last_height.store(last, Ordering::SeqCst);
        Ok(())
    }

    fn mark_committed_sync(&self, up_to_height: u64) -> Result<(), LogStoreError> {
        let clamped = up_to_height.min(self.last_height.load(Ordering::SeqCst));
        if clamped <= self.committed.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.wal.lock().append_commit_mark(clamped)?;
        self.committed.fetch_max(clamped, Ordering::SeqCst);
        Ok(())
    }

    fn store_snapshot_sync(&self, snapshot: &Snapshot) -> Result<(), LogStoreError> {
        let last = self.last_height.load(Ordering::SeqCst);
        let committed = self.committed.load(Ordering::SeqCst);
        // Two legal shapes: a local snapshot of the committed prefix, or a
        // remote snapshot installed past the end of a lagging log.
        if snapshot.height <= last && snapshot.height > committed {
            return Err(LogStoreError::Backend(format!(
                "snapshot height {} covers uncommitted entries",
                snapshot.height
            )));
        }
        write_atomic(&self.snapshot_path, &codec::to_bytes_canonical(snapshot))?;

        let committed = committed.max(snapshot.height);
        self.wal.lock().compact(snapshot.height, committed)?;
        let mut index = self.index.write();
        *index = index.split_off(&(snapshot.height + 1));
        self.floor.store(snapshot.height, Ordering::SeqCst);
        self.committed.store(committed, Ordering::SeqCst);
        let last = index.keys().next_back().copied().unwrap_or(snapshot.height);
        self.last_height.store(last, Ordering::SeqCst);
        Ok(())
    }

    fn load_snapshot_sync(&self) -> Result<Option<Snapshot>, LogStoreError> {
        let Some(payload) = read_atomic(&self.snapshot_path)
            .map_err(|e| LogStoreError::SnapshotCorrupt(e.to_string()))?
        else {
            return Ok(None);
        };
        let snapshot =
            codec::from_bytes_canonical(&payload).map_err(LogStoreError::SnapshotCorrupt)?;
        Ok(Some(snapshot))
    }
}

#[async_trait]
impl LogStore for FileLogStore {
    async fn append(&self, entries: &[Block]) -> Result<AppendedRange, LogStoreError> {
        let inner = self.inner.clone();
        let entries = entries.to_vec();
        tokio::task::spawn_blocking(move || inner.append_sync(entries))
            .await
            .map_err(backend)?
    }

    async fn read(&self, range: RangeInclusive<u64>) -> Result<Vec<Block>, LogStoreError> {
        self.inner.read_sync(range)
    }

    async fn truncate_suffix(&self, from_height: u64) -> Result<(), LogStoreError> {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || inner.truncate_sync(from_height))
            .await
            .map_err(backend)?
    }

    async fn mark_committed(&self, up_to_height: u64) -> Result<(), LogStoreError> {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || inner.mark_committed_sync(up_to_height))
            .await
            .map_err(backend)?
    }

    async fn store_snapshot(&self, snapshot: &Snapshot) -> Result<(), LogStoreError> {
        let inner = self.inner.clone();
        let snapshot = snapshot.clone();
        tokio::task::spawn_blocking(move || inner.store_snapshot_sync(&snapshot))
            .await
            .map_err(backend)?
    }

    async fn load_snapshot(&self) -> Result<Option<Snapshot>, LogStoreError> {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || inner.load_snapshot_sync())
            .await
            .map_err(backend)?
    }

    async fn save_hard_state(&self, state: &HardState) -> Result<(), LogStoreError> {
        let inner = self.inner.clone();
        let state = state.clone();
        tokio::task::spawn_blocking(move || {
            write_atomic(&inner.hard_state_path, &codec::to_bytes_canonical(&state))
        })
        .await
        .map_err(backend)?
    }

    async fn load_hard_state(&self) -> Result<Option<HardState>, LogStoreError> {
        let Some(payload) = read_atomic(&self.inner.hard_state_path)? else {
            return Ok(None);
        };
        let state = codec::from_bytes_canonical(&payload).map_err(backend)?;
        Ok(Some(state))
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
    use tempfile::tempdir;

    fn block(height: u64) -> Block {
        Block {
            header: BlockHeader {
                height,
                term: 1,
                prev_hash: ZERO_DIGEST,
                tx_root: ZERO_DIGEST,
                proposer_id: AccountId([1u8; 32]),
                timestamp_ms: height,
            },
            transactions: vec![],
            special: None,
            proposer_signature: vec![],
        }
    }

    #[tokio::test]
    async fn append_read_and_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = FileLogStore::open(dir.path()).unwrap();
            let range = store.append(&[block(1), block(2), block(3)]).await.unwrap();
            assert_eq!(range.first_height, 1);
            assert_eq!(range.last_height, 3);
            store.mark_committed(2).await.unwrap();
        }
        // Reopen and replay.
        let store = FileLogStore::open(dir.path()).unwrap();
        assert_eq!(store.last_height(), 3);
        assert_eq!(store.committed_height(), 2);
        let blocks = store.read(1..=3).await.unwrap();
        assert_eq!(blocks.len(), 3);
    }

    #[tokio::test]
    async fn out_of_order_append_rejected() {
        let dir = tempdir().unwrap();
        let store = FileLogStore::open(dir.path()).unwrap();
        let err = store.append(&[block(2)]).await.unwrap_err();
        assert!(matches!(
            err,
            LogStoreError::OutOfOrder { expected: 1, got: 2 }
        ));
    }

    #[tokio::test]
    async fn committed_truncation_is_fatal() {
        let dir = tempdir().unwrap();
        let store = FileLogStore::open(dir.path()).unwrap();
        store.append(&[block(1), block(2)]).await.unwrap();
        store.mark_committed(2).await.unwrap();
        let err = store.truncate_suffix(2).await.unwrap_err();
        assert!(err.is_fatal());
        // Uncommitted suffix truncates fine.
        store.append(&[block(3), block(4)]).await.unwrap();
        store.truncate_suffix(3).await.unwrap();
        assert_eq!(store.last_height(), 2);
    }

    #[tokio::test]
    async fn truncation_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = FileLogStore::open(dir.path()).unwrap();
            store.append(&[block(1), block(2), block(3)]).await.unwrap();
            store.truncate_suffix(2).await.unwrap();
        }
        let store = FileLogStore::open(dir.path()).unwrap();
        assert_eq!(store.last_height(), 1);
        assert!(store.read(1..=3).await.unwrap().len() == 1);
    }

    #[tokio::test]
    async fn snapshot_compacts_and_loads() {
        let dir = tempdir().unwrap();
        let store = FileLogStore::open(dir.path()).unwrap();
        store
            .append(&(1..=5).map(block).collect::<Vec<_>>())
            .await
            .unwrap();
        store.mark_committed(5).await.unwrap();

        let snapshot = Snapshot {
            height: 3,
            last_term: 1,
            last_hash: ZERO_DIGEST,
            state_hash: [7u8; 32],
            state_blob: vec![1, 2, 3],
        };
        store.store_snapshot(&snapshot).await.unwrap();

        assert_eq!(store.load_snapshot().await.unwrap().unwrap(), snapshot);
        // Compacted heights are gone.
        assert!(store.read(1..=2).await.is_err());
        assert_eq!(store.read(4..=5).await.unwrap().len(), 2);

        // Reopen keeps the floor.
        drop(store);
        let store = FileLogStore::open(dir.path()).unwrap();
        assert_eq!(store.last_height(), 5);
        assert!(store.read(1..=2).await.is_err());
    }

    #[tokio::test]
    async fn corrupt_snapshot_surfaces() {
        let dir = tempdir().unwrap();
        let store = FileLogStore::open(dir.path()).unwrap();
        store.append(&[block(1)]).await.unwrap();
        store.mark_committed(1).await.unwrap();
        store
            .store_snapshot(&Snapshot {
                height: 1,
                last_term: 1,
                last_hash: ZERO_DIGEST,
                state_hash: [1u8; 32],
                state_blob: vec![9; 64],
            })
            .await
            .unwrap();

        // Flip a byte in the snapshot payload.
        let path = dir.path().join("snapshot.bin");
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        fs::write(&path, &bytes).unwrap();

        let err = store.load_snapshot().await.unwrap_err();
        assert!(matches!(err, LogStoreError::SnapshotCorrupt(_)));
    }

    #[tokio::test]
    async fn hard_state_roundtrip() {
        let dir = tempdir().unwrap();
        let store = FileLogStore::open(dir.path()).unwrap();
        assert!(store.load_hard_state().await.unwrap().is_none());
        let hs = HardState {
            current_term: 4,
            voted_for: Some(AccountId([9u8; 32])),
            commit_index: 2,
        };
        store.save_hard_state(&hs).await.unwrap();
        assert_eq!(store.load_hard_state().await.unwrap().unwrap(), hs);
    }
}
