// Path: crates/storage/src/wal.rs
//! CRC-framed write-ahead log for block entries.
//!
//! Appends return only after the frame is flushed and synced, so the log
//! store can acknowledge durability to consensus. Compaction streams the
//! live suffix into a temp file and atomically renames it into place.

use hyperraft_types::codec;
use hyperraft_types::error::LogStoreError;
use hyperraft_types::ledger::Block;
use parity_scale_codec::{Decode, Encode};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// What a WAL frame records.
#[derive(Encode, Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// The payload is a SCALE-encoded [`Block`].
    Append,
    /// The committed watermark advanced to `height`; no payload.
    CommitMark,
    /// All entries at `height` and above were truncated; no payload.
    TruncateMark,
}

/// Fixed-layout header preceding every frame payload.
#[derive(Encode, Decode, Debug)]
struct FrameHeader {
    kind: FrameKind,
    height: u64,
    data_len: u32,
    crc: u32,
}

/// One decoded WAL frame.
#[derive(Debug)]
pub enum Frame {
    /// An appended block.
    Append(Block),
    /// Commit watermark advance.
    CommitMark(u64),
    /// Suffix truncation from the given height.
    TruncateMark(u64),
}

fn backend(e: impl std::fmt::Display) -> LogStoreError {
    LogStoreError::Backend(e.to_string())
}

/// Appends frames to the log file with fsync-before-return semantics.
pub struct WalWriter {
    path: PathBuf,
    file: BufWriter<File>,
}

impl WalWriter {
    /// Opens the WAL for appending, creating it if absent.
    pub fn open(path: &Path) -> Result<Self, LogStoreError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(backend)?;
        Ok(Self {
            path: path.to_path_buf(),
            file: BufWriter::new(file),
        })
    }

    fn write_frame(&mut self, kind: FrameKind, height: u64, data: &[u8]) -> Result<(), LogStoreError> {
        let header = FrameHeader {
            kind,
            height,
            data_len: data.len() as u32,
            crc: crc32fast::hash(data),
        };
        self.file
            .write_all(&codec::to_bytes_canonical(&header))
            .map_err(backend)?;
        self.file.write_all(data).map_err(backend)?;
        Ok(())
    }

    fn sync(&mut self) -> Result<(), LogStoreError> {
        self.file.flush().map_err(backend)?;
        self.file.get_ref().sync_data().map_err(backend)
    }

    /// Durably appends a batch of blocks as one sync.
    pub fn append_blocks(&mut self, blocks: &[Block]) -> Result<(), LogStoreError> {
        for block in blocks {
            let data = codec::to_bytes_canonical(block);
            self.write_frame(FrameKind::Append, block.header.height, &data)?;
        }
        self.sync()
    }

    /// Durably records the committed watermark.
    pub fn append_commit_mark(&mut self, height: u64) -> Result<(), LogStoreError> {
        self.write_frame(FrameKind::CommitMark, height, &[])?;
        self.sync()
    }

    /// Durably records a suffix truncation.
    pub fn append_truncate_mark(&mut self, from_height: u64) -> Result<(), LogStoreError> {
        self.write_frame(FrameKind::TruncateMark, from_height, &[])?;
        self.sync()
    }

    /// Rewrites the WAL keeping only append frames at heights strictly above
    /// `below`, plus a fresh commit mark. Marks below the cut are folded in.
    pub fn compact(&mut self, below: u64, committed: u64) -> Result<u64, LogStoreError> {
        self.sync()?;

        let tmp_path = self.path.with_extension("wal.tmp");
        {
            let mut tmp = BufWriter::new(
                OpenOptions::new()
                    .create(true)
                    .write(true)
                    .truncate(true)
                    .open(&tmp_path)
                    .map_err(backend)?,
            );
            let mut kept = 0u64;
            for frame in WalIterator::open(&self.path)? {
                if let Frame::Append(block) = frame? {
                    if block.header.height > below {
                        let data = codec::to_bytes_canonical(&block);
                        let header = FrameHeader {
                            kind: FrameKind::Append,
                            height: block.header.height,
                            data_len: data.len() as u32,
                            crc: crc32fast::hash(&data),
                        };
                        tmp.write_all(&codec::to_bytes_canonical(&header))
                            .map_err(backend)?;
                        tmp.write_all(&data).map_err(backend)?;
                        kept += 1;
                    }
                }
            }
            if committed > 0 {
                let header = FrameHeader {
                    kind: FrameKind::CommitMark,
                    height: committed,
                    data_len: 0,
                    crc: crc32fast::hash(&[]),
                };
                tmp.write_all(&codec::to_bytes_canonical(&header))
                    .map_err(backend)?;
            }
            tmp.flush().map_err(backend)?;
            tmp.get_ref().sync_data().map_err(backend)?;

            fs::rename(&tmp_path, &self.path).map_err(backend)?;

            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .map_err(backend)?;
            self.file = BufWriter::new(file);

            tracing::info!(target: "storage", kept, below, "WAL compaction complete");
            Ok(kept)
        }
    }
}

/// Streams decoded frames out of a WAL file.
pub struct WalIterator {
    reader: BufReader<File>,
}

impl WalIterator {
    /// Opens the WAL for replay.
    pub fn open(path: &Path) -> Result<Self, LogStoreError> {
        let file = File::open(path).map_err(backend)?;
        Ok(Self {
            reader: BufReader::new(file),
        })
    }
}

impl Iterator for WalIterator {
    type Item = Result<Frame, LogStoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.reader.fill_buf().ok()?.is_empty() {
            return None;
        }

        // Header layout is fixed-width: 1 + 8 + 4 + 4 bytes.
        let mut header_buf = [0u8; 17];
        if let Err(e) = self.reader.read_exact(&mut header_buf) {
            return Some(Err(backend(format!("WAL header read failed: {e}"))));
        }
        let header: FrameHeader = match codec::from_bytes_canonical(&header_buf) {
            Ok(h) => h,
            Err(e) => return Some(Err(backend(format!("WAL header decode failed: {e}")))),
        };

        let mut data = vec![0u8; header.data_len as usize];
        if let Err(e) = self.reader.read_exact(&mut data) {
            return Some(Err(backend(format!("WAL body read failed: {e}"))));
        }
        if crc32fast::hash(&data) != header.crc {
            return Some(Err(backend(format!(
                "WAL frame CRC mismatch at height {}",
                header.height
            ))));
        }

        let frame = match header.kind {
            FrameKind::Append => match codec::from_bytes_canonical::<Block>(&data) {
                Ok(block) => Frame::Append(block),
                Err(e) => return Some(Err(backend(format!("WAL block decode failed: {e}")))),
            },
            FrameKind::CommitMark => Frame::CommitMark(header.height),
            FrameKind::TruncateMark => Frame::TruncateMark(header.height),
        };
        Some(Ok(frame))
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
                timestamp_ms: height * 10,
            },
            transactions: vec![],
            special: None,
            proposer_signature: vec![],
        }
    }

    #[test]
    fn write_read_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.wal");

        let mut writer = WalWriter::open(&path).unwrap();
        writer.append_blocks(&[block(1), block(2)]).unwrap();
        writer.append_commit_mark(1).unwrap();

        let frames: Vec<_> = WalIterator::open(&path)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(frames.len(), 3);
        assert!(matches!(&frames[0], Frame::Append(b) if b.header.height == 1));
        assert!(matches!(&frames[1], Frame::Append(b) if b.header.height == 2));
        assert!(matches!(frames[2], Frame::CommitMark(1)));
    }

    #[test]
    fn corrupt_frame_detected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.wal");

        let mut writer = WalWriter::open(&path).unwrap();
        writer.append_blocks(&[block(1)]).unwrap();
        drop(writer);

        // Flip one payload byte past the header.
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        fs::write(&path, &bytes).unwrap();

        let result: Result<Vec<_>, _> = WalIterator::open(&path).unwrap().collect();
        assert!(result.is_err());
    }

    #[test]
    fn compaction_keeps_suffix() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.wal");

        let mut writer = WalWriter::open(&path).unwrap();
        writer
            .append_blocks(&[block(10), block(11), block(12), block(13)])
            .unwrap();
        writer.append_commit_mark(12).unwrap();

        writer.compact(11, 12).unwrap();

        let mut heights = vec![];
        let mut commit = 0;
        for frame in WalIterator::open(&path).unwrap() {
            match frame.unwrap() {
                Frame::Append(b) => heights.push(b.header.height),
                Frame::CommitMark(h) => commit = h,
                Frame::TruncateMark(_) => {}
            }
        }
        assert_eq!(heights, vec![12, 13]);
        assert_eq!(commit, 12);

        // Still writable after compaction.
        writer.append_blocks(&[block(14)]).unwrap();
        let count = WalIterator::open(&path).unwrap().count();
        assert_eq!(count, 4);
    }
}
