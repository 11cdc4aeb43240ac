// Path: crates/pipeline/src/chunks.rs

//! Large-transfer chunk reassembly.
//!
//! Chunks arrive in any order; the reassembler holds exactly
//! `total_chunks` slots per transfer and accepts each chunk number once.
//! Completing a transfer with every slot filled yields the content hash
//! over the chunks concatenated in order; completing with holes yields
//! `success = false, error = "incomplete"`.

use hyperraft_api::CryptoProvider;
use hyperraft_types::Digest;
use parity_scale_codec::{Decode, Encode};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;

/// Largest accepted chunk payload: 1 MiB.
pub const MAX_CHUNK_BYTES: usize = 1 << 20;

/// One chunk of a client-streamed transfer.
#[derive(Encode, Decode, Debug, Clone)]
pub struct Chunk {
    /// The transfer this chunk belongs to.
    pub transfer_id: String,
    /// Zero-based position of this chunk.
    pub chunk_number: u32,
    /// Total chunks in the transfer; constant across its chunks.
    pub total_chunks: u32,
    /// The chunk payload, at most [`MAX_CHUNK_BYTES`].
    pub data: Vec<u8>,
}

/// The terminal response for one transfer.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LargeTransferResponse {
    /// The transfer this responds to.
    pub transfer_id: String,
    /// Hash of the chunks concatenated in order; zeroed on failure.
    pub content_hash: Digest,
    /// Total reassembled bytes; 0 on failure.
    pub total_bytes: u64,
    /// Wall-clock time from first chunk to completion, milliseconds.
    pub processing_ms: u64,
    /// Whether reassembly succeeded.
    pub success: bool,
    /// `"incomplete"` or a validation message on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

struct TransferBuf {
    slots: Vec<Option<Vec<u8>>>,
    filled: u32,
    started: Instant,
}

/// Reassembles chunked transfers keyed by transfer id.
#[derive(Default)]
pub struct ChunkReassembler {
    transfers: Mutex<HashMap<String, TransferBuf>>,
}

impl ChunkReassembler {
    /// Creates an empty reassembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts one chunk. Idempotent on `chunk_number`; rejects payloads
    /// over the size cap, out-of-range numbers, and a `total_chunks` that
    /// disagrees with the transfer's first chunk.
    pub fn accept(&self, chunk: Chunk) -> Result<(), String> {
        if chunk.total_chunks == 0 {
            return Err("total_chunks must be > 0".into());
        }
        if chunk.data.len() > MAX_CHUNK_BYTES {
            return Err(format!("chunk exceeds {} bytes", MAX_CHUNK_BYTES));
        }
        if chunk.chunk_number >= chunk.total_chunks {
            return Err(format!(
                "chunk_number {} out of range 0..{}",
                chunk.chunk_number, chunk.total_chunks
            ));
        }

        let mut transfers = self.transfers.lock();
        let buf = transfers
            .entry(chunk.transfer_id.clone())
            .or_insert_with(|| TransferBuf {
                slots: vec![None; chunk.total_chunks as usize],
                filled: 0,
                started: Instant::now(),
            });
        if buf.slots.len() != chunk.total_chunks as usize {
            return Err(format!(
                "total_chunks {} disagrees with transfer's {}",
                chunk.total_chunks,
                buf.slots.len()
            ));
        }
        let Some(slot) = buf.slots.get_mut(chunk.chunk_number as usize) else {
            return Err("chunk_number out of range".into());
        };
        if slot.is_none() {
            *slot = Some(chunk.data);
            buf.filled += 1;
        }
        Ok(())
    }

    /// Completes a transfer on stream end, consuming its buffer.
    pub fn complete(
        &self,
        transfer_id: &str,
        crypto: &dyn CryptoProvider,
    ) -> LargeTransferResponse {
        let Some(buf) = self.transfers.lock().remove(transfer_id) else {
            return LargeTransferResponse {
                transfer_id: transfer_id.to_string(),
                content_hash: [0u8; 32],
                total_bytes: 0,
                processing_ms: 0,
                success: false,
                error: Some("incomplete".into()),
            };
        };
        let processing_ms = buf.started.elapsed().as_millis() as u64;

        if (buf.filled as usize) < buf.slots.len() {
            return LargeTransferResponse {
                transfer_id: transfer_id.to_string(),
                content_hash: [0u8; 32],
                total_bytes: 0,
                processing_ms,
                success: false,
                error: Some("incomplete".into()),
            };
        }

        let mut payload = Vec::with_capacity(
            buf.slots
                .iter()
                .map(|s| s.as_ref().map(Vec::len).unwrap_or(0))
                .sum(),
        );
        for slot in buf.slots {
            if let Some(data) = slot {
                payload.extend_from_slice(&data);
            }
        }
        LargeTransferResponse {
            transfer_id: transfer_id.to_string(),
            content_hash: crypto.hash(&payload),
            total_bytes: payload.len() as u64,
            processing_ms,
            success: true,
            error: None,
        }
    }

    /// Transfers currently buffered.
    pub fn in_flight(&self) -> usize {
        self.transfers.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyperraft_crypto::Ed25519Provider;

    fn chunk(id: &str, number: u32, total: u32, data: &[u8]) -> Chunk {
        Chunk {
            transfer_id: id.to_string(),
            chunk_number: number,
            total_chunks: total,
            data: data.to_vec(),
        }
    }

    #[test]
    fn out_of_order_reassembly() {
        let provider = Ed25519Provider::from_seed([3u8; 32]);
        let reassembler = ChunkReassembler::new();
        // Delivery order 3, 1, 2 of ["AAA", "BBB", "CCC"].
        reassembler.accept(chunk("tx-L", 2, 3, b"CCC")).unwrap();
        reassembler.accept(chunk("tx-L", 0, 3, b"AAA")).unwrap();
        reassembler.accept(chunk("tx-L", 1, 3, b"BBB")).unwrap();

        let response = reassembler.complete("tx-L", &provider);
        assert!(response.success);
        assert_eq!(response.total_bytes, 9);
        assert_eq!(response.content_hash, provider.hash(b"AAABBBCCC"));
        assert_eq!(reassembler.in_flight(), 0);
    }

    #[test]
    fn duplicate_chunks_are_idempotent() {
        let provider = Ed25519Provider::from_seed([3u8; 32]);
        let reassembler = ChunkReassembler::new();
        reassembler.accept(chunk("t", 0, 2, b"AB")).unwrap();
        reassembler.accept(chunk("t", 0, 2, b"XY")).unwrap();
        reassembler.accept(chunk("t", 1, 2, b"CD")).unwrap();

        let response = reassembler.complete("t", &provider);
        assert!(response.success);
        // The first delivery of chunk 0 wins.
        assert_eq!(response.content_hash, provider.hash(b"ABCD"));
    }

    #[test]
    fn missing_chunks_incomplete() {
        let provider = Ed25519Provider::from_seed([3u8; 32]);
        let reassembler = ChunkReassembler::new();
        reassembler.accept(chunk("t", 0, 3, b"A")).unwrap();
        let response = reassembler.complete("t", &provider);
        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some("incomplete"));
        assert_eq!(response.total_bytes, 0);
    }

    #[test]
    fn validation_failures() {
        let reassembler = ChunkReassembler::new();
        assert!(reassembler.accept(chunk("t", 0, 0, b"A")).is_err());
        assert!(reassembler.accept(chunk("t", 5, 3, b"A")).is_err());
        assert!(reassembler
            .accept(chunk("t", 0, 2, &vec![0u8; MAX_CHUNK_BYTES + 1]))
            .is_err());
        reassembler.accept(chunk("t", 0, 2, b"A")).unwrap();
        // A different total for the same transfer is rejected.
        assert!(reassembler.accept(chunk("t", 1, 3, b"B")).is_err());
    }
}
