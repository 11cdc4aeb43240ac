// Path: crates/types/src/tx.rs

//! Transaction, batch and receipt records.

use crate::{AccountId, Digest};
use parity_scale_codec::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// The unique identifier of a transaction: `hash(payload ‖ nonce ‖ sender)`.
#[derive(
    Encode, Decode, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub struct TxId(pub Digest);

impl std::fmt::Display for TxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// An immutable, signed transaction.
///
/// `tx_id` is derived from the payload, nonce and sender; the signature is
/// opaque here and verified through the crypto port.
#[derive(Encode, Decode, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    /// Unique id; must equal the hash of [`Transaction::id_preimage`].
    pub tx_id: TxId,
    /// Opaque application payload.
    pub payload: Vec<u8>,
    /// Monotonic per-sender nonce.
    pub nonce: u64,
    /// The sender's identity handle.
    pub sender: AccountId,
    /// Signature over [`Transaction::signing_bytes`], valid under `sender`.
    pub signature: Vec<u8>,
}

impl Transaction {
    /// The bytes whose hash defines `tx_id`: `payload ‖ nonce_be ‖ sender`.
    pub fn id_preimage(payload: &[u8], nonce: u64, sender: &AccountId) -> Vec<u8> {
        let mut out = Vec::with_capacity(payload.len() + 8 + 32);
        out.extend_from_slice(payload);
        out.extend_from_slice(&nonce.to_be_bytes());
        out.extend_from_slice(&sender.0);
        out
    }

    /// The bytes covered by the sender's signature. Signing covers the id
    /// preimage, which binds payload, nonce and sender in one pass.
    pub fn signing_bytes(&self) -> Vec<u8> {
        Self::id_preimage(&self.payload, self.nonce, &self.sender)
    }
}

/// The priority class of a batch, in strictly decreasing scheduling order.
#[derive(
    Encode,
    Decode,
    Serialize,
    Deserialize,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
)]
pub enum PriorityClass {
    /// Hard-real-time traffic; 2 ms end-to-end SLA by default.
    Critical,
    /// Latency-sensitive traffic; 5 ms SLA by default.
    High,
    /// Everything else; 20 ms SLA by default.
    Normal,
}

impl PriorityClass {
    /// All classes in scheduling order.
    pub const ALL: [PriorityClass; 3] =
        [PriorityClass::Critical, PriorityClass::High, PriorityClass::Normal];

    /// The stable label used for metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Normal => "normal",
        }
    }
}

/// Hard cap on the number of transactions a batch may carry.
pub const MAX_BATCH: usize = 10_000;

/// An ordered group of transactions moving through the pipeline together.
///
/// Ephemeral: lives only between pipeline ingress and block formation.
#[derive(Encode, Decode, Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// Identifier assigned at ingress; unique per stream.
    pub batch_id: u64,
    /// The scheduling class for every transaction in the batch.
    pub priority: PriorityClass,
    /// Optional routing hint for the shard aggregator.
    pub shard_hint: Option<u32>,
    /// The transactions, in submission order. Never exceeds [`MAX_BATCH`].
    pub txs: Vec<Transaction>,
}

/// The terminal status of a transaction after apply.
#[derive(Encode, Decode, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum ReceiptStatus {
    /// The transaction was applied successfully.
    Applied,
    /// The transaction was rejected with a stable error code.
    Rejected(String),
}

/// The outcome of a single transaction, produced by the state machine at
/// commit and streamed back to the submitting client.
#[derive(Encode, Decode, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    /// The transaction this receipt is for.
    pub tx_id: TxId,
    /// The height of the block that committed the transaction.
    pub height: u64,
    /// Terminal status.
    pub status: ReceiptStatus,
}

impl Receipt {
    /// True iff the transaction reached a non-error outcome.
    pub fn is_ok(&self) -> bool {
        matches!(self.status, ReceiptStatus::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_preimage_layout() {
        let sender = AccountId([7u8; 32]);
        let pre = Transaction::id_preimage(b"abc", 5, &sender);
        assert_eq!(&pre[..3], b"abc");
        assert_eq!(&pre[3..11], &5u64.to_be_bytes());
        assert_eq!(&pre[11..], &[7u8; 32]);
    }

    #[test]
    fn priority_order() {
        assert!(PriorityClass::Critical < PriorityClass::High);
        assert!(PriorityClass::High < PriorityClass::Normal);
    }
}
