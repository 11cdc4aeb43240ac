// Path: crates/types/src/ledger.rs

//! Block, log entry and vote records.

use crate::tx::{Transaction, TxId};
use crate::validator::ClusterConfig;
use crate::{codec, AccountId, Digest, ZERO_DIGEST};
use parity_scale_codec::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// The header of a block. Hashed canonically for `prev_hash` chaining and
/// for every vote's `target_hash`.
#[derive(Encode, Decode, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    /// Position in the log, strictly monotonic from 1.
    pub height: u64,
    /// The election epoch in which the block was proposed.
    pub term: u64,
    /// Hash of the previous block's header; all-zero at height 1.
    pub prev_hash: Digest,
    /// Merkle root over the included transaction ids.
    pub tx_root: Digest,
    /// The proposing leader.
    pub proposer_id: AccountId,
    /// Proposal wall-clock time in milliseconds. Informational only; never
    /// an input to any safety decision.
    pub timestamp_ms: u64,
}

impl BlockHeader {
    /// The canonical bytes whose hash identifies this block.
    pub fn encoded(&self) -> Vec<u8> {
        codec::to_bytes_canonical(self)
    }
}

/// A non-transaction payload carried by a committed entry.
#[derive(Encode, Decode, Debug, Clone, PartialEq, Eq)]
pub enum SpecialEntry {
    /// A membership change. Takes effect at the height after commit.
    ConfigChange(ClusterConfig),
    /// Evidence of proposer equivocation; the state machine slashes on it.
    Evidence(EquivocationProof),
}

/// A log entry: an ordered group of transactions under a header, or a
/// special entry (membership change, equivocation evidence).
#[derive(Encode, Decode, Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// The block header.
    pub header: BlockHeader,
    /// Ordered transactions. Empty when `special` is set.
    pub transactions: Vec<Transaction>,
    /// Optional special payload; a block carries either transactions or a
    /// special entry, never both.
    pub special: Option<SpecialEntry>,
    /// The proposer's signature over the canonical header bytes. Not part
    /// of the block hash; two signed headers at one `(term, height)` are
    /// self-contained equivocation evidence.
    pub proposer_signature: Vec<u8>,
}

impl Block {
    /// Computes the block hash with the given digest function.
    pub fn hash_with(&self, hash: impl Fn(&[u8]) -> Digest) -> Digest {
        hash(&self.header.encoded())
    }
}

/// Computes the Merkle root over an ordered list of transaction ids.
///
/// An empty list yields the all-zero digest. Odd levels promote the final
/// node unchanged rather than duplicating it.
pub fn merkle_root(ids: &[TxId], hash: impl Fn(&[u8]) -> Digest) -> Digest {
    if ids.is_empty() {
        return ZERO_DIGEST;
    }
    let mut level: Vec<Digest> = ids.iter().map(|id| id.0).collect();
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        let mut chunks = level.chunks_exact(2);
        for pair in &mut chunks {
            let mut buf = [0u8; 64];
            buf[..32].copy_from_slice(&pair[0]);
            buf[32..].copy_from_slice(&pair[1]);
            next.push(hash(&buf));
        }
        if let [last] = chunks.remainder() {
            next.push(*last);
        }
        level = next;
    }
    level.first().copied().unwrap_or(ZERO_DIGEST)
}

/// The two phases of voting on a block.
#[derive(Encode, Decode, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VoteKind {
    /// A non-binding vote used to probe quorum before finalization.
    PreVote,
    /// The binding vote that counts toward commitment.
    CommitVote,
}

/// A signed vote on a block at a specific `(term, height)`.
///
/// A voter emits at most one vote of each kind per `(term, height)`, and both
/// must target the same hash.
#[derive(Encode, Decode, Debug, Clone, PartialEq, Eq)]
pub struct Vote {
    /// The voting validator.
    pub voter_id: AccountId,
    /// The vote's term.
    pub term: u64,
    /// The height of the block voted on.
    pub target_height: u64,
    /// The hash of the block voted on.
    pub target_hash: Digest,
    /// Which voting phase this is.
    pub kind: VoteKind,
    /// Signature over [`Vote::signing_bytes`], valid under `voter_id`.
    pub signature: Vec<u8>,
}

impl Vote {
    /// The canonical bytes covered by the vote signature.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let unsigned = (
            &self.voter_id,
            self.term,
            self.target_height,
            &self.target_hash,
            &self.kind,
        );
        codec::to_bytes_canonical(&unsigned)
    }
}

/// Durable per-node consensus metadata. Must reach stable storage before
/// any message depending on it is emitted.
#[derive(Encode, Decode, Debug, Clone, Default, PartialEq, Eq)]
pub struct HardState {
    /// The highest term this node has seen.
    pub current_term: u64,
    /// The candidate this node voted for in `current_term`, if any.
    pub voted_for: Option<AccountId>,
    /// The highest height known committed.
    pub commit_index: u64,
}

/// A serialized state machine image at a committed height, used to truncate
/// the log and to bootstrap lagging replicas.
#[derive(Encode, Decode, Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// The height the snapshot covers, inclusive.
    pub height: u64,
    /// The term of the entry at `height`.
    pub last_term: u64,
    /// The hash of the block header at `height`, so a restored replica can
    /// verify the chain continues from the snapshot.
    pub last_hash: Digest,
    /// The state hash at `height`; restore must reproduce it exactly.
    pub state_hash: Digest,
    /// The opaque serialized state.
    pub state_blob: Vec<u8>,
}

/// Cryptographic proof that a proposer signed two distinct blocks at the
/// same `(term, height)`.
///
/// The engine surfaces this as evidence; a committed proof entry reduces the
/// offender's stake and jails it.
#[derive(Encode, Decode, Debug, Clone, PartialEq, Eq)]
pub struct EquivocationProof {
    /// The equivocating proposer.
    pub offender: AccountId,
    /// The shared term.
    pub term: u64,
    /// The shared height.
    pub height: u64,
    /// The first conflicting header.
    pub first: BlockHeader,
    /// The proposer's signature over `first`.
    pub first_signature: Vec<u8>,
    /// The second conflicting header.
    pub second: BlockHeader,
    /// The proposer's signature over `second`.
    pub second_signature: Vec<u8>,
}

impl EquivocationProof {
    /// Structural validity: same proposer, same `(term, height)`, and the
    /// two headers differ. Signature validity is checked at the crypto port.
    pub fn is_structurally_valid(&self) -> bool {
        self.first.proposer_id == self.offender
            && self.second.proposer_id == self.offender
            && self.first.term == self.term
            && self.second.term == self.term
            && self.first.height == self.height
            && self.second.height == self.height
            && self.first != self.second
    }
}
