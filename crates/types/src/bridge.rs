// Path: crates/types/src/bridge.rs

//! Cross-chain bridge transfer records and oracle verification state.

use crate::{codec, AccountId, Digest};
use parity_scale_codec::{Decode, Encode};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// The unique identifier of a bridge transfer.
#[derive(
    Encode, Decode, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub struct BridgeId(pub Digest);

impl std::fmt::Display for BridgeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(&self.0[..8]))
    }
}

/// The lifecycle status of a bridge transfer.
///
/// Legal transitions: `Pending -> Verified -> Executed` and
/// `Pending -> TimedOut -> Refunded`. `Executed` and `Refunded` are terminal
/// and mutually exclusive.
#[derive(Encode, Decode, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeStatus {
    /// Awaiting oracle quorum.
    Pending,
    /// Oracle quorum reached and aggregate signature verified.
    Verified,
    /// The destination-chain transaction is confirmed. Terminal.
    Executed,
    /// The deadline passed (or rejections reached threshold) before quorum.
    TimedOut,
    /// The source chain confirmed the refund. Terminal.
    Refunded,
}

impl BridgeStatus {
    /// The stable label used for metrics, logs and the status surface.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Verified => "verified",
            Self::Executed => "executed",
            Self::TimedOut => "timed_out",
            Self::Refunded => "refunded",
        }
    }

    /// True for states from which no further transition is legal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Executed | Self::Refunded)
    }
}

/// A single oracle's recorded verdict on a transfer.
#[derive(Encode, Decode, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct OracleVerification {
    /// Whether the oracle approved the transfer.
    pub approved: bool,
    /// The oracle's signature over the transfer's attestation bytes.
    pub signature: Vec<u8>,
}

/// A request to open a cross-chain transfer.
#[derive(Encode, Decode, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BridgeRequest {
    /// The chain the asset leaves.
    pub source_chain: String,
    /// The chain the asset arrives on.
    pub dest_chain: String,
    /// The asset symbol, opaque to the core.
    pub asset: String,
    /// Transfer amount in the asset's smallest unit.
    pub amount: u128,
    /// The destination-chain recipient, opaque bytes.
    pub recipient: Vec<u8>,
    /// The oracles whose quorum authorizes the transfer.
    pub oracle_set: BTreeSet<AccountId>,
    /// Seconds until the transfer times out.
    pub timeout_s: u64,
}

impl BridgeRequest {
    /// The canonical bytes whose hash yields the transfer's [`BridgeId`].
    pub fn id_preimage(&self, initiated_at_ms: u64) -> Vec<u8> {
        codec::to_bytes_canonical(&(self, initiated_at_ms))
    }
}

/// The full state of one cross-chain transfer.
///
/// Persisted until terminal plus a retention window.
#[derive(Encode, Decode, Debug, Clone, PartialEq, Eq)]
pub struct BridgeTransfer {
    /// Unique transfer id.
    pub bridge_id: BridgeId,
    /// The originating request.
    pub request: BridgeRequest,
    /// Current lifecycle status.
    pub status: BridgeStatus,
    /// Milliseconds since epoch at which the transfer times out.
    pub timeout_at_ms: u64,
    /// Verdicts recorded so far, at most one per oracle.
    pub verifications: BTreeMap<AccountId, OracleVerification>,
    /// The destination-chain transaction hash, set on execution.
    pub dest_tx_hash: Option<Digest>,
}

impl BridgeTransfer {
    /// The number of recorded approvals.
    pub fn approvals(&self) -> usize {
        self.verifications.values().filter(|v| v.approved).count()
    }

    /// The number of recorded rejections.
    pub fn rejections(&self) -> usize {
        self.verifications.values().filter(|v| !v.approved).count()
    }

    /// Approvals needed for the strict `> 2/3` quorum over the oracle set.
    pub fn approvals_required(&self) -> usize {
        let n = self.request.oracle_set.len();
        (n * 2) / 3 + 1
    }

    /// Rejections at which the transfer fails fast: `⌈n/3⌉ + 1`.
    pub fn rejections_threshold(&self) -> usize {
        let n = self.request.oracle_set.len();
        n.div_ceil(3) + 1
    }

    /// The message every oracle signs when attesting this transfer.
    pub fn attestation_bytes(&self) -> Vec<u8> {
        codec::to_bytes_canonical(&(&self.bridge_id, &self.request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer(oracles: u8) -> BridgeTransfer {
        BridgeTransfer {
            bridge_id: BridgeId([1u8; 32]),
            request: BridgeRequest {
                source_chain: "alpha".into(),
                dest_chain: "beta".into(),
                asset: "AUR".into(),
                amount: 100,
                recipient: vec![0xEE],
                oracle_set: (0..oracles).map(|b| AccountId([b; 32])).collect(),
                timeout_s: 30,
            },
            status: BridgeStatus::Pending,
            timeout_at_ms: 0,
            verifications: BTreeMap::new(),
            dest_tx_hash: None,
        }
    }

    #[test]
    fn quorum_thresholds() {
        let t = transfer(4);
        // Strict > 2/3 of 4 oracles means 3 approvals.
        assert_eq!(t.approvals_required(), 3);
        // ⌈4/3⌉ + 1 = 3 rejections fail fast.
        assert_eq!(t.rejections_threshold(), 3);

        let t = transfer(6);
        assert_eq!(t.approvals_required(), 5);
        assert_eq!(t.rejections_threshold(), 3);
    }

    #[test]
    fn terminal_states() {
        assert!(BridgeStatus::Executed.is_terminal());
        assert!(BridgeStatus::Refunded.is_terminal());
        assert!(!BridgeStatus::TimedOut.is_terminal());
        assert!(!BridgeStatus::Pending.is_terminal());
    }
}
