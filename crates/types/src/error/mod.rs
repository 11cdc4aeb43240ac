// Path: crates/types/src/error/mod.rs
//! Core error types for the HyperRAFT++ node.

use crate::AccountId;
use thiserror::Error;

/// A trait for assigning a stable, machine-readable string code to an error.
///
/// Client-visible operations map errors to these codes; they are part of the
/// wire contract and must never change for an existing variant.
pub trait ErrorCode {
    /// Returns the unique, stable string identifier for this error variant.
    fn code(&self) -> &'static str;
}

/// Errors from cryptographic operations behind the crypto port.
#[derive(Error, Debug)]
pub enum CryptoError {
    /// The signature failed cryptographic verification.
    #[error("Signature verification failed")]
    InvalidSignature,
    /// The provided key material is malformed or invalid.
    #[error("Invalid cryptographic key: {0}")]
    InvalidKey(String),
    /// A generic failure in the underlying cryptographic library.
    #[error("Cryptographic operation failed: {0}")]
    OperationFailed(String),
}

impl ErrorCode for CryptoError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidSignature => "CRYPTO_INVALID_SIGNATURE",
            Self::InvalidKey(_) => "CRYPTO_INVALID_KEY",
            Self::OperationFailed(_) => "CRYPTO_OPERATION_FAILED",
        }
    }
}

/// A canonical decode failure for a state-resident blob.
#[derive(Error, Debug)]
#[error("State decode error: {0}")]
pub struct StateDecodeError(pub String);

impl ErrorCode for StateDecodeError {
    fn code(&self) -> &'static str {
        "STATE_DECODE_ERROR"
    }
}

/// Errors from the append-only log store port.
#[derive(Error, Debug)]
pub enum LogStoreError {
    /// An append did not continue directly from the last stored height.
    #[error("Out-of-order append. Expected height {expected}, got {got}")]
    OutOfOrder {
        /// The height the store expected next.
        expected: u64,
        /// The first height of the rejected batch.
        got: u64,
    },
    /// A truncation would have removed an entry already marked committed.
    /// This is a safety violation; the process must halt.
    #[error("Refusing to truncate committed entries: from {from}, committed up to {committed}")]
    CommittedTruncation {
        /// The first height of the requested truncation.
        from: u64,
        /// The highest committed height in the store.
        committed: u64,
    },
    /// A snapshot failed its integrity check on load. Fatal.
    #[error("Snapshot corrupt: {0}")]
    SnapshotCorrupt(String),
    /// The requested range is not present in the store.
    #[error("Log range not found: {0}")]
    NotFound(u64),
    /// An error occurred in the storage backend.
    #[error("Log store backend error: {0}")]
    Backend(String),
}

impl LogStoreError {
    /// True for conditions that must halt the process.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::CommittedTruncation { .. } | Self::SnapshotCorrupt(_)
        )
    }
}

impl ErrorCode for LogStoreError {
    fn code(&self) -> &'static str {
        match self {
            Self::OutOfOrder { .. } => "LOG_OUT_OF_ORDER",
            Self::CommittedTruncation { .. } => "LOG_COMMITTED_TRUNCATION",
            Self::SnapshotCorrupt(_) => "LOG_SNAPSHOT_CORRUPT",
            Self::NotFound(_) => "LOG_NOT_FOUND",
            Self::Backend(_) => "LOG_BACKEND_ERROR",
        }
    }
}

/// Errors from the transport port. All variants are retried internally with
/// bounded backoff; consensus tolerates drops.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The peer could not be reached.
    #[error("Peer unreachable: {0}")]
    PeerUnreachable(AccountId),
    /// An open stream was aborted before completion.
    #[error("Stream aborted by peer {0}")]
    StreamAborted(AccountId),
    /// The transport has been shut down.
    #[error("Transport closed")]
    Closed,
}

impl ErrorCode for TransportError {
    fn code(&self) -> &'static str {
        match self {
            Self::PeerUnreachable(_) => "TRANSPORT_PEER_UNREACHABLE",
            Self::StreamAborted(_) => "TRANSPORT_STREAM_ABORTED",
            Self::Closed => "TRANSPORT_CLOSED",
        }
    }
}

/// Errors related to the consensus engine.
#[derive(Error, Debug)]
pub enum ConsensusError {
    /// A message carried a term below the receiver's current term.
    #[error("Stale term {got}, current term is {current}")]
    StaleTerm {
        /// The term carried by the message.
        got: u64,
        /// The receiver's current term.
        current: u64,
    },
    /// An `AppendEntries` did not match the follower's log at the expected
    /// position. Carries the follower's last height as a back-off hint.
    #[error("Inconsistent log prefix at height {expected_height}; follower log ends at {hint}")]
    InconsistentPrefix {
        /// The height the leader assumed was already matched.
        expected_height: u64,
        /// The follower's actual last height, for next-index back-off.
        hint: u64,
    },
    /// A validator emitted a second vote of the same kind for a (term, height).
    #[error("Duplicate vote from {voter} for term {term} height {height}")]
    DuplicateVote {
        /// The offending voter.
        voter: AccountId,
        /// The vote's term.
        term: u64,
        /// The vote's target height.
        height: u64,
    },
    /// A proposal did not reach its quorum before its deadline.
    #[error("Quorum not reached: {acks} of {required} acknowledgments")]
    QuorumNotReached {
        /// Acknowledgments received.
        acks: usize,
        /// Acknowledgments required.
        required: usize,
    },
    /// The operation requires leadership this node does not hold.
    #[error("Not the leader; current leader is {0:?}")]
    NotLeader(Option<AccountId>),
    /// A membership change was proposed while another is still in flight.
    #[error("A membership change is already in flight at height {0}")]
    MembershipChangeInFlight(u64),
    /// A signature in a consensus message was invalid.
    #[error("Invalid signature in consensus message from {0}")]
    InvalidSignature(AccountId),
    /// The proposer is not an active validator in the current configuration.
    #[error("Proposer {0} is not active in the current configuration")]
    NotActive(AccountId),
    /// An error from the log store. Fatal variants halt the consensus loop.
    #[error("Log store error: {0}")]
    Storage(#[from] LogStoreError),
    /// An error from the state machine apply path.
    #[error("Apply error: {0}")]
    Apply(String),
}

impl ErrorCode for ConsensusError {
    fn code(&self) -> &'static str {
        match self {
            Self::StaleTerm { .. } => "CONSENSUS_STALE_TERM",
            Self::InconsistentPrefix { .. } => "CONSENSUS_INCONSISTENT_PREFIX",
            Self::DuplicateVote { .. } => "CONSENSUS_DUPLICATE_VOTE",
            Self::QuorumNotReached { .. } => "CONSENSUS_QUORUM_NOT_REACHED",
            Self::NotLeader(_) => "CONSENSUS_NOT_LEADER",
            Self::MembershipChangeInFlight(_) => "CONSENSUS_MEMBERSHIP_IN_FLIGHT",
            Self::InvalidSignature(_) => "CONSENSUS_INVALID_SIGNATURE",
            Self::NotActive(_) => "CONSENSUS_NOT_ACTIVE",
            Self::Storage(_) => "CONSENSUS_STORAGE_ERROR",
            Self::Apply(_) => "CONSENSUS_APPLY_ERROR",
        }
    }
}

/// Errors from the deterministic state machine.
#[derive(Error, Debug)]
pub enum MachineError {
    /// A committed entry could not be decoded. Deterministically fatal:
    /// every correct replica fails the same way on the same entry.
    #[error("Committed entry decode failed: {0}")]
    Decode(String),
    /// Blocks were applied out of committed-height order.
    #[error("Apply out of order. Expected height {expected}, got {got}")]
    OutOfOrder {
        /// The next height the machine expects.
        expected: u64,
        /// The height of the rejected block.
        got: u64,
    },
    /// A snapshot failed its state-hash check on restore. Fatal.
    #[error("Snapshot corrupt: state hash mismatch at height {0}")]
    SnapshotCorrupt(u64),
    /// A slashing entry referenced a validator unknown to the machine.
    #[error("Unknown validator in committed entry: {0}")]
    UnknownValidator(AccountId),
}

impl ErrorCode for MachineError {
    fn code(&self) -> &'static str {
        match self {
            Self::Decode(_) => "MACHINE_DECODE_ERROR",
            Self::OutOfOrder { .. } => "MACHINE_OUT_OF_ORDER",
            Self::SnapshotCorrupt(_) => "MACHINE_SNAPSHOT_CORRUPT",
            Self::UnknownValidator(_) => "MACHINE_UNKNOWN_VALIDATOR",
        }
    }
}

/// Errors from the streaming pipeline and its admission control.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The request was malformed.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    /// The operation's deadline expired.
    #[error("Operation timed out after {0} ms")]
    Timeout(u64),
    /// The wrapped downstream dependency's circuit breaker is open.
    #[error("Downstream '{0}' unavailable (circuit open)")]
    Unavailable(&'static str),
    /// The ingress queue is at capacity.
    #[error("Pipeline queue full")]
    Full,
    /// A chunked transfer completed with missing chunks.
    #[error("Transfer '{transfer_id}' incomplete: {received} of {expected} chunks")]
    Incomplete {
        /// The transfer identifier.
        transfer_id: String,
        /// Chunks received.
        received: u32,
        /// Chunks expected.
        expected: u32,
    },
}

impl ErrorCode for PipelineError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "PIPELINE_INVALID_INPUT",
            Self::Timeout(_) => "PIPELINE_TIMEOUT",
            Self::Unavailable(_) => "PIPELINE_UNAVAILABLE",
            Self::Full => "PIPELINE_FULL",
            Self::Incomplete { .. } => "PIPELINE_INCOMPLETE",
        }
    }
}

/// Errors from the cross-chain bridge coordinator.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// The referenced transfer does not exist or has been pruned.
    #[error("Bridge transfer not found")]
    NotFound,
    /// The requested transition is not legal from the transfer's state.
    #[error("Invalid transition from {from} via {op}")]
    InvalidTransition {
        /// The transfer's current status, rendered.
        from: &'static str,
        /// The attempted operation.
        op: &'static str,
    },
    /// The oracle is not a member of the transfer's oracle set.
    #[error("Oracle {0} is not in the transfer's oracle set")]
    UnknownOracle(AccountId),
    /// Approvals did not reach the strict two-thirds quorum.
    #[error("Oracle quorum not reached: {approved} of {required} approvals")]
    QuorumNotReached {
        /// Approvals recorded.
        approved: usize,
        /// Approvals required.
        required: usize,
    },
    /// The aggregate oracle signature failed verification.
    #[error("Aggregate oracle signature invalid")]
    InvalidSignature,
    /// The request was malformed.
    #[error("Invalid bridge request: {0}")]
    InvalidRequest(String),
}

impl ErrorCode for BridgeError {
    fn code(&self) -> &'static str {
        match self {
            Self::NotFound => "BRIDGE_NOT_FOUND",
            Self::InvalidTransition { .. } => "BRIDGE_INVALID_TRANSITION",
            Self::UnknownOracle(_) => "BRIDGE_UNKNOWN_ORACLE",
            Self::QuorumNotReached { .. } => "BRIDGE_QUORUM_NOT_REACHED",
            Self::InvalidSignature => "BRIDGE_INVALID_SIGNATURE",
            Self::InvalidRequest(_) => "BRIDGE_INVALID_REQUEST",
        }
    }
}

impl From<CryptoError> for BridgeError {
    fn from(_: CryptoError) -> Self {
        BridgeError::InvalidSignature
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        assert!(LogStoreError::CommittedTruncation { from: 3, committed: 5 }.is_fatal());
        assert!(LogStoreError::SnapshotCorrupt("crc".into()).is_fatal());
        assert!(!LogStoreError::OutOfOrder { expected: 2, got: 5 }.is_fatal());
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(
            LogStoreError::OutOfOrder { expected: 1, got: 2 }.code(),
            "LOG_OUT_OF_ORDER"
        );
        assert_eq!(
            ConsensusError::StaleTerm { got: 1, current: 2 }.code(),
            "CONSENSUS_STALE_TERM"
        );
        assert_eq!(PipelineError::Full.code(), "PIPELINE_FULL");
        assert_eq!(BridgeError::NotFound.code(), "BRIDGE_NOT_FOUND");
    }
}
