// Path: crates/api/src/machine.rs

//! The state machine apply port and the cluster-config view.

use async_trait::async_trait;
use hyperraft_types::error::MachineError;
use hyperraft_types::ledger::{Block, Snapshot};
use hyperraft_types::tx::Receipt;
use hyperraft_types::validator::ClusterConfig;
use hyperraft_types::Digest;

/// The result of applying one committed block.
#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    /// One receipt per transaction, in block order.
    pub receipts: Vec<Receipt>,
    /// The state hash after the block: `hash(prev ‖ hash_each(receipts))`.
    pub new_state_hash: Digest,
}

/// Deterministic application of committed entries.
///
/// `apply` is total and performs no external I/O; replaying the same
/// committed prefix on two fresh machines yields identical state hashes at
/// every height.
#[async_trait]
pub trait StateMachine: Send + Sync {
    /// Applies the block at exactly `last_applied + 1`.
    async fn apply(&self, block: &Block) -> Result<ApplyOutcome, MachineError>;

    /// Produces a snapshot of the current state at `last_applied`.
    async fn snapshot(&self) -> Result<Snapshot, MachineError>;

    /// Replaces the state with `snapshot`, verifying its state hash. Fails
    /// with the fatal [`MachineError::SnapshotCorrupt`] on mismatch.
    async fn restore(&self, snapshot: &Snapshot) -> Result<(), MachineError>;

    /// The height of the last applied block; 0 before any apply.
    fn last_applied(&self) -> u64;

    /// The current state hash.
    fn state_hash(&self) -> Digest;
}

/// Read-only membership view consumed by consensus.
///
/// Committed config changes take effect at the height after their commit;
/// `config_for_height` selects accordingly.
pub trait ClusterConfigView: Send + Sync {
    /// The config effective for proposals at the machine's current height.
    fn current(&self) -> ClusterConfig;

    /// The config effective at `height`.
    fn config_for_height(&self, height: u64) -> ClusterConfig;
}
