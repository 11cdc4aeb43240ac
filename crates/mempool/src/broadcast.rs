// Path: crates/mempool/src/broadcast.rs

//! At-most-once gossip bookkeeping.
//!
//! A transaction is relayed to each peer at most once; the tracker records
//! which `(peer, tx_id)` pairs have already been sent. Entries for a
//! transaction are dropped once it leaves the pool.

use hyperraft_types::tx::TxId;
use hyperraft_types::AccountId;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

/// Per-peer seen sets for transaction gossip.
#[derive(Default)]
pub struct BroadcastTracker {
    seen: Mutex<HashMap<AccountId, HashSet<TxId>>>,
}

impl BroadcastTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the subset of `peers` that have not yet been sent `tx_id`,
    /// marking them as sent. Call immediately before transmitting.
    pub fn claim_targets(&self, peers: &[AccountId], tx_id: TxId) -> Vec<AccountId> {
        let mut seen = self.seen.lock();
        peers
            .iter()
            .filter(|peer| seen.entry(**peer).or_default().insert(tx_id))
            .copied()
            .collect()
    }

    /// Records that `tx_id` arrived from `peer`, so it is never echoed back.
    pub fn mark_received(&self, peer: AccountId, tx_id: TxId) {
        self.seen.lock().entry(peer).or_default().insert(tx_id);
    }

    /// Drops bookkeeping for transactions that left the pool.
    pub fn forget(&self, tx_ids: &[TxId]) {
        let mut seen = self.seen.lock();
        for set in seen.values_mut() {
            for id in tx_ids {
                set.remove(id);
            }
        }
        seen.retain(|_, set| !set.is_empty());
    }
}
