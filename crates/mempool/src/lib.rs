// Path: crates/mempool/src/lib.rs
#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::todo,
        clippy::unimplemented,
        clippy::indexing_slicing
    )
)]
//! A high-performance, sharded mempool.
//!
//! Account queues are sharded across multiple locks to minimize contention
//! between the admission paths and the leader's batch-taker. Admission
//! verifies the transaction id and signature, enforces per-sender nonce
//! order, and dedups by id. Eviction is commit-driven plus TTL.
//!
//! Each account parks its transactions in a single nonce-keyed map above a
//! moving floor; the selectable set is the gap-free run starting at the
//! floor, derived at selection time rather than maintained as a separate
//! queue. Filling a gap or punching one therefore needs no rebalancing.

/// At-most-once gossip bookkeeping.
pub mod broadcast;

pub use broadcast::BroadcastTracker;

use ahash::RandomState;
use hyperraft_api::CryptoProvider;
use hyperraft_telemetry::mempool_metrics;
use hyperraft_types::ledger::Block;
use hyperraft_types::tx::{Batch, PriorityClass, Transaction, TxId};
use hyperraft_types::AccountId;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::{BuildHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

const SHARD_COUNT: usize = 64;

/// The outcome of attempting to admit a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmitOutcome {
    /// Admitted and pending inclusion.
    Accepted,
    /// A transaction with the same id is already known.
    Duplicate,
    /// The transaction itself is malformed (bad id, bad signature, stale
    /// nonce).
    Invalid(String),
    /// The pool cannot take it right now (capacity).
    Rejected(String),
}

struct PoolEntry {
    tx: Transaction,
    priority: PriorityClass,
    admitted_at: Instant,
}

/// One sender's parked transactions.
///
/// `next_nonce` is the account's committed floor. `entries` holds every
/// parked transaction keyed by nonce; the selectable prefix is whatever
/// contiguous run starts at the floor, and anything past the first gap
/// simply waits for the gap to fill. A later transaction with a nonce that
/// is already parked replaces the earlier one.
#[derive(Default)]
struct AccountQueue {
    next_nonce: u64,
    entries: BTreeMap<u64, PoolEntry>,
}

impl AccountQueue {
    /// Parks a transaction. Returns the entry it replaced, if the nonce
    /// was already occupied.
    fn park(&mut self, entry: PoolEntry) -> Result<Option<PoolEntry>, String> {
        let nonce = entry.tx.nonce;
        if nonce < self.next_nonce {
            return Err(format!(
                "nonce {nonce} below account floor {}",
                self.next_nonce
            ));
        }
        Ok(self.entries.insert(nonce, entry))
    }

    /// The gap-free run of entries starting at the account floor, in nonce
    /// order. Everything past the first missing nonce is excluded.
    fn ready_run(&self) -> impl Iterator<Item = &PoolEntry> {
        let mut expected = self.next_nonce;
        self.entries
            .range(self.next_nonce..)
            .take_while(move |(nonce, _)| {
                let contiguous = **nonce == expected;
                expected += 1;
                contiguous
            })
            .map(|(_, entry)| entry)
    }

    /// Raises the account floor and drops everything now below it in one
    /// split. Returns the dropped transaction ids.
    fn raise_floor(&mut self, floor: u64) -> Vec<TxId> {
        self.next_nonce = self.next_nonce.max(floor);
        let kept = self.entries.split_off(&self.next_nonce);
        let dropped = std::mem::replace(&mut self.entries, kept);
        dropped.into_values().map(|e| e.tx.tx_id).collect()
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The shared transaction pool.
pub struct Mempool {
    shards: Vec<Mutex<HashMap<AccountId, AccountQueue>>>,
    known: Vec<Mutex<HashSet<TxId>>>,
    hasher: RandomState,
    /// One guard per priority class so only one taker drains a class at a time.
    takers: [Mutex<()>; 3],
    capacity: usize,
    ttl: Duration,
    total_count: AtomicUsize,
    next_batch_id: AtomicU64,
}

impl Mempool {
    /// Creates an empty pool with the given capacity and entry TTL.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let mut shards = Vec::with_capacity(SHARD_COUNT);
        let mut known = Vec::with_capacity(SHARD_COUNT);
        for _ in 0..SHARD_COUNT {
            shards.push(Mutex::new(HashMap::new()));
            known.push(Mutex::new(HashSet::new()));
        }
        Self {
            shards,
            known,
            hasher: RandomState::new(),
            takers: [Mutex::new(()), Mutex::new(()), Mutex::new(())],
            capacity,
            ttl,
            total_count: AtomicUsize::new(0),
            next_batch_id: AtomicU64::new(1),
        }
    }

    fn shard_index<K: Hash>(&self, key: &K) -> usize {
        let mut h = self.hasher.build_hasher();
        key.hash(&mut h);
        (h.finish() as usize) % SHARD_COUNT
    }

    fn shard_of(&self, account: &AccountId) -> &Mutex<HashMap<AccountId, AccountQueue>> {
        self.shards
            .get(self.shard_index(account))
            .unwrap_or_else(|| unreachable!("shard index is modulo the shard count"))
    }

    fn known_of(&self, id: &TxId) -> &Mutex<HashSet<TxId>> {
        self.known
            .get(self.shard_index(id))
            .unwrap_or_else(|| unreachable!("shard index is modulo the shard count"))
    }

    fn forget_known(&self, ids: &[TxId]) {
        for id in ids {
            self.known_of(id).lock().remove(id);
        }
    }

    /// The total number of transactions in the pool.
    pub fn len(&self) -> usize {
        self.total_count.load(Ordering::Relaxed)
    }

    /// Returns `true` if the pool contains no transactions.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if the pool already tracks `tx_id`.
    pub fn contains(&self, tx_id: &TxId) -> bool {
        self.known_of(tx_id).lock().contains(tx_id)
    }

    /// Validates and admits a transaction at the given priority.
    ///
    /// Checks, in order: id integrity, signature, duplication, capacity,
    /// then nonce ordering within the sender's queue. Admitting a second
    /// transaction at an already-parked nonce replaces the first.
    pub fn admit(
        &self,
        tx: Transaction,
        priority: PriorityClass,
        crypto: &dyn CryptoProvider,
    ) -> AdmitOutcome {
        let expected_id = crypto.hash(&Transaction::id_preimage(
            &tx.payload,
            tx.nonce,
            &tx.sender,
        ));
        if tx.tx_id.0 != expected_id {
            mempool_metrics().inc_rejected("bad_id");
            return AdmitOutcome::Invalid("tx_id does not match contents".into());
        }
        if crypto
            .verify(&tx.sender, &tx.signing_bytes(), &tx.signature)
            .is_err()
        {
            mempool_metrics().inc_rejected("bad_signature");
            return AdmitOutcome::Invalid("invalid signature".into());
        }
        if self.contains(&tx.tx_id) {
            mempool_metrics().inc_rejected("duplicate");
            return AdmitOutcome::Duplicate;
        }
        if self.len() >= self.capacity {
            mempool_metrics().inc_rejected("full");
            return AdmitOutcome::Rejected("full".into());
        }

        let tx_id = tx.tx_id;
        let sender = tx.sender;
        let entry = PoolEntry {
            tx,
            priority,
            admitted_at: Instant::now(),
        };

        let result = {
            let mut shard = self.shard_of(&sender).lock();
            let queue = shard.entry(sender).or_default();
            queue.park(entry)
        };
        match result {
            Ok(replaced) => {
                self.known_of(&tx_id).lock().insert(tx_id);
                if let Some(old) = replaced {
                    // Same sender, same nonce: the newcomer stands in for
                    // the old transaction, which leaves the pool.
                    self.forget_known(&[old.tx.tx_id]);
                } else {
                    self.total_count.fetch_add(1, Ordering::Relaxed);
                }
                mempool_metrics().inc_admitted();
                mempool_metrics().set_pool_size(self.len() as f64);
                AdmitOutcome::Accepted
            }
            Err(reason) => {
                mempool_metrics().inc_rejected("stale_nonce");
                AdmitOutcome::Invalid(reason)
            }
        }
    }

    /// Selects up to `limit` ready transactions, optionally restricted to one
    /// priority class. Holds the class taker guard for the duration so at
    /// most one taker drains a class at a time.
    pub fn take_batch(&self, limit: usize, priority: Option<PriorityClass>) -> Batch {
        let class = priority.unwrap_or(PriorityClass::Normal);
        let guard_index = match class {
            PriorityClass::Critical => 0,
            PriorityClass::High => 1,
            PriorityClass::Normal => 2,
        };
        let _taker = self
            .takers
            .get(guard_index)
            .unwrap_or_else(|| unreachable!("three taker guards"))
            .lock();

        let mut selected = Vec::with_capacity(limit.min(1024));
        'outer: for shard in &self.shards {
            let guard = shard.lock();
            for queue in guard.values() {
                for entry in queue.ready_run() {
                    if selected.len() >= limit {
                        break 'outer;
                    }
                    if priority.is_none() || entry.priority == class {
                        selected.push(entry.tx.clone());
                    }
                }
            }
        }

        Batch {
            batch_id: self.next_batch_id.fetch_add(1, Ordering::Relaxed),
            priority: class,
            shard_hint: None,
            txs: selected,
        }
    }

    /// Removes specific transactions by id. Used when a proposal excludes
    /// transactions the taker had selected. Leaving a nonce hole behind is
    /// fine: the ready run just ends earlier until the hole refills.
    pub fn remove(&self, tx_ids: &[TxId]) {
        let wanted: HashSet<&TxId> = tx_ids.iter().collect();
        let mut removed = 0usize;
        for shard in &self.shards {
            let mut guard = shard.lock();
            for queue in guard.values_mut() {
                queue.entries.retain(|_, entry| {
                    let hit = wanted.contains(&entry.tx.tx_id);
                    if hit {
                        removed += 1;
                    }
                    !hit
                });
            }
            guard.retain(|_, q| !q.is_empty());
        }
        self.forget_known(tx_ids);
        self.total_count.fetch_sub(removed, Ordering::Relaxed);
        mempool_metrics().set_pool_size(self.len() as f64);
    }

    /// Commit-driven eviction: drops every transaction included in the
    /// committed blocks and advances the senders' nonce floors.
    pub fn evict_committed(&self, blocks: &[Block]) {
        let mut floors: HashMap<AccountId, u64> = HashMap::new();
        let mut committed_ids = Vec::new();
        for block in blocks {
            for tx in &block.transactions {
                committed_ids.push(tx.tx_id);
                let floor = floors.entry(tx.sender).or_insert(0);
                *floor = (*floor).max(tx.nonce + 1);
            }
        }
        if committed_ids.is_empty() {
            return;
        }

        // Group updates by shard to take each lock once.
        let mut by_shard: HashMap<usize, Vec<(AccountId, u64)>> = HashMap::new();
        for (account, floor) in floors {
            by_shard
                .entry(self.shard_index(&account))
                .or_default()
                .push((account, floor));
        }
        let mut dropped_ids = Vec::new();
        for (idx, updates) in by_shard {
            if let Some(shard) = self.shards.get(idx) {
                let mut guard = shard.lock();
                for (account, floor) in updates {
                    if let Some(queue) = guard.get_mut(&account) {
                        dropped_ids.extend(queue.raise_floor(floor));
                    }
                }
                guard.retain(|_, q| !q.is_empty());
            }
        }
        self.forget_known(&dropped_ids);
        self.forget_known(&committed_ids);
        let removed = dropped_ids.len();
        self.total_count.fetch_sub(removed, Ordering::Relaxed);
        mempool_metrics().inc_evicted(removed as u64);
        mempool_metrics().set_pool_size(self.len() as f64);
        tracing::debug!(target: "mempool", removed, "commit-driven eviction");
    }

    /// TTL eviction sweep; returns the number of expired transactions.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let mut expired_ids = Vec::new();
        for shard in &self.shards {
            let mut guard = shard.lock();
            for queue in guard.values_mut() {
                queue.entries.retain(|_, entry| {
                    let expired = now.duration_since(entry.admitted_at) > self.ttl;
                    if expired {
                        expired_ids.push(entry.tx.tx_id);
                    }
                    !expired
                });
            }
            guard.retain(|_, q| !q.is_empty());
        }
        self.forget_known(&expired_ids);
        let removed = expired_ids.len();
        self.total_count.fetch_sub(removed, Ordering::Relaxed);
        if removed > 0 {
            mempool_metrics().inc_evicted(removed as u64);
            mempool_metrics().set_pool_size(self.len() as f64);
            tracing::debug!(target: "mempool", removed, "ttl eviction");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyperraft_crypto::Ed25519Provider;
    use hyperraft_types::ledger::BlockHeader;
    use hyperraft_types::ZERO_DIGEST;

    fn signed_tx(provider: &Ed25519Provider, nonce: u64, payload: &[u8]) -> Transaction {
        let sender = provider.local_id();
        let preimage = Transaction::id_preimage(payload, nonce, &sender);
        let tx_id = TxId(provider.hash(&preimage));
        let signature = provider.sign(&preimage).unwrap();
        Transaction {
            tx_id,
            payload: payload.to_vec(),
            nonce,
            sender,
            signature,
        }
    }

    fn pool() -> Mempool {
        Mempool::new(100, Duration::from_secs(60))
    }

    #[test]
    fn admit_and_take() {
        let provider = Ed25519Provider::from_seed([1u8; 32]);
        let pool = pool();
        for nonce in 0..3 {
            let outcome = pool.admit(
                signed_tx(&provider, nonce, b"p"),
                PriorityClass::Normal,
                &provider,
            );
            assert_eq!(outcome, AdmitOutcome::Accepted);
        }
        assert_eq!(pool.len(), 3);
        let batch = pool.take_batch(10, None);
        assert_eq!(batch.txs.len(), 3);
        // Nonce order within the sender.
        let nonces: Vec<u64> = batch.txs.iter().map(|t| t.nonce).collect();
        assert_eq!(nonces, vec![0, 1, 2]);
    }

    #[test]
    fn duplicate_rejected() {
        let provider = Ed25519Provider::from_seed([1u8; 32]);
        let pool = pool();
        let tx = signed_tx(&provider, 0, b"p");
        assert_eq!(
            pool.admit(tx.clone(), PriorityClass::Normal, &provider),
            AdmitOutcome::Accepted
        );
        assert_eq!(
            pool.admit(tx, PriorityClass::Normal, &provider),
            AdmitOutcome::Duplicate
        );
    }

    #[test]
    fn same_nonce_replaces() {
        let provider = Ed25519Provider::from_seed([1u8; 32]);
        let pool = pool();
        let first = signed_tx(&provider, 0, b"first");
        let second = signed_tx(&provider, 0, b"second");
        assert_eq!(
            pool.admit(first.clone(), PriorityClass::Normal, &provider),
            AdmitOutcome::Accepted
        );
        assert_eq!(
            pool.admit(second.clone(), PriorityClass::Normal, &provider),
            AdmitOutcome::Accepted
        );
        // The newcomer stands in for the replaced transaction.
        assert_eq!(pool.len(), 1);
        assert!(!pool.contains(&first.tx_id));
        assert!(pool.contains(&second.tx_id));
        let batch = pool.take_batch(10, None);
        assert_eq!(batch.txs.len(), 1);
        assert_eq!(batch.txs[0].payload, b"second");
    }

    #[test]
    fn bad_signature_invalid() {
        let provider = Ed25519Provider::from_seed([1u8; 32]);
        let pool = pool();
        let mut tx = signed_tx(&provider, 0, b"p");
        tx.signature[0] ^= 0xFF;
        assert!(matches!(
            pool.admit(tx, PriorityClass::Normal, &provider),
            AdmitOutcome::Invalid(_)
        ));
    }

    #[test]
    fn mismatched_id_invalid() {
        let provider = Ed25519Provider::from_seed([1u8; 32]);
        let pool = pool();
        let mut tx = signed_tx(&provider, 0, b"p");
        tx.tx_id = TxId([0xAB; 32]);
        assert!(matches!(
            pool.admit(tx, PriorityClass::Normal, &provider),
            AdmitOutcome::Invalid(_)
        ));
    }

    #[test]
    fn full_pool_rejects() {
        let provider = Ed25519Provider::from_seed([1u8; 32]);
        let pool = Mempool::new(2, Duration::from_secs(60));
        for nonce in 0..2 {
            pool.admit(
                signed_tx(&provider, nonce, b"p"),
                PriorityClass::Normal,
                &provider,
            );
        }
        assert_eq!(
            pool.admit(signed_tx(&provider, 2, b"p"), PriorityClass::Normal, &provider),
            AdmitOutcome::Rejected("full".into())
        );
    }

    #[test]
    fn nonce_gap_parks_until_filled() {
        let provider = Ed25519Provider::from_seed([1u8; 32]);
        let pool = pool();
        // Nonce 1 before nonce 0: parked past the gap, not selectable.
        pool.admit(signed_tx(&provider, 1, b"p"), PriorityClass::Normal, &provider);
        assert!(pool.take_batch(10, None).txs.is_empty());
        // Filling the gap exposes both.
        pool.admit(signed_tx(&provider, 0, b"p"), PriorityClass::Normal, &provider);
        assert_eq!(pool.take_batch(10, None).txs.len(), 2);
    }

    #[test]
    fn removal_shortens_the_ready_run() {
        let provider = Ed25519Provider::from_seed([1u8; 32]);
        let pool = pool();
        let txs: Vec<_> = (0..3)
            .map(|nonce| signed_tx(&provider, nonce, b"p"))
            .collect();
        for tx in &txs {
            pool.admit(tx.clone(), PriorityClass::Normal, &provider);
        }
        // Punching out the middle nonce leaves only the prefix selectable.
        pool.remove(&[txs[1].tx_id]);
        let batch = pool.take_batch(10, None);
        assert_eq!(batch.txs.len(), 1);
        assert_eq!(batch.txs[0].nonce, 0);
        // Refilling the hole restores the run.
        pool.admit(txs[1].clone(), PriorityClass::Normal, &provider);
        assert_eq!(pool.take_batch(10, None).txs.len(), 3);
    }

    #[test]
    fn priority_filter() {
        let provider = Ed25519Provider::from_seed([1u8; 32]);
        let pool = pool();
        pool.admit(signed_tx(&provider, 0, b"a"), PriorityClass::Critical, &provider);
        pool.admit(signed_tx(&provider, 1, b"b"), PriorityClass::Normal, &provider);
        let batch = pool.take_batch(10, Some(PriorityClass::Critical));
        assert_eq!(batch.txs.len(), 1);
        assert_eq!(batch.priority, PriorityClass::Critical);
    }

    #[test]
    fn commit_eviction_prunes_and_advances_floor() {
        let provider = Ed25519Provider::from_seed([1u8; 32]);
        let pool = pool();
        let tx0 = signed_tx(&provider, 0, b"p");
        let tx1 = signed_tx(&provider, 1, b"p");
        pool.admit(tx0.clone(), PriorityClass::Normal, &provider);
        pool.admit(tx1, PriorityClass::Normal, &provider);

        let block = Block {
            header: BlockHeader {
                height: 1,
                term: 1,
                prev_hash: ZERO_DIGEST,
                tx_root: ZERO_DIGEST,
                proposer_id: provider.local_id(),
                timestamp_ms: 0,
            },
            transactions: vec![tx0.clone()],
            special: None,
            proposer_signature: vec![],
        };
        pool.evict_committed(&[block]);

        assert_eq!(pool.len(), 1);
        assert!(!pool.contains(&tx0.tx_id));
        // Re-admitting the committed nonce is stale now.
        assert!(matches!(
            pool.admit(signed_tx(&provider, 0, b"q"), PriorityClass::Normal, &provider),
            AdmitOutcome::Invalid(_)
        ));
    }

    #[test]
    fn ttl_eviction() {
        let provider = Ed25519Provider::from_seed([1u8; 32]);
        let pool = Mempool::new(100, Duration::from_millis(0));
        pool.admit(signed_tx(&provider, 0, b"p"), PriorityClass::Normal, &provider);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(pool.evict_expired(), 1);
        assert!(pool.is_empty());
    }
}
