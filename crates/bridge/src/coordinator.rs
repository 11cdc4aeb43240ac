// Path: crates/bridge/src/coordinator.rs

//! The bridge coordinator.

use ahash::RandomState;
use async_trait::async_trait;
use hyperraft_api::CryptoProvider;
use hyperraft_telemetry::bridge_metrics;
use hyperraft_types::bridge::{
    BridgeId, BridgeRequest, BridgeStatus, BridgeTransfer, OracleVerification,
};
use hyperraft_types::config::BridgeConfig;
use hyperraft_types::error::BridgeError;
use hyperraft_types::{codec, AccountId, Digest};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::hash::{BuildHasher, Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;

const SHARD_COUNT: usize = 16;

/// Most `initiate` requests accepted per batch call.
pub const MAX_BATCH_INITIATE: usize = 100;

/// How long a terminal transfer is retained before pruning.
const RETENTION: Duration = Duration::from_secs(3600);

/// Issues the refund transaction on the source chain. External chain
/// clients live behind this port.
#[async_trait]
pub trait RefundExecutor: Send + Sync {
    /// Submits the refund for a timed-out transfer. Best-effort; the
    /// transfer stays `TIMED_OUT` until an oracle confirms the refund.
    async fn issue_refund(&self, transfer: &BridgeTransfer) -> Result<(), String>;
}

/// A no-op refund port for deployments without a source-chain client.
pub struct NopRefundExecutor;

#[async_trait]
impl RefundExecutor for NopRefundExecutor {
    async fn issue_refund(&self, _transfer: &BridgeTransfer) -> Result<(), String> {
        Ok(())
    }
}

/// A status transition, published to monitors.
#[derive(Debug, Clone)]
pub struct BridgeEvent {
    /// The transfer that moved.
    pub bridge_id: BridgeId,
    /// Its new status.
    pub status: BridgeStatus,
}

/// Per-request outcome of a batch initiate.
#[derive(Debug, Clone)]
pub struct BatchInitiateOutcome {
    /// Position in the request batch.
    pub index: usize,
    /// The created transfer id on success.
    pub bridge_id: Option<BridgeId>,
    /// The stable error code on failure.
    pub error: Option<String>,
}

/// The response to a batch initiate.
#[derive(Debug, Clone)]
pub struct BatchInitiateResponse {
    /// How many requests were admitted.
    pub accepted_count: usize,
    /// One outcome per request, in request order.
    pub outcomes: Vec<BatchInitiateOutcome>,
}

struct Entry {
    transfer: BridgeTransfer,
    terminal_since: Option<Instant>,
    refund_issued: bool,
}

/// Coordinates cross-chain transfers against an oracle quorum.
pub struct BridgeCoordinator {
    crypto: Arc<dyn CryptoProvider>,
    config: BridgeConfig,
    shards: Vec<Mutex<HashMap<BridgeId, Entry>>>,
    hasher: RandomState,
    refunder: Arc<dyn RefundExecutor>,
    events: broadcast::Sender<BridgeEvent>,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl BridgeCoordinator {
    /// Creates a coordinator with the given refund port.
    pub fn new(
        crypto: Arc<dyn CryptoProvider>,
        config: BridgeConfig,
        refunder: Arc<dyn RefundExecutor>,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        let mut shards = Vec::with_capacity(SHARD_COUNT);
        for _ in 0..SHARD_COUNT {
            shards.push(Mutex::new(HashMap::new()));
        }
        Self {
            crypto,
            config,
            shards,
            hasher: RandomState::new(),
            refunder,
            events,
        }
    }

    fn shard_of(&self, id: &BridgeId) -> &Mutex<HashMap<BridgeId, Entry>> {
        let mut h = self.hasher.build_hasher();
        id.hash(&mut h);
        let index = (h.finish() as usize) % SHARD_COUNT;
        self.shards
            .get(index)
            .unwrap_or_else(|| unreachable!("shard index is modulo the shard count"))
    }

    fn publish(&self, bridge_id: BridgeId, status: BridgeStatus) {
        bridge_metrics().inc_transfer_state(status.label());
        let _ = self.events.send(BridgeEvent { bridge_id, status });
    }

    fn pending_count(&self) -> usize {
        self.shards
            .iter()
            .map(|s| {
                s.lock()
                    .values()
                    .filter(|e| e.transfer.status == BridgeStatus::Pending)
                    .count()
            })
            .sum()
    }

    /// Subscribes to status transitions (the monitor surface).
    pub fn monitor(&self) -> broadcast::Receiver<BridgeEvent> {
        self.events.subscribe()
    }

    /// Opens a transfer. All-or-nothing: either the transfer exists in
    /// `PENDING` afterwards or nothing was recorded.
    pub fn initiate(&self, request: BridgeRequest) -> Result<BridgeTransfer, BridgeError> {
        if request.oracle_set.is_empty() {
            return Err(BridgeError::InvalidRequest("empty oracle set".into()));
        }
        if request.amount == 0 {
            return Err(BridgeError::InvalidRequest("zero amount".into()));
        }
        if request.source_chain.is_empty() || request.dest_chain.is_empty() {
            return Err(BridgeError::InvalidRequest("missing chain name".into()));
        }
        let mut request = request;
        if request.timeout_s == 0 {
            request.timeout_s = self.config.default_timeout_s;
        }

        let initiated = now_ms();
        let bridge_id = BridgeId(self.crypto.hash(&request.id_preimage(initiated)));
        let transfer = BridgeTransfer {
            bridge_id,
            timeout_at_ms: initiated + request.timeout_s * 1000,
            request,
            status: BridgeStatus::Pending,
            verifications: BTreeMap::new(),
            dest_tx_hash: None,
        };

        let mut shard = self.shard_of(&bridge_id).lock();
        shard.insert(
            bridge_id,
            Entry {
                transfer: transfer.clone(),
                terminal_since: None,
                refund_issued: false,
            },
        );
        drop(shard);

        self.publish(bridge_id, BridgeStatus::Pending);
        bridge_metrics().set_pending_transfers(self.pending_count() as f64);
        tracing::info!(target: "bridge", %bridge_id, "transfer initiated");
        Ok(transfer)
    }

    /// Batched initiate: up to [`MAX_BATCH_INITIATE`] requests, each
    /// admitted or rejected independently, never partially.
    pub fn batch_initiate(&self, requests: Vec<BridgeRequest>) -> BatchInitiateResponse {
        let mut outcomes = Vec::with_capacity(requests.len());
        let mut accepted = 0;
        for (index, request) in requests.into_iter().enumerate() {
            if index >= MAX_BATCH_INITIATE {
                outcomes.push(BatchInitiateOutcome {
                    index,
                    bridge_id: None,
                    error: Some("BRIDGE_INVALID_REQUEST".into()),
                });
                continue;
            }
            match self.initiate(request) {
                Ok(transfer) => {
                    accepted += 1;
                    outcomes.push(BatchInitiateOutcome {
                        index,
                        bridge_id: Some(transfer.bridge_id),
                        error: None,
                    });
                }
                Err(e) => {
                    use hyperraft_types::error::ErrorCode;
                    outcomes.push(BatchInitiateOutcome {
                        index,
                        bridge_id: None,
                        error: Some(e.code().to_string()),
                    });
                }
            }
        }
        BatchInitiateResponse {
            accepted_count: accepted,
            outcomes,
        }
    }

    /// Records one oracle's verdict. Verifications are deduplicated per
    /// oracle; the first verdict stands. Quorum (`> 2/3` approvals with a
    /// verifying aggregate signature) moves the transfer to `VERIFIED`;
    /// `⌈n/3⌉ + 1` rejections fail it immediately.
    pub fn verify(
        &self,
        bridge_id: BridgeId,
        oracle_id: AccountId,
        approved: bool,
        signature: Vec<u8>,
    ) -> Result<BridgeStatus, BridgeError> {
        let mut shard = self.shard_of(&bridge_id).lock();
        let entry = shard.get_mut(&bridge_id).ok_or(BridgeError::NotFound)?;

        // A deadline that already passed beats any late verification.
        if entry.transfer.status == BridgeStatus::Pending
            && now_ms() > entry.transfer.timeout_at_ms
        {
            entry.transfer.status = BridgeStatus::TimedOut;
            drop(shard);
            self.publish(bridge_id, BridgeStatus::TimedOut);
            return Err(BridgeError::InvalidTransition {
                from: BridgeStatus::TimedOut.label(),
                op: "verify",
            });
        }
        let transfer = &mut entry.transfer;

        if transfer.status != BridgeStatus::Pending {
            return Err(BridgeError::InvalidTransition {
                from: transfer.status.label(),
                op: "verify",
            });
        }
        if !transfer.request.oracle_set.contains(&oracle_id) {
            return Err(BridgeError::UnknownOracle(oracle_id));
        }
        if transfer.verifications.contains_key(&oracle_id) {
            // Deduplicated; the first verdict stands.
            return Ok(transfer.status);
        }

        let attestation = transfer.attestation_bytes();
        self.crypto
            .verify(&oracle_id, &attestation, &signature)
            .map_err(|_| BridgeError::InvalidSignature)?;

        transfer
            .verifications
            .insert(oracle_id, OracleVerification { approved, signature });
        bridge_metrics().inc_verifications();

        let approvals = transfer.approvals();
        let rejections = transfer.rejections();
        let status = if approvals >= transfer.approvals_required() {
            let (ids, sigs): (Vec<AccountId>, Vec<Vec<u8>>) = transfer
                .verifications
                .iter()
                .filter(|(_, v)| v.approved)
                .map(|(id, v)| (*id, v.signature.clone()))
                .unzip();
            self.crypto
                .aggregate_verify(&ids, &attestation, &sigs)
                .map_err(|_| BridgeError::InvalidSignature)?;
            transfer.status = BridgeStatus::Verified;
            tracing::info!(target: "bridge", %bridge_id, approvals, "transfer verified");
            Some(BridgeStatus::Verified)
        } else if rejections >= transfer.rejections_threshold() {
            transfer.status = BridgeStatus::TimedOut;
            tracing::warn!(target: "bridge", %bridge_id, rejections, "transfer rejected by oracles");
            Some(BridgeStatus::TimedOut)
        } else {
            None
        };

        let current = transfer.status;
        drop(shard);
        if let Some(new_status) = status {
            self.publish(bridge_id, new_status);
            bridge_metrics().set_pending_transfers(self.pending_count() as f64);
        }
        Ok(current)
    }

    /// Confirms destination-chain execution. Idempotent on
    /// `dest_tx_hash`; legal only from `VERIFIED` (or `EXECUTED` with the
    /// same hash).
    pub fn execute_callback(
        &self,
        bridge_id: BridgeId,
        dest_tx_hash: Digest,
        oracle_signature: Vec<u8>,
    ) -> Result<BridgeStatus, BridgeError> {
        let mut shard = self.shard_of(&bridge_id).lock();
        let entry = shard.get_mut(&bridge_id).ok_or(BridgeError::NotFound)?;
        let transfer = &mut entry.transfer;

        match transfer.status {
            BridgeStatus::Executed => {
                return if transfer.dest_tx_hash == Some(dest_tx_hash) {
                    Ok(BridgeStatus::Executed)
                } else {
                    Err(BridgeError::InvalidTransition {
                        from: "executed",
                        op: "execute_callback",
                    })
                };
            }
            BridgeStatus::Verified => {}
            other => {
                return Err(BridgeError::InvalidTransition {
                    from: other.label(),
                    op: "execute_callback",
                });
            }
        }

        // Any member of the oracle set may attest execution.
        let message = codec::to_bytes_canonical(&(&bridge_id, &dest_tx_hash, b"executed"));
        let attested = transfer
            .request
            .oracle_set
            .iter()
            .any(|oracle| {
                self.crypto
                    .verify(oracle, &message, &oracle_signature)
                    .is_ok()
            });
        if !attested {
            return Err(BridgeError::InvalidSignature);
        }

        transfer.status = BridgeStatus::Executed;
        transfer.dest_tx_hash = Some(dest_tx_hash);
        entry.terminal_since = Some(Instant::now());
        drop(shard);

        self.publish(bridge_id, BridgeStatus::Executed);
        tracing::info!(target: "bridge", %bridge_id, "transfer executed");
        Ok(BridgeStatus::Executed)
    }

    /// Confirms the source-chain refund of a timed-out transfer.
    pub fn confirm_refund(
        &self,
        bridge_id: BridgeId,
        oracle_id: AccountId,
        signature: Vec<u8>,
    ) -> Result<BridgeStatus, BridgeError> {
        let mut shard = self.shard_of(&bridge_id).lock();
        let entry = shard.get_mut(&bridge_id).ok_or(BridgeError::NotFound)?;
        let transfer = &mut entry.transfer;

        match transfer.status {
            BridgeStatus::Refunded => return Ok(BridgeStatus::Refunded),
            BridgeStatus::TimedOut => {}
            other => {
                return Err(BridgeError::InvalidTransition {
                    from: other.label(),
                    op: "confirm_refund",
                });
            }
        }
        if !transfer.request.oracle_set.contains(&oracle_id) {
            return Err(BridgeError::UnknownOracle(oracle_id));
        }
        let message = codec::to_bytes_canonical(&(&bridge_id, b"refunded"));
        self.crypto
            .verify(&oracle_id, &message, &signature)
            .map_err(|_| BridgeError::InvalidSignature)?;

        transfer.status = BridgeStatus::Refunded;
        entry.terminal_since = Some(Instant::now());
        drop(shard);

        self.publish(bridge_id, BridgeStatus::Refunded);
        tracing::info!(target: "bridge", %bridge_id, "transfer refunded");
        Ok(BridgeStatus::Refunded)
    }

    /// Snapshot-consistent read of one transfer.
    pub fn status(&self, bridge_id: &BridgeId) -> Option<BridgeTransfer> {
        self.shard_of(bridge_id)
            .lock()
            .get(bridge_id)
            .map(|e| e.transfer.clone())
    }

    /// One sweep pass: times out overdue `PENDING` transfers, issues
    /// refunds for timed-out ones, and prunes terminal entries past the
    /// retention window. Returns the number of transfers newly timed out.
    pub async fn sweep(&self) -> usize {
        let now = now_ms();
        let mut newly_timed_out = Vec::new();
        let mut to_refund = Vec::new();

        for shard in &self.shards {
            let mut guard = shard.lock();
            for entry in guard.values_mut() {
                match entry.transfer.status {
                    BridgeStatus::Pending if now > entry.transfer.timeout_at_ms => {
                        entry.transfer.status = BridgeStatus::TimedOut;
                        newly_timed_out.push(entry.transfer.bridge_id);
                        if !entry.refund_issued {
                            entry.refund_issued = true;
                            to_refund.push(entry.transfer.clone());
                        }
                    }
                    BridgeStatus::TimedOut if !entry.refund_issued => {
                        entry.refund_issued = true;
                        to_refund.push(entry.transfer.clone());
                    }
                    _ => {}
                }
            }
            guard.retain(|_, entry| {
                entry
                    .terminal_since
                    .map_or(true, |t| t.elapsed() < RETENTION)
            });
        }

        for bridge_id in &newly_timed_out {
            self.publish(*bridge_id, BridgeStatus::TimedOut);
            tracing::warn!(target: "bridge", %bridge_id, "transfer timed out");
        }
        for transfer in &to_refund {
            if let Err(e) = self.refunder.issue_refund(transfer).await {
                tracing::warn!(
                    target: "bridge",
                    bridge_id = %transfer.bridge_id,
                    error = %e,
                    "refund issue failed; will not retry this sweep"
                );
            }
        }
        bridge_metrics().set_pending_transfers(self.pending_count() as f64);
        newly_timed_out.len()
    }

    /// Runs the sweep on an interval until the coordinator is dropped
    /// elsewhere. Spawn this on the runtime.
    pub async fn run_sweeper(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if Arc::strong_count(&self) == 1 {
                return;
            }
            self.sweep().await;
        }
    }
}
