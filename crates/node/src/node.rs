// Path: crates/node/src/node.rs

//! The node supervisor: port wiring, background tasks, adapter surface.

use hyperraft_api::transport::{Envelope, Topic};
use hyperraft_api::{ClusterConfigView, CryptoProvider, LogStore, StateMachine, Transport};
use hyperraft_bridge::{
    BatchInitiateResponse, BridgeCoordinator, BridgeEvent, RefundExecutor,
};
use hyperraft_consensus::{
    Command, ConsensusConfig, ConsensusMsg, Engine, EngineEvent, EngineHandle, EngineParams,
    StatusSnapshot,
};
use hyperraft_execution::LedgerStateMachine;
use hyperraft_mempool::{AdmitOutcome, BroadcastTracker, Mempool};
use hyperraft_pipeline::{AdaptiveBatcher, BreakerState, ChunkReassembler, CircuitBreaker, SlaTracker};
use hyperraft_telemetry::health::{HealthCheck, HealthReport, HealthSource, HealthStatus};
use hyperraft_types::bridge::{BridgeId, BridgeRequest, BridgeTransfer};
use hyperraft_types::codec;
use hyperraft_types::config::NodeConfig;
use hyperraft_types::error::{BridgeError, ConsensusError, ErrorCode, PipelineError};
use hyperraft_types::ledger::Block;
use hyperraft_types::tx::{PriorityClass, Receipt, Transaction, TxId};
use hyperraft_types::validator::ClusterConfig;
use hyperraft_types::{AccountId, Digest};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

/// Interval of the bridge timeout sweep.
const BRIDGE_SWEEP_INTERVAL: Duration = Duration::from_millis(250);
/// Interval of the mempool TTL sweep.
const MEMPOOL_SWEEP_INTERVAL: Duration = Duration::from_secs(1);
/// Mempool entry TTL.
const MEMPOOL_TTL: Duration = Duration::from_secs(60);
/// Deadline for a submitted transaction to reach finality.
pub(crate) const SUBMIT_DEADLINE: Duration = Duration::from_secs(15);

/// Construction parameters. Every port is bound here, once.
pub struct NodeParams {
    /// Cluster options; only the recognized set is accepted.
    pub config: NodeConfig,
    /// The genesis validator set.
    pub genesis: ClusterConfig,
    /// The crypto port.
    pub crypto: Arc<dyn CryptoProvider>,
    /// The log store port.
    pub store: Arc<dyn LogStore>,
    /// The transport port.
    pub transport: Arc<dyn Transport>,
    /// The bridge refund port.
    pub refunder: Arc<dyn RefundExecutor>,
}

pub(crate) struct NodeInner {
    pub(crate) config: NodeConfig,
    pub(crate) crypto: Arc<dyn CryptoProvider>,
    pub(crate) store: Arc<dyn LogStore>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) machine: Arc<LedgerStateMachine>,
    pub(crate) mempool: Arc<Mempool>,
    pub(crate) tracker: BroadcastTracker,
    pub(crate) engine: EngineHandle,
    pub(crate) batcher: Arc<AdaptiveBatcher>,
    pub(crate) sla: Arc<SlaTracker>,
    pub(crate) reassembler: Arc<ChunkReassembler>,
    pub(crate) submit_breaker: Arc<CircuitBreaker>,
    pub(crate) oracle_breaker: Arc<CircuitBreaker>,
    pub(crate) bridge: Arc<BridgeCoordinator>,
    pub(crate) waiters: Mutex<HashMap<TxId, Vec<oneshot::Sender<Receipt>>>>,
    pub(crate) receipts: broadcast::Sender<Receipt>,
    pub(crate) committed_blocks: broadcast::Sender<Block>,
    pub(crate) fatal: Mutex<Option<String>>,
    pub(crate) started: Instant,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// A running node.
#[derive(Clone)]
pub struct Node {
    pub(crate) inner: Arc<NodeInner>,
}

impl Node {
    /// Starts the node: recovers state, spawns the consensus loop, the
    /// message router, the receipt fan-out, and the sweepers.
    pub async fn start(params: NodeParams) -> anyhow::Result<Node> {
        let NodeParams {
            config,
            genesis,
            crypto,
            store,
            transport,
            refunder,
        } = params;

        let machine = Arc::new(LedgerStateMachine::new(crypto.clone(), genesis.clone()));
        let mempool = Arc::new(Mempool::new(config.mempool_capacity, MEMPOOL_TTL));
        let bridge = Arc::new(BridgeCoordinator::new(
            crypto.clone(),
            config.bridge,
            refunder,
        ));

        transport.update_peers(genesis.active().map(|v| v.validator_id).collect());
        let mut transport_rx = transport.subscribe();
        let (consensus_tx, consensus_rx) = mpsc::channel::<(AccountId, ConsensusMsg)>(4096);

        let consensus_config = ConsensusConfig {
            election_timeout_base_ms: config.election_timeout_base_ms,
            heartbeat_interval_ms: config.heartbeat_interval_ms,
            max_batch: config.max_batch,
            snapshot_interval_entries: config.snapshot_interval_entries,
            max_entries_per_append: 256,
        };
        let (engine, engine_handle, mut events) = Engine::new(EngineParams {
            config: consensus_config,
            crypto: crypto.clone(),
            store: store.clone(),
            transport: transport.clone(),
            machine: machine.clone() as Arc<dyn StateMachine>,
            membership: machine.clone() as Arc<dyn ClusterConfigView>,
            mempool: mempool.clone(),
            incoming: consensus_rx,
        });

        let (receipts_tx, _) = broadcast::channel(4096);
        let (blocks_tx, _) = broadcast::channel(1024);
        let inner = Arc::new(NodeInner {
            submit_breaker: Arc::new(CircuitBreaker::new("consensus_submit", config.breaker)),
            oracle_breaker: Arc::new(CircuitBreaker::new("bridge_oracle", config.breaker)),
            sla: Arc::new(SlaTracker::new(config.priority_sla_ms)),
            config,
            crypto: crypto.clone(),
            store: store.clone(),
            transport: transport.clone(),
            machine: machine.clone(),
            mempool: mempool.clone(),
            tracker: BroadcastTracker::new(),
            engine: engine_handle,
            batcher: Arc::new(AdaptiveBatcher::new()),
            reassembler: Arc::new(ChunkReassembler::new()),
            bridge: bridge.clone(),
            waiters: Mutex::new(HashMap::new()),
            receipts: receipts_tx,
            committed_blocks: blocks_tx,
            fatal: Mutex::new(None),
            started: Instant::now(),
            tasks: Mutex::new(Vec::new()),
        });
        let node = Node {
            inner: inner.clone(),
        };

        // The consensus loop. A returned error is a safety violation; the
        // node records the crash report and goes DOWN.
        let crash_inner = inner.clone();
        let engine_task = tokio::spawn(async move {
            if let Err(e) = engine.run().await {
                let report = format!("{}: {}", e.code(), e);
                tracing::error!(target: "node", crash = %report, "consensus halted");
                *crash_inner.fatal.lock() = Some(report);
            }
        });

        // Transport router: typed dispatch off the wire.
        let router_node = node.clone();
        let router_task = tokio::spawn(async move {
            while let Some(env) = transport_rx.recv().await {
                router_node.route(env, &consensus_tx).await;
            }
        });

        // Receipt fan-out from committed blocks.
        let fanout_inner = inner.clone();
        let fanout_task = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    EngineEvent::Committed { block, receipts } => {
                        let ids: Vec<TxId> = receipts.iter().map(|r| r.tx_id).collect();
                        {
                            let mut waiters = fanout_inner.waiters.lock();
                            for receipt in &receipts {
                                if let Some(list) = waiters.remove(&receipt.tx_id) {
                                    for waiter in list {
                                        let _ = waiter.send(receipt.clone());
                                    }
                                }
                            }
                        }
                        for receipt in receipts {
                            let _ = fanout_inner.receipts.send(receipt);
                        }
                        fanout_inner.tracker.forget(&ids);
                        let _ = fanout_inner.committed_blocks.send(block);
                    }
                    EngineEvent::EquivocationDetected(proof) => {
                        tracing::warn!(
                            target: "node",
                            offender = %proof.offender,
                            "equivocation evidence received"
                        );
                    }
                }
            }
        });

        // Sweepers.
        let sweep_bridge = bridge.clone();
        let bridge_task = tokio::spawn(sweep_bridge.run_sweeper(BRIDGE_SWEEP_INTERVAL));
        let sweep_pool = mempool.clone();
        let mempool_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(MEMPOOL_SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                sweep_pool.evict_expired();
            }
        });

        inner.tasks.lock().extend([
            engine_task,
            router_task,
            fanout_task,
            bridge_task,
            mempool_task,
        ]);
        Ok(node)
    }

    async fn route(&self, env: Envelope, consensus_tx: &mpsc::Sender<(AccountId, ConsensusMsg)>) {
        match env.topic {
            Topic::Consensus => match codec::from_bytes_canonical::<ConsensusMsg>(&env.payload) {
                Ok(msg) => {
                    if consensus_tx.send((env.from, msg)).await.is_err() {
                        tracing::debug!(target: "node", "consensus loop gone; dropping message");
                    }
                }
                Err(e) => {
                    tracing::warn!(target: "node", from = %env.from, error = %e, "bad consensus payload");
                }
            },
            Topic::Mempool => match codec::from_bytes_canonical::<Transaction>(&env.payload) {
                Ok(tx) => {
                    self.inner.tracker.mark_received(env.from, tx.tx_id);
                    let outcome = self.inner.mempool.admit(
                        tx.clone(),
                        PriorityClass::Normal,
                        self.inner.crypto.as_ref(),
                    );
                    if outcome == AdmitOutcome::Accepted {
                        self.gossip(tx).await;
                    }
                }
                Err(e) => {
                    tracing::warn!(target: "node", from = %env.from, error = %e, "bad gossip payload");
                }
            },
        }
    }

    pub(crate) async fn gossip(&self, tx: Transaction) {
        let peers: Vec<AccountId> = self
            .inner
            .machine
            .current()
            .active()
            .map(|v| v.validator_id)
            .filter(|id| *id != self.inner.crypto.local_id())
            .collect();
        let targets = self.inner.tracker.claim_targets(&peers, tx.tx_id);
        if targets.is_empty() {
            return;
        }
        let env = Envelope {
            from: self.inner.crypto.local_id(),
            topic: Topic::Mempool,
            payload: codec::to_bytes_canonical(&tx),
        };
        for peer in targets {
            if let Err(e) = self.inner.transport.send(&peer, env.clone()).await {
                tracing::trace!(target: "node", peer = %peer, error = %e, "gossip drop");
            }
        }
    }

    /// Registers a waiter for `tx_id`'s commit receipt.
    pub(crate) fn register_waiter(&self, tx_id: TxId) -> oneshot::Receiver<Receipt> {
        let (tx, rx) = oneshot::channel();
        self.inner.waiters.lock().entry(tx_id).or_default().push(tx);
        rx
    }

    pub(crate) fn drop_waiter(&self, tx_id: &TxId) {
        self.inner.waiters.lock().remove(tx_id);
    }

    /// Client-streaming submission: admits the transaction and returns the
    /// receipt channel that resolves at finality.
    pub async fn submit_transaction(
        &self,
        tx: Transaction,
        priority: PriorityClass,
    ) -> Result<oneshot::Receiver<Receipt>, PipelineError> {
        let tx_id = tx.tx_id;
        let rx = self.register_waiter(tx_id);
        match self
            .inner
            .mempool
            .admit(tx.clone(), priority, self.inner.crypto.as_ref())
        {
            AdmitOutcome::Accepted => {
                self.gossip(tx).await;
                Ok(rx)
            }
            AdmitOutcome::Duplicate => Ok(rx),
            AdmitOutcome::Invalid(reason) => {
                self.drop_waiter(&tx_id);
                Err(PipelineError::InvalidInput(reason))
            }
            AdmitOutcome::Rejected(_) => {
                self.drop_waiter(&tx_id);
                Err(PipelineError::Full)
            }
        }
    }

    /// All receipts as they finalize, for streaming subscribers.
    pub fn subscribe_receipts(&self) -> broadcast::Receiver<Receipt> {
        self.inner.receipts.subscribe()
    }

    /// Committed blocks in order, for adapters that follow the chain.
    pub fn subscribe_blocks(&self) -> broadcast::Receiver<Block> {
        self.inner.committed_blocks.subscribe()
    }

    /// The consensus status snapshot.
    pub fn status(&self) -> StatusSnapshot {
        self.inner.engine.status.borrow().clone()
    }

    /// Reads committed-or-stored blocks in `[from, to]` from the log store.
    pub async fn read_log(
        &self,
        from: u64,
        to: u64,
    ) -> Result<Vec<Block>, hyperraft_types::error::LogStoreError> {
        self.inner.store.read(from..=to).await
    }

    /// The cluster configuration currently effective.
    pub fn cluster_config(&self) -> ClusterConfig {
        self.inner.machine.current()
    }

    /// The breaker guarding consensus submission.
    pub fn submit_breaker(&self) -> &CircuitBreaker {
        &self.inner.submit_breaker
    }

    /// The breaker guarding oracle verification.
    pub fn oracle_breaker(&self) -> &CircuitBreaker {
        &self.inner.oracle_breaker
    }

    /// Proposes a membership change; resolves with the proposal height.
    pub async fn propose_config_change(
        &self,
        config: ClusterConfig,
    ) -> Result<u64, ConsensusError> {
        let (reply, rx) = oneshot::channel();
        self.inner
            .engine
            .commands
            .send(Command::ProposeConfigChange { config, reply })
            .await
            .map_err(|_| ConsensusError::NotLeader(None))?;
        rx.await.map_err(|_| ConsensusError::NotLeader(None))?
    }

    // --- Bridge surface ---

    /// Opens a cross-chain transfer.
    pub fn bridge_initiate(&self, request: BridgeRequest) -> Result<BridgeTransfer, BridgeError> {
        self.inner.bridge.initiate(request)
    }

    /// Batched initiate with per-request outcomes.
    pub fn bridge_batch(&self, requests: Vec<BridgeRequest>) -> BatchInitiateResponse {
        self.inner.bridge.batch_initiate(requests)
    }

    /// Snapshot-consistent transfer lookup.
    pub fn bridge_status(&self, bridge_id: &BridgeId) -> Result<BridgeTransfer, BridgeError> {
        self.inner.bridge.status(bridge_id).ok_or(BridgeError::NotFound)
    }

    /// Records an oracle verification, behind the oracle breaker.
    pub fn bridge_verify(
        &self,
        bridge_id: BridgeId,
        oracle_id: AccountId,
        approved: bool,
        signature: Vec<u8>,
    ) -> Result<hyperraft_types::bridge::BridgeStatus, BridgeError> {
        if self.inner.oracle_breaker.admit().is_err() {
            return Err(BridgeError::InvalidRequest("BRIDGE_ORACLE_UNAVAILABLE".into()));
        }
        let result = self
            .inner
            .bridge
            .verify(bridge_id, oracle_id, approved, signature);
        match &result {
            Ok(_) | Err(BridgeError::InvalidTransition { .. }) => {
                self.inner.oracle_breaker.record_success()
            }
            Err(_) => self.inner.oracle_breaker.record_failure(),
        }
        result
    }

    /// Confirms destination-chain execution.
    pub fn bridge_execute_callback(
        &self,
        bridge_id: BridgeId,
        dest_tx_hash: Digest,
        oracle_signature: Vec<u8>,
    ) -> Result<hyperraft_types::bridge::BridgeStatus, BridgeError> {
        self.inner
            .bridge
            .execute_callback(bridge_id, dest_tx_hash, oracle_signature)
    }

    /// Confirms the source-chain refund of a timed-out transfer.
    pub fn bridge_confirm_refund(
        &self,
        bridge_id: BridgeId,
        oracle_id: AccountId,
        signature: Vec<u8>,
    ) -> Result<hyperraft_types::bridge::BridgeStatus, BridgeError> {
        self.inner.bridge.confirm_refund(bridge_id, oracle_id, signature)
    }

    /// Streams transfer status transitions.
    pub fn bridge_monitor(&self) -> broadcast::Receiver<BridgeEvent> {
        self.inner.bridge.monitor()
    }

    // --- Health ---

    /// The node's health report.
    pub fn health(&self) -> HealthReport {
        let status = self.status();
        let fatal = self.inner.fatal.lock().clone();
        let consensus_check = if let Some(report) = &fatal {
            HealthCheck {
                name: "consensus".into(),
                status: HealthStatus::Down,
                data: Some(serde_json::json!({ "crash": report })),
            }
        } else if status.leader.is_some() {
            HealthCheck {
                name: "consensus".into(),
                status: HealthStatus::Up,
                data: Some(serde_json::json!({
                    "role": status.role.label(),
                    "term": status.term,
                    "commit_index": status.commit_index,
                })),
            }
        } else {
            HealthCheck {
                name: "consensus".into(),
                status: HealthStatus::Degraded,
                data: Some(serde_json::json!({ "reason": "no known leader" })),
            }
        };

        let breaker_check = |breaker: &CircuitBreaker| HealthCheck {
            name: format!("breaker:{}", breaker.dependency()),
            status: match breaker.state() {
                BreakerState::Closed => HealthStatus::Up,
                BreakerState::HalfOpen | BreakerState::Open => HealthStatus::Degraded,
            },
            data: Some(serde_json::json!({ "state": breaker.state().label() })),
        };

        let pool_len = self.inner.mempool.len();
        let mempool_check = HealthCheck {
            name: "mempool".into(),
            status: if pool_len < self.inner.config.mempool_capacity {
                HealthStatus::Up
            } else {
                HealthStatus::Degraded
            },
            data: Some(serde_json::json!({ "size": pool_len })),
        };

        HealthReport::aggregate(
            "hyperraft-node".into(),
            self.inner.started.elapsed().as_secs(),
            vec![
                consensus_check,
                breaker_check(&self.inner.submit_breaker),
                breaker_check(&self.inner.oracle_breaker),
                mempool_check,
            ],
        )
    }

    /// Stops the consensus loop and every background task.
    pub async fn shutdown(&self) {
        let _ = self.inner.engine.commands.send(Command::Shutdown).await;
        for task in self.inner.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

impl HealthSource for Node {
    fn report(&self) -> HealthReport {
        self.health()
    }
}
