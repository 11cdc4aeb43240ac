// Path: crates/consensus/src/engine.rs

//! The consensus loop.
//!
//! One task owns all consensus state. Elections, replication, commitment,
//! snapshotting and recovery all run here; other subsystems reach the loop
//! through the [`EngineHandle`] and observe it through the event channel
//! and the status watch.

use crate::messages::{AppendResult, ConsensusMsg};
use crate::tally::VoteTally;
use crate::{election_timeout_ms, yields_to, ConsensusConfig, Role};
use hyperraft_api::transport::{Envelope, Topic};
use hyperraft_api::{ClusterConfigView, CryptoProvider, LogStore, StateMachine, Transport};
use hyperraft_mempool::Mempool;
use hyperraft_telemetry::consensus_metrics;
use hyperraft_telemetry::time::ScopeTimer;
use hyperraft_types::codec;
use hyperraft_types::error::{ConsensusError, ErrorCode, LogStoreError};
use hyperraft_types::ledger::{
    merkle_root, Block, BlockHeader, EquivocationProof, HardState, Snapshot, SpecialEntry, Vote,
    VoteKind,
};
use hyperraft_types::tx::{PriorityClass, Receipt, Transaction, TxId};
use hyperraft_types::validator::ClusterConfig;
use hyperraft_types::{AccountId, Digest, ZERO_DIGEST};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

/// Everything the engine needs at construction.
pub struct EngineParams {
    /// Timing and sizing knobs.
    pub config: ConsensusConfig,
    /// The crypto port.
    pub crypto: Arc<dyn CryptoProvider>,
    /// The durable log store.
    pub store: Arc<dyn LogStore>,
    /// The peer transport.
    pub transport: Arc<dyn Transport>,
    /// The deterministic state machine.
    pub machine: Arc<dyn StateMachine>,
    /// The membership view maintained by the state machine.
    pub membership: Arc<dyn ClusterConfigView>,
    /// The shared transaction pool.
    pub mempool: Arc<Mempool>,
    /// Typed consensus messages routed off the transport.
    pub incoming: mpsc::Receiver<(AccountId, ConsensusMsg)>,
}

/// Requests other subsystems may make of the loop.
pub enum Command {
    /// Propose a membership change. Fails while another is in flight.
    ProposeConfigChange {
        /// The new cluster configuration.
        config: ClusterConfig,
        /// Receives the height the change was proposed at.
        reply: oneshot::Sender<Result<u64, ConsensusError>>,
    },
    /// Stop the loop cleanly.
    Shutdown,
}

/// What the loop tells the rest of the node.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A block reached finality and was applied.
    Committed {
        /// The committed block.
        block: Block,
        /// One receipt per transaction, in block order.
        receipts: Vec<Receipt>,
    },
    /// Equivocation evidence was verified.
    EquivocationDetected(EquivocationProof),
}

/// A point-in-time view of the loop's state.
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    /// Current role.
    pub role: Role,
    /// Current term.
    pub term: u64,
    /// The leader this node believes in, if any.
    pub leader: Option<AccountId>,
    /// Committed watermark.
    pub commit_index: u64,
    /// Last height applied to the state machine.
    pub last_applied: u64,
    /// Last height in the local log.
    pub last_height: u64,
    /// Current state hash.
    pub state_hash: Digest,
}

/// The other subsystems' handle onto the loop.
#[derive(Clone)]
pub struct EngineHandle {
    /// Command channel into the loop.
    pub commands: mpsc::Sender<Command>,
    /// Live status.
    pub status: watch::Receiver<StatusSnapshot>,
}

/// The consensus loop state. Constructed once, consumed by [`Engine::run`].
pub struct Engine {
    config: ConsensusConfig,
    crypto: Arc<dyn CryptoProvider>,
    store: Arc<dyn LogStore>,
    transport: Arc<dyn Transport>,
    machine: Arc<dyn StateMachine>,
    membership: Arc<dyn ClusterConfigView>,
    mempool: Arc<Mempool>,
    incoming: mpsc::Receiver<(AccountId, ConsensusMsg)>,
    commands: mpsc::Receiver<Command>,
    events: mpsc::Sender<EngineEvent>,
    status: watch::Sender<StatusSnapshot>,

    local_id: AccountId,
    role: Role,
    current_term: u64,
    voted_for: Option<AccountId>,
    leader_hint: Option<AccountId>,
    commit_index: u64,
    cluster: ClusterConfig,

    /// Cached shape of the log tail.
    last_log_term: u64,
    last_log_hash: Digest,
    /// Heights at or below the floor live only in the snapshot.
    snapshot_floor: u64,
    floor_hash: Digest,

    /// Leader bookkeeping: next height to ship per peer.
    next_index: HashMap<AccountId, u64>,
    /// Candidate bookkeeping: voters who granted this term.
    granted: HashSet<AccountId>,
    tally: VoteTally,
    /// Height of the in-flight membership change, if any.
    membership_in_flight: Option<u64>,
    /// Special entries awaiting proposal (config changes, evidence).
    pending_special: VecDeque<SpecialEntry>,
    /// Evidence already surfaced, to dedup relays.
    surfaced_evidence: HashSet<(AccountId, u64, u64)>,

    election_deadline: Instant,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl Engine {
    /// Builds the engine plus its handle and event stream.
    pub fn new(params: EngineParams) -> (Self, EngineHandle, mpsc::Receiver<EngineEvent>) {
        let (commands_tx, commands_rx) = mpsc::channel(64);
        let (events_tx, events_rx) = mpsc::channel(1024);
        let local_id = params.crypto.local_id();
        let (status_tx, status_rx) = watch::channel(StatusSnapshot {
            role: Role::Follower,
            term: 0,
            leader: None,
            commit_index: 0,
            last_applied: 0,
            last_height: 0,
            state_hash: ZERO_DIGEST,
        });

        let election_base = params.config.election_timeout_base_ms;
        let engine = Self {
            config: params.config,
            crypto: params.crypto,
            store: params.store,
            transport: params.transport,
            machine: params.machine,
            membership: params.membership,
            mempool: params.mempool,
            incoming: params.incoming,
            commands: commands_rx,
            events: events_tx,
            status: status_tx,
            local_id,
            role: Role::Follower,
            current_term: 0,
            voted_for: None,
            leader_hint: None,
            commit_index: 0,
            cluster: ClusterConfig::default(),
            last_log_term: 0,
            last_log_hash: ZERO_DIGEST,
            snapshot_floor: 0,
            floor_hash: ZERO_DIGEST,
            next_index: HashMap::new(),
            granted: HashSet::new(),
            tally: VoteTally::new(),
            membership_in_flight: None,
            pending_special: VecDeque::new(),
            surfaced_evidence: HashSet::new(),
            election_deadline: Instant::now() + Duration::from_millis(election_base),
        };
        (
            engine,
            EngineHandle {
                commands: commands_tx,
                status: status_rx,
            },
            events_rx,
        )
    }

    /// Runs the loop until shutdown or a fatal safety violation.
    ///
    /// A returned error is a structured crash report: the caller must halt
    /// the process rather than continue past a safety violation.
    pub async fn run(mut self) -> Result<(), ConsensusError> {
        self.recover().await?;
        self.reset_election_deadline();

        let mut heartbeat =
            tokio::time::interval(Duration::from_millis(self.config.heartbeat_interval_ms));
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            self.publish_status();
            let result = tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    None | Some(Command::Shutdown) => return Ok(()),
                    Some(Command::ProposeConfigChange { config, reply }) => {
                        let outcome = self.propose_config_change(config).await;
                        let _ = reply.send(outcome);
                        Ok(())
                    }
                },
                msg = self.incoming.recv() => match msg {
                    None => return Ok(()),
                    Some((from, msg)) => self.handle_message(from, msg).await,
                },
                _ = tokio::time::sleep_until(self.election_deadline),
                    if self.role != Role::Leader =>
                {
                    self.start_election().await
                }
                _ = heartbeat.tick(), if self.role == Role::Leader => {
                    let timer = ScopeTimer::new(|secs| {
                        consensus_metrics().observe_tick_duration(secs)
                    });
                    let r = self.leader_tick().await;
                    drop(timer);
                    r
                }
            };

            if let Err(e) = result {
                if is_fatal(&e) {
                    tracing::error!(
                        target: "consensus",
                        code = e.code(),
                        error = %e,
                        "fatal safety violation; halting"
                    );
                    hyperraft_telemetry::error_metrics().inc_error("consensus", e.code());
                    return Err(e);
                }
                hyperraft_telemetry::error_metrics().inc_error("consensus", e.code());
                tracing::warn!(target: "consensus", code = e.code(), error = %e, "recoverable");
            }
        }
    }

    // --- Startup / recovery ---

    async fn recover(&mut self) -> Result<(), ConsensusError> {
        if let Some(hs) = self.store.load_hard_state().await? {
            self.current_term = hs.current_term;
            self.voted_for = hs.voted_for;
            self.commit_index = hs.commit_index;
        }
        self.commit_index = self.commit_index.max(self.store.committed_height());

        if let Some(snapshot) = self.store.load_snapshot().await? {
            self.snapshot_floor = snapshot.height;
            self.floor_hash = snapshot.last_hash;
            self.last_log_term = snapshot.last_term;
            self.last_log_hash = snapshot.last_hash;
            if snapshot.height > self.machine.last_applied() {
                self.machine
                    .restore(&snapshot)
                    .await
                    .map_err(|e| ConsensusError::Apply(e.to_string()))?;
            }
            self.commit_index = self.commit_index.max(snapshot.height);
        }

        // Refresh the tail cache from the stored suffix.
        let last = self.store.last_height();
        if last > self.snapshot_floor {
            let tail = self.store.read(last..=last).await?;
            if let Some(block) = tail.last() {
                self.last_log_term = block.header.term;
                self.last_log_hash = block.hash_with(|b| self.crypto.hash(b));
            }
        }

        // Replay the committed prefix into the state machine.
        let from = self.machine.last_applied() + 1;
        if from <= self.commit_index {
            let blocks = self.store.read(from..=self.commit_index).await?;
            for block in blocks {
                self.apply_block(&block).await?;
            }
        }

        self.cluster = self.membership.current();
        self.store.mark_committed(self.commit_index).await?;

        tracing::info!(
            target: "consensus",
            term = self.current_term,
            commit = self.commit_index,
            last_height = self.store.last_height(),
            "recovered"
        );
        Ok(())
    }

    // --- Timers and roles ---

    fn reset_election_deadline(&mut self) {
        let my_stake = self
            .cluster
            .get(&self.local_id)
            .map(|v| v.stake)
            .unwrap_or(0);
        let max_stake = self.cluster.active().map(|v| v.stake).max().unwrap_or(0);
        let jitter: f64 = rand::random();
        let ms = election_timeout_ms(
            self.config.election_timeout_base_ms,
            my_stake,
            max_stake,
            jitter,
        );
        self.election_deadline = Instant::now() + Duration::from_millis(ms);
    }

    fn set_role(&mut self, role: Role) {
        if self.role != role {
            tracing::info!(
                target: "consensus",
                from = self.role.label(),
                to = role.label(),
                term = self.current_term,
                "role change"
            );
            self.role = role;
            consensus_metrics().set_role(role.label());
        }
    }

    async fn step_down(
        &mut self,
        term: u64,
        leader: Option<AccountId>,
    ) -> Result<(), ConsensusError> {
        if term > self.current_term {
            self.current_term = term;
            self.voted_for = None;
            self.persist_hard_state().await?;
            consensus_metrics().set_current_term(term);
        }
        self.set_role(Role::Follower);
        if leader.is_some() {
            self.leader_hint = leader;
        }
        self.granted.clear();
        self.reset_election_deadline();
        Ok(())
    }

    async fn persist_hard_state(&self) -> Result<(), ConsensusError> {
        self.store
            .save_hard_state(&HardState {
                current_term: self.current_term,
                voted_for: self.voted_for,
                commit_index: self.commit_index,
            })
            .await?;
        Ok(())
    }

    fn publish_status(&self) {
        let _ = self.status.send(StatusSnapshot {
            role: self.role,
            term: self.current_term,
            leader: self.leader_hint,
            commit_index: self.commit_index,
            last_applied: self.machine.last_applied(),
            last_height: self.store.last_height(),
            state_hash: self.machine.state_hash(),
        });
    }

    // --- Elections ---

    async fn start_election(&mut self) -> Result<(), ConsensusError> {
        if !self.cluster.is_active(&self.local_id) {
            // Non-validators never campaign; just rearm the timer.
            self.reset_election_deadline();
            return Ok(());
        }
        self.set_role(Role::Candidate);
        self.current_term += 1;
        self.voted_for = Some(self.local_id);
        self.leader_hint = None;
        // Durable before any vote solicitation leaves this node.
        self.persist_hard_state().await?;

        self.granted.clear();
        self.granted.insert(self.local_id);
        consensus_metrics().inc_elections_started();
        consensus_metrics().set_current_term(self.current_term);
        tracing::info!(
            target: "consensus",
            term = self.current_term,
            last_height = self.store.last_height(),
            "starting election"
        );

        let msg = ConsensusMsg::RequestVote {
            candidate: self.local_id,
            term: self.current_term,
            last_log_term: self.last_log_term,
            last_log_height: self.store.last_height(),
        };
        self.broadcast(&msg).await;
        self.reset_election_deadline();
        self.try_become_leader().await
    }

    async fn try_become_leader(&mut self) -> Result<(), ConsensusError> {
        if self.role != Role::Candidate || self.granted.len() < self.cluster.q_view_change() {
            return Ok(());
        }
        self.set_role(Role::Leader);
        self.leader_hint = Some(self.local_id);
        let next = self.store.last_height() + 1;
        self.next_index = self
            .cluster
            .active()
            .filter(|v| v.validator_id != self.local_id)
            .map(|v| (v.validator_id, next))
            .collect();
        tracing::info!(target: "consensus", term = self.current_term, "elected leader");
        // Immediate empty AppendEntries asserts leadership.
        self.replicate_to_all().await;
        Ok(())
    }

    async fn handle_request_vote(
        &mut self,
        candidate: AccountId,
        term: u64,
        last_log_term: u64,
        last_log_height: u64,
    ) -> Result<(), ConsensusError> {
        if term > self.current_term {
            self.step_down(term, None).await?;
        }

        // Equal-stake tie-break: a candidate yields to a lexicographically
        // smaller peer rather than splitting the vote.
        if self.role == Role::Candidate && term == self.current_term {
            let ours = self.cluster.get(&self.local_id).map(|v| v.stake).unwrap_or(0);
            let theirs = self.cluster.get(&candidate).map(|v| v.stake).unwrap_or(0);
            if yields_to(&self.local_id, &candidate, ours, theirs)
                && (last_log_term, last_log_height) >= (self.last_log_term, self.store.last_height())
            {
                self.set_role(Role::Follower);
                self.reset_election_deadline();
            }
        }

        let log_current = (last_log_term, last_log_height)
            >= (self.last_log_term, self.store.last_height());
        let granted = term == self.current_term
            && log_current
            && self.cluster.is_active(&candidate)
            && self.voted_for.map_or(true, |v| v == candidate);

        if granted && self.voted_for.is_none() {
            self.voted_for = Some(candidate);
            // Durable before the grant leaves this node.
            self.persist_hard_state().await?;
            self.reset_election_deadline();
        }

        let signature = self
            .crypto
            .sign(&ConsensusMsg::vote_reply_signing_bytes(
                &self.local_id,
                self.current_term,
                &candidate,
                granted,
            ))
            .map_err(|e| ConsensusError::Apply(e.to_string()))?;
        self.send(
            &candidate,
            &ConsensusMsg::RequestVoteReply {
                voter: self.local_id,
                term: self.current_term,
                candidate,
                granted,
                signature,
            },
        )
        .await;
        Ok(())
    }

    async fn handle_vote_reply(
        &mut self,
        voter: AccountId,
        term: u64,
        candidate: AccountId,
        granted: bool,
        signature: Vec<u8>,
    ) -> Result<(), ConsensusError> {
        if term > self.current_term {
            return self.step_down(term, None).await;
        }
        if self.role != Role::Candidate || term != self.current_term || candidate != self.local_id {
            return Ok(());
        }
        if !granted || !self.cluster.is_active(&voter) {
            return Ok(());
        }
        self.crypto
            .verify(
                &voter,
                &ConsensusMsg::vote_reply_signing_bytes(&voter, term, &candidate, granted),
                &signature,
            )
            .map_err(|_| ConsensusError::InvalidSignature(voter))?;
        self.granted.insert(voter);
        self.try_become_leader().await
    }

    // --- Leader side ---

    async fn leader_tick(&mut self) -> Result<(), ConsensusError> {
        self.maybe_propose().await?;
        self.replicate_to_all().await;
        self.advance_leader_commit().await
    }

    /// Forms at most one block per tick: a pending special entry first,
    /// otherwise a transaction block drained from the mempool in strict
    /// priority order.
    async fn maybe_propose(&mut self) -> Result<(), ConsensusError> {
        let special = self.pending_special.pop_front();
        let transactions = if special.is_some() {
            Vec::new()
        } else {
            self.drain_mempool()
        };
        if special.is_none() && transactions.is_empty() {
            return Ok(());
        }

        let height = self.store.last_height() + 1;
        let tx_ids: Vec<TxId> = transactions.iter().map(|t| t.tx_id).collect();
        let header = BlockHeader {
            height,
            term: self.current_term,
            prev_hash: self.last_log_hash,
            tx_root: merkle_root(&tx_ids, |b| self.crypto.hash(b)),
            proposer_id: self.local_id,
            timestamp_ms: now_ms(),
        };
        let proposer_signature = self
            .crypto
            .sign(&header.encoded())
            .map_err(|e| ConsensusError::Apply(e.to_string()))?;
        let block = Block {
            header,
            transactions,
            special,
            proposer_signature,
        };

        self.store.append(std::slice::from_ref(&block)).await?;
        let hash = block.hash_with(|b| self.crypto.hash(b));
        self.last_log_term = block.header.term;
        self.last_log_hash = hash;
        consensus_metrics().inc_blocks_proposed();

        // The leader's own signed acknowledgment joins the tally.
        let ack = self.signed_ack(height, hash)?;
        self.tally.record_vote(&ack)?;
        tracing::debug!(
            target: "consensus",
            height,
            txs = block.transactions.len(),
            special = block.special.is_some(),
            "proposed block"
        );
        Ok(())
    }

    /// Drains the mempool in strict priority order, verifying signatures as
    /// a batch and dropping any transaction that fails.
    fn drain_mempool(&self) -> Vec<Transaction> {
        let mut out: Vec<Transaction> = Vec::new();
        for class in PriorityClass::ALL {
            if out.len() >= self.config.max_batch {
                break;
            }
            let batch = self
                .mempool
                .take_batch(self.config.max_batch - out.len(), Some(class));
            out.extend(batch.txs);
        }

        let mut invalid: Vec<TxId> = Vec::new();
        out.retain(|tx| {
            let ok = self
                .crypto
                .verify(&tx.sender, &tx.signing_bytes(), &tx.signature)
                .is_ok();
            if !ok {
                invalid.push(tx.tx_id);
            }
            ok
        });
        if !invalid.is_empty() {
            tracing::warn!(
                target: "consensus",
                dropped = invalid.len(),
                "dropping transactions with invalid signatures"
            );
            self.mempool.remove(&invalid);
        }
        out
    }

    async fn replicate_to_all(&mut self) {
        let peers: Vec<AccountId> = self
            .cluster
            .active()
            .map(|v| v.validator_id)
            .filter(|id| *id != self.local_id)
            .collect();
        for peer in peers {
            if let Err(e) = self.replicate_to(peer).await {
                tracing::debug!(target: "consensus", peer = %peer, error = %e, "replication deferred");
            }
        }
    }

    async fn replicate_to(&mut self, peer: AccountId) -> Result<(), ConsensusError> {
        let last = self.store.last_height();
        let next = *self.next_index.entry(peer).or_insert(last + 1);

        if next <= self.snapshot_floor {
            // The peer is behind the compacted floor; ship the snapshot.
            let Some(snapshot) = self.store.load_snapshot().await? else {
                return Ok(());
            };
            let msg = ConsensusMsg::InstallSnapshot {
                leader: self.local_id,
                term: self.current_term,
                snapshot,
            };
            self.send(&peer, &msg).await;
            return Ok(());
        }

        let entries = if next <= last {
            let cap = (next + self.config.max_entries_per_append as u64 - 1).min(last);
            self.store.read(next..=cap).await?
        } else {
            Vec::new()
        };

        let prev_height = next - 1;
        let prev_hash = self.hash_at(prev_height).await?;
        let msg = ConsensusMsg::AppendEntries {
            leader: self.local_id,
            term: self.current_term,
            prev_height,
            prev_hash,
            entries,
            leader_commit: self.commit_index,
        };
        self.send(&peer, &msg).await;
        Ok(())
    }

    /// The header hash at `height`: zero at the origin, the snapshot hash
    /// at the floor, otherwise read from the log.
    async fn hash_at(&self, height: u64) -> Result<Digest, ConsensusError> {
        if height == 0 {
            return Ok(ZERO_DIGEST);
        }
        if height == self.snapshot_floor {
            return Ok(self.floor_hash);
        }
        let blocks = self.store.read(height..=height).await?;
        let Some(block) = blocks.last() else {
            return Ok(ZERO_DIGEST);
        };
        Ok(block.hash_with(|b| self.crypto.hash(b)))
    }

    async fn handle_append_reply(
        &mut self,
        follower: AccountId,
        term: u64,
        result: AppendResult,
    ) -> Result<(), ConsensusError> {
        if term > self.current_term {
            return self.step_down(term, None).await;
        }
        if self.role != Role::Leader || term != self.current_term {
            return Ok(());
        }
        if !self.cluster.is_active(&follower) {
            return Ok(());
        }
        match result {
            AppendResult::Accepted(vote) => {
                if vote.voter_id != follower || vote.term != self.current_term {
                    return Ok(());
                }
                self.crypto
                    .verify(&vote.voter_id, &vote.signing_bytes(), &vote.signature)
                    .map_err(|_| ConsensusError::InvalidSignature(follower))?;
                self.tally.record_vote(&vote)?;
                self.next_index.insert(follower, vote.target_height + 1);
                self.advance_leader_commit().await
            }
            AppendResult::Rejected { hint } => {
                let entry = self
                    .next_index
                    .entry(follower)
                    .or_insert(self.store.last_height() + 1);
                *entry = (*entry - 1).clamp(1, hint + 1);
                Ok(())
            }
        }
    }

    /// The current-term commit rule over signed acknowledgments: commit the
    /// highest height acknowledged by a commit quorum, provided the entry at
    /// that height carries the current term.
    async fn advance_leader_commit(&mut self) -> Result<(), ConsensusError> {
        let quorum = self.cluster.q_commit();
        let Some(candidate) = self.tally.highest_quorum_height(self.current_term, quorum) else {
            return Ok(());
        };
        if candidate <= self.commit_index {
            return Ok(());
        }
        let blocks = self.store.read(candidate..=candidate).await?;
        let Some(block) = blocks.last() else {
            return Ok(());
        };
        if block.header.term != self.current_term {
            // Never commit a prior-term entry by counting alone.
            return Ok(());
        }
        self.advance_commit(candidate).await?;
        self.broadcast(&ConsensusMsg::CommitNotice {
            leader: self.local_id,
            term: self.current_term,
            commit_height: self.commit_index,
        })
        .await;
        Ok(())
    }

    async fn propose_config_change(
        &mut self,
        config: ClusterConfig,
    ) -> Result<u64, ConsensusError> {
        if self.role != Role::Leader {
            return Err(ConsensusError::NotLeader(self.leader_hint));
        }
        if let Some(height) = self.membership_in_flight {
            return Err(ConsensusError::MembershipChangeInFlight(height));
        }
        let height = self.store.last_height() + 1 + self.pending_special.len() as u64;
        self.pending_special
            .push_back(SpecialEntry::ConfigChange(config));
        self.membership_in_flight = Some(height);
        tracing::info!(target: "consensus", height, "membership change queued");
        Ok(height)
    }

    // --- Follower side ---

    #[allow(clippy::too_many_arguments)]
    async fn handle_append_entries(
        &mut self,
        leader: AccountId,
        term: u64,
        prev_height: u64,
        prev_hash: Digest,
        entries: Vec<Block>,
        leader_commit: u64,
    ) -> Result<(), ConsensusError> {
        if term < self.current_term {
            // Tell the stale leader where we are; it will step down on the
            // term in this reply.
            let reply = ConsensusMsg::AppendReply {
                follower: self.local_id,
                term: self.current_term,
                result: AppendResult::Rejected {
                    hint: self.store.last_height(),
                },
            };
            self.send(&leader, &reply).await;
            return Ok(());
        }
        if term > self.current_term || self.role != Role::Follower {
            self.step_down(term, Some(leader)).await?;
        }
        self.leader_hint = Some(leader);
        self.reset_election_deadline();

        // Verify proposer signatures and watch for equivocation before
        // touching the log.
        for block in &entries {
            let header_bytes = block.header.encoded();
            self.crypto
                .verify(
                    &block.header.proposer_id,
                    &header_bytes,
                    &block.proposer_signature,
                )
                .map_err(|_| ConsensusError::InvalidSignature(block.header.proposer_id))?;
            let hash = self.crypto.hash(&header_bytes);
            if let Some(proof) =
                self.tally
                    .observe_proposal(&block.header, hash, &block.proposer_signature)
            {
                self.surface_evidence(proof).await;
                // The conflicting block is not appended.
                return Ok(());
            }
        }

        // Prefix check.
        let last = self.store.last_height();
        if prev_height > last {
            let reply = ConsensusMsg::AppendReply {
                follower: self.local_id,
                term: self.current_term,
                result: AppendResult::Rejected { hint: last },
            };
            self.send(&leader, &reply).await;
            return Ok(());
        }
        let local_prev = self.hash_at(prev_height).await?;
        if local_prev != prev_hash {
            let reply = ConsensusMsg::AppendReply {
                follower: self.local_id,
                term: self.current_term,
                result: AppendResult::Rejected {
                    hint: prev_height.saturating_sub(1),
                },
            };
            self.send(&leader, &reply).await;
            return Err(ConsensusError::InconsistentPrefix {
                expected_height: prev_height,
                hint: prev_height.saturating_sub(1),
            });
        }

        // The acknowledgment covers exactly the prefix this message proves,
        // never a longer local suffix the leader knows nothing about.
        let msg_last = entries
            .last()
            .map(|b| b.header.height)
            .unwrap_or(prev_height);

        // Find the first conflicting or novel entry. Once the suffix is cut,
        // everything after it is novel by construction.
        let mut to_append: Vec<Block> = Vec::new();
        let mut truncated = false;
        for block in entries {
            let height = block.header.height;
            if !truncated && height <= last {
                let stored_hash = self.hash_at(height).await?;
                let incoming_hash = block.hash_with(|b| self.crypto.hash(b));
                if stored_hash == incoming_hash {
                    continue;
                }
                if height <= self.commit_index {
                    // A conflicting committed entry can only mean local
                    // corruption or a broken quorum; halting beats
                    // diverging.
                    return Err(ConsensusError::Storage(
                        LogStoreError::CommittedTruncation {
                            from: height,
                            committed: self.commit_index,
                        },
                    ));
                }
                // Divergent uncommitted suffix: drop it and take the
                // leader's version.
                self.store.truncate_suffix(height).await?;
                truncated = true;
                to_append.push(block);
            } else {
                to_append.push(block);
            }
        }
        if !to_append.is_empty() {
            self.store.append(&to_append).await?;
            if let Some(tail) = to_append.last() {
                self.last_log_term = tail.header.term;
                self.last_log_hash = tail.hash_with(|b| self.crypto.hash(b));
            }
        }

        // Signed acknowledgment of the matched prefix.
        let ack_height = msg_last.min(self.store.last_height());
        let ack_hash = self.hash_at(ack_height).await?;
        let ack = self.signed_ack(ack_height, ack_hash)?;
        let reply = ConsensusMsg::AppendReply {
            follower: self.local_id,
            term: self.current_term,
            result: AppendResult::Accepted(ack),
        };
        self.send(&leader, &reply).await;

        // Commit follows the leader's watermark, clamped to what we hold.
        let target = leader_commit.min(self.store.last_height());
        if target > self.commit_index {
            self.advance_commit(target).await?;
            self.send_finality_vote().await?;
        }
        Ok(())
    }

    fn signed_ack(&self, height: u64, hash: Digest) -> Result<Vote, ConsensusError> {
        let mut vote = Vote {
            voter_id: self.local_id,
            term: self.current_term,
            target_height: height,
            target_hash: hash,
            kind: VoteKind::PreVote,
            signature: Vec::new(),
        };
        vote.signature = self
            .crypto
            .sign(&vote.signing_bytes())
            .map_err(|e| ConsensusError::Apply(e.to_string()))?;
        Ok(vote)
    }

    async fn send_finality_vote(&mut self) -> Result<(), ConsensusError> {
        let Some(leader) = self.leader_hint else {
            return Ok(());
        };
        if leader == self.local_id {
            return Ok(());
        }
        let hash = self.hash_at(self.commit_index).await?;
        let mut vote = Vote {
            voter_id: self.local_id,
            term: self.current_term,
            target_height: self.commit_index,
            target_hash: hash,
            kind: VoteKind::CommitVote,
            signature: Vec::new(),
        };
        vote.signature = self
            .crypto
            .sign(&vote.signing_bytes())
            .map_err(|e| ConsensusError::Apply(e.to_string()))?;
        self.send(&leader, &ConsensusMsg::FinalityVote(vote)).await;
        Ok(())
    }

    async fn handle_commit_notice(
        &mut self,
        leader: AccountId,
        term: u64,
        commit_height: u64,
    ) -> Result<(), ConsensusError> {
        if term < self.current_term {
            return Err(ConsensusError::StaleTerm {
                got: term,
                current: self.current_term,
            });
        }
        if term > self.current_term {
            self.step_down(term, Some(leader)).await?;
        }
        let target = commit_height.min(self.store.last_height());
        if target > self.commit_index {
            self.advance_commit(target).await?;
            self.send_finality_vote().await?;
        }
        Ok(())
    }

    async fn handle_finality_vote(&mut self, vote: Vote) -> Result<(), ConsensusError> {
        if !self.cluster.is_active(&vote.voter_id) {
            return Ok(());
        }
        self.crypto
            .verify(&vote.voter_id, &vote.signing_bytes(), &vote.signature)
            .map_err(|_| ConsensusError::InvalidSignature(vote.voter_id))?;
        self.tally.record_vote(&vote)?;
        // Finality votes exist to retire vote state; everything below the
        // commit watermark is discarded.
        self.tally.prune_below(self.commit_index);
        Ok(())
    }

    async fn handle_install_snapshot(
        &mut self,
        leader: AccountId,
        term: u64,
        snapshot: Snapshot,
    ) -> Result<(), ConsensusError> {
        if term < self.current_term {
            return Err(ConsensusError::StaleTerm {
                got: term,
                current: self.current_term,
            });
        }
        if term > self.current_term || self.role != Role::Follower {
            self.step_down(term, Some(leader)).await?;
        }
        self.leader_hint = Some(leader);
        self.reset_election_deadline();

        if snapshot.height <= self.commit_index {
            return Ok(());
        }
        tracing::info!(
            target: "consensus",
            height = snapshot.height,
            "installing snapshot"
        );
        self.machine
            .restore(&snapshot)
            .await
            .map_err(|e| ConsensusError::Apply(e.to_string()))?;
        self.store.store_snapshot(&snapshot).await?;
        self.snapshot_floor = snapshot.height;
        self.floor_hash = snapshot.last_hash;
        self.commit_index = snapshot.height;
        if self.store.last_height() <= snapshot.height {
            self.last_log_term = snapshot.last_term;
            self.last_log_hash = snapshot.last_hash;
        }
        self.cluster = self.membership.current();
        self.persist_hard_state().await?;

        let ack = self.signed_ack(snapshot.height, snapshot.last_hash)?;
        let reply = ConsensusMsg::AppendReply {
            follower: self.local_id,
            term: self.current_term,
            result: AppendResult::Accepted(ack),
        };
        self.send(&leader, &reply).await;
        Ok(())
    }

    // --- Commitment and apply ---

    async fn advance_commit(&mut self, target: u64) -> Result<(), ConsensusError> {
        let target = target.min(self.store.last_height());
        if target <= self.commit_index {
            return Ok(());
        }
        self.store.mark_committed(target).await?;
        let previous = self.commit_index;
        self.commit_index = target;
        self.persist_hard_state().await?;
        consensus_metrics().set_commit_index(target);

        let from = (self.machine.last_applied() + 1).max(previous + 1);
        if from <= target {
            let blocks = self.store.read(from..=target).await?;
            for block in blocks {
                self.apply_block(&block).await?;
            }
        }
        self.tally.prune_below(self.commit_index);
        self.maybe_snapshot().await?;
        Ok(())
    }

    async fn apply_block(&mut self, block: &Block) -> Result<(), ConsensusError> {
        let outcome = self
            .machine
            .apply(block)
            .await
            // Determinism violations are not survivable.
            .map_err(|e| ConsensusError::Apply(e.to_string()))?;
        consensus_metrics().inc_blocks_committed();

        self.mempool.evict_committed(std::slice::from_ref(block));

        if let Some(SpecialEntry::ConfigChange(_)) = &block.special {
            // The new config takes effect at the next height; refresh our
            // view and the transport's peer set.
            self.cluster = self.membership.current();
            self.transport
                .update_peers(self.cluster.active().map(|v| v.validator_id).collect());
            if self
                .membership_in_flight
                .is_some_and(|h| h <= block.header.height)
            {
                self.membership_in_flight = None;
            }
        }

        let event = EngineEvent::Committed {
            block: block.clone(),
            receipts: outcome.receipts,
        };
        if self.events.send(event).await.is_err() {
            tracing::debug!(target: "consensus", "event channel closed");
        }
        Ok(())
    }

    async fn maybe_snapshot(&mut self) -> Result<(), ConsensusError> {
        let applied = self.machine.last_applied();
        if applied.saturating_sub(self.snapshot_floor) < self.config.snapshot_interval_entries {
            return Ok(());
        }
        // Capture the tail identity before compaction makes it unreadable.
        let blocks = self.store.read(applied..=applied).await?;
        let Some(tail) = blocks.last() else {
            return Ok(());
        };
        let mut snapshot = self
            .machine
            .snapshot()
            .await
            .map_err(|e| ConsensusError::Apply(e.to_string()))?;
        snapshot.last_term = tail.header.term;
        snapshot.last_hash = tail.hash_with(|b| self.crypto.hash(b));
        self.store.store_snapshot(&snapshot).await?;
        self.snapshot_floor = snapshot.height;
        self.floor_hash = snapshot.last_hash;
        tracing::info!(target: "consensus", height = snapshot.height, "snapshot taken");
        Ok(())
    }

    // --- Evidence ---

    async fn surface_evidence(&mut self, proof: EquivocationProof) {
        let key = (proof.offender, proof.term, proof.height);
        if !self.surfaced_evidence.insert(key) {
            return;
        }
        if !proof.is_structurally_valid()
            || self
                .crypto
                .verify(
                    &proof.offender,
                    &proof.first.encoded(),
                    &proof.first_signature,
                )
                .is_err()
            || self
                .crypto
                .verify(
                    &proof.offender,
                    &proof.second.encoded(),
                    &proof.second_signature,
                )
                .is_err()
        {
            tracing::warn!(target: "consensus", "discarding malformed equivocation evidence");
            return;
        }
        consensus_metrics().inc_equivocations_detected();
        tracing::warn!(
            target: "consensus",
            offender = %proof.offender,
            term = proof.term,
            height = proof.height,
            "equivocation detected"
        );
        let _ = self
            .events
            .send(EngineEvent::EquivocationDetected(proof.clone()))
            .await;
        self.broadcast(&ConsensusMsg::EquivocationEvidence(proof.clone()))
            .await;
        if self.role == Role::Leader {
            // Queue the proof for commitment; the state machine slashes on
            // apply.
            self.pending_special
                .push_back(SpecialEntry::Evidence(proof));
        }
    }

    async fn handle_evidence(&mut self, proof: EquivocationProof) -> Result<(), ConsensusError> {
        self.surface_evidence(proof).await;
        Ok(())
    }

    // --- Dispatch and transport ---

    async fn handle_message(
        &mut self,
        from: AccountId,
        msg: ConsensusMsg,
    ) -> Result<(), ConsensusError> {
        match msg {
            ConsensusMsg::RequestVote {
                candidate,
                term,
                last_log_term,
                last_log_height,
            } => {
                self.handle_request_vote(candidate, term, last_log_term, last_log_height)
                    .await
            }
            ConsensusMsg::RequestVoteReply {
                voter,
                term,
                candidate,
                granted,
                signature,
            } => {
                self.handle_vote_reply(voter, term, candidate, granted, signature)
                    .await
            }
            ConsensusMsg::AppendEntries {
                leader,
                term,
                prev_height,
                prev_hash,
                entries,
                leader_commit,
            } => {
                self.handle_append_entries(
                    leader,
                    term,
                    prev_height,
                    prev_hash,
                    entries,
                    leader_commit,
                )
                .await
            }
            ConsensusMsg::AppendReply {
                follower,
                term,
                result,
            } => {
                // The envelope sender is authoritative for routing, but the
                // signed vote inside is what the tally trusts.
                let follower = if follower == from { follower } else { from };
                self.handle_append_reply(follower, term, result).await
            }
            ConsensusMsg::CommitNotice {
                leader,
                term,
                commit_height,
            } => self.handle_commit_notice(leader, term, commit_height).await,
            ConsensusMsg::FinalityVote(vote) => self.handle_finality_vote(vote).await,
            ConsensusMsg::InstallSnapshot {
                leader,
                term,
                snapshot,
            } => self.handle_install_snapshot(leader, term, snapshot).await,
            ConsensusMsg::EquivocationEvidence(proof) => self.handle_evidence(proof).await,
        }
    }

    async fn send(&self, peer: &AccountId, msg: &ConsensusMsg) {
        let env = Envelope {
            from: self.local_id,
            topic: Topic::Consensus,
            payload: codec::to_bytes_canonical(msg),
        };
        if let Err(e) = self.transport.send(peer, env).await {
            tracing::debug!(target: "consensus", peer = %peer, error = %e, "send failed");
        }
    }

    async fn broadcast(&self, msg: &ConsensusMsg) {
        let env = Envelope {
            from: self.local_id,
            topic: Topic::Consensus,
            payload: codec::to_bytes_canonical(msg),
        };
        if let Err(e) = self.transport.broadcast(env).await {
            tracing::debug!(target: "consensus", error = %e, "broadcast failed");
        }
    }
}

/// Safety-violating conditions that must halt the process.
fn is_fatal(e: &ConsensusError) -> bool {
    match e {
        ConsensusError::Storage(inner) => inner.is_fatal(),
        ConsensusError::Apply(_) => true,
        _ => false,
    }
}
