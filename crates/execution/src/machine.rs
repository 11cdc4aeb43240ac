// Path: crates/execution/src/machine.rs

//! The ledger state machine: deterministic apply, snapshots, slashing,
//! and cluster-config tracking.

use async_trait::async_trait;
use hyperraft_api::machine::{ApplyOutcome, ClusterConfigView, StateMachine};
use hyperraft_api::CryptoProvider;
use hyperraft_types::codec;
use hyperraft_types::error::MachineError;
use hyperraft_types::ledger::{Block, Snapshot, SpecialEntry};
use hyperraft_types::tx::{Receipt, ReceiptStatus, TxId};
use hyperraft_types::validator::{ClusterConfig, ValidatorStatus};
use hyperraft_types::{AccountId, Digest, ZERO_DIGEST};
use parity_scale_codec::{Decode, Encode};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Fraction of stake removed on a committed equivocation proof: one half.
const SLASH_DIVISOR: u128 = 2;

/// The serializable machine state. Everything needed to resume apply at
/// `last_applied + 1` deterministically.
#[derive(Encode, Decode, Debug, Clone, Default)]
struct LedgerState {
    last_applied: u64,
    state_hash: Digest,
    /// Next expected nonce per sender.
    nonces: BTreeMap<AccountId, u64>,
    /// Configuration history as `(effective_from_height, config)`, oldest
    /// first. The genesis config is effective from height 1.
    configs: Vec<(u64, ClusterConfig)>,
}

impl LedgerState {
    fn config_for_height(&self, height: u64) -> ClusterConfig {
        self.configs
            .iter()
            .rev()
            .find(|(from, _)| *from <= height)
            .or_else(|| self.configs.first())
            .map(|(_, c)| c.clone())
            .unwrap_or_default()
    }
}

/// Deterministic state machine over the committed block sequence.
pub struct LedgerStateMachine {
    crypto: Arc<dyn CryptoProvider>,
    state: RwLock<LedgerState>,
}

impl LedgerStateMachine {
    /// Creates a fresh machine with the genesis configuration, effective
    /// from height 1.
    pub fn new(crypto: Arc<dyn CryptoProvider>, genesis: ClusterConfig) -> Self {
        Self {
            crypto,
            state: RwLock::new(LedgerState {
                last_applied: 0,
                state_hash: ZERO_DIGEST,
                nonces: BTreeMap::new(),
                configs: vec![(1, genesis)],
            }),
        }
    }

    /// The next expected nonce for `sender`; 0 for unseen accounts.
    pub fn nonce_of(&self, sender: &AccountId) -> u64 {
        self.state.read().nonces.get(sender).copied().unwrap_or(0)
    }

    fn receipt_for_special(&self, special: &SpecialEntry, height: u64) -> Receipt {
        // Special entries contribute to the state hash through a synthetic
        // receipt keyed by their canonical bytes.
        let id = TxId(self.crypto.hash(&codec::to_bytes_canonical(special)));
        Receipt {
            tx_id: id,
            height,
            status: ReceiptStatus::Applied,
        }
    }

    fn apply_special(&self, state: &mut LedgerState, special: &SpecialEntry, height: u64) {
        match special {
            SpecialEntry::ConfigChange(config) => {
                let effective = height + 1;
                tracing::info!(
                    target: "execution",
                    version = config.version,
                    effective,
                    "membership change applied"
                );
                state.configs.push((effective, config.clone()));
            }
            SpecialEntry::Evidence(proof) => {
                let mut config = state.config_for_height(height + 1);
                let Some(record) = config
                    .validators
                    .iter_mut()
                    .find(|v| v.validator_id == proof.offender)
                else {
                    tracing::warn!(
                        target: "execution",
                        offender = %proof.offender,
                        "evidence names an unknown validator; ignored"
                    );
                    return;
                };
                record.stake /= SLASH_DIVISOR;

                // Jailing must never push the live set below a working
                // majority; the stake cut alone stands in that case.
                let active_after = config
                    .validators
                    .iter()
                    .filter(|v| v.is_active() && v.validator_id != proof.offender)
                    .count();
                let min_live = config.validators.len() / 2 + 1;
                if active_after >= min_live {
                    if let Some(record) = config
                        .validators
                        .iter_mut()
                        .find(|v| v.validator_id == proof.offender)
                    {
                        record.status = ValidatorStatus::Jailed;
                    }
                } else {
                    tracing::warn!(
                        target: "execution",
                        offender = %proof.offender,
                        "jailing skipped to preserve liveness; stake slashed only"
                    );
                }
                config.version += 1;
                tracing::warn!(
                    target: "execution",
                    offender = %proof.offender,
                    term = proof.term,
                    height = proof.height,
                    "offender slashed"
                );
                state.configs.push((height + 1, config));
            }
        }
    }
}

#[async_trait]
impl StateMachine for LedgerStateMachine {
    async fn apply(&self, block: &Block) -> Result<ApplyOutcome, MachineError> {
        let mut state = self.state.write();
        let height = block.header.height;
        if height != state.last_applied + 1 {
            return Err(MachineError::OutOfOrder {
                expected: state.last_applied + 1,
                got: height,
            });
        }

        let mut receipts = Vec::with_capacity(block.transactions.len() + 1);
        for tx in &block.transactions {
            let expected = state.nonces.get(&tx.sender).copied().unwrap_or(0);
            let status = if tx.nonce == expected {
                state.nonces.insert(tx.sender, expected + 1);
                ReceiptStatus::Applied
            } else {
                ReceiptStatus::Rejected("TX_NONCE_MISMATCH".into())
            };
            receipts.push(Receipt {
                tx_id: tx.tx_id,
                height,
                status,
            });
        }
        if let Some(special) = &block.special {
            self.apply_special(&mut state, special, height);
            receipts.push(self.receipt_for_special(special, height));
        }

        // state_hash = hash(prev ‖ hash_each(receipts))
        let mut preimage = Vec::with_capacity(32 + receipts.len() * 32);
        preimage.extend_from_slice(&state.state_hash);
        for receipt in &receipts {
            preimage.extend_from_slice(&self.crypto.hash(&codec::to_bytes_canonical(receipt)));
        }
        state.state_hash = self.crypto.hash(&preimage);
        state.last_applied = height;

        Ok(ApplyOutcome {
            receipts,
            new_state_hash: state.state_hash,
        })
    }

    async fn snapshot(&self) -> Result<Snapshot, MachineError> {
        let state = self.state.read();
        Ok(Snapshot {
            height: state.last_applied,
            // Chain position metadata is filled in by the consensus loop,
            // which knows the log.
            last_term: 0,
            last_hash: ZERO_DIGEST,
            state_hash: state.state_hash,
            state_blob: codec::to_bytes_canonical(&*state),
        })
    }

    async fn restore(&self, snapshot: &Snapshot) -> Result<(), MachineError> {
        let restored: LedgerState = codec::from_bytes_canonical(&snapshot.state_blob)
            .map_err(|_| MachineError::SnapshotCorrupt(snapshot.height))?;
        if restored.state_hash != snapshot.state_hash
            || restored.last_applied != snapshot.height
        {
            return Err(MachineError::SnapshotCorrupt(snapshot.height));
        }
        *self.state.write() = restored;
        tracing::info!(target: "execution", height = snapshot.height, "state restored");
        Ok(())
    }

    fn last_applied(&self) -> u64 {
        self.state.read().last_applied
    }

    fn state_hash(&self) -> Digest {
        self.state.read().state_hash
    }
}

impl ClusterConfigView for LedgerStateMachine {
    fn current(&self) -> ClusterConfig {
        let state = self.state.read();
        state.config_for_height(state.last_applied + 1)
    }

    fn config_for_height(&self, height: u64) -> ClusterConfig {
        self.state.read().config_for_height(height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyperraft_crypto::Ed25519Provider;
    use hyperraft_types::ledger::{BlockHeader, EquivocationProof};
    use hyperraft_types::tx::Transaction;
    use hyperraft_types::validator::ValidatorRecord;

    fn provider() -> Arc<Ed25519Provider> {
        Arc::new(Ed25519Provider::from_seed([9u8; 32]))
    }

    fn genesis(n: u8) -> ClusterConfig {
        ClusterConfig::new(
            0,
            (1..=n)
                .map(|b| ValidatorRecord {
                    validator_id: AccountId([b; 32]),
                    stake: 1000,
                    status: ValidatorStatus::Active,
                    peer_endpoint: format!("node-{b}"),
                })
                .collect(),
        )
    }

    fn tx(provider: &Ed25519Provider, nonce: u64, payload: &[u8]) -> Transaction {
        let sender = provider.local_id();
        let preimage = Transaction::id_preimage(payload, nonce, &sender);
        Transaction {
            tx_id: TxId(provider.hash(&preimage)),
            payload: payload.to_vec(),
            nonce,
            sender,
            signature: provider.sign(&preimage).unwrap(),
        }
    }

    fn block(height: u64, txs: Vec<Transaction>, special: Option<SpecialEntry>) -> Block {
        Block {
            header: BlockHeader {
                height,
                term: 1,
                prev_hash: ZERO_DIGEST,
                tx_root: ZERO_DIGEST,
                proposer_id: AccountId([1u8; 32]),
                timestamp_ms: height,
            },
            transactions: txs,
            special,
            proposer_signature: vec![],
        }
    }

    #[tokio::test]
    async fn apply_is_deterministic_across_machines() {
        let p = provider();
        let blocks = vec![
            block(1, vec![tx(&p, 0, b"a"), tx(&p, 1, b"b")], None),
            block(2, vec![tx(&p, 2, b"c")], None),
        ];

        let m1 = LedgerStateMachine::new(p.clone(), genesis(4));
        let m2 = LedgerStateMachine::new(p.clone(), genesis(4));
        for b in &blocks {
            let h1 = m1.apply(b).await.unwrap().new_state_hash;
            let h2 = m2.apply(b).await.unwrap().new_state_hash;
            assert_eq!(h1, h2);
        }
        assert_eq!(m1.state_hash(), m2.state_hash());
        assert_ne!(m1.state_hash(), ZERO_DIGEST);
    }

    #[tokio::test]
    async fn out_of_order_apply_rejected() {
        let p = provider();
        let machine = LedgerStateMachine::new(p.clone(), genesis(4));
        let err = machine.apply(&block(2, vec![], None)).await.unwrap_err();
        assert!(matches!(err, MachineError::OutOfOrder { expected: 1, got: 2 }));
    }

    #[tokio::test]
    async fn nonce_mismatch_yields_rejected_receipt() {
        let p = provider();
        let machine = LedgerStateMachine::new(p.clone(), genesis(4));
        let outcome = machine
            .apply(&block(1, vec![tx(&p, 5, b"skip")], None))
            .await
            .unwrap();
        assert!(matches!(
            outcome.receipts[0].status,
            ReceiptStatus::Rejected(_)
        ));
        // The account's nonce floor did not move.
        assert_eq!(machine.nonce_of(&p.local_id()), 0);
    }

    #[tokio::test]
    async fn config_change_takes_effect_next_height() {
        let p = provider();
        let machine = LedgerStateMachine::new(p.clone(), genesis(4));
        let new_config = genesis(5);
        machine
            .apply(&block(1, vec![], Some(SpecialEntry::ConfigChange(new_config))))
            .await
            .unwrap();
        assert_eq!(machine.config_for_height(1).n(), 4);
        assert_eq!(machine.config_for_height(2).n(), 5);
        assert_eq!(machine.current().n(), 5);
    }

    #[tokio::test]
    async fn evidence_slashes_and_jails() {
        let p = provider();
        let machine = LedgerStateMachine::new(p.clone(), genesis(5));
        let offender = AccountId([2u8; 32]);
        let header = BlockHeader {
            height: 9,
            term: 3,
            prev_hash: ZERO_DIGEST,
            tx_root: ZERO_DIGEST,
            proposer_id: offender,
            timestamp_ms: 0,
        };
        let mut second = header.clone();
        second.tx_root = [1u8; 32];
        let proof = EquivocationProof {
            offender,
            term: 3,
            height: 9,
            first: header,
            first_signature: vec![],
            second,
            second_signature: vec![],
        };
        machine
            .apply(&block(1, vec![], Some(SpecialEntry::Evidence(proof))))
            .await
            .unwrap();

        let config = machine.config_for_height(2);
        let record = config.get(&offender).unwrap();
        assert_eq!(record.stake, 500);
        assert_eq!(record.status, ValidatorStatus::Jailed);
        assert_eq!(config.n(), 4);
    }

    #[tokio::test]
    async fn snapshot_restore_roundtrip_and_corruption() {
        let p = provider();
        let machine = LedgerStateMachine::new(p.clone(), genesis(4));
        machine
            .apply(&block(1, vec![tx(&p, 0, b"a")], None))
            .await
            .unwrap();
        let snapshot = machine.snapshot().await.unwrap();

        let restored = LedgerStateMachine::new(p.clone(), genesis(4));
        restored.restore(&snapshot).await.unwrap();
        assert_eq!(restored.state_hash(), machine.state_hash());
        assert_eq!(restored.last_applied(), 1);
        assert_eq!(restored.nonce_of(&p.local_id()), 1);

        let mut corrupt = snapshot.clone();
        corrupt.state_hash = [0xFF; 32];
        let err = restored.restore(&corrupt).await.unwrap_err();
        assert!(matches!(err, MachineError::SnapshotCorrupt(1)));
    }
}
