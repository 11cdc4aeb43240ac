// Path: crates/node/tests/determinism.rs

//! State determinism property: replaying any committed prefix on fresh
//! machines yields identical state hashes at every height.

mod common;

use common::{genesis_of, provider_for};
use hyperraft_api::{CryptoProvider, StateMachine};
use hyperraft_execution::LedgerStateMachine;
use hyperraft_types::ledger::{merkle_root, Block, BlockHeader};
use hyperraft_types::tx::{Transaction, TxId};
use hyperraft_types::ZERO_DIGEST;
use proptest::prelude::*;
use std::sync::Arc;

/// A compact description of one generated transaction.
#[derive(Debug, Clone)]
struct TxPlan {
    sender_seed: u8,
    nonce: u64,
    payload: Vec<u8>,
}

fn tx_plan() -> impl Strategy<Value = TxPlan> {
    (1u8..=4, 0u64..3, proptest::collection::vec(any::<u8>(), 0..32)).prop_map(
        |(sender_seed, nonce, payload)| TxPlan {
            sender_seed,
            nonce,
            payload,
        },
    )
}

fn blocks_from_plans(plans: Vec<Vec<TxPlan>>) -> Vec<Block> {
    let hasher = provider_for(90);
    let mut prev_hash = ZERO_DIGEST;
    plans
        .into_iter()
        .enumerate()
        .map(|(i, txs)| {
            let transactions: Vec<Transaction> = txs
                .into_iter()
                .map(|plan| {
                    let provider = provider_for(plan.sender_seed);
                    let sender = provider.local_id();
                    let preimage =
                        Transaction::id_preimage(&plan.payload, plan.nonce, &sender);
                    Transaction {
                        tx_id: TxId(provider.hash(&preimage)),
                        payload: plan.payload,
                        nonce: plan.nonce,
                        sender,
                        signature: provider.sign(&preimage).unwrap(),
                    }
                })
                .collect();
            let ids: Vec<TxId> = transactions.iter().map(|t| t.tx_id).collect();
            let header = BlockHeader {
                height: i as u64 + 1,
                term: 1,
                prev_hash,
                tx_root: merkle_root(&ids, |b| hasher.hash(b)),
                proposer_id: hasher.local_id(),
                timestamp_ms: i as u64,
            };
            prev_hash = hasher.hash(&header.encoded());
            Block {
                header,
                transactions,
                special: None,
                proposer_signature: vec![],
            }
        })
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn replay_yields_identical_state_hashes(
        plans in proptest::collection::vec(
            proptest::collection::vec(tx_plan(), 0..6),
            1..8,
        )
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        runtime.block_on(async {
            let blocks = blocks_from_plans(plans);
            let crypto = provider_for(90);
            let genesis = genesis_of(&[crypto.clone()], 1000);

            let first = LedgerStateMachine::new(
                crypto.clone() as Arc<dyn CryptoProvider>, genesis.clone());
            let second = LedgerStateMachine::new(
                crypto.clone() as Arc<dyn CryptoProvider>, genesis);

            for block in &blocks {
                let a = first.apply(block).await.unwrap();
                let b = second.apply(block).await.unwrap();
                // Identical at every height, receipts included.
                prop_assert_eq!(a.new_state_hash, b.new_state_hash);
                prop_assert_eq!(a.receipts, b.receipts);
            }
            prop_assert_eq!(first.state_hash(), second.state_hash());
            Ok(())
        })?;
    }
}
