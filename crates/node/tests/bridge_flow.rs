// Path: crates/node/tests/bridge_flow.rs

//! Bridge lifecycle through the node surface: verification to execution,
//! timeout to refund, and terminal exclusivity.

mod common;

use common::{provider_for, TestCluster};
use hyperraft_api::CryptoProvider;
use hyperraft_crypto::Ed25519Provider;
use hyperraft_types::bridge::{BridgeRequest, BridgeStatus, BridgeTransfer};
use hyperraft_types::codec;
use hyperraft_types::AccountId;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

fn oracles(n: u8) -> (Vec<Arc<Ed25519Provider>>, BTreeSet<AccountId>) {
    let providers: Vec<_> = (100..100 + n).map(provider_for).collect();
    let set = providers.iter().map(|p| p.local_id()).collect();
    (providers, set)
}

fn request(set: &BTreeSet<AccountId>, timeout_s: u64) -> BridgeRequest {
    BridgeRequest {
        source_chain: "alpha".into(),
        dest_chain: "beta".into(),
        asset: "AUR".into(),
        amount: 250,
        recipient: vec![0xBE, 0xEF],
        oracle_set: set.clone(),
        timeout_s,
    }
}

fn attest(provider: &Ed25519Provider, transfer: &BridgeTransfer) -> Vec<u8> {
    provider.sign(&transfer.attestation_bytes()).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn verified_transfer_executes() {
    let cluster = TestCluster::start(1).await;
    let node = &cluster.nodes[0].node;
    let (providers, set) = oracles(4);

    let mut monitor = node.bridge_monitor();
    let transfer = node.bridge_initiate(request(&set, 60)).unwrap();

    // Three of four approvals pass the strict two-thirds bar.
    for provider in providers.iter().take(3) {
        node.bridge_verify(
            transfer.bridge_id,
            provider.local_id(),
            true,
            attest(provider, &transfer),
        )
        .unwrap();
    }
    assert_eq!(
        node.bridge_status(&transfer.bridge_id).unwrap().status,
        BridgeStatus::Verified
    );

    let dest_hash = [0x42; 32];
    let message = codec::to_bytes_canonical(&(&transfer.bridge_id, &dest_hash, b"executed"));
    let signature = providers[0].sign(&message).unwrap();
    node.bridge_execute_callback(transfer.bridge_id, dest_hash, signature.clone())
        .unwrap();
    // Idempotent on the destination hash.
    node.bridge_execute_callback(transfer.bridge_id, dest_hash, signature)
        .unwrap();
    assert_eq!(
        node.bridge_status(&transfer.bridge_id).unwrap().status,
        BridgeStatus::Executed
    );

    // The monitor observed the full path.
    let mut seen = Vec::new();
    while let Ok(event) = monitor.try_recv() {
        if event.bridge_id == transfer.bridge_id {
            seen.push(event.status);
        }
    }
    assert_eq!(
        seen,
        vec![
            BridgeStatus::Pending,
            BridgeStatus::Verified,
            BridgeStatus::Executed
        ]
    );

    cluster.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn timeout_refund_never_executes() {
    let cluster = TestCluster::start(1).await;
    let node = &cluster.nodes[0].node;
    let (providers, set) = oracles(4);

    // One-second timeout, a single approval: quorum is never reached.
    let transfer = node.bridge_initiate(request(&set, 1)).unwrap();
    node.bridge_verify(
        transfer.bridge_id,
        providers[0].local_id(),
        true,
        attest(&providers[0], &transfer),
    )
    .unwrap();

    // At t = 1.1s the sweep has timed the transfer out.
    tokio::time::sleep(Duration::from_millis(1100)).await;
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    loop {
        let status = node.bridge_status(&transfer.bridge_id).unwrap().status;
        if status == BridgeStatus::TimedOut {
            break;
        }
        assert_ne!(status, BridgeStatus::Executed, "never executes");
        assert!(std::time::Instant::now() < deadline, "sweep times out the transfer");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    // A late execution attempt is rejected outright.
    let dest_hash = [0x43; 32];
    let message = codec::to_bytes_canonical(&(&transfer.bridge_id, &dest_hash, b"executed"));
    let signature = providers[0].sign(&message).unwrap();
    assert!(node
        .bridge_execute_callback(transfer.bridge_id, dest_hash, signature)
        .is_err());

    // Source-chain refund confirmation lands the terminal state.
    let refund_msg = codec::to_bytes_canonical(&(&transfer.bridge_id, b"refunded"));
    let refund_sig = providers[1].sign(&refund_msg).unwrap();
    let status = node
        .bridge_confirm_refund(transfer.bridge_id, providers[1].local_id(), refund_sig)
        .unwrap();
    assert_eq!(status, BridgeStatus::Refunded);

    cluster.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn batch_admission_is_per_request() {
    let cluster = TestCluster::start(1).await;
    let node = &cluster.nodes[0].node;
    let (_, set) = oracles(3);

    let mut empty_oracles = request(&set, 60);
    empty_oracles.oracle_set = BTreeSet::new();
    let response = node.bridge_batch(vec![
        request(&set, 60),
        empty_oracles,
        request(&set, 60),
    ]);

    assert_eq!(response.accepted_count, 2);
    assert_eq!(response.outcomes.len(), 3);
    assert!(response.outcomes[0].bridge_id.is_some());
    assert!(response.outcomes[1].error.is_some());
    assert!(response.outcomes[2].bridge_id.is_some());

    // Accepted requests really exist; the rejected one left no trace.
    for outcome in &response.outcomes {
        if let Some(id) = outcome.bridge_id {
            assert_eq!(
                node.bridge_status(&id).unwrap().status,
                BridgeStatus::Pending
            );
        }
    }

    cluster.shutdown().await;
}
