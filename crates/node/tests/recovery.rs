// Path: crates/node/tests/recovery.rs

//! Crash recovery: a node restarted from its durable store replays the
//! committed prefix, matches the cluster's state hash, and rejoins.

mod common;

use common::{genesis_of, provider_for, signed_tx, test_config};
use hyperraft_api::{CryptoProvider, LogStore, Transport};
use hyperraft_bridge::NopRefundExecutor;
use hyperraft_node::{Node, NodeParams};
use hyperraft_storage::FileLogStore;
use hyperraft_transport::InProcessMesh;
use hyperraft_types::tx::PriorityClass;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn restart_replays_log_and_rejoins() {
    let providers: Vec<_> = (1u8..=3).map(provider_for).collect();
    let genesis = genesis_of(&providers, 1000);
    let mesh = InProcessMesh::new();
    let dirs: Vec<_> = (0..3).map(|_| tempfile::tempdir().unwrap()).collect();

    let start_node = |index: usize, mesh: &InProcessMesh| {
        let crypto = providers[index].clone();
        let store = Arc::new(FileLogStore::open(dirs[index].path()).unwrap());
        let transport = Arc::new(mesh.join(crypto.local_id()));
        let genesis = genesis.clone();
        async move {
            Node::start(NodeParams {
                config: test_config(),
                genesis,
                crypto: crypto as Arc<dyn CryptoProvider>,
                store: store as Arc<dyn LogStore>,
                transport: transport as Arc<dyn Transport>,
                refunder: Arc::new(NopRefundExecutor),
            })
            .await
            .unwrap()
        }
    };

    let mut nodes = Vec::new();
    for index in 0..3 {
        nodes.push(start_node(index, &mesh).await);
    }

    // Elect, then commit a few entries through the leader.
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    let leader_index = loop {
        if let Some(index) = nodes
            .iter()
            .position(|n| n.status().role == hyperraft_consensus::Role::Leader)
        {
            break index;
        }
        assert!(std::time::Instant::now() < deadline, "leader in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    };
    let leader = nodes[leader_index].clone();
    // Crash a follower, never the leader.
    let crash_index = (leader_index + 1) % 3;

    let sender = provider_for(70);
    let mut committed = 0;
    for nonce in 0..5u64 {
        let rx = leader
            .submit_transaction(
                signed_tx(&sender, nonce, format!("durable-{nonce}").as_bytes()),
                PriorityClass::Normal,
            )
            .await
            .unwrap();
        let receipt = tokio::time::timeout(Duration::from_secs(3), rx)
            .await
            .expect("receipt")
            .unwrap();
        committed = committed.max(receipt.height);
    }

    // Let the victim observe the commit, then crash it.
    let deadline = std::time::Instant::now() + Duration::from_secs(3);
    while nodes[crash_index].status().commit_index < committed {
        assert!(std::time::Instant::now() < deadline, "victim sees commits");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let reference_hash = nodes[crash_index].status().state_hash;
    nodes[crash_index].shutdown().await;

    // Restart from the same directory; recovery replays the log.
    let restarted = start_node(crash_index, &mesh).await;
    let deadline = std::time::Instant::now() + Duration::from_secs(3);
    while restarted.status().commit_index < committed {
        assert!(std::time::Instant::now() < deadline, "recovery replays the log");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(
        restarted.status().state_hash,
        reference_hash,
        "state hash reproduced from the durable log"
    );

    // The restarted node keeps following new commits.
    let rx = leader
        .submit_transaction(signed_tx(&sender, 5, b"after-restart"), PriorityClass::Normal)
        .await
        .unwrap();
    let receipt = tokio::time::timeout(Duration::from_secs(3), rx)
        .await
        .expect("receipt")
        .unwrap();
    let deadline = std::time::Instant::now() + Duration::from_secs(3);
    while restarted.status().commit_index < receipt.height {
        assert!(std::time::Instant::now() < deadline, "restarted node follows");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    for (index, node) in nodes.iter().enumerate() {
        if index != crash_index {
            node.shutdown().await;
        }
    }
    restarted.shutdown().await;
}
