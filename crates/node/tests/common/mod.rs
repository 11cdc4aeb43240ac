// Path: crates/node/tests/common/mod.rs

//! Shared cluster harness for the end-to-end tests.

#![allow(dead_code)]

use hyperraft_api::{CryptoProvider, LogStore, Transport};
use hyperraft_bridge::NopRefundExecutor;
use hyperraft_crypto::Ed25519Provider;
use hyperraft_node::{Node, NodeParams};
use hyperraft_storage::MemoryLogStore;
use hyperraft_transport::InProcessMesh;
use hyperraft_types::config::NodeConfig;
use hyperraft_types::tx::{Transaction, TxId};
use hyperraft_types::validator::{ClusterConfig, ValidatorRecord, ValidatorStatus};
use hyperraft_types::AccountId;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct ClusterNode {
    pub node: Node,
    pub crypto: Arc<Ed25519Provider>,
    pub store: Arc<MemoryLogStore>,
}

pub struct TestCluster {
    pub mesh: InProcessMesh,
    pub nodes: Vec<ClusterNode>,
    pub genesis: ClusterConfig,
}

pub fn provider_for(seed: u8) -> Arc<Ed25519Provider> {
    Arc::new(Ed25519Provider::from_seed([seed; 32]))
}

pub fn genesis_of(providers: &[Arc<Ed25519Provider>], stake: u128) -> ClusterConfig {
    ClusterConfig::new(
        0,
        providers
            .iter()
            .map(|p| ValidatorRecord {
                validator_id: p.local_id(),
                stake,
                status: ValidatorStatus::Active,
                peer_endpoint: format!("mesh://{}", p.local_id()),
            })
            .collect(),
    )
}

pub fn test_config() -> NodeConfig {
    NodeConfig {
        election_timeout_base_ms: 150,
        heartbeat_interval_ms: 50,
        ..NodeConfig::default()
    }
}

impl TestCluster {
    /// Starts `n` nodes with equal stake on a fresh mesh.
    pub async fn start(n: u8) -> Self {
        Self::start_with(n, test_config()).await
    }

    pub async fn start_with(n: u8, config: NodeConfig) -> Self {
        let providers: Vec<_> = (1..=n).map(provider_for).collect();
        let genesis = genesis_of(&providers, 1000);
        let mesh = InProcessMesh::new();

        let mut nodes = Vec::with_capacity(n as usize);
        for crypto in providers {
            let store = Arc::new(MemoryLogStore::new());
            let transport = Arc::new(mesh.join(crypto.local_id()));
            let node = Node::start(NodeParams {
                config: config.clone(),
                genesis: genesis.clone(),
                crypto: crypto.clone() as Arc<dyn CryptoProvider>,
                store: store.clone() as Arc<dyn LogStore>,
                transport: transport as Arc<dyn Transport>,
                refunder: Arc::new(NopRefundExecutor),
            })
            .await
            .expect("node start");
            nodes.push(ClusterNode {
                node,
                crypto,
                store,
            });
        }
        TestCluster {
            mesh,
            nodes,
            genesis,
        }
    }

    /// Waits until some node reports a leader; returns its id.
    pub async fn wait_for_leader(&self, timeout: Duration) -> Option<AccountId> {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            for entry in &self.nodes {
                let status = entry.node.status();
                if status.role == hyperraft_consensus::Role::Leader {
                    return Some(entry.crypto.local_id());
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        None
    }

    /// Index of the node currently acting as leader, if any.
    pub fn leader_index(&self) -> Option<usize> {
        self.nodes
            .iter()
            .position(|e| e.node.status().role == hyperraft_consensus::Role::Leader)
    }

    /// Waits until every listed node reports `commit_index >= height`.
    pub async fn wait_commit_at_least(
        &self,
        indexes: &[usize],
        height: u64,
        timeout: Duration,
    ) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if indexes
                .iter()
                .all(|&i| self.nodes[i].node.status().commit_index >= height)
            {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    /// All node indexes.
    pub fn all(&self) -> Vec<usize> {
        (0..self.nodes.len()).collect()
    }

    pub async fn shutdown(&self) {
        for entry in &self.nodes {
            entry.node.shutdown().await;
        }
    }
}

/// Builds a correctly signed transaction from `provider`.
pub fn signed_tx(provider: &Ed25519Provider, nonce: u64, payload: &[u8]) -> Transaction {
    let sender = provider.local_id();
    let preimage = Transaction::id_preimage(payload, nonce, &sender);
    Transaction {
        tx_id: TxId(provider.hash(&preimage)),
        payload: payload.to_vec(),
        nonce,
        sender,
        signature: provider.sign(&preimage).expect("sign"),
    }
}
