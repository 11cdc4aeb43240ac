// Path: crates/transport/src/lib.rs
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
//! In-process transport: a channel mesh implementing the transport port.
//!
//! Every node registers an inbox with the mesh; sends are bounded-channel
//! pushes with best-effort semantics. The mesh supports partition
//! injection so cluster tests can cut and heal links deterministically.
//! A node in another partition group is simply `PeerUnreachable`: exactly
//! what a real transport reports, so consensus code cannot tell the
//! difference.

use async_trait::async_trait;
use hyperraft_api::transport::{Envelope, PeerStream, Transport};
use hyperraft_types::error::TransportError;
use hyperraft_types::AccountId;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

const INBOX_CAPACITY: usize = 4096;

struct MeshInner {
    inboxes: RwLock<HashMap<AccountId, mpsc::Sender<Envelope>>>,
    /// Partition group per node; nodes in different groups cannot talk.
    groups: RwLock<HashMap<AccountId, u32>>,
}

/// The shared mesh all nodes of a test cluster join.
#[derive(Clone)]
pub struct InProcessMesh {
    inner: Arc<MeshInner>,
}

impl Default for InProcessMesh {
    fn default() -> Self {
        Self::new()
    }
}

impl InProcessMesh {
    /// Creates an empty mesh.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MeshInner {
                inboxes: RwLock::new(HashMap::new()),
                groups: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Registers `id` and returns its transport endpoint.
    pub fn join(&self, id: AccountId) -> ChannelTransport {
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        self.inner.inboxes.write().insert(id, tx);
        ChannelTransport {
            local: id,
            mesh: self.inner.clone(),
            inbox: Mutex::new(Some(rx)),
            peers: RwLock::new(Vec::new()),
        }
    }

    /// Splits the mesh into partition groups. Nodes absent from `groups`
    /// keep group 0.
    pub fn partition(&self, groups: &[&[AccountId]]) {
        let mut map = self.inner.groups.write();
        map.clear();
        for (index, group) in groups.iter().enumerate() {
            for id in *group {
                map.insert(*id, index as u32);
            }
        }
        tracing::info!(target: "transport", groups = groups.len(), "partition installed");
    }

    /// Removes all partitions.
    pub fn heal(&self) {
        self.inner.groups.write().clear();
        tracing::info!(target: "transport", "partition healed");
    }
}

impl MeshInner {
    fn reachable(&self, from: &AccountId, to: &AccountId) -> bool {
        let groups = self.groups.read();
        let a = groups.get(from).copied().unwrap_or(0);
        let b = groups.get(to).copied().unwrap_or(0);
        a == b
    }

    fn deliver(&self, to: &AccountId, env: Envelope) -> Result<(), TransportError> {
        if !self.reachable(&env.from, to) {
            return Err(TransportError::PeerUnreachable(*to));
        }
        let inboxes = self.inboxes.read();
        let Some(tx) = inboxes.get(to) else {
            return Err(TransportError::PeerUnreachable(*to));
        };
        // Best-effort: a full or closed inbox is a dropped message, which
        // consensus already tolerates.
        tx.try_send(env)
            .map_err(|_| TransportError::PeerUnreachable(*to))
    }
}

/// One node's endpoint on the mesh.
pub struct ChannelTransport {
    local: AccountId,
    mesh: Arc<MeshInner>,
    inbox: Mutex<Option<mpsc::Receiver<Envelope>>>,
    peers: RwLock<Vec<AccountId>>,
}

#[async_trait]
impl Transport for ChannelTransport {
    fn local_id(&self) -> AccountId {
        self.local
    }

    async fn send(&self, peer: &AccountId, env: Envelope) -> Result<(), TransportError> {
        self.mesh.deliver(peer, env)
    }

    async fn broadcast(&self, env: Envelope) -> Result<(), TransportError> {
        let peers = self.peers.read().clone();
        for peer in peers {
            if peer == self.local {
                continue;
            }
            if let Err(e) = self.mesh.deliver(&peer, env.clone()) {
                tracing::trace!(target: "transport", peer = %peer, error = %e, "broadcast drop");
            }
        }
        Ok(())
    }

    async fn open_stream(
        &self,
        peer: &AccountId,
    ) -> Result<Box<dyn PeerStream>, TransportError> {
        if !self.mesh.reachable(&self.local, peer) {
            return Err(TransportError::PeerUnreachable(*peer));
        }
        Ok(Box::new(ChannelStream {
            from: self.local,
            to: *peer,
            mesh: self.mesh.clone(),
            aborted: false,
        }))
    }

    fn subscribe(&self) -> mpsc::Receiver<Envelope> {
        self.inbox.lock().take().unwrap_or_else(|| {
            // Subsequent subscribers get a channel that never yields.
            let (_tx, rx) = mpsc::channel(1);
            rx
        })
    }

    fn update_peers(&self, peers: Vec<AccountId>) {
        *self.peers.write() = peers;
    }
}

struct ChannelStream {
    from: AccountId,
    to: AccountId,
    mesh: Arc<MeshInner>,
    aborted: bool,
}

#[async_trait]
impl PeerStream for ChannelStream {
    async fn send(&mut self, payload: Vec<u8>) -> Result<(), TransportError> {
        if self.aborted {
            return Err(TransportError::StreamAborted(self.to));
        }
        self.mesh.deliver(
            &self.to,
            Envelope {
                from: self.from,
                topic: hyperraft_api::transport::Topic::Consensus,
                payload,
            },
        )
    }

    async fn abort(&mut self) {
        self.aborted = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyperraft_api::transport::Topic;

    fn id(b: u8) -> AccountId {
        AccountId([b; 32])
    }

    fn env(from: AccountId, tag: u8) -> Envelope {
        Envelope {
            from,
            topic: Topic::Consensus,
            payload: vec![tag],
        }
    }

    #[tokio::test]
    async fn send_and_receive() {
        let mesh = InProcessMesh::new();
        let a = mesh.join(id(1));
        let b = mesh.join(id(2));
        let mut inbox = b.subscribe();

        a.send(&id(2), env(id(1), 7)).await.unwrap();
        let received = inbox.recv().await.unwrap();
        assert_eq!(received.from, id(1));
        assert_eq!(received.payload, vec![7]);
    }

    #[tokio::test]
    async fn per_peer_order_preserved() {
        let mesh = InProcessMesh::new();
        let a = mesh.join(id(1));
        let b = mesh.join(id(2));
        let mut inbox = b.subscribe();

        for tag in 0..10u8 {
            a.send(&id(2), env(id(1), tag)).await.unwrap();
        }
        for tag in 0..10u8 {
            assert_eq!(inbox.recv().await.unwrap().payload, vec![tag]);
        }
    }

    #[tokio::test]
    async fn partition_blocks_and_heal_restores() {
        let mesh = InProcessMesh::new();
        let a = mesh.join(id(1));
        let b = mesh.join(id(2));
        let mut inbox = b.subscribe();

        mesh.partition(&[&[id(1)], &[id(2)]]);
        let err = a.send(&id(2), env(id(1), 1)).await.unwrap_err();
        assert!(matches!(err, TransportError::PeerUnreachable(_)));

        mesh.heal();
        a.send(&id(2), env(id(1), 2)).await.unwrap();
        assert_eq!(inbox.recv().await.unwrap().payload, vec![2]);
    }

    #[tokio::test]
    async fn broadcast_reaches_configured_peers_only() {
        let mesh = InProcessMesh::new();
        let a = mesh.join(id(1));
        let b = mesh.join(id(2));
        let c = mesh.join(id(3));
        let mut inbox_b = b.subscribe();
        let mut inbox_c = c.subscribe();

        a.update_peers(vec![id(1), id(2)]);
        a.broadcast(env(id(1), 9)).await.unwrap();

        assert_eq!(inbox_b.recv().await.unwrap().payload, vec![9]);
        // c is not in a's peer set; nothing arrives.
        assert!(inbox_c.try_recv().is_err());
    }

    #[tokio::test]
    async fn aborted_stream_errors() {
        let mesh = InProcessMesh::new();
        let a = mesh.join(id(1));
        let _b = mesh.join(id(2));
        let mut stream = a.open_stream(&id(2)).await.unwrap();
        stream.send(vec![1]).await.unwrap();
        stream.abort().await;
        assert!(matches!(
            stream.send(vec![2]).await,
            Err(TransportError::StreamAborted(_))
        ));
    }
}
