// Path: crates/api/src/transport.rs

//! The peer transport port.
//!
//! Payloads are canonical SCALE bytes; typing happens at the edges so this
//! port stays free of consensus message definitions. Reconnecting is the
//! transport's job: the core only ever observes `PeerUnreachable` and
//! `StreamAborted`, both of which it retries with bounded backoff.

use async_trait::async_trait;
use hyperraft_types::error::TransportError;
use hyperraft_types::AccountId;
use parity_scale_codec::{Decode, Encode};
use tokio::sync::mpsc;

/// The logical channel a payload belongs to.
#[derive(Encode, Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Consensus protocol messages.
    Consensus,
    /// Mempool transaction gossip.
    Mempool,
}

/// A routed message between peers.
#[derive(Encode, Decode, Debug, Clone)]
pub struct Envelope {
    /// The sending peer.
    pub from: AccountId,
    /// The logical channel.
    pub topic: Topic,
    /// Canonical SCALE bytes of the typed message.
    pub payload: Vec<u8>,
}

/// An in-order, at-most-once delivery stream to one peer.
#[async_trait]
pub trait PeerStream: Send {
    /// Sends one payload on the stream, preserving order with respect to
    /// earlier sends on the same stream.
    async fn send(&mut self, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Aborts the stream; the peer observes [`TransportError::StreamAborted`].
    async fn abort(&mut self);
}

/// Ordered, reliable-enough message channels between peers.
///
/// `send` is best-effort with no ordering across peers; per-peer streams
/// deliver in order. Consensus does not require cross-peer ordering.
#[async_trait]
pub trait Transport: Send + Sync {
    /// This node's identity on the mesh.
    fn local_id(&self) -> AccountId;

    /// Sends one message to `peer`, best-effort.
    async fn send(&self, peer: &AccountId, env: Envelope) -> Result<(), TransportError>;

    /// Sends one message to every current peer. Per-peer failures are
    /// swallowed; a broadcast only fails when the transport is closed.
    async fn broadcast(&self, env: Envelope) -> Result<(), TransportError>;

    /// Opens an in-order stream to `peer` (snapshot install, catch-up).
    async fn open_stream(&self, peer: &AccountId)
        -> Result<Box<dyn PeerStream>, TransportError>;

    /// Takes the receiver of incoming messages. Yields `None` once per
    /// transport; subsequent calls return an empty channel.
    fn subscribe(&self) -> mpsc::Receiver<Envelope>;

    /// Replaces the peer set after a committed membership change.
    fn update_peers(&self, peers: Vec<AccountId>);
}
