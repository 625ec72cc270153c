//! Transport adapter: one typed request to one address, one reply back.
//!
//! The broadcast engine treats the network as a black box behind the
//! [`Transport`] trait: open a connection to a single address, send one
//! encoded request, wait up to a deadline for the reply, return a typed
//! success or a typed failure. The trait is object-safe so the engine can be
//! driven by the real TCP implementation or an in-process test double.

mod tcp;
pub mod wire;

pub use tcp::TcpTransport;

use crate::agent::{DispatchStatus, MessageType, TargetNode};
use bytes::Bytes;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Failures of a single transport attempt.
///
/// Each variant maps one-to-one onto the per-node [`DispatchStatus`]
/// taxonomy; there is deliberately no catch-all.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection could not be established.
    #[error("connect to {addr} failed: {source}")]
    ConnectFailed { addr: SocketAddr, source: io::Error },

    /// No reply arrived within the deadline.
    #[error("no reply within {0:?}")]
    TimedOut(Duration),

    /// The exchange completed but the bytes were malformed or unexpected.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    /// The per-node status this failure is recorded as.
    pub fn dispatch_status(&self) -> DispatchStatus {
        match self {
            Self::ConnectFailed { .. } => DispatchStatus::ConnectFailed,
            Self::TimedOut(_) => DispatchStatus::TimedOut,
            Self::Protocol(_) => DispatchStatus::ProtocolError,
        }
    }
}

/// Relay work delegated to the directly-contacted node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelayInstruction {
    /// Maximum forwards per hop; the receiving node re-partitions with this.
    pub spread: usize,

    /// Targets the receiving node is responsible for covering.
    pub forwards: Vec<TargetNode>,
}

/// One outbound request: message type, opaque payload, optional relay work.
#[derive(Clone, Debug)]
pub struct RpcEnvelope {
    /// RPC kind.
    pub message_type: MessageType,

    /// Opaque payload, owned by the original caller.
    pub payload: Bytes,

    /// Relay instruction for the receiving node, if any.
    pub relay: Option<RelayInstruction>,
}

impl RpcEnvelope {
    /// Creates an envelope with no relay work.
    pub fn new(message_type: MessageType, payload: Bytes) -> Self {
        Self {
            message_type,
            payload,
            relay: None,
        }
    }

    /// Attaches relay work.
    pub fn with_relay(mut self, relay: RelayInstruction) -> Self {
        self.relay = Some(relay);
        self
    }
}

/// Per-forward confirmation reported back by a relaying node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelayAck {
    /// Name of the forwarded-to node.
    pub node_name: String,

    /// What happened to the forward.
    pub status: DispatchStatus,
}

/// One inbound reply: optional response payload plus relay confirmations.
#[derive(Clone, Debug, Default)]
pub struct RpcReply {
    /// Response payload, when the handler produced one.
    pub response: Option<Bytes>,

    /// One entry per forward the replying node was asked to relay to.
    pub relay_acks: Vec<RelayAck>,
}

/// Boxed future returned by [`Transport::send`].
pub type SendFuture<'a> = Pin<Box<dyn Future<Output = Result<RpcReply, TransportError>> + Send + 'a>>;

/// Sends one request to one address and awaits one reply.
///
/// Implementations must bound the whole exchange by `deadline`; callers
/// additionally wrap the returned future in their own timeout, so a
/// misbehaving implementation cannot wedge a worker.
pub trait Transport: Send + Sync + 'static {
    /// Performs one request/reply exchange with `target`.
    fn send<'a>(
        &'a self,
        target: &'a TargetNode,
        envelope: RpcEnvelope,
        deadline: Duration,
    ) -> SendFuture<'a>;
}
