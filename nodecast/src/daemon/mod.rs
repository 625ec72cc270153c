//! Per-node daemon: the inbound side of the broadcast engine.
//!
//! The daemon accepts a connection, decodes exactly one envelope, executes
//! any relay instruction it carries, dispatches the message to a local
//! handler, writes one reply, and closes the connection. Connection handlers
//! run in a supervised task tracker so shutdown can join everything
//! outstanding instead of abandoning it.
//!
//! Relay execution is where the tree fan-out actually spreads: the daemon
//! re-partitions its forward list with the same planner the controller used
//! (direct width = the envelope's spread) and forwards concurrently, one hop
//! further down, reporting a relay ack per forward in its reply.

mod registration;

pub use registration::{send_registration, ActiveStep, NodeRegistration};

use crate::agent::pool::settle_attempt;
use crate::agent::{fanout, DispatchGroup, MessageType};
use crate::config::DaemonSettings;
use crate::transport::{wire, RelayAck, RelayInstruction, RpcEnvelope, RpcReply, Transport};
use bytes::Bytes;
use futures::future::join_all;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Daemon startup failures. These are fatal to the owning process.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// The listen socket could not be bound.
    #[error("failed to bind {addr}: {source}")]
    BindFailed { addr: SocketAddr, source: io::Error },
}

/// One decoded inbound message, as seen by the local handler.
///
/// Relay instructions are consumed by the daemon itself and never reach the
/// handler.
#[derive(Clone, Debug)]
pub struct InboundMessage {
    /// Peer that opened the connection.
    pub peer: SocketAddr,

    /// RPC kind.
    pub message_type: MessageType,

    /// Opaque payload; interpretation belongs to the handler.
    pub payload: Bytes,
}

/// Boxed future returned by [`RequestHandler::handle`].
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Option<Bytes>> + Send + 'a>>;

/// Dispatch target for decoded messages.
///
/// The returned bytes, if any, ride back as the reply's response payload.
pub trait RequestHandler: Send + Sync + 'static {
    /// Handles one message.
    fn handle<'a>(&'a self, message: InboundMessage) -> HandlerFuture<'a>;
}

/// The node daemon.
pub struct NodeDaemon {
    settings: DaemonSettings,
    listener: TcpListener,
    bound_addr: SocketAddr,
    handler: Arc<dyn RequestHandler>,
    transport: Arc<dyn Transport>,
}

impl NodeDaemon {
    /// Binds the listen socket and constructs the daemon context.
    pub async fn bind(
        settings: DaemonSettings,
        handler: Arc<dyn RequestHandler>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, DaemonError> {
        let listener =
            TcpListener::bind(settings.listen_addr)
                .await
                .map_err(|source| DaemonError::BindFailed {
                    addr: settings.listen_addr,
                    source,
                })?;
        let bound_addr = listener
            .local_addr()
            .map_err(|source| DaemonError::BindFailed {
                addr: settings.listen_addr,
                source,
            })?;

        info!(node = %settings.node_name, addr = %bound_addr, "daemon listening");
        Ok(Self {
            settings,
            listener,
            bound_addr,
            handler,
            transport,
        })
    }

    /// The address actually bound, useful when the port was 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.bound_addr
    }

    /// The settings this daemon was built with.
    pub fn settings(&self) -> &DaemonSettings {
        &self.settings
    }

    /// Serves connections until shutdown is signalled, then drains
    /// outstanding handlers before returning.
    pub async fn run(self, shutdown: CancellationToken) {
        let tracker = TaskTracker::new();

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!(node = %self.settings.node_name, "daemon shutting down");
                    break;
                }

                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let handler = Arc::clone(&self.handler);
                            let transport = Arc::clone(&self.transport);
                            let relay_timeout = self.settings.relay_timeout;
                            tracker.spawn(async move {
                                service_connection(stream, peer, handler, transport, relay_timeout)
                                    .await;
                            });
                        }
                        Err(error) => {
                            warn!(%error, "accept failed");
                        }
                    }
                }
            }
        }

        tracker.close();
        tracker.wait().await;
        info!(node = %self.settings.node_name, "daemon drained");
    }
}

/// Services one connection: one envelope in, one reply out.
async fn service_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    handler: Arc<dyn RequestHandler>,
    transport: Arc<dyn Transport>,
    relay_timeout: Duration,
) {
    let body = match wire::read_frame(&mut stream).await {
        Ok(body) => body,
        Err(error) => {
            warn!(%peer, %error, "failed to read request frame");
            return;
        }
    };

    let envelope = match wire::decode_envelope(body) {
        Ok(envelope) => envelope,
        Err(error) => {
            warn!(%peer, %error, "failed to decode envelope");
            return;
        }
    };

    debug!(
        %peer,
        message_type = %envelope.message_type,
        relay = envelope.relay.as_ref().map(|r| r.forwards.len()).unwrap_or(0),
        "message received"
    );

    let relay_acks = match &envelope.relay {
        Some(instruction) => {
            execute_relay(
                instruction,
                envelope.message_type,
                envelope.payload.clone(),
                transport.as_ref(),
                relay_timeout,
            )
            .await
        }
        None => Vec::new(),
    };

    let response = handler
        .handle(InboundMessage {
            peer,
            message_type: envelope.message_type,
            payload: envelope.payload,
        })
        .await;

    let reply = RpcReply {
        response,
        relay_acks,
    };
    if let Err(error) = wire::write_frame(&mut stream, &wire::encode_reply(&reply)).await {
        warn!(%peer, %error, "failed to write reply");
    }
}

/// Forwards the message to this hop's share of the tree.
///
/// The forward list is re-partitioned with the planner (direct width =
/// spread) and each sub-group's leader is contacted concurrently, carrying
/// its own remainder one hop further. Exactly one ack per forward target
/// comes back, relayed-to-relays included.
async fn execute_relay(
    instruction: &RelayInstruction,
    message_type: MessageType,
    payload: Bytes,
    transport: &dyn Transport,
    relay_timeout: Duration,
) -> Vec<RelayAck> {
    let spread = instruction.spread.max(1);
    let plan = fanout::plan(&instruction.forwards, spread, spread);

    let sends = plan.groups.iter().map(|group| {
        let payload = payload.clone();
        async move {
            let attempt = tokio::time::timeout(
                relay_timeout,
                transport.send(&group.leader, relay_envelope(group, message_type, payload, spread), relay_timeout),
            )
            .await;

            settle_attempt(group, attempt)
        }
    });

    join_all(sends)
        .await
        .into_iter()
        .flatten()
        .map(|outcome| RelayAck {
            node_name: outcome.node_name,
            status: outcome.status,
        })
        .collect()
}

fn relay_envelope(
    group: &DispatchGroup,
    message_type: MessageType,
    payload: Bytes,
    spread: usize,
) -> RpcEnvelope {
    let mut envelope = RpcEnvelope::new(message_type, payload);
    if !group.forwards.is_empty() {
        envelope = envelope.with_relay(RelayInstruction {
            spread,
            forwards: group.forwards.clone(),
        });
    }
    envelope
}
