//! TCP transport: one connection, one request frame, one reply frame.

use super::wire;
use super::{RpcEnvelope, RpcReply, SendFuture, Transport, TransportError};
use crate::agent::TargetNode;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::trace;

/// The production transport.
///
/// Opens a fresh connection per attempt, mirroring the one-message-per-
/// connection daemon contract: connect, write the envelope frame, read the
/// reply frame, close. The whole exchange is bounded by the caller's
/// deadline.
#[derive(Clone, Copy, Debug, Default)]
pub struct TcpTransport;

impl TcpTransport {
    /// Creates the transport.
    pub fn new() -> Self {
        Self
    }

    async fn exchange(
        target: &TargetNode,
        envelope: RpcEnvelope,
    ) -> Result<RpcReply, TransportError> {
        let mut stream =
            TcpStream::connect(target.address)
                .await
                .map_err(|source| TransportError::ConnectFailed {
                    addr: target.address,
                    source,
                })?;
        // Request/reply over a short-lived connection; coalescing hurts here
        let _ = stream.set_nodelay(true);

        let body = wire::encode_envelope(&envelope);
        wire::write_frame(&mut stream, &body)
            .await
            .map_err(|e| TransportError::Protocol(format!("writing request: {}", e)))?;

        let reply_body = wire::read_frame(&mut stream)
            .await
            .map_err(|e| TransportError::Protocol(format!("reading reply: {}", e)))?;

        let reply = wire::decode_reply(reply_body)
            .map_err(|e| TransportError::Protocol(format!("decoding reply: {}", e)))?;

        trace!(
            node = %target.name,
            relay_acks = reply.relay_acks.len(),
            "exchange complete"
        );
        Ok(reply)
    }
}

impl Transport for TcpTransport {
    fn send<'a>(
        &'a self,
        target: &'a TargetNode,
        envelope: RpcEnvelope,
        deadline: Duration,
    ) -> SendFuture<'a> {
        Box::pin(async move {
            match tokio::time::timeout(deadline, Self::exchange(target, envelope)).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::TimedOut(deadline)),
            }
        })
    }
}
