//! Envelope framing for the daemon contract.
//!
//! RPC payloads stay opaque end to end; what is framed here is the envelope
//! around them: message type, payload length, and the relay instruction. A
//! frame on the wire is a big-endian `u32` length followed by that many body
//! bytes:
//!
//! ```text
//! request body:  u16 message_type
//!                u32 payload_len, payload bytes
//!                u16 spread          (0 when there is no relay work)
//!                u16 forward_count
//!                  per forward: address, u16 name_len, name bytes
//!
//! reply body:    u8  has_response; if 1: u32 response_len, response bytes
//!                u16 relay_ack_count
//!                  per ack: u16 name_len, name bytes, u8 status
//!
//! address:       u8 tag (4|6), 4 or 16 octets, u16 port
//! ```

use super::{RelayAck, RelayInstruction, RpcEnvelope, RpcReply};
use crate::agent::{DispatchStatus, MessageType, TargetNode};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single frame body; larger frames are rejected unread.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Wire-level decode and framing failures.
#[derive(Debug, Error)]
pub enum WireError {
    /// The body ended before a field was complete.
    #[error("truncated frame")]
    Truncated,

    /// The message-type discriminant is not one we know.
    #[error("unknown message type {0}")]
    UnknownMessageType(u16),

    /// The relay-ack status code is not one we know.
    #[error("unknown dispatch status {0}")]
    UnknownStatus(u8),

    /// The address tag was neither IPv4 nor IPv6.
    #[error("bad address tag {0}")]
    BadAddressTag(u8),

    /// Node name bytes were not valid UTF-8.
    #[error("node name is not valid utf-8")]
    BadUtf8,

    /// Declared frame length exceeds [`MAX_FRAME_LEN`].
    #[error("frame of {0} bytes exceeds limit")]
    FrameTooLarge(usize),

    /// Socket-level failure while reading or writing a frame.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

// =============================================================================
// Status codes
// =============================================================================

fn status_code(status: DispatchStatus) -> u8 {
    match status {
        DispatchStatus::Acked => 0,
        DispatchStatus::TimedOut => 1,
        DispatchStatus::ConnectFailed => 2,
        DispatchStatus::ProtocolError => 3,
    }
}

fn status_from_code(code: u8) -> Result<DispatchStatus, WireError> {
    match code {
        0 => Ok(DispatchStatus::Acked),
        1 => Ok(DispatchStatus::TimedOut),
        2 => Ok(DispatchStatus::ConnectFailed),
        3 => Ok(DispatchStatus::ProtocolError),
        other => Err(WireError::UnknownStatus(other)),
    }
}

// =============================================================================
// Primitive readers
// =============================================================================

fn take_u8(buf: &mut Bytes) -> Result<u8, WireError> {
    if buf.remaining() < 1 {
        return Err(WireError::Truncated);
    }
    Ok(buf.get_u8())
}

fn take_u16(buf: &mut Bytes) -> Result<u16, WireError> {
    if buf.remaining() < 2 {
        return Err(WireError::Truncated);
    }
    Ok(buf.get_u16())
}

fn take_u32(buf: &mut Bytes) -> Result<u32, WireError> {
    if buf.remaining() < 4 {
        return Err(WireError::Truncated);
    }
    Ok(buf.get_u32())
}

fn take_bytes(buf: &mut Bytes, len: usize) -> Result<Bytes, WireError> {
    if buf.remaining() < len {
        return Err(WireError::Truncated);
    }
    Ok(buf.copy_to_bytes(len))
}

fn take_string(buf: &mut Bytes) -> Result<String, WireError> {
    let len = take_u16(buf)? as usize;
    let raw = take_bytes(buf, len)?;
    String::from_utf8(raw.to_vec()).map_err(|_| WireError::BadUtf8)
}

fn put_string(buf: &mut BytesMut, s: &str) {
    buf.put_u16(s.len() as u16);
    buf.put_slice(s.as_bytes());
}

fn put_addr(buf: &mut BytesMut, addr: &SocketAddr) {
    match addr.ip() {
        IpAddr::V4(ip) => {
            buf.put_u8(4);
            buf.put_slice(&ip.octets());
        }
        IpAddr::V6(ip) => {
            buf.put_u8(6);
            buf.put_slice(&ip.octets());
        }
    }
    buf.put_u16(addr.port());
}

fn take_addr(buf: &mut Bytes) -> Result<SocketAddr, WireError> {
    let tag = take_u8(buf)?;
    let ip = match tag {
        4 => {
            let raw = take_bytes(buf, 4)?;
            let mut octets = [0u8; 4];
            octets.copy_from_slice(&raw);
            IpAddr::V4(Ipv4Addr::from(octets))
        }
        6 => {
            let raw = take_bytes(buf, 16)?;
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&raw);
            IpAddr::V6(Ipv6Addr::from(octets))
        }
        other => return Err(WireError::BadAddressTag(other)),
    };
    let port = take_u16(buf)?;
    Ok(SocketAddr::new(ip, port))
}

// =============================================================================
// Envelope codec
// =============================================================================

/// Encodes a request envelope into a frame body.
pub fn encode_envelope(envelope: &RpcEnvelope) -> Bytes {
    let mut buf = BytesMut::with_capacity(16 + envelope.payload.len());

    buf.put_u16(envelope.message_type.as_u16());
    buf.put_u32(envelope.payload.len() as u32);
    buf.put_slice(&envelope.payload);

    match &envelope.relay {
        Some(relay) => {
            buf.put_u16(relay.spread as u16);
            buf.put_u16(relay.forwards.len() as u16);
            for target in &relay.forwards {
                put_addr(&mut buf, &target.address);
                put_string(&mut buf, &target.name);
            }
        }
        None => {
            buf.put_u16(0);
            buf.put_u16(0);
        }
    }

    buf.freeze()
}

/// Decodes a request envelope from a frame body.
pub fn decode_envelope(mut body: Bytes) -> Result<RpcEnvelope, WireError> {
    let raw_type = take_u16(&mut body)?;
    let message_type =
        MessageType::from_u16(raw_type).ok_or(WireError::UnknownMessageType(raw_type))?;

    let payload_len = take_u32(&mut body)? as usize;
    let payload = take_bytes(&mut body, payload_len)?;

    let spread = take_u16(&mut body)? as usize;
    let forward_count = take_u16(&mut body)? as usize;

    let relay = if forward_count == 0 {
        None
    } else {
        let mut forwards = Vec::with_capacity(forward_count);
        for _ in 0..forward_count {
            let address = take_addr(&mut body)?;
            let name = take_string(&mut body)?;
            forwards.push(TargetNode::new(address, name));
        }
        Some(RelayInstruction { spread, forwards })
    };

    Ok(RpcEnvelope {
        message_type,
        payload,
        relay,
    })
}

// =============================================================================
// Reply codec
// =============================================================================

/// Encodes a reply into a frame body.
pub fn encode_reply(reply: &RpcReply) -> Bytes {
    let mut buf = BytesMut::with_capacity(8);

    match &reply.response {
        Some(response) => {
            buf.put_u8(1);
            buf.put_u32(response.len() as u32);
            buf.put_slice(response);
        }
        None => buf.put_u8(0),
    }

    buf.put_u16(reply.relay_acks.len() as u16);
    for ack in &reply.relay_acks {
        put_string(&mut buf, &ack.node_name);
        buf.put_u8(status_code(ack.status));
    }

    buf.freeze()
}

/// Decodes a reply from a frame body.
pub fn decode_reply(mut body: Bytes) -> Result<RpcReply, WireError> {
    let response = match take_u8(&mut body)? {
        0 => None,
        _ => {
            let len = take_u32(&mut body)? as usize;
            Some(take_bytes(&mut body, len)?)
        }
    };

    let ack_count = take_u16(&mut body)? as usize;
    let mut relay_acks = Vec::with_capacity(ack_count);
    for _ in 0..ack_count {
        let node_name = take_string(&mut body)?;
        let status = status_from_code(take_u8(&mut body)?)?;
        relay_acks.push(RelayAck { node_name, status });
    }

    Ok(RpcReply {
        response,
        relay_acks,
    })
}

// =============================================================================
// Frame I/O
// =============================================================================

/// Writes one length-prefixed frame.
pub async fn write_frame<W>(writer: &mut W, body: &[u8]) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    if body.len() > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge(body.len()));
    }
    writer.write_u32(body.len() as u32).await?;
    writer.write_all(body).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one length-prefixed frame body.
pub async fn read_frame<R>(reader: &mut R) -> Result<Bytes, WireError>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u32().await? as usize;
    if len > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge(len));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Bytes::from(body))
}
