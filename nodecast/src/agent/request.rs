//! Broadcast request types.
//!
//! A [`BroadcastRequest`] names a closed set of [`TargetNode`]s, the RPC kind
//! to issue, and an opaque payload owned by the caller. Targets are a single
//! sequence of paired records, so an address can never drift out of
//! alignment with its node name.

use bytes::Bytes;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

/// One broadcast target: a network address paired with its node name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TargetNode {
    /// Address the node's daemon listens on.
    pub address: SocketAddr,

    /// Node name used in outcomes, relay acks, and logs.
    pub name: String,
}

impl TargetNode {
    /// Creates a target from an address and node name.
    pub fn new(address: SocketAddr, name: impl Into<String>) -> Self {
        Self {
            address,
            name: name.into(),
        }
    }
}

impl fmt::Display for TargetNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.address)
    }
}

/// Enumerated RPC kinds carried by a broadcast.
///
/// Discriminants are stable wire values; unknown values are rejected at
/// decode time rather than mapped to a catch-all.
#[repr(u16)]
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum MessageType {
    /// Liveness probe.
    Ping = 1,

    /// Launch a set of job tasks on the node.
    LaunchTasks = 2,

    /// Deliver a signal to running job tasks.
    SignalTasks = 3,

    /// Terminate a job and reclaim its resources.
    KillJob = 4,

    /// Re-read configuration.
    Reconfigure = 5,

    /// Orderly daemon shutdown.
    Shutdown = 6,

    /// A node's self-report of capacity and running work.
    NodeRegistration = 7,
}

impl MessageType {
    /// Returns the stable wire discriminant.
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Decodes a wire discriminant, `None` for unknown values.
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(Self::Ping),
            2 => Some(Self::LaunchTasks),
            3 => Some(Self::SignalTasks),
            4 => Some(Self::KillJob),
            5 => Some(Self::Reconfigure),
            6 => Some(Self::Shutdown),
            7 => Some(Self::NodeRegistration),
            _ => None,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ping => "ping",
            Self::LaunchTasks => "launch-tasks",
            Self::SignalTasks => "signal-tasks",
            Self::KillJob => "kill-job",
            Self::Reconfigure => "reconfigure",
            Self::Shutdown => "shutdown",
            Self::NodeRegistration => "node-registration",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ping" => Ok(Self::Ping),
            "launch-tasks" => Ok(Self::LaunchTasks),
            "signal-tasks" => Ok(Self::SignalTasks),
            "kill-job" => Ok(Self::KillJob),
            "reconfigure" => Ok(Self::Reconfigure),
            "shutdown" => Ok(Self::Shutdown),
            "node-registration" => Ok(Self::NodeRegistration),
            other => Err(format!("unknown message type '{}'", other)),
        }
    }
}

/// One logical RPC to many nodes.
///
/// The payload is opaque to the engine and immutable for the duration of the
/// broadcast; [`Bytes`] makes the clone handed to each worker a cheap
/// reference-count bump.
#[derive(Clone, Debug)]
pub struct BroadcastRequest {
    /// Ordered target sequence; must be non-empty.
    pub targets: Vec<TargetNode>,

    /// Whether unresolved targets are requeued when the run finishes.
    pub retry: bool,

    /// RPC kind to issue.
    pub message_type: MessageType,

    /// Opaque request payload.
    pub payload: Bytes,
}

impl BroadcastRequest {
    /// Creates a request with retry disabled.
    pub fn new(targets: Vec<TargetNode>, message_type: MessageType, payload: Bytes) -> Self {
        Self {
            targets,
            retry: false,
            message_type,
            payload,
        }
    }

    /// Sets the retry flag.
    pub fn with_retry(mut self, retry: bool) -> Self {
        self.retry = retry;
        self
    }

    /// Number of target nodes.
    pub fn node_count(&self) -> usize {
        self.targets.len()
    }
}
