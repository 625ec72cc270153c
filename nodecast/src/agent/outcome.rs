//! Per-node outcomes and the aggregate broadcast report.

use bytes::Bytes;
use std::fmt;
use std::time::Duration;

/// Terminal status of one node within a broadcast run.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum DispatchStatus {
    /// The node acknowledged the RPC, directly or via a confirmed relay.
    Acked,

    /// No reply within the per-attempt deadline.
    TimedOut,

    /// Transport could not be established to the node.
    ConnectFailed,

    /// The node replied with something malformed or unexpected.
    ProtocolError,
}

impl DispatchStatus {
    /// Returns true for the success status.
    pub fn is_acked(self) -> bool {
        matches!(self, Self::Acked)
    }
}

impl fmt::Display for DispatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Acked => write!(f, "Acked"),
            Self::TimedOut => write!(f, "TimedOut"),
            Self::ConnectFailed => write!(f, "ConnectFailed"),
            Self::ProtocolError => write!(f, "ProtocolError"),
        }
    }
}

/// Result for a single target node.
#[derive(Clone, Debug)]
pub struct DispatchOutcome {
    /// Node this outcome belongs to.
    pub node_name: String,

    /// Terminal status.
    pub status: DispatchStatus,

    /// Response payload, when the node returned one.
    pub response: Option<Bytes>,
}

impl DispatchOutcome {
    /// Success outcome without a response payload.
    pub fn acked(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
            status: DispatchStatus::Acked,
            response: None,
        }
    }

    /// Success outcome carrying the node's response payload.
    pub fn acked_with_response(node_name: impl Into<String>, response: Bytes) -> Self {
        Self {
            node_name: node_name.into(),
            status: DispatchStatus::Acked,
            response: Some(response),
        }
    }

    /// Failure outcome with the given status.
    pub fn failed(node_name: impl Into<String>, status: DispatchStatus) -> Self {
        Self {
            node_name: node_name.into(),
            status,
            response: None,
        }
    }
}

/// The three user-visible final states of one broadcast call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BroadcastDisposition {
    /// Every target acknowledged.
    AllAcked,

    /// Some targets failed and no retry was requested; the failures in the
    /// report are final.
    FailedFinal,

    /// Some targets failed and the unresolved subset was handed to the
    /// retry queue.
    Requeued,
}

impl fmt::Display for BroadcastDisposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllAcked => write!(f, "AllAcked"),
            Self::FailedFinal => write!(f, "FailedFinal"),
            Self::Requeued => write!(f, "Requeued"),
        }
    }
}

/// Aggregate result of one broadcast run.
///
/// Contains exactly one outcome per original target; no target is ever
/// silently dropped.
#[derive(Clone, Debug)]
pub struct BroadcastReport {
    /// Final state of the call.
    pub disposition: BroadcastDisposition,

    /// Per-node outcomes, in arrival order.
    pub outcomes: Vec<DispatchOutcome>,

    /// Wall-clock duration of the run.
    pub duration: Duration,
}

impl BroadcastReport {
    /// Number of acknowledged targets.
    pub fn acked_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.status.is_acked()).count()
    }

    /// Number of targets that did not acknowledge.
    pub fn failed_count(&self) -> usize {
        self.outcomes.len() - self.acked_count()
    }

    /// Names of the targets that did not acknowledge.
    pub fn unresolved(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| !o.status.is_acked())
            .map(|o| o.node_name.as_str())
            .collect()
    }
}
