//! Dispatch worker pool.
//!
//! Executes a fan-out plan: one worker task per group, each issuing its
//! direct send with a hard per-attempt deadline and streaming per-node
//! outcomes back to the collector. Workers run to completion independently;
//! a slow or hung worker never blocks the others. The collector drains until
//! every expected outcome has arrived or a hard wall-clock ceiling passes,
//! at which point the stragglers are recorded as timed out — the outcome set
//! always covers every target.

use super::fanout::{DispatchGroup, FanoutPlan};
use super::outcome::{DispatchOutcome, DispatchStatus};
use super::request::MessageType;
use crate::transport::{RelayInstruction, RpcEnvelope, RpcReply, Transport, TransportError};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// A launched worker pool whose outcomes are still being collected.
pub(crate) struct DispatchPool {
    rx: mpsc::UnboundedReceiver<DispatchOutcome>,
    pending: Vec<String>,
}

impl DispatchPool {
    /// Spawns one worker per plan group and returns the collector half.
    pub(crate) fn launch(
        plan: FanoutPlan,
        message_type: MessageType,
        payload: Bytes,
        transport: Arc<dyn Transport>,
        command_timeout: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        let pending = plan
            .groups
            .iter()
            .flat_map(|g| {
                std::iter::once(g.leader.name.clone())
                    .chain(g.forwards.iter().map(|t| t.name.clone()))
            })
            .collect();

        let spread = plan.spread;
        for group in plan.groups {
            let tx = tx.clone();
            let transport = Arc::clone(&transport);
            let payload = payload.clone();
            tokio::spawn(async move {
                let outcomes = dispatch_group(
                    &group,
                    message_type,
                    payload,
                    spread,
                    transport.as_ref(),
                    command_timeout,
                )
                .await;
                for outcome in outcomes {
                    // The collector may already have hit its drain ceiling
                    let _ = tx.send(outcome);
                }
            });
        }

        Self { rx, pending }
    }

    /// Collects one outcome per target, backfilling anything still missing
    /// at the drain ceiling as timed out.
    pub(crate) async fn collect(mut self, drain_ceiling: Duration) -> Vec<DispatchOutcome> {
        let deadline = Instant::now() + drain_ceiling;
        let mut outcomes = Vec::with_capacity(self.pending.len());

        while !self.pending.is_empty() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(
                    abandoned = self.pending.len(),
                    "drain ceiling reached, abandoning unfinished workers"
                );
                break;
            }

            match tokio::time::timeout(remaining, self.rx.recv()).await {
                Ok(Some(outcome)) => {
                    if let Some(pos) = self.pending.iter().position(|n| *n == outcome.node_name) {
                        self.pending.swap_remove(pos);
                        outcomes.push(outcome);
                    } else {
                        debug!(node = %outcome.node_name, "ignoring outcome for unknown node");
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        abandoned = self.pending.len(),
                        "drain ceiling reached, abandoning unfinished workers"
                    );
                    break;
                }
            }
        }

        for node_name in self.pending.drain(..) {
            outcomes.push(DispatchOutcome::failed(node_name, DispatchStatus::TimedOut));
        }

        outcomes
    }
}

/// Runs one group's direct send and settles an outcome for every node in it.
async fn dispatch_group(
    group: &DispatchGroup,
    message_type: MessageType,
    payload: Bytes,
    spread: usize,
    transport: &dyn Transport,
    command_timeout: Duration,
) -> Vec<DispatchOutcome> {
    let mut envelope = RpcEnvelope::new(message_type, payload);
    if !group.forwards.is_empty() {
        envelope = envelope.with_relay(RelayInstruction {
            spread,
            forwards: group.forwards.clone(),
        });
    }

    let attempt = tokio::time::timeout(
        command_timeout,
        transport.send(&group.leader, envelope, command_timeout),
    )
    .await;

    match &attempt {
        Ok(Err(error)) => debug!(node = %group.leader.name, %error, "direct send failed"),
        Err(_) => debug!(node = %group.leader.name, "direct send exceeded deadline"),
        Ok(Ok(_)) => {}
    }

    settle_attempt(group, attempt)
}

/// Maps a successful direct exchange onto per-node outcomes: the leader is
/// acked, each forward takes the status its relay ack reported. A forward
/// the reply never mentions is a protocol error — the leader answered but
/// did not account for it.
pub(crate) fn settle_group(group: &DispatchGroup, reply: RpcReply) -> Vec<DispatchOutcome> {
    let mut outcomes = Vec::with_capacity(group.len());

    outcomes.push(match reply.response {
        Some(response) => DispatchOutcome::acked_with_response(group.leader.name.clone(), response),
        None => DispatchOutcome::acked(group.leader.name.clone()),
    });

    let mut acks: HashMap<&str, DispatchStatus> = reply
        .relay_acks
        .iter()
        .map(|ack| (ack.node_name.as_str(), ack.status))
        .collect();

    for forward in &group.forwards {
        let status = acks
            .remove(forward.name.as_str())
            .unwrap_or(DispatchStatus::ProtocolError);
        outcomes.push(DispatchOutcome {
            node_name: forward.name.clone(),
            status,
            response: None,
        });
    }

    outcomes
}

/// Records the same failure for every node in the group; none were reached.
pub(crate) fn fail_group(group: &DispatchGroup, status: DispatchStatus) -> Vec<DispatchOutcome> {
    let mut outcomes = Vec::with_capacity(group.len());
    outcomes.push(DispatchOutcome::failed(group.leader.name.clone(), status));
    for forward in &group.forwards {
        outcomes.push(DispatchOutcome::failed(forward.name.clone(), status));
    }
    outcomes
}

/// Maps a worker-side attempt result onto per-node outcomes. Shared with the
/// daemon's relay execution, which settles the same way one hop down.
pub(crate) fn settle_attempt(
    group: &DispatchGroup,
    attempt: Result<Result<RpcReply, TransportError>, tokio::time::error::Elapsed>,
) -> Vec<DispatchOutcome> {
    match attempt {
        Ok(Ok(reply)) => settle_group(group, reply),
        Ok(Err(error)) => fail_group(group, error.dispatch_status()),
        Err(_) => fail_group(group, DispatchStatus::TimedOut),
    }
}
