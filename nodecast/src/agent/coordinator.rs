//! Broadcast run coordination.
//!
//! Each admitted broadcast is driven by one coordinator task that walks the
//! run state machine: build the fan-out plan, launch the worker pool, block
//! on aggregation (never busy-poll), then settle the result — complete,
//! complete-with-final-failures, or requeue of the unresolved subset. The
//! admission slot is released the moment the run reaches `Done`, so a
//! requeued broadcast never holds a slot while it waits.

use super::fanout;
use super::outcome::{BroadcastDisposition, BroadcastReport};
use super::pool::DispatchPool;
use super::request::BroadcastRequest;
use super::service::{AgentInner, AgentService};
use super::AgentSlot;
use crate::notifier::AgentEvent;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info};

// =============================================================================
// Run State
// =============================================================================

/// Lifecycle states of one broadcast run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    /// Admitted; plan not yet built.
    Created,

    /// Worker pool being launched.
    Dispatching,

    /// Waiting for per-node outcomes.
    Collecting,

    /// Every outcome collected; no requeue pending.
    Complete,

    /// Unresolved targets handed to the retry queue.
    PartialRequeue,

    /// Terminal: report stored, slot released.
    Done,
}

impl RunState {
    /// Returns true for the terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done)
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Dispatching => write!(f, "Dispatching"),
            Self::Collecting => write!(f, "Collecting"),
            Self::Complete => write!(f, "Complete"),
            Self::PartialRequeue => write!(f, "PartialRequeue"),
            Self::Done => write!(f, "Done"),
        }
    }
}

// =============================================================================
// Handle
// =============================================================================

/// Handle to a submitted broadcast.
///
/// Cloneable; all clones observe the same run. [`wait`](Self::wait) resolves
/// once the run reaches `Done`, returning `None` only when the run was
/// dropped before completing (service shutdown).
#[derive(Clone)]
pub struct BroadcastHandle {
    run_id: u64,
    state_rx: watch::Receiver<RunState>,
    report: Arc<Mutex<Option<BroadcastReport>>>,
}

impl BroadcastHandle {
    /// The run's identifier, unique within this service.
    pub fn id(&self) -> u64 {
        self.run_id
    }

    /// The most recently published run state.
    pub fn state(&self) -> RunState {
        *self.state_rx.borrow()
    }

    /// Waits for the run to finish and takes its report.
    pub async fn wait(&mut self) -> Option<BroadcastReport> {
        loop {
            if self.state().is_terminal() {
                break;
            }
            if self.state_rx.changed().await.is_err() {
                // Sender dropped without reaching Done: the run was abandoned
                break;
            }
        }
        self.report.lock().await.take()
    }
}

impl std::fmt::Debug for BroadcastHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastHandle")
            .field("run_id", &self.run_id)
            .field("state", &self.state())
            .finish()
    }
}

/// The coordinator's side of a handle.
pub(crate) struct RunPlumbing {
    state_tx: watch::Sender<RunState>,
    report: Arc<Mutex<Option<BroadcastReport>>>,
}

impl RunPlumbing {
    fn publish(&self, state: RunState) {
        let _ = self.state_tx.send(state);
    }

    async fn store_report(&self, report: BroadcastReport) {
        *self.report.lock().await = Some(report);
    }
}

/// Creates a connected handle/plumbing pair for a new run.
pub(crate) fn handle_pair(run_id: u64) -> (BroadcastHandle, RunPlumbing) {
    let (state_tx, state_rx) = watch::channel(RunState::Created);
    let report = Arc::new(Mutex::new(None));

    let handle = BroadcastHandle {
        run_id,
        state_rx,
        report: Arc::clone(&report),
    };
    let plumbing = RunPlumbing { state_tx, report };

    (handle, plumbing)
}

// =============================================================================
// Queued Run
// =============================================================================

/// A broadcast bound for execution: the request, its identity, and the
/// caller's handle plumbing when one exists. Requeued subsets carry no
/// plumbing — their original caller already received a final `Requeued`
/// disposition.
pub(crate) struct QueuedRun {
    pub run_id: u64,
    pub request: BroadcastRequest,
    pub plumbing: Option<RunPlumbing>,
}

// =============================================================================
// Coordinator
// =============================================================================

impl AgentService {
    /// Executes one admitted broadcast to completion.
    ///
    /// Runs on its own task; `slot` is held for exactly the lifetime of the
    /// run and dropped the moment the run reaches `Done`.
    pub(crate) async fn execute_run(inner: Arc<AgentInner>, run: QueuedRun, slot: AgentSlot) {
        let start = Instant::now();
        let QueuedRun {
            run_id,
            request,
            plumbing,
        } = run;

        let publish = |state: RunState| {
            if let Some(p) = &plumbing {
                p.publish(state);
            }
            inner.runs.insert(run_id, state);
        };

        publish(RunState::Created);
        let plan = fanout::plan(
            &request.targets,
            inner.settings.fanout_width,
            inner.settings.spread_width,
        );
        debug!(
            run_id,
            message_type = %request.message_type,
            targets = request.node_count(),
            direct = plan.direct_contacts(),
            "broadcast run admitted"
        );

        publish(RunState::Dispatching);
        let pool = DispatchPool::launch(
            plan,
            request.message_type,
            request.payload.clone(),
            Arc::clone(&inner.transport),
            inner.settings.command_timeout,
        );

        publish(RunState::Collecting);
        let outcomes = pool.collect(inner.settings.drain_ceiling()).await;

        let failed: HashSet<&str> = outcomes
            .iter()
            .filter(|o| !o.status.is_acked())
            .map(|o| o.node_name.as_str())
            .collect();

        let disposition = if failed.is_empty() {
            publish(RunState::Complete);
            BroadcastDisposition::AllAcked
        } else if !request.retry {
            publish(RunState::Complete);
            BroadcastDisposition::FailedFinal
        } else {
            let unresolved: Vec<_> = request
                .targets
                .iter()
                .filter(|t| failed.contains(t.name.as_str()))
                .cloned()
                .collect();
            let requeued = QueuedRun {
                run_id: inner.next_run_id(),
                request: BroadcastRequest::new(
                    unresolved,
                    request.message_type,
                    request.payload.clone(),
                )
                .with_retry(true),
                plumbing: None,
            };
            inner.retry.enqueue(requeued).await;
            publish(RunState::PartialRequeue);
            BroadcastDisposition::Requeued
        };

        let acked = outcomes.len() - failed.len();
        let failed_count = failed.len();
        let report = BroadcastReport {
            disposition,
            outcomes,
            duration: start.elapsed(),
        };

        if let Some(p) = &plumbing {
            p.store_report(report).await;
        }
        publish(RunState::Done);
        inner.runs.remove(&run_id);

        // Release the slot before anything else happens; a requeued
        // broadcast must not keep a slot idle.
        drop(slot);

        let event = match disposition {
            BroadcastDisposition::Requeued => AgentEvent::BroadcastRequeued {
                run_id,
                message_type: request.message_type,
                unresolved: failed_count,
            },
            _ => AgentEvent::BroadcastComplete {
                run_id,
                message_type: request.message_type,
                acked,
                failed: failed_count,
            },
        };
        inner.notifier.notify(event);

        info!(
            run_id,
            message_type = %request.message_type,
            disposition = %disposition,
            acked,
            failed = failed_count,
            "broadcast run finished"
        );
    }
}
