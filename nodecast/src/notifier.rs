//! Best-effort side-effect notifications.
//!
//! Coordinators fire events on run state transitions (completion, requeue);
//! delivery happens on an independent background task so the coordinator
//! never blocks on a slow sink. Delivery failures are logged and dropped —
//! they never propagate back and never cause a retry of the triggering
//! broadcast.
//!
//! # Example
//!
//! ```ignore
//! use nodecast::notifier::{Notifier, LogNotifySink};
//! use std::sync::Arc;
//!
//! let notifier = Notifier::spawn(Arc::new(LogNotifySink));
//! notifier.notify(event); // returns immediately
//! ```

use crate::agent::MessageType;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Events emitted on broadcast state transitions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AgentEvent {
    /// A run reached a final state without requeueing.
    BroadcastComplete {
        run_id: u64,
        message_type: MessageType,
        acked: usize,
        failed: usize,
    },

    /// A run handed its unresolved targets to the retry queue.
    BroadcastRequeued {
        run_id: u64,
        message_type: MessageType,
        unresolved: usize,
    },
}

/// Failure to deliver one notification.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct NotifyError(pub String);

/// Delivers events to their destination (log line, mail, webhook, ...).
///
/// Implementations run on the notifier's background task and may block it;
/// they can never block a coordinator.
pub trait NotifySink: Send + Sync + 'static {
    /// Delivers one event.
    fn deliver(&self, event: &AgentEvent) -> Result<(), NotifyError>;
}

/// Default sink: one structured log line per event.
pub struct LogNotifySink;

impl NotifySink for LogNotifySink {
    fn deliver(&self, event: &AgentEvent) -> Result<(), NotifyError> {
        match event {
            AgentEvent::BroadcastComplete {
                run_id,
                message_type,
                acked,
                failed,
            } => info!(run_id, %message_type, acked, failed, "broadcast complete"),
            AgentEvent::BroadcastRequeued {
                run_id,
                message_type,
                unresolved,
            } => info!(run_id, %message_type, unresolved, "broadcast requeued"),
        }
        Ok(())
    }
}

/// Fire-and-forget handle to the delivery task.
///
/// Dropping the last clone closes the channel and ends the task after it
/// drains whatever is already queued.
#[derive(Clone)]
pub struct Notifier {
    tx: mpsc::UnboundedSender<AgentEvent>,
}

impl Notifier {
    /// Spawns the delivery task for `sink` and returns the send handle.
    ///
    /// Must be called within a Tokio runtime.
    pub fn spawn(sink: Arc<dyn NotifySink>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(error) = sink.deliver(&event) {
                    warn!(%error, ?event, "notification delivery failed");
                }
            }
        });

        Self { tx }
    }

    /// Hands an event to the delivery task; never blocks.
    pub fn notify(&self, event: AgentEvent) {
        // A closed channel means the process is shutting down; the event
        // is best-effort either way.
        let _ = self.tx.send(event);
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Sink that records everything it's handed.
    struct CollectingSink {
        events: Mutex<Vec<AgentEvent>>,
    }

    impl NotifySink for CollectingSink {
        fn deliver(&self, event: &AgentEvent) -> Result<(), NotifyError> {
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    /// Sink that always fails.
    struct FailingSink;

    impl NotifySink for FailingSink {
        fn deliver(&self, _event: &AgentEvent) -> Result<(), NotifyError> {
            Err(NotifyError("mail relay unreachable".into()))
        }
    }

    #[tokio::test]
    async fn test_events_reach_the_sink() {
        let sink = Arc::new(CollectingSink {
            events: Mutex::new(Vec::new()),
        });
        let notifier = Notifier::spawn(Arc::clone(&sink) as Arc<dyn NotifySink>);

        notifier.notify(AgentEvent::BroadcastComplete {
            run_id: 1,
            message_type: MessageType::Ping,
            acked: 3,
            failed: 0,
        });
        notifier.notify(AgentEvent::BroadcastRequeued {
            run_id: 2,
            message_type: MessageType::KillJob,
            unresolved: 2,
        });

        // Delivery is asynchronous; give the task a moment
        tokio::time::sleep(Duration::from_millis(50)).await;

        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[0],
            AgentEvent::BroadcastComplete { run_id: 1, .. }
        ));
    }

    #[tokio::test]
    async fn test_sink_failure_does_not_propagate() {
        let notifier = Notifier::spawn(Arc::new(FailingSink));

        // notify must not panic or block even when every delivery fails
        for run_id in 0..10 {
            notifier.notify(AgentEvent::BroadcastComplete {
                run_id,
                message_type: MessageType::Ping,
                acked: 0,
                failed: 1,
            });
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[test]
    fn test_log_sink_accepts_events() {
        let sink = LogNotifySink;
        let result = sink.deliver(&AgentEvent::BroadcastComplete {
            run_id: 9,
            message_type: MessageType::Reconfigure,
            acked: 12,
            failed: 0,
        });
        assert!(result.is_ok());
    }
}
