//! Integration tests for the broadcast engine.
//!
//! These tests verify the complete broadcast workflow including:
//! - Fan-out planning and the controller connection bound
//! - Per-node outcome accounting (no target silently dropped)
//! - Final dispositions with and without retry
//! - Retry queue aging, promotion, and purge
//! - Admission slot limits and FIFO waiting

use bytes::Bytes;
use nodecast::agent::{
    AgentService, BroadcastDisposition, BroadcastRequest, DispatchStatus, MessageType, TargetNode,
};
use nodecast::config::AgentSettings;
use nodecast::transport::{
    RelayAck, RpcEnvelope, RpcReply, SendFuture, Transport, TransportError,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

// =============================================================================
// Test Helpers
// =============================================================================

/// How the mock behaves for a given node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Behavior {
    /// Reply successfully.
    Ack,

    /// Refuse the connection.
    Refuse,

    /// Reply with garbage.
    Garbage,

    /// Never reply; the worker's deadline fires first.
    Hang,
}

/// One recorded direct contact: the leader plus the forward list it carried.
#[derive(Clone, Debug)]
struct Contact {
    leader: String,
    forwards: Vec<String>,
}

/// In-process transport double.
///
/// Only direct sends are recorded as contacts; relay coverage is synthesized
/// from each forward's configured behavior, the way a real relaying node
/// would report it.
struct MockTransport {
    behaviors: Mutex<HashMap<String, Behavior>>,
    contacts: Mutex<Vec<Contact>>,
    delay: Duration,
}

impl MockTransport {
    fn new() -> Self {
        Self {
            behaviors: Mutex::new(HashMap::new()),
            contacts: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }

    fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new()
        }
    }

    fn set_behavior(&self, node: &str, behavior: Behavior) {
        self.behaviors
            .lock()
            .unwrap()
            .insert(node.to_string(), behavior);
    }

    fn behavior_of(&self, node: &str) -> Behavior {
        self.behaviors
            .lock()
            .unwrap()
            .get(node)
            .copied()
            .unwrap_or(Behavior::Ack)
    }

    fn contacts(&self) -> Vec<Contact> {
        self.contacts.lock().unwrap().clone()
    }

    fn contacted_leaders(&self) -> Vec<String> {
        self.contacts().iter().map(|c| c.leader.clone()).collect()
    }
}

impl Transport for MockTransport {
    fn send<'a>(
        &'a self,
        target: &'a TargetNode,
        envelope: RpcEnvelope,
        deadline: Duration,
    ) -> SendFuture<'a> {
        Box::pin(async move {
            let forwards: Vec<String> = envelope
                .relay
                .as_ref()
                .map(|r| r.forwards.iter().map(|f| f.name.clone()).collect())
                .unwrap_or_default();
            self.contacts.lock().unwrap().push(Contact {
                leader: target.name.clone(),
                forwards: forwards.clone(),
            });

            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            match self.behavior_of(&target.name) {
                Behavior::Ack => {
                    let relay_acks = forwards
                        .iter()
                        .map(|name| RelayAck {
                            node_name: name.clone(),
                            status: match self.behavior_of(name) {
                                Behavior::Ack => DispatchStatus::Acked,
                                Behavior::Refuse => DispatchStatus::ConnectFailed,
                                Behavior::Garbage => DispatchStatus::ProtocolError,
                                Behavior::Hang => DispatchStatus::TimedOut,
                            },
                        })
                        .collect();
                    Ok(RpcReply {
                        response: None,
                        relay_acks,
                    })
                }
                Behavior::Refuse => Err(TransportError::ConnectFailed {
                    addr: target.address,
                    source: std::io::Error::new(
                        std::io::ErrorKind::ConnectionRefused,
                        "connection refused",
                    ),
                }),
                Behavior::Garbage => {
                    Err(TransportError::Protocol("unexpected reply".to_string()))
                }
                Behavior::Hang => {
                    tokio::time::sleep(deadline + Duration::from_secs(60)).await;
                    Err(TransportError::TimedOut(deadline))
                }
            }
        })
    }
}

fn targets(n: usize) -> Vec<TargetNode> {
    (0..n)
        .map(|i| {
            TargetNode::new(
                format!("10.1.0.{}:6818", (i % 250) + 1).parse().unwrap(),
                format!("node-{}", i),
            )
        })
        .collect()
}

fn fast_settings() -> AgentSettings {
    AgentSettings::default().with_command_timeout(Duration::from_millis(250))
}

fn service_with(transport: Arc<MockTransport>, settings: AgentSettings) -> AgentService {
    AgentService::new(settings, transport).expect("settings must validate")
}

/// Polls `condition` until it holds or the deadline passes.
async fn wait_until<F: Fn() -> bool>(condition: F, timeout: Duration) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

// =============================================================================
// Fan-out and outcome accounting
// =============================================================================

#[tokio::test]
async fn test_controller_connections_bounded_by_fanout_width() {
    let transport = Arc::new(MockTransport::new());
    let service = service_with(
        Arc::clone(&transport),
        fast_settings().with_fanout_width(10).with_spread_width(10),
    );

    let request = BroadcastRequest::new(targets(25), MessageType::Ping, Bytes::new());
    let mut handle = service.queue_request(request).unwrap();

    let report = tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .expect("run timed out")
        .expect("report missing");

    assert_eq!(report.disposition, BroadcastDisposition::AllAcked);
    assert_eq!(report.outcomes.len(), 25);

    // The controller itself opened exactly min(N, T) = 10 connections,
    // each carrying at most 2 forwards.
    let contacts = transport.contacts();
    assert_eq!(contacts.len(), 10);
    assert!(contacts.iter().all(|c| c.forwards.len() <= 2));

    // Every target was covered exactly once, directly or by forward list.
    let mut covered: Vec<String> = contacts
        .iter()
        .flat_map(|c| std::iter::once(c.leader.clone()).chain(c.forwards.iter().cloned()))
        .collect();
    covered.sort();
    let mut expected: Vec<String> = (0..25).map(|i| format!("node-{}", i)).collect();
    expected.sort();
    assert_eq!(covered, expected);
}

#[tokio::test]
async fn test_small_fleet_contacts_every_node_directly() {
    let transport = Arc::new(MockTransport::new());
    let service = service_with(Arc::clone(&transport), fast_settings().with_fanout_width(10));

    let request = BroadcastRequest::new(targets(4), MessageType::Reconfigure, Bytes::new());
    let mut handle = service.queue_request(request).unwrap();
    handle.wait().await.expect("report missing");

    let contacts = transport.contacts();
    assert_eq!(contacts.len(), 4);
    assert!(contacts.iter().all(|c| c.forwards.is_empty()));
}

#[tokio::test]
async fn test_every_target_gets_exactly_one_outcome() {
    let transport = Arc::new(MockTransport::new());
    transport.set_behavior("node-1", Behavior::Refuse);
    transport.set_behavior("node-3", Behavior::Garbage);
    transport.set_behavior("node-6", Behavior::Refuse);

    let service = service_with(Arc::clone(&transport), fast_settings().with_fanout_width(3));

    let request = BroadcastRequest::new(targets(8), MessageType::KillJob, Bytes::new());
    let mut handle = service.queue_request(request).unwrap();
    let report = tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .expect("run timed out")
        .expect("report missing");

    // One outcome per target, nothing dropped, every status in the taxonomy
    assert_eq!(report.outcomes.len(), 8);
    let mut names: Vec<&str> = report.outcomes.iter().map(|o| o.node_name.as_str()).collect();
    names.sort();
    let expected: Vec<String> = (0..8).map(|i| format!("node-{}", i)).collect();
    let mut expected: Vec<&str> = expected.iter().map(String::as_str).collect();
    expected.sort();
    assert_eq!(names, expected);
}

#[tokio::test]
async fn test_hung_leader_times_out_without_stalling_the_run() {
    let transport = Arc::new(MockTransport::new());
    transport.set_behavior("node-0", Behavior::Hang);

    let service = service_with(Arc::clone(&transport), fast_settings().with_fanout_width(4));

    let request = BroadcastRequest::new(targets(4), MessageType::Ping, Bytes::new());
    let mut handle = service.queue_request(request).unwrap();
    let report = tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .expect("run stalled on a hung worker")
        .expect("report missing");

    let hung = report
        .outcomes
        .iter()
        .find(|o| o.node_name == "node-0")
        .unwrap();
    assert_eq!(hung.status, DispatchStatus::TimedOut);
    assert_eq!(report.acked_count(), 3);
}

// =============================================================================
// Dispositions and retry
// =============================================================================

#[tokio::test]
async fn test_failures_without_retry_leave_queue_untouched() {
    let transport = Arc::new(MockTransport::new());
    transport.set_behavior("node-2", Behavior::Refuse);

    let service = service_with(Arc::clone(&transport), fast_settings());

    let request = BroadcastRequest::new(targets(5), MessageType::SignalTasks, Bytes::new());
    let mut handle = service.queue_request(request).unwrap();
    let report = handle.wait().await.expect("report missing");

    assert_eq!(report.disposition, BroadcastDisposition::FailedFinal);
    assert_eq!(report.failed_count(), 1);
    assert_eq!(report.unresolved(), vec!["node-2"]);
    assert_eq!(service.queued_requests().await, 0);
}

#[tokio::test]
async fn test_retry_requeues_exactly_the_failed_subset() {
    let transport = Arc::new(MockTransport::new());
    transport.set_behavior("node-1", Behavior::Refuse);
    transport.set_behavior("node-4", Behavior::Refuse);

    let service = service_with(Arc::clone(&transport), fast_settings());

    let request =
        BroadcastRequest::new(targets(6), MessageType::KillJob, Bytes::from_static(b"job"))
            .with_retry(true);
    let mut handle = service.queue_request(request).unwrap();
    let report = handle.wait().await.expect("report missing");

    assert_eq!(report.disposition, BroadcastDisposition::Requeued);
    assert_eq!(service.queued_requests().await, 1);

    // Not old enough yet: the sweep reports the entry but promotes nothing
    assert_eq!(service.retry_sweep(Duration::from_secs(600)).await, 1);
    assert_eq!(service.queued_requests().await, 1);

    // Let the nodes recover, then promote with no minimum age
    transport.set_behavior("node-1", Behavior::Ack);
    transport.set_behavior("node-4", Behavior::Ack);
    let contacts_before = transport.contacts().len();
    assert_eq!(service.retry_sweep(Duration::ZERO).await, 0);

    assert!(
        wait_until(
            || service.active_runs() == 0 && transport.contacts().len() > contacts_before,
            Duration::from_secs(5)
        )
        .await,
        "promoted run did not finish"
    );

    // The second run contacted exactly the two previously failed nodes
    let mut second_run: Vec<String> = transport.contacted_leaders()[contacts_before..].to_vec();
    second_run.sort();
    assert_eq!(second_run, vec!["node-1", "node-4"]);
    assert_eq!(service.queued_requests().await, 0);
}

#[tokio::test]
async fn test_sweep_with_no_aged_entries_mutates_nothing() {
    let transport = Arc::new(MockTransport::new());
    transport.set_behavior("node-0", Behavior::Refuse);

    let service = service_with(Arc::clone(&transport), fast_settings());

    let request =
        BroadcastRequest::new(targets(1), MessageType::Ping, Bytes::new()).with_retry(true);
    let mut handle = service.queue_request(request).unwrap();
    handle.wait().await.expect("report missing");
    assert_eq!(service.queued_requests().await, 1);

    // Repeated sweeps below the age threshold are idempotent
    for _ in 0..3 {
        assert_eq!(service.retry_sweep(Duration::from_secs(3600)).await, 1);
    }
    assert_eq!(service.queued_requests().await, 1);
}

#[tokio::test]
async fn test_purge_then_sweep_promotes_nothing() {
    let transport = Arc::new(MockTransport::new());
    transport.set_behavior("node-0", Behavior::Refuse);
    transport.set_behavior("node-1", Behavior::Refuse);

    let service = service_with(Arc::clone(&transport), fast_settings());

    for _ in 0..2 {
        let request =
            BroadcastRequest::new(targets(2), MessageType::Ping, Bytes::new()).with_retry(true);
        let mut handle = service.queue_request(request).unwrap();
        handle.wait().await.expect("report missing");
    }
    assert_eq!(service.queued_requests().await, 2);

    assert_eq!(service.purge().await, 2);
    let contacts_before = transport.contacts().len();

    assert_eq!(service.retry_sweep(Duration::ZERO).await, 0);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(transport.contacts().len(), contacts_before);
}

// =============================================================================
// Admission
// =============================================================================

#[tokio::test]
async fn test_admission_caps_concurrent_runs_and_serves_fifo() {
    // fanout 2, budget 8 ⇒ 8 / (2 + 2) = 2 concurrent runs
    let transport = Arc::new(MockTransport::with_delay(Duration::from_millis(200)));
    let settings = fast_settings()
        .with_fanout_width(2)
        .with_thread_budget(8)
        .with_command_timeout(Duration::from_secs(2));
    let service = service_with(Arc::clone(&transport), settings);
    assert_eq!(service.settings().max_concurrent_agents(), 2);

    let mut handles = Vec::new();
    for name in ["first", "second", "third"] {
        let request = BroadcastRequest::new(
            vec![TargetNode::new("10.9.0.1:6818".parse().unwrap(), name)],
            MessageType::Ping,
            Bytes::new(),
        );
        handles.push(service.queue_request(request).unwrap());
        // Serialize arrival so FIFO admission order is well-defined
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    // Two runs admitted, the third waiting for a slot
    assert_eq!(service.slots_in_flight(), 2);
    assert_eq!(transport.contacts().len(), 2);

    for mut handle in handles {
        let report = tokio::time::timeout(Duration::from_secs(5), handle.wait())
            .await
            .expect("run timed out")
            .expect("report missing");
        assert_eq!(report.disposition, BroadcastDisposition::AllAcked);
    }

    // The waiter was admitted after a slot freed, in arrival order
    let leaders = transport.contacted_leaders();
    assert_eq!(leaders.len(), 3);
    assert_eq!(leaders[2], "third");
    assert_eq!(service.slots_in_flight(), 0);
}
