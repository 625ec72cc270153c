//! Integration tests for the node daemon over loopback TCP.
//!
//! These tests exercise the real wire path: accept one connection, decode
//! one envelope, execute relay instructions, dispatch to a handler, reply,
//! close. The end-to-end test drives a whole broadcast through real daemons.

use bytes::Bytes;
use nodecast::agent::{
    AgentService, BroadcastDisposition, BroadcastRequest, DispatchStatus, MessageType, TargetNode,
};
use nodecast::config::{AgentSettings, DaemonSettings};
use nodecast::daemon::{
    send_registration, HandlerFuture, InboundMessage, NodeDaemon, NodeRegistration, RequestHandler,
};
use nodecast::transport::{RpcEnvelope, TcpTransport, Transport};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// =============================================================================
// Test Helpers
// =============================================================================

/// Handler that records every message and acks with a fixed response.
struct RecordingHandler {
    received: Arc<Mutex<Vec<(MessageType, Bytes)>>>,
}

impl RequestHandler for RecordingHandler {
    fn handle<'a>(&'a self, message: InboundMessage) -> HandlerFuture<'a> {
        Box::pin(async move {
            self.received
                .lock()
                .unwrap()
                .push((message.message_type, message.payload));
            Some(Bytes::from_static(b"ok"))
        })
    }
}

struct TestDaemon {
    addr: SocketAddr,
    received: Arc<Mutex<Vec<(MessageType, Bytes)>>>,
    shutdown: CancellationToken,
    join: tokio::task::JoinHandle<()>,
}

impl TestDaemon {
    async fn spawn(name: &str) -> Self {
        let received = Arc::new(Mutex::new(Vec::new()));
        let handler = Arc::new(RecordingHandler {
            received: Arc::clone(&received),
        });

        let settings = DaemonSettings::new("127.0.0.1:0".parse().unwrap(), name)
            .with_relay_timeout(Duration::from_secs(2));
        let daemon = NodeDaemon::bind(settings, handler, Arc::new(TcpTransport::new()))
            .await
            .expect("bind must succeed on loopback");
        let addr = daemon.local_addr();

        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let join = tokio::spawn(async move {
            daemon.run(token).await;
        });

        Self {
            addr,
            received,
            shutdown,
            join,
        }
    }

    fn target(&self, name: &str) -> TargetNode {
        TargetNode::new(self.addr, name)
    }

    fn message_count(&self) -> usize {
        self.received.lock().unwrap().len()
    }

    async fn stop(self) {
        self.shutdown.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(2), self.join).await;
    }
}

// =============================================================================
// Single-daemon contract
// =============================================================================

#[tokio::test]
async fn test_daemon_accepts_decodes_and_replies_once() {
    let daemon = TestDaemon::spawn("node-a").await;

    let transport = TcpTransport::new();
    let envelope = RpcEnvelope::new(MessageType::Ping, Bytes::from_static(b"probe"));
    let reply = transport
        .send(&daemon.target("node-a"), envelope, Duration::from_secs(2))
        .await
        .expect("exchange must succeed");

    assert_eq!(reply.response.as_deref(), Some(&b"ok"[..]));
    assert!(reply.relay_acks.is_empty());

    let received = daemon.received.lock().unwrap().clone();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].0, MessageType::Ping);
    assert_eq!(&received[0].1[..], b"probe");

    daemon.stop().await;
}

#[tokio::test]
async fn test_daemon_shutdown_drains_and_returns() {
    let daemon = TestDaemon::spawn("node-b").await;

    daemon.shutdown.cancel();
    let result = tokio::time::timeout(Duration::from_secs(2), daemon.join).await;
    assert!(result.is_ok(), "daemon did not drain after shutdown");
}

// =============================================================================
// Relay execution
// =============================================================================

#[tokio::test]
async fn test_relay_produces_one_ack_per_forward() {
    let leader = TestDaemon::spawn("leader").await;
    let fwd1 = TestDaemon::spawn("fwd-1").await;
    let fwd2 = TestDaemon::spawn("fwd-2").await;

    let transport = TcpTransport::new();
    let envelope = RpcEnvelope::new(MessageType::Reconfigure, Bytes::from_static(b"conf"))
        .with_relay(nodecast::transport::RelayInstruction {
            spread: 10,
            forwards: vec![fwd1.target("fwd-1"), fwd2.target("fwd-2")],
        });

    let reply = transport
        .send(&leader.target("leader"), envelope, Duration::from_secs(5))
        .await
        .expect("exchange must succeed");

    assert_eq!(reply.relay_acks.len(), 2);
    assert!(reply
        .relay_acks
        .iter()
        .all(|ack| ack.status == DispatchStatus::Acked));

    // The payload reached every hop
    assert_eq!(leader.message_count(), 1);
    assert_eq!(fwd1.message_count(), 1);
    assert_eq!(fwd2.message_count(), 1);

    leader.stop().await;
    fwd1.stop().await;
    fwd2.stop().await;
}

#[tokio::test]
async fn test_relay_reports_unreachable_forward() {
    let leader = TestDaemon::spawn("leader").await;
    let fwd = TestDaemon::spawn("fwd-live").await;
    // Loopback port 1 is essentially guaranteed closed
    let dead = TargetNode::new("127.0.0.1:1".parse().unwrap(), "fwd-dead");

    let transport = TcpTransport::new();
    let envelope = RpcEnvelope::new(MessageType::Ping, Bytes::new()).with_relay(
        nodecast::transport::RelayInstruction {
            spread: 10,
            forwards: vec![fwd.target("fwd-live"), dead],
        },
    );

    let reply = transport
        .send(&leader.target("leader"), envelope, Duration::from_secs(5))
        .await
        .expect("exchange must succeed");

    assert_eq!(reply.relay_acks.len(), 2);
    let by_name = |name: &str| {
        reply
            .relay_acks
            .iter()
            .find(|ack| ack.node_name == name)
            .map(|ack| ack.status)
    };
    assert_eq!(by_name("fwd-live"), Some(DispatchStatus::Acked));
    assert_eq!(by_name("fwd-dead"), Some(DispatchStatus::ConnectFailed));

    leader.stop().await;
    fwd.stop().await;
}

// =============================================================================
// Registration
// =============================================================================

#[tokio::test]
async fn test_registration_reaches_the_controller_intact() {
    /// Controller-side handler decoding registrations.
    struct ControllerHandler {
        registrations: Arc<Mutex<Vec<NodeRegistration>>>,
    }

    impl RequestHandler for ControllerHandler {
        fn handle<'a>(&'a self, message: InboundMessage) -> HandlerFuture<'a> {
            Box::pin(async move {
                if message.message_type == MessageType::NodeRegistration {
                    let registration = NodeRegistration::decode(message.payload)
                        .expect("registration payload must decode");
                    self.registrations.lock().unwrap().push(registration);
                }
                None
            })
        }
    }

    let registrations = Arc::new(Mutex::new(Vec::new()));
    let handler = Arc::new(ControllerHandler {
        registrations: Arc::clone(&registrations),
    });

    let settings = DaemonSettings::new("127.0.0.1:0".parse().unwrap(), "controller");
    let controller = NodeDaemon::bind(settings, handler, Arc::new(TcpTransport::new()))
        .await
        .unwrap();
    let controller_addr = controller.local_addr();

    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    let join = tokio::spawn(async move { controller.run(token).await });

    let transport = TcpTransport::new();
    let registration = NodeRegistration::new(
        "node-42",
        64,
        256_000,
        1_000_000,
        vec![nodecast::daemon::ActiveStep {
            job_id: 77,
            step_id: 3,
        }],
    );
    send_registration(
        &transport,
        &TargetNode::new(controller_addr, "controller"),
        &registration,
        Duration::from_secs(2),
    )
    .await
    .expect("registration must send");

    let stored = registrations.lock().unwrap().clone();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0], registration);

    shutdown.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(2), join).await;
}

// =============================================================================
// End to end
// =============================================================================

#[tokio::test]
async fn test_broadcast_through_real_daemons_with_relaying() {
    let mut daemons = Vec::new();
    for i in 0..5 {
        daemons.push(TestDaemon::spawn(&format!("node-{}", i)).await);
    }
    let targets: Vec<TargetNode> = daemons
        .iter()
        .enumerate()
        .map(|(i, d)| d.target(&format!("node-{}", i)))
        .collect();

    // Width 2 forces relaying: 2 direct contacts cover 5 nodes
    let settings = AgentSettings::default()
        .with_fanout_width(2)
        .with_spread_width(2)
        .with_command_timeout(Duration::from_secs(5));
    let service = AgentService::new(settings, Arc::new(TcpTransport::new())).unwrap();

    let request = BroadcastRequest::new(targets, MessageType::Ping, Bytes::from_static(b"hello"));
    let mut handle = service.queue_request(request).unwrap();

    let report = tokio::time::timeout(Duration::from_secs(10), handle.wait())
        .await
        .expect("broadcast timed out")
        .expect("report missing");

    assert_eq!(report.disposition, BroadcastDisposition::AllAcked);
    assert_eq!(report.outcomes.len(), 5);

    // Every daemon saw the message exactly once
    for daemon in &daemons {
        assert_eq!(daemon.message_count(), 1);
    }

    for daemon in daemons {
        daemon.stop().await;
    }
}
