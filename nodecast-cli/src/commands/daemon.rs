//! The `daemon` subcommand: run the per-node daemon.
//!
//! Startup order mirrors the classic node daemon: read settings, bind the
//! listen socket (fatal on failure), register with the controller (logged,
//! non-fatal on failure), then serve until interrupted.

use crate::error::CliError;
use clap::Args;
use nodecast::agent::{MessageType, TargetNode};
use nodecast::config::DaemonSettings;
use nodecast::daemon::{
    send_registration, HandlerFuture, InboundMessage, NodeDaemon, NodeRegistration, RequestHandler,
};
use nodecast::transport::TcpTransport;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Args)]
pub struct DaemonArgs {
    /// Address to listen on for inbound RPCs
    #[arg(long, default_value = "0.0.0.0:6818")]
    listen: SocketAddr,

    /// Node name reported to the controller (defaults to $HOSTNAME)
    #[arg(long)]
    name: Option<String>,

    /// Controller address for the startup registration call
    #[arg(long)]
    controller: Option<SocketAddr>,

    /// Deadline in seconds for each relay forward
    #[arg(long, default_value_t = 10)]
    relay_timeout: u64,
}

pub async fn run(args: DaemonArgs) -> Result<(), CliError> {
    let name = args.name.unwrap_or_else(default_node_name);

    let mut settings = DaemonSettings::new(args.listen, &name)
        .with_relay_timeout(Duration::from_secs(args.relay_timeout));
    if let Some(controller) = args.controller {
        settings = settings.with_controller(controller);
    }

    let transport = Arc::new(TcpTransport::new());
    let daemon = NodeDaemon::bind(settings, Arc::new(LogHandler), transport.clone()).await?;
    info!(node = %name, addr = %daemon.local_addr(), "daemon ready");

    if let Some(controller) = args.controller {
        let registration = NodeRegistration::collect(&name, Vec::new());
        let target = TargetNode::new(controller, "controller");
        if let Err(err) =
            send_registration(transport.as_ref(), &target, &registration, Duration::from_secs(10))
                .await
        {
            error!(error = %err, "unable to register with controller");
        }
    }

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            signal_token.cancel();
        }
    });

    daemon.run(shutdown).await;
    Ok(())
}

fn default_node_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}

/// Default handler: log each message; registration payloads get decoded so
/// the log line names the registering node.
struct LogHandler;

impl RequestHandler for LogHandler {
    fn handle<'a>(&'a self, message: InboundMessage) -> HandlerFuture<'a> {
        Box::pin(async move {
            if message.message_type == MessageType::NodeRegistration {
                match NodeRegistration::decode(message.payload.clone()) {
                    Ok(registration) => info!(
                        node = %registration.node_name,
                        cpus = registration.cpus,
                        memory_mb = registration.real_memory_mb,
                        steps = registration.active_steps.len(),
                        "node registered"
                    ),
                    Err(err) => warn!(error = %err, "malformed registration payload"),
                }
            } else {
                info!(
                    peer = %message.peer,
                    message_type = %message.message_type,
                    bytes = message.payload.len(),
                    "message handled"
                );
            }
            None
        })
    }
}
