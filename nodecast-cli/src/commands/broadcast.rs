//! The `broadcast` subcommand: issue one RPC to a set of nodes.

use crate::error::CliError;
use clap::Args;
use nodecast::agent::{AgentService, BroadcastRequest, MessageType, TargetNode};
use nodecast::config::{
    AgentSettings, DEFAULT_COMMAND_TIMEOUT_SECS, DEFAULT_FANOUT_WIDTH, DEFAULT_SPREAD_WIDTH,
};
use nodecast::transport::TcpTransport;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Args)]
pub struct BroadcastArgs {
    /// Target as host:port=name; repeat for each node
    #[arg(long = "target", required = true)]
    targets: Vec<String>,

    /// RPC kind to issue (ping, kill-job, reconfigure, ...)
    #[arg(long = "message-type", default_value = "ping")]
    message_type: MessageType,

    /// Requeue unresolved targets when the run finishes
    #[arg(long)]
    retry: bool,

    /// File whose bytes become the opaque payload
    #[arg(long)]
    payload_file: Option<PathBuf>,

    /// Maximum direct-contact workers
    #[arg(long, default_value_t = DEFAULT_FANOUT_WIDTH)]
    fanout: usize,

    /// Maximum forwards per relaying node
    #[arg(long, default_value_t = DEFAULT_SPREAD_WIDTH)]
    spread: usize,

    /// Per-attempt timeout in seconds
    #[arg(long, default_value_t = DEFAULT_COMMAND_TIMEOUT_SECS)]
    timeout: u64,
}

pub async fn run(args: BroadcastArgs) -> Result<(), CliError> {
    let targets = args
        .targets
        .iter()
        .map(|spec| parse_target(spec))
        .collect::<Result<Vec<_>, _>>()?;

    let payload = match &args.payload_file {
        Some(path) => bytes::Bytes::from(std::fs::read(path)?),
        None => bytes::Bytes::new(),
    };

    let settings = AgentSettings::default()
        .with_fanout_width(args.fanout)
        .with_spread_width(args.spread)
        .with_command_timeout(Duration::from_secs(args.timeout));

    let service = AgentService::new(settings, Arc::new(TcpTransport::new()))?;

    let request =
        BroadcastRequest::new(targets, args.message_type, payload).with_retry(args.retry);
    let total = request.node_count();

    let mut handle = service.queue_request(request)?;
    let report = handle.wait().await.ok_or(CliError::Abandoned)?;

    println!(
        "{}: {} of {} nodes acked in {:.2?}",
        report.disposition,
        report.acked_count(),
        total,
        report.duration
    );
    for outcome in &report.outcomes {
        if !outcome.status.is_acked() {
            println!("  {}: {}", outcome.node_name, outcome.status);
        }
    }

    Ok(())
}

/// Parses `host:port=name` into a target.
fn parse_target(spec: &str) -> Result<TargetNode, CliError> {
    let (addr, name) = spec
        .split_once('=')
        .ok_or_else(|| CliError::InvalidTarget(spec.to_string()))?;
    let address = addr
        .parse()
        .map_err(|_| CliError::InvalidTarget(spec.to_string()))?;
    if name.is_empty() {
        return Err(CliError::InvalidTarget(spec.to_string()));
    }
    Ok(TargetNode::new(address, name))
}
