//! Nodecast - parallel RPC broadcast engine for cluster control planes
//!
//! This library provides the communication core of a cluster resource
//! manager's controller: broadcasting one logical remote-procedure-call to an
//! arbitrary-sized set of compute nodes with bounded concurrency, partial
//! failure handling, and tree fan-out through intermediate nodes.
//!
//! # High-Level API
//!
//! Most callers only need the [`agent`] module's service facade:
//!
//! ```ignore
//! use nodecast::agent::{AgentService, BroadcastRequest, MessageType};
//! use nodecast::config::AgentSettings;
//! use nodecast::transport::TcpTransport;
//! use std::sync::Arc;
//!
//! let service = AgentService::new(AgentSettings::default(), Arc::new(TcpTransport::new()))?;
//!
//! let request = BroadcastRequest::new(targets, MessageType::Ping, payload).with_retry(true);
//! let mut handle = service.queue_request(request)?;
//! let report = handle.wait().await;
//! ```

pub mod agent;
pub mod config;
pub mod daemon;
pub mod logging;
pub mod notifier;
pub mod transport;

/// Version of the nodecast library and CLI.
///
/// This is synchronized across all components in the workspace.
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
