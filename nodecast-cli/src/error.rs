//! CLI error type.

use thiserror::Error;

/// Errors surfaced to the terminal user.
#[derive(Debug, Error)]
pub enum CliError {
    /// A --target value did not parse.
    #[error("invalid target '{0}' (expected host:port=name)")]
    InvalidTarget(String),

    /// The broadcast submission was rejected.
    #[error(transparent)]
    Agent(#[from] nodecast::agent::AgentError),

    /// The settings did not validate.
    #[error(transparent)]
    Config(#[from] nodecast::config::ConfigError),

    /// The daemon could not start.
    #[error(transparent)]
    Daemon(#[from] nodecast::daemon::DaemonError),

    /// The run was dropped before producing a report.
    #[error("broadcast was abandoned before completion")]
    Abandoned,

    /// Reading the payload file failed.
    #[error("payload file: {0}")]
    Io(#[from] std::io::Error),
}
