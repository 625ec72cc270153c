//! Settings for the broadcast engine and the node daemon.
//!
//! All tunables live in explicit settings structs constructed once at startup
//! and passed by reference; there is no ambient global configuration. The
//! defaults reproduce the classic controller sizing: ten direct workers per
//! broadcast, ten forwards per relaying node, ten-second command timeout, and
//! an agent cap derived from the process-wide thread budget.

use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Configuration Constants
// =============================================================================

/// Default maximum number of direct-contact workers per broadcast run.
pub const DEFAULT_FANOUT_WIDTH: usize = 10;

/// Default maximum number of forwards one contacted node relays to.
pub const DEFAULT_SPREAD_WIDTH: usize = 10;

/// Default per-attempt command timeout in seconds.
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 10;

/// Default process-wide background thread budget.
///
/// Each broadcast run consumes `fanout_width + 2` tasks from this budget
/// (the workers plus one coordinator and one collector), which is what caps
/// the number of concurrently admitted runs.
pub const DEFAULT_THREAD_BUDGET: usize = 60;

/// Default multiple of the command timeout used as the pool drain ceiling.
pub const DEFAULT_DRAIN_CEILING_FACTOR: u32 = 3;

/// Default node daemon listen port.
pub const DEFAULT_DAEMON_PORT: u16 = 6818;

// =============================================================================
// Errors
// =============================================================================

/// Startup-time configuration errors. These are fatal to the owning process.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Fan-out width must allow at least one direct worker.
    #[error("fanout width must be at least 1 (got {0})")]
    InvalidFanoutWidth(usize),

    /// Spread width must allow at least one forward per relaying node.
    #[error("spread width must be at least 1 (got {0})")]
    InvalidSpreadWidth(usize),

    /// The thread budget must fit at least one full broadcast run.
    #[error("thread budget {budget} cannot fit one run of {required} tasks")]
    InvalidThreadBudget { budget: usize, required: usize },

    /// A zero command timeout would time every attempt out immediately.
    #[error("command timeout must be non-zero")]
    InvalidCommandTimeout,
}

// =============================================================================
// Agent Settings
// =============================================================================

/// Settings for the broadcast engine.
#[derive(Clone, Debug)]
pub struct AgentSettings {
    /// Maximum direct-contact workers per broadcast run (`T`).
    pub fanout_width: usize,

    /// Maximum forwards one contacted node relays to (`S`).
    pub spread_width: usize,

    /// Hard deadline for a single transport attempt.
    pub command_timeout: Duration,

    /// Process-wide background thread budget from which the agent cap derives.
    pub thread_budget: usize,

    /// Multiple of `command_timeout` after which a run stops waiting for
    /// wedged workers and records their targets as timed out.
    pub drain_ceiling_factor: u32,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            fanout_width: DEFAULT_FANOUT_WIDTH,
            spread_width: DEFAULT_SPREAD_WIDTH,
            command_timeout: Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS),
            thread_budget: DEFAULT_THREAD_BUDGET,
            drain_ceiling_factor: DEFAULT_DRAIN_CEILING_FACTOR,
        }
    }
}

impl AgentSettings {
    /// Sets the direct fan-out width.
    pub fn with_fanout_width(mut self, width: usize) -> Self {
        self.fanout_width = width;
        self
    }

    /// Sets the relay spread width.
    pub fn with_spread_width(mut self, width: usize) -> Self {
        self.spread_width = width;
        self
    }

    /// Sets the per-attempt command timeout.
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Sets the process-wide thread budget.
    pub fn with_thread_budget(mut self, budget: usize) -> Self {
        self.thread_budget = budget;
        self
    }

    /// Validates the settings, returning the first violation found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fanout_width == 0 {
            return Err(ConfigError::InvalidFanoutWidth(self.fanout_width));
        }
        if self.spread_width == 0 {
            return Err(ConfigError::InvalidSpreadWidth(self.spread_width));
        }
        let required = self.fanout_width + 2;
        if self.thread_budget < required {
            return Err(ConfigError::InvalidThreadBudget {
                budget: self.thread_budget,
                required,
            });
        }
        if self.command_timeout.is_zero() {
            return Err(ConfigError::InvalidCommandTimeout);
        }
        Ok(())
    }

    /// Maximum number of concurrently admitted broadcast runs.
    ///
    /// Each run needs `fanout_width` worker tasks plus a coordinator and a
    /// collector, so the cap is `thread_budget / (fanout_width + 2)`,
    /// never below one.
    pub fn max_concurrent_agents(&self) -> usize {
        (self.thread_budget / (self.fanout_width + 2)).max(1)
    }

    /// Hard wall-clock ceiling for draining a run's worker pool.
    pub fn drain_ceiling(&self) -> Duration {
        self.command_timeout * self.drain_ceiling_factor
    }
}

// =============================================================================
// Daemon Settings
// =============================================================================

/// Settings for the per-node daemon.
#[derive(Clone, Debug)]
pub struct DaemonSettings {
    /// Address the daemon listens on for inbound RPCs.
    pub listen_addr: SocketAddr,

    /// This node's name as reported in registration and logs.
    pub node_name: String,

    /// Controller address for the one-shot registration call, if any.
    pub controller_addr: Option<SocketAddr>,

    /// Deadline for each relay forward this daemon performs.
    pub relay_timeout: Duration,
}

impl DaemonSettings {
    /// Creates daemon settings with default relay timeout and no controller.
    pub fn new(listen_addr: SocketAddr, node_name: impl Into<String>) -> Self {
        Self {
            listen_addr,
            node_name: node_name.into(),
            controller_addr: None,
            relay_timeout: Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS),
        }
    }

    /// Sets the controller address used for registration.
    pub fn with_controller(mut self, addr: SocketAddr) -> Self {
        self.controller_addr = Some(addr);
        self
    }

    /// Sets the per-forward relay deadline.
    pub fn with_relay_timeout(mut self, timeout: Duration) -> Self {
        self.relay_timeout = timeout;
        self
    }
}
