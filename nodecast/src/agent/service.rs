//! The agent service facade and the retry sweeper daemon.
//!
//! [`AgentService`] is the submission surface for broadcasts: it validates
//! requests, admits them through the slot pool, and owns the retry queue.
//! [`RetrySweeper`] is the periodic tick that promotes one aged retry entry
//! back into execution.

use super::admission::AdmissionController;
use super::coordinator::{handle_pair, BroadcastHandle, QueuedRun, RunState};
use super::request::BroadcastRequest;
use super::retry::RetryQueue;
use crate::config::{AgentSettings, ConfigError};
use crate::notifier::{LogNotifySink, Notifier, NotifySink};
use crate::transport::Transport;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Default seconds between retry sweeps.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 10;

/// Default minimum age before a queued broadcast is eligible for promotion.
pub const DEFAULT_RETRY_MIN_WAIT_SECS: u64 = 30;

/// Submission-side errors. Transport failures are never surfaced here; they
/// become per-node outcomes in the broadcast report.
#[derive(Debug, Error)]
pub enum AgentError {
    /// A broadcast must name at least one target.
    #[error("broadcast request has no targets")]
    NoTargets,
}

/// Shared state behind the service facade.
pub(crate) struct AgentInner {
    pub(crate) settings: AgentSettings,
    pub(crate) admission: AdmissionController,
    pub(crate) retry: RetryQueue,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) notifier: Notifier,
    /// Live run states, keyed by run id; entries are removed on `Done`.
    pub(crate) runs: DashMap<u64, RunState>,
    run_seq: AtomicU64,
}

impl AgentInner {
    pub(crate) fn next_run_id(&self) -> u64 {
        self.run_seq.fetch_add(1, Ordering::Relaxed)
    }
}

/// The broadcast engine's public facade.
///
/// Cloneable; all clones share the same admission pool, retry queue, and
/// transport. Must be constructed within a Tokio runtime — the notifier's
/// delivery task is spawned at construction time.
#[derive(Clone)]
pub struct AgentService {
    inner: Arc<AgentInner>,
}

impl AgentService {
    /// Creates a service with the default log-only notification sink.
    pub fn new(
        settings: AgentSettings,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ConfigError> {
        Self::with_notify_sink(settings, transport, Arc::new(LogNotifySink))
    }

    /// Creates a service delivering notifications to the given sink.
    pub fn with_notify_sink(
        settings: AgentSettings,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn NotifySink>,
    ) -> Result<Self, ConfigError> {
        settings.validate()?;

        let max_agents = settings.max_concurrent_agents();
        info!(
            fanout_width = settings.fanout_width,
            spread_width = settings.spread_width,
            max_agents,
            "agent service starting"
        );

        Ok(Self {
            inner: Arc::new(AgentInner {
                admission: AdmissionController::new(max_agents),
                retry: RetryQueue::new(),
                transport,
                notifier: Notifier::spawn(sink),
                runs: DashMap::new(),
                run_seq: AtomicU64::new(0),
                settings,
            }),
        })
    }

    /// Submits a broadcast for best-effort immediate-or-later execution.
    ///
    /// The returned handle resolves to the run's report. The run starts as
    /// soon as an admission slot is free; acquiring the slot is the only
    /// queueing point and waiters are served FIFO.
    pub fn queue_request(
        &self,
        request: BroadcastRequest,
    ) -> Result<BroadcastHandle, AgentError> {
        if request.targets.is_empty() {
            return Err(AgentError::NoTargets);
        }

        let run_id = self.inner.next_run_id();
        let (handle, plumbing) = handle_pair(run_id);
        let run = QueuedRun {
            run_id,
            request,
            plumbing: Some(plumbing),
        };

        self.spawn_run(run);
        Ok(handle)
    }

    /// Spawns a coordinator task for the run; the task suspends on admission
    /// when the slot pool is saturated.
    pub(crate) fn spawn_run(&self, run: QueuedRun) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let slot = inner.admission.acquire().await;
            Self::execute_run(inner, run, slot).await;
        });
    }

    /// Promotes at most one queued broadcast whose age is at least
    /// `min_wait`, returning the count of entries still queued afterwards.
    pub async fn retry_sweep(&self, min_wait: Duration) -> usize {
        let (promoted, remaining) = self.inner.retry.sweep(min_wait).await;
        if let Some(run) = promoted {
            debug!(run_id = run.run_id, remaining, "promoting queued broadcast");
            self.spawn_run(run);
        }
        remaining
    }

    /// Atomically drops every queued broadcast without attempting delivery.
    ///
    /// Running broadcasts are unaffected. Returns the number dropped.
    pub async fn purge(&self) -> usize {
        let dropped = self.inner.retry.purge().await;
        if dropped > 0 {
            info!(dropped, "purged retry queue");
        }
        dropped
    }

    /// Number of broadcasts currently executing (admitted, not yet done).
    pub fn active_runs(&self) -> usize {
        self.inner.runs.len()
    }

    /// Number of broadcasts waiting in the retry queue.
    pub async fn queued_requests(&self) -> usize {
        self.inner.retry.len().await
    }

    /// Number of admission slots currently held.
    pub fn slots_in_flight(&self) -> usize {
        self.inner.admission.in_flight()
    }

    /// The settings this service was built with.
    pub fn settings(&self) -> &AgentSettings {
        &self.inner.settings
    }
}

impl std::fmt::Debug for AgentService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentService")
            .field("active_runs", &self.active_runs())
            .field("slots_in_flight", &self.slots_in_flight())
            .finish()
    }
}

// =============================================================================
// Retry Sweeper
// =============================================================================

/// Background daemon that periodically promotes aged retry entries.
///
/// One entry per tick keeps a controller busy period from turning into a
/// retry storm the moment it ends.
pub struct RetrySweeper {
    service: AgentService,
    interval: Duration,
    min_wait: Duration,
}

impl RetrySweeper {
    /// Creates a sweeper with the default tick interval and minimum wait.
    pub fn new(service: AgentService) -> Self {
        Self {
            service,
            interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            min_wait: Duration::from_secs(DEFAULT_RETRY_MIN_WAIT_SECS),
        }
    }

    /// Sets the tick interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sets the minimum queued age for promotion.
    pub fn with_min_wait(mut self, min_wait: Duration) -> Self {
        self.min_wait = min_wait;
        self
    }

    /// Runs the sweeper until shutdown is signalled.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            min_wait_secs = self.min_wait.as_secs(),
            "retry sweeper starting"
        );

        let mut interval = tokio::time::interval(self.interval);
        // Skip the immediate first tick
        interval.tick().await;

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("retry sweeper shutting down");
                    break;
                }

                _ = interval.tick() => {
                    let remaining = self.service.retry_sweep(self.min_wait).await;
                    if remaining > 0 {
                        debug!(remaining, "retry sweep complete");
                    }
                }
            }
        }
    }
}
