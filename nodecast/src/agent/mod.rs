//! Parallel broadcast engine ("agent").
//!
//! This module is the controller-side core: it transmits one logical RPC in
//! parallel across a set of nodes without overwhelming the controller or
//! blocking its primary request-handling path.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       AgentService                           │
//! │  queue_request / retry_sweep / purge                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │                   Broadcast Coordinator                      │
//! │  per-run state machine: plan → dispatch → collect → settle  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐  │
//! │  │ Admission   │  │ Fan-out     │  │ Retry               │  │
//! │  │ Controller  │  │ Planner     │  │ Queue               │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Core Concepts
//!
//! - **Broadcast**: one RPC sent to a closed set of target nodes known at
//!   call time. Submission returns a [`BroadcastHandle`] that resolves to a
//!   [`BroadcastReport`] with one [`DispatchOutcome`] per target.
//!
//! - **Fan-out plan**: the targets are partitioned into at most
//!   `fanout_width` groups; each group's leader is contacted directly and
//!   relays the RPC onward, so controller-held connections stay bounded
//!   regardless of fleet size.
//!
//! - **Admission slot**: at most `max_concurrent_agents` broadcasts execute
//!   at once. Acquiring a slot is the only queueing point for starting work;
//!   waiters are served FIFO.
//!
//! - **Retry queue**: broadcasts that finished with unresolved targets and
//!   asked for retry are requeued, scoped to just those targets. A periodic
//!   sweep promotes at most one aged entry per tick.

mod admission;
mod coordinator;
pub(crate) mod fanout;
mod outcome;
pub(crate) mod pool;
mod request;
mod retry;
mod service;

pub use admission::{AdmissionController, AgentSlot};
pub use coordinator::{BroadcastHandle, RunState};
pub use fanout::{plan, DispatchGroup, FanoutPlan};
pub use outcome::{BroadcastDisposition, BroadcastReport, DispatchOutcome, DispatchStatus};
pub use request::{BroadcastRequest, MessageType, TargetNode};
pub use service::{
    AgentError, AgentService, RetrySweeper, DEFAULT_RETRY_MIN_WAIT_SECS,
    DEFAULT_SWEEP_INTERVAL_SECS,
};
