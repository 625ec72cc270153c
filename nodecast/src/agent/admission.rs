//! Admission control for concurrent broadcast runs.
//!
//! Broadcasts are fire-and-forget background work; without a cap, a burst
//! (a mass job cancel, say) could exhaust the process's task budget and
//! starve the controller's primary request path. The [`AdmissionController`]
//! bounds concurrently running broadcasts to a fixed slot count; excess
//! callers suspend in FIFO order until a slot frees. Admission blocks, it
//! never rejects: a broadcast must not be silently dropped under load.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Bounded pool of broadcast execution slots.
///
/// Waiters on [`acquire`](AdmissionController::acquire) are woken in FIFO
/// arrival order, which is what keeps a burst of broadcasts starvation-free.
pub struct AdmissionController {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: AtomicUsize,
}

impl AdmissionController {
    /// Creates a controller with the given slot capacity.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be > 0");
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Acquires a slot, suspending FIFO when the cap is saturated.
    pub async fn acquire(&self) -> AgentSlot {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("admission semaphore closed unexpectedly");

        self.slot_from(permit)
    }

    /// Attempts to acquire a slot without waiting.
    pub fn try_acquire(&self) -> Option<AgentSlot> {
        let permit = self.semaphore.clone().try_acquire_owned().ok()?;
        Some(self.slot_from(permit))
    }

    fn slot_from(&self, permit: OwnedSemaphorePermit) -> AgentSlot {
        let current = self.in_flight.fetch_add(1, Ordering::Relaxed) + 1;
        self.update_peak(current);

        AgentSlot {
            _permit: permit,
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    fn update_peak(&self, current: usize) {
        let mut peak = self.peak_in_flight.load(Ordering::Relaxed);
        while current > peak {
            match self.peak_in_flight.compare_exchange_weak(
                peak,
                current,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(p) => peak = p,
            }
        }
    }

    /// Total slot capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently free.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Slots currently held.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Highest concurrent slot count observed.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for AdmissionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionController")
            .field("capacity", &self.capacity)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

/// An admission token. A broadcast run holds exactly one for its lifetime;
/// dropping it releases the slot and wakes the oldest waiter.
pub struct AgentSlot {
    _permit: OwnedSemaphorePermit,
    in_flight: Arc<AtomicUsize>,
}

impl Drop for AgentSlot {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for AgentSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentSlot").finish()
    }
}
