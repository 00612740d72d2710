//! Bounded admission for in-flight records
//!
//! A [`ConcurrencyGate`] hands out at most `limit` [`InFlightSlot`]s at a
//! time. A slot is released when it is dropped, so every exit path of a
//! record (commit, remote failure, persist failure, panic) frees capacity
//! exactly once.
//!
//! The gate also carries the pause signal for the record source. The pipeline
//! pauses the source when it finds the gate saturated; the next slot drop
//! resumes it.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::error::{IngestError, Result};

/// Counting gate limiting how many records are in flight
#[derive(Clone)]
pub struct ConcurrencyGate {
    inner: Arc<GateInner>,
}

struct GateInner {
    limit: usize,
    semaphore: Arc<Semaphore>,
    paused: AtomicBool,
    resumed: Notify,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    admitted: AtomicU64,
    released: AtomicU64,
    pauses: AtomicU64,
    resumes: AtomicU64,
}

/// Point-in-time counters of a gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateStats {
    pub limit: usize,
    pub in_flight: usize,
    pub peak_in_flight: usize,
    pub admitted: u64,
    pub released: u64,
    pub pauses: u64,
    pub resumes: u64,
}

impl ConcurrencyGate {
    /// Create a gate admitting at most `limit` records at once
    pub fn new(limit: usize) -> Result<Self> {
        if limit == 0 {
            return Err(IngestError::ZeroLimit);
        }

        Ok(Self {
            inner: Arc::new(GateInner {
                limit,
                semaphore: Arc::new(Semaphore::new(limit)),
                paused: AtomicBool::new(false),
                resumed: Notify::new(),
                in_flight: AtomicUsize::new(0),
                peak_in_flight: AtomicUsize::new(0),
                admitted: AtomicU64::new(0),
                released: AtomicU64::new(0),
                pauses: AtomicU64::new(0),
                resumes: AtomicU64::new(0),
            }),
        })
    }

    pub fn limit(&self) -> usize {
        self.inner.limit
    }

    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    pub fn is_saturated(&self) -> bool {
        self.inner.semaphore.available_permits() == 0
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    /// Wait until the gate is not paused and a slot is free, then take it
    pub async fn admit(&self) -> Result<InFlightSlot> {
        self.wait_resumed().await;

        let permit = self
            .inner
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| IngestError::GateClosed)?;

        Ok(self.occupy(permit))
    }

    /// Take a slot without waiting; `None` when paused or saturated
    pub fn try_admit(&self) -> Option<InFlightSlot> {
        if self.is_paused() {
            return None;
        }

        let permit = self.inner.semaphore.clone().try_acquire_owned().ok()?;
        Some(self.occupy(permit))
    }

    /// Signal the source to stop producing. Returns `true` if this call paused it.
    pub fn pause(&self) -> bool {
        let changed = !self.inner.paused.swap(true, Ordering::SeqCst);
        if changed {
            self.inner.pauses.fetch_add(1, Ordering::Relaxed);
            debug!(in_flight = self.in_flight(), limit = self.inner.limit, "Source paused");
        }
        changed
    }

    /// Let the source produce again. Returns `true` if this call resumed it.
    pub fn resume(&self) -> bool {
        self.inner.resume()
    }

    pub fn stats(&self) -> GateStats {
        let inner = &self.inner;
        GateStats {
            limit: inner.limit,
            in_flight: inner.in_flight.load(Ordering::SeqCst),
            peak_in_flight: inner.peak_in_flight.load(Ordering::SeqCst),
            admitted: inner.admitted.load(Ordering::SeqCst),
            released: inner.released.load(Ordering::SeqCst),
            pauses: inner.pauses.load(Ordering::Relaxed),
            resumes: inner.resumes.load(Ordering::Relaxed),
        }
    }

    async fn wait_resumed(&self) {
        loop {
            // Register before checking so a resume between the check and the await is not lost
            let notified = self.inner.resumed.notified();
            if !self.is_paused() {
                return;
            }
            notified.await;
        }
    }

    fn occupy(&self, permit: OwnedSemaphorePermit) -> InFlightSlot {
        let held = self.inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.peak_in_flight.fetch_max(held, Ordering::SeqCst);
        self.inner.admitted.fetch_add(1, Ordering::SeqCst);

        InFlightSlot {
            gate: Arc::clone(&self.inner),
            permit: Some(permit),
        }
    }
}

impl GateInner {
    fn resume(&self) -> bool {
        let changed = self.paused.swap(false, Ordering::SeqCst);
        if changed {
            self.resumes.fetch_add(1, Ordering::Relaxed);
            self.resumed.notify_waiters();
            debug!(in_flight = self.in_flight.load(Ordering::SeqCst), "Source resumed");
        }
        changed
    }
}

impl std::fmt::Debug for ConcurrencyGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrencyGate")
            .field("limit", &self.inner.limit)
            .field("in_flight", &self.in_flight())
            .field("paused", &self.is_paused())
            .finish()
    }
}

/// Lease on one unit of gate capacity. Dropping it releases the capacity.
#[must_use = "dropping the slot releases it immediately"]
pub struct InFlightSlot {
    gate: Arc<GateInner>,
    permit: Option<OwnedSemaphorePermit>,
}

impl Drop for InFlightSlot {
    fn drop(&mut self) {
        self.gate.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.gate.released.fetch_add(1, Ordering::SeqCst);
        // Return the permit before resuming so a pause racing this release is always undone
        drop(self.permit.take());
        self.gate.resume();
    }
}

impl std::fmt::Debug for InFlightSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InFlightSlot").field("limit", &self.gate.limit).finish()
    }
}
