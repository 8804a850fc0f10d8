//! Per-queue in-flight throttle
//!
//! A counter bounded in `[0, capacity]`. The poller takes a slot for every
//! message it hands to a worker and the worker gives it back when it is done.
//! The poller only ever asks the broker for as many messages as there are free
//! slots, so a slow handler population throttles intake on its own.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, trace};

/// How a [`SlotGate::await_available`] call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotWait {
    /// At least one slot is free
    Available,
    /// The timeout elapsed with no free slot
    TimedOut,
}

#[derive(Debug)]
pub struct SlotGate {
    capacity: usize,
    wake_threshold: usize,
    available: Mutex<usize>,
    notify: Notify,
}

impl SlotGate {
    /// A gate with all `capacity` slots free. Waiters are woken once a release
    /// brings the free count to `wake_threshold` or more.
    pub fn new(capacity: usize, wake_threshold: usize) -> Self {
        Self {
            capacity,
            wake_threshold: wake_threshold.clamp(1, capacity.max(1)),
            available: Mutex::new(capacity),
            notify: Notify::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn wake_threshold(&self) -> usize {
        self.wake_threshold
    }

    pub fn available(&self) -> usize {
        *self.available.lock()
    }

    /// Take up to `n` slots, returning how many were actually taken
    pub fn acquire(&self, n: usize) -> usize {
        let mut available = self.available.lock();
        let taken = n.min(*available);
        *available -= taken;
        taken
    }

    /// Return `n` slots, never exceeding capacity. Returns the new free count.
    pub fn release(&self, n: usize) -> usize {
        let now_available = {
            let mut available = self.available.lock();
            let returned = n.min(self.capacity - *available);
            if returned < n {
                debug!(
                    requested = n,
                    returned = returned,
                    capacity = self.capacity,
                    "Slot release above capacity ignored"
                );
            }
            *available += returned;
            *available
        };

        if now_available >= self.wake_threshold {
            self.notify.notify_waiters();
        }
        now_available
    }

    /// Take one slot as a guard that gives it back on drop
    pub fn try_permit(self: &Arc<Self>) -> Option<SlotPermit> {
        if self.acquire(1) == 1 {
            Some(SlotPermit {
                gate: Arc::clone(self),
                held: 1,
            })
        } else {
            None
        }
    }

    /// Wait until a slot is free or the timeout elapses
    pub async fn await_available(&self, timeout: Duration) -> SlotWait {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // Register before checking so a release between the check and the
        // wait is not missed
        notified.as_mut().enable();

        if self.available() > 0 {
            return SlotWait::Available;
        }

        let _ = tokio::time::timeout(timeout, notified).await;
        let outcome = if self.available() > 0 {
            SlotWait::Available
        } else {
            SlotWait::TimedOut
        };
        trace!(?outcome, "Slot wait finished");
        outcome
    }
}

/// One acquired slot. Released exactly once, when dropped.
#[derive(Debug)]
pub struct SlotPermit {
    gate: Arc<SlotGate>,
    held: usize,
}

impl Drop for SlotPermit {
    fn drop(&mut self) {
        if self.held > 0 {
            self.gate.release(self.held);
            self.held = 0;
        }
    }
}
