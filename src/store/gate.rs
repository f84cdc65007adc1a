//! Priority gate for one generated bundle.
//!
//! Every subscriber that receives a bundle holds a [`GateSlot`] in that
//! bundle's gate. A subscriber may only be sent the bundle once every slot of
//! a strictly higher tier has been released (acknowledged, timed out,
//! filtered out, or abandoned).

use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Unbounded};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use super::registry::Priority;

#[derive(Debug)]
pub(crate) struct PriorityGate {
    pending: Mutex<BTreeMap<Priority, usize>>,
    released: Condvar,
}

impl PriorityGate {
    pub fn new(counts: BTreeMap<Priority, usize>) -> Arc<Self> {
        Arc::new(Self {
            pending: Mutex::new(counts),
            released: Condvar::new(),
        })
    }

    /// Hands out a slot for a subscriber of `priority`. The count for that
    /// tier must already include it.
    pub fn slot(self: &Arc<Self>, priority: Priority) -> GateSlot {
        GateSlot {
            gate: Arc::clone(self),
            priority,
            released: false,
        }
    }

    fn higher_tiers_done(pending: &BTreeMap<Priority, usize>, priority: Priority) -> bool {
        pending.range((Excluded(priority), Unbounded)).all(|(_, n)| *n == 0)
    }

    /// Blocks until every higher tier has released its slots.
    ///
    /// Rechecks `cancelled` every `poll`; returns false if it fired first.
    pub fn wait_for_higher_tiers(
        &self,
        priority: Priority,
        poll: Duration,
        cancelled: impl Fn() -> bool,
    ) -> bool {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if Self::higher_tiers_done(&pending, priority) {
                return true;
            }
            if cancelled() {
                return false;
            }
            let (guard, _) = self
                .released
                .wait_timeout(pending, poll)
                .unwrap_or_else(PoisonError::into_inner);
            pending = guard;
        }
    }

    fn release(&self, priority: Priority) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(n) = pending.get_mut(&priority) {
            *n = n.saturating_sub(1);
        }
        drop(pending);
        self.released.notify_all();
    }

    #[cfg(test)]
    fn pending(&self, priority: Priority) -> usize {
        let pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.get(&priority).copied().unwrap_or(0)
    }
}

/// One subscriber's claim on a bundle's gate. Released exactly once, on
/// [`GateSlot::release`] or drop.
#[derive(Debug)]
pub(crate) struct GateSlot {
    gate: Arc<PriorityGate>,
    priority: Priority,
    released: bool,
}

impl GateSlot {
    pub fn wait_for_higher_tiers(&self, poll: Duration, cancelled: impl Fn() -> bool) -> bool {
        self.gate.wait_for_higher_tiers(self.priority, poll, cancelled)
    }

    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if !self.released {
            self.released = true;
            self.gate.release(self.priority);
        }
    }
}

impl Drop for GateSlot {
    fn drop(&mut self) {
        self.release_once();
    }
}
