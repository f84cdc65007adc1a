//! Caller side of a subscription.
//!
//! Wraps the bundle receiver and maps channel errors onto [`StoreError`].
//! Dropping the handle unsubscribes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Weak;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};

use crate::error::{StoreError, StoreResult};
use crate::event::EventBundle;

use super::registry::{Priority, Registry, SubscriptionId};

/// Caller-side handle of a subscription.
///
/// The first bundle received is always the bootstrap snapshot. Every bundle
/// must be acknowledged (or dropped) before the next one is delivered.
/// Dropping the handle unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    name: String,
    priority: Priority,
    rx: Receiver<EventBundle>,
    registry: Weak<Registry>,
    unsubscribed: AtomicBool,
}

impl Subscription {
    pub(crate) fn new(
        id: SubscriptionId,
        name: String,
        priority: Priority,
        rx: Receiver<EventBundle>,
        registry: Weak<Registry>,
    ) -> Self {
        Self {
            id,
            name,
            priority,
            rx,
            registry,
            unsubscribed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn priority(&self) -> Priority {
        self.priority
    }

    /// Removes the subscription. Idempotent.
    ///
    /// Returns once the delivery task has stopped: no bundle is sent after
    /// this, and once any bundle already in the channel is taken, `recv`
    /// reports disconnection.
    pub fn unsubscribe(&self) {
        if self.unsubscribed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.unsubscribe(self.id);
        }
    }

    /// Receives the next bundle (blocking).
    pub fn recv(&self) -> StoreResult<EventBundle> {
        self.rx.recv().map_err(|_| self.disconnected())
    }

    /// Receives the next bundle with a timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> StoreResult<EventBundle> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => StoreError::Timeout {
                duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            },
            RecvTimeoutError::Disconnected => self.disconnected(),
        })
    }

    /// Returns a bundle if one is ready.
    pub fn try_recv(&self) -> StoreResult<Option<EventBundle>> {
        match self.rx.try_recv() {
            Ok(bundle) => Ok(Some(bundle)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(self.disconnected()),
        }
    }

    /// The underlying channel, for use in `select!`.
    #[must_use]
    pub fn receiver(&self) -> &Receiver<EventBundle> {
        &self.rx
    }

    fn disconnected(&self) -> StoreError {
        StoreError::disconnected(format!("subscription:{}", self.name))
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
