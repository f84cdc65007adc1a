//! Subscriber registry.
//!
//! Owned separately from the ingestion actor so that subscribe/unsubscribe
//! and duplicate-name checks happen synchronously on the caller's thread. The
//! actor only reads the registry when it fans a bundle out.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::stats::{SubscriberCounters, SubscriberStats};

use super::dispatcher::Delivery;

/// Delivery tier of a subscriber.
///
/// Bundles reach higher tiers first: a subscriber is only sent a bundle once
/// every subscriber of a strictly higher tier has acknowledged it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl Priority {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unique id of one subscription. A name can be reused after unsubscribe;
/// the id cannot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// State shared between the registry, the ingestion actor and the
/// subscriber's delivery task.
#[derive(Debug)]
pub(crate) struct SubscriberHandle {
    pub id: SubscriptionId,
    pub name: String,
    pub priority: Priority,
    pub queue_tx: Sender<Delivery>,
    /// Set by the actor once the bootstrap bundle is queued. Only active
    /// subscribers take part in fan-out.
    pub active: AtomicBool,
    pub closed: AtomicBool,
    pub counters: SubscriberCounters,
}

impl SubscriberHandle {
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire) && !self.is_closed()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
struct RegistryEntry {
    handle: Arc<SubscriberHandle>,
    // Dropping this wakes the delivery task and makes it exit.
    cancel_tx: Sender<()>,
    join: Option<JoinHandle<()>>,
}

impl RegistryEntry {
    fn close(self) {
        self.handle.closed.store(true, Ordering::Release);
        drop(self.cancel_tx);
        if let Some(join) = self.join {
            // The delivery task unsubscribes itself after a fault; it cannot
            // wait on its own thread.
            if join.thread().id() != thread::current().id() {
                let _ = join.join();
            }
        }
    }
}

/// Subscribers keyed by unique name.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    entries: RwLock<HashMap<String, RegistryEntry>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber and starts its delivery task.
    ///
    /// `spawn` receives the new handle, the queue receiver, and the
    /// cancellation receiver; it runs under the registry write lock so the
    /// name check and the insert are atomic.
    pub fn register<F>(
        &self,
        name: &str,
        priority: Priority,
        spawn: F,
    ) -> StoreResult<Arc<SubscriberHandle>>
    where
        F: FnOnce(Arc<SubscriberHandle>, Receiver<Delivery>, Receiver<()>) -> StoreResult<JoinHandle<()>>,
    {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| StoreError::internal("subscriber registry lock poisoned"))?;
        if entries.contains_key(name) {
            return Err(StoreError::DuplicateSubscriber {
                name: name.to_string(),
            });
        }

        let (queue_tx, queue_rx) = crossbeam_channel::unbounded::<Delivery>();
        let (cancel_tx, cancel_rx) = crossbeam_channel::bounded::<()>(1);
        let handle = Arc::new(SubscriberHandle {
            id: SubscriptionId::new(),
            name: name.to_string(),
            priority,
            queue_tx,
            active: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            counters: SubscriberCounters::default(),
        });

        let join = spawn(Arc::clone(&handle), queue_rx, cancel_rx)?;
        entries.insert(
            name.to_string(),
            RegistryEntry {
                handle: Arc::clone(&handle),
                cancel_tx,
                join: Some(join),
            },
        );
        info!(subscriber = name, priority = %priority, id = %handle.id, "subscribed");
        Ok(handle)
    }

    /// Removes a subscription and waits for its delivery task to stop.
    ///
    /// Idempotent. Returns false if the subscription was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let entry = {
            let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
            let name = entries
                .iter()
                .find(|(_, e)| e.handle.id == id)
                .map(|(name, _)| name.clone());
            name.and_then(|n| entries.remove(&n))
        };

        match entry {
            Some(entry) => {
                let name = entry.handle.name.clone();
                entry.close();
                info!(subscriber = %name, id = %id, "unsubscribed");
                true
            }
            None => false,
        }
    }

    /// Subscribers eligible for fan-out.
    pub fn active(&self) -> Vec<Arc<SubscriberHandle>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .values()
            .filter(|e| e.handle.is_active())
            .map(|e| Arc::clone(&e.handle))
            .collect()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn stats(&self) -> Vec<SubscriberStats> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut out: Vec<SubscriberStats> = entries
            .values()
            .map(|e| e.handle.counters.snapshot(&e.handle.name, e.handle.priority.as_str()))
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Removes and stops every subscriber.
    pub fn close_all(&self) {
        let drained: Vec<RegistryEntry> = {
            let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
            entries.drain().map(|(_, e)| e).collect()
        };
        for entry in drained {
            entry.close();
        }
    }
}
