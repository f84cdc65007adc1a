//! Per-subscriber delivery task.
//!
//! Each subscriber gets one thread that drains its queue of pending bundles,
//! applies the subscriber's filter, waits on the priority gate, sends the
//! bundle, and then blocks until the bundle is acknowledged before looking at
//! the next one. The ingestion actor never waits on any of this.
//!
//! Once a bundle's ack times out, bundles queued behind it give up their gate
//! slots right away and wait in a local backlog, so lower tiers keep moving
//! while this subscriber's own order is preserved.
//!
//! A fault inside the task (for example a panicking filter predicate) is
//! contained to this subscriber: it is logged and the subscriber is
//! unsubscribed.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, select, Receiver, Sender};
use tracing::{debug, error, warn};

use crate::entity::Entity;
use crate::error::{panic_message, StoreError, StoreResult};
use crate::event::{BundleAck, Event, EventBundle};
use crate::filter::FilterState;
use crate::source::SourceId;
use crate::stats::StoreCounters;

use super::gate::GateSlot;
use super::registry::{Registry, SubscriberHandle};

/// Merged entities with their contributing sources, highest priority first.
pub(crate) type BootstrapSnapshot = Arc<Vec<(Arc<Entity>, Vec<SourceId>)>>;

/// Work queued for a delivery task by the ingestion actor.
#[derive(Debug)]
pub(crate) enum Delivery {
    Bootstrap {
        generation: u64,
        entities: BootstrapSnapshot,
    },
    Bundle {
        generation: u64,
        events: Arc<[Event]>,
        /// `None` once the slot was given up while this subscriber was stuck.
        slot: Option<GateSlot>,
    },
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct DeliverySettings {
    pub ack_timeout: Option<Duration>,
    pub gate_poll_interval: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    Cancelled,
    ReceiverDropped,
}

struct DeliveryTask {
    handle: Arc<SubscriberHandle>,
    queue_rx: Receiver<Delivery>,
    cancel_rx: Receiver<()>,
    bundle_tx: Sender<EventBundle>,
    filter: FilterState,
    settings: DeliverySettings,
    backlog: VecDeque<Delivery>,
}

/// Starts the delivery thread for a freshly registered subscriber.
pub(crate) fn spawn_delivery(
    handle: Arc<SubscriberHandle>,
    queue_rx: Receiver<Delivery>,
    cancel_rx: Receiver<()>,
    bundle_tx: Sender<EventBundle>,
    filter: FilterState,
    settings: DeliverySettings,
    registry: Weak<Registry>,
) -> StoreResult<JoinHandle<()>> {
    let thread_name = format!("workloadmeta-sub-{}", handle.name);
    let mut task = DeliveryTask {
        handle,
        queue_rx,
        cancel_rx,
        bundle_tx,
        filter,
        settings,
        backlog: VecDeque::new(),
    };

    thread::Builder::new()
        .name(thread_name.clone())
        .spawn(move || {
            let id = task.handle.id;
            let name = task.handle.name.clone();
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| task.run()));
            // Closes the subscriber channel and releases queued gate slots.
            drop(task);

            let faulted = match outcome {
                Ok(Exit::Cancelled) => false,
                Ok(Exit::ReceiverDropped) => {
                    debug!(subscriber = %name, "subscription receiver dropped");
                    true
                }
                Err(payload) => {
                    error!(
                        subscriber = %name,
                        panic = %panic_message(payload.as_ref()),
                        "subscriber delivery faulted; unsubscribing"
                    );
                    true
                }
            };
            if faulted {
                if let Some(registry) = registry.upgrade() {
                    registry.unsubscribe(id);
                }
            }
        })
        .map_err(|e| StoreError::Spawn {
            name: thread_name,
            message: e.to_string(),
        })
}

impl DeliveryTask {
    fn run(&mut self) -> Exit {
        loop {
            let delivery = match self.backlog.pop_front() {
                Some(delivery) => delivery,
                None => select! {
                    recv(self.queue_rx) -> msg => match msg {
                        Ok(delivery) => delivery,
                        Err(_) => return Exit::Cancelled,
                    },
                    recv(self.cancel_rx) -> _ => return Exit::Cancelled,
                },
            };
            if let Err(exit) = self.deliver(delivery) {
                return exit;
            }
        }
    }

    fn deliver(&mut self, delivery: Delivery) -> Result<(), Exit> {
        match delivery {
            Delivery::Bootstrap {
                generation,
                entities,
            } => {
                // Sent even when empty: the first bundle marks the snapshot.
                let events = self.filter.bootstrap(&entities);
                self.send(generation, events, None)
            }
            Delivery::Bundle {
                generation,
                events,
                slot,
            } => {
                let selected = self.filter.select(&events);
                if selected.is_empty() {
                    if let Some(slot) = slot {
                        slot.release();
                    }
                    return Ok(());
                }

                let handle = &self.handle;
                if let Some(slot) = &slot {
                    if !slot.wait_for_higher_tiers(self.settings.gate_poll_interval, || handle.is_closed()) {
                        return Err(Exit::Cancelled);
                    }
                }
                self.send(generation, selected, slot)
            }
        }
    }

    fn send(&mut self, generation: u64, events: Vec<Event>, mut slot: Option<GateSlot>) -> Result<(), Exit> {
        if self.handle.is_closed() {
            return Err(Exit::Cancelled);
        }

        let (ack_tx, ack_rx) = bounded::<()>(1);
        let len = u64::try_from(events.len()).unwrap_or(u64::MAX);
        let bundle = EventBundle::new(generation, events, BundleAck::new(ack_tx));
        // The previous bundle was taken and acknowledged, so this never waits.
        if self.bundle_tx.send(bundle).is_err() {
            return Err(Exit::ReceiverDropped);
        }

        let counters = &self.handle.counters;
        StoreCounters::add(&counters.bundles_delivered, 1);
        StoreCounters::add(&counters.events_delivered, len);
        debug!(
            subscriber = %self.handle.name,
            priority = %self.handle.priority,
            generation,
            events = len,
            "bundle delivered"
        );

        // Receiving an error here means the ack was dropped, which also counts.
        let Some(timeout) = self.settings.ack_timeout else {
            return select! {
                recv(ack_rx) -> _ => Ok(()),
                recv(self.cancel_rx) -> _ => Err(Exit::Cancelled),
            };
        };

        select! {
            recv(ack_rx) -> _ => return Ok(()),
            recv(self.cancel_rx) -> _ => return Err(Exit::Cancelled),
            default(timeout) => {
                StoreCounters::add(&counters.ack_timeouts, 1);
                warn!(
                    subscriber = %self.handle.name,
                    generation,
                    timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    "bundle not acknowledged in time; releasing lower tiers"
                );
                if let Some(slot) = slot.take() {
                    slot.release();
                }
            }
        }

        // Still unacknowledged: later bundles must not hold lower tiers either.
        loop {
            let delivery = select! {
                recv(ack_rx) -> _ => return Ok(()),
                recv(self.cancel_rx) -> _ => return Err(Exit::Cancelled),
                recv(self.queue_rx) -> msg => match msg {
                    Ok(delivery) => delivery,
                    Err(_) => return Err(Exit::Cancelled),
                },
            };
            self.hold_back(delivery);
        }
    }

    fn hold_back(&mut self, delivery: Delivery) {
        let delivery = match delivery {
            Delivery::Bundle {
                generation,
                events,
                slot,
            } => {
                if let Some(slot) = slot {
                    slot.release();
                }
                Delivery::Bundle {
                    generation,
                    events,
                    slot: None,
                }
            }
            bootstrap @ Delivery::Bootstrap { .. } => bootstrap,
        };
        self.backlog.push_back(delivery);
    }
}
