//! Single-writer ingestion actor.
//!
//! One thread owns the source ledger and the merge engine. Collector
//! submissions arrive over a bounded channel and are applied in arrival
//! order; every submission that changes the merged view produces exactly one
//! bundle, which is fanned out to the queues of all bootstrapped subscribers.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::Ordering;
use std::sync::{Arc, PoisonError};

use crossbeam_channel::{select, Receiver, Sender};
use serde::Serialize;
use tracing::{debug, info, trace};

use crate::entity::{Attributes, Entity, EntityId};
use crate::event::{Event, ObservationKind, SourceEvent};
use crate::ledger::{Removal, SourceLedger, SourceSnapshot};
use crate::merge::{MergeEngine, MergeOutcome};
use crate::source::{SourceId, SourceRanking};
use crate::stats::StoreCounters;

use super::dispatcher::Delivery;
use super::gate::PriorityGate;
use super::registry::SubscriberHandle;
use super::Shared;

#[derive(Debug)]
pub(crate) enum IngestMsg {
    /// One batch of validated observations; one bundle at most.
    Observations(Vec<SourceEvent>),
    /// Replace everything `source` contributes. `retained` entities were
    /// listed but rejected, so their ledger entries stay untouched.
    Reset {
        source: SourceId,
        entities: Vec<(EntityId, Attributes)>,
        retained: HashSet<EntityId>,
    },
    /// Queue the bootstrap bundle for a new subscriber and activate it.
    Bootstrap(Arc<SubscriberHandle>),
    Dump(Sender<StoreDump>),
    /// Replies with the current generation once everything queued before it
    /// has been applied.
    Barrier(Sender<u64>),
}

/// One entity in a [`StoreDump`].
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityDump {
    pub merged: Entity,
    pub sources: BTreeMap<SourceId, SourceSnapshot>,
}

/// Diagnostic view of the whole store, consistent with the ledger at
/// `generation`.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreDump {
    pub generation: u64,
    pub entities: Vec<EntityDump>,
}

/// Collects the change events of one ingestion cycle.
#[derive(Debug, Default)]
pub(crate) struct BundleBuilder {
    events: Vec<Event>,
}

impl BundleBuilder {
    pub fn push(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn finish(self) -> Arc<[Event]> {
        self.events.into()
    }
}

pub(crate) struct Ingestor {
    shared: Arc<Shared>,
    ledger: SourceLedger,
    merge: MergeEngine,
    generation: u64,
}

impl Ingestor {
    pub fn new(shared: Arc<Shared>, ranking: SourceRanking) -> Self {
        Self {
            shared,
            ledger: SourceLedger::new(),
            merge: MergeEngine::new(ranking),
            generation: 0,
        }
    }

    /// Runs until `shutdown_rx` disconnects or every sender is gone.
    pub fn run(mut self, ingest_rx: Receiver<IngestMsg>, shutdown_rx: Receiver<()>) {
        loop {
            select! {
                recv(ingest_rx) -> msg => match msg {
                    Ok(msg) => self.handle(msg),
                    Err(_) => break,
                },
                recv(shutdown_rx) -> _ => break,
            }
        }
        debug!(generation = self.generation, entities = self.merge.len(), "ingestion stopped");
    }

    fn handle(&mut self, msg: IngestMsg) {
        match msg {
            IngestMsg::Observations(events) => {
                let mut builder = BundleBuilder::default();
                for event in events {
                    self.apply(event, &mut builder);
                }
                self.publish(builder);
            }
            IngestMsg::Reset {
                source,
                entities,
                retained,
            } => self.reset(source, entities, &retained),
            IngestMsg::Bootstrap(handle) => self.bootstrap(&handle),
            IngestMsg::Dump(reply) => {
                let _ = reply.send(self.dump());
            }
            IngestMsg::Barrier(reply) => {
                let _ = reply.send(self.generation);
            }
        }
    }

    fn apply(&mut self, event: SourceEvent, builder: &mut BundleBuilder) {
        let counters = &self.shared.counters;
        StoreCounters::add(&counters.events_ingested, 1);

        let SourceEvent {
            entity_id,
            source,
            kind,
        } = event;
        match kind {
            ObservationKind::Set(attributes) => {
                if self.ledger.upsert(&entity_id, &source, attributes) {
                    trace!(entity = %entity_id, source = %source, "entity first observed");
                }
            }
            ObservationKind::Unset => match self.ledger.remove(&entity_id, &source) {
                Removal::NotPresent => {
                    StoreCounters::add(&counters.noops_suppressed, 1);
                    return;
                }
                Removal::LastSource => {
                    trace!(entity = %entity_id, source = %source, "last contributing source withdrew");
                }
                Removal::Removed => {}
            },
        }

        match self.merge.recompute(&self.ledger, &entity_id) {
            MergeOutcome::Unchanged => StoreCounters::add(&counters.noops_suppressed, 1),
            MergeOutcome::Changed(entity) => builder.push(Event::Set { entity, source }),
            MergeOutcome::Removed => builder.push(Event::Unset { id: entity_id, source }),
        }
    }

    fn reset(&mut self, source: SourceId, entities: Vec<(EntityId, Attributes)>, retained: &HashSet<EntityId>) {
        let listed: HashSet<EntityId> = entities.iter().map(|(id, _)| id.clone()).collect();
        let mut builder = BundleBuilder::default();

        for (id, attributes) in entities {
            self.apply(SourceEvent::set(id, source.clone(), attributes), &mut builder);
        }

        let mut stale: Vec<EntityId> = self
            .ledger
            .contributed_by(&source)
            .into_iter()
            .filter(|id| !listed.contains(id) && !retained.contains(id))
            .collect();
        stale.sort();
        let removed = stale.len();
        for id in stale {
            self.apply(SourceEvent::unset(id, source.clone()), &mut builder);
        }

        info!(source = %source, listed = listed.len(), removed, "source reset");
        self.publish(builder);
    }

    fn publish(&mut self, builder: BundleBuilder) {
        if builder.is_empty() {
            return;
        }
        self.generation += 1;
        let generation = self.generation;
        let events = builder.finish();

        {
            let mut view = self.shared.view.write().unwrap_or_else(PoisonError::into_inner);
            for event in events.iter() {
                match event {
                    Event::Set { entity, .. } => {
                        view.insert(entity.id.clone(), Arc::clone(entity));
                    }
                    Event::Unset { id, .. } => {
                        view.remove(id);
                    }
                }
            }
        }
        StoreCounters::add(&self.shared.counters.bundles_generated, 1);

        let subscribers = self.shared.registry.active();
        let mut tiers = BTreeMap::new();
        for sub in &subscribers {
            *tiers.entry(sub.priority).or_insert(0_usize) += 1;
        }
        let gate = PriorityGate::new(tiers);

        for sub in &subscribers {
            let delivery = Delivery::Bundle {
                generation,
                events: Arc::clone(&events),
                slot: Some(gate.slot(sub.priority)),
            };
            // A failed send drops the slot, which releases it.
            if sub.queue_tx.send(delivery).is_err() {
                debug!(subscriber = %sub.name, generation, "subscriber gone before fan-out");
            }
        }
        debug!(generation, events = events.len(), subscribers = subscribers.len(), "bundle generated");
    }

    fn bootstrap(&mut self, handle: &SubscriberHandle) {
        if handle.is_closed() {
            return;
        }
        let ranking = self.merge.ranking();
        let mut entities: Vec<(Arc<Entity>, Vec<SourceId>)> = self
            .merge
            .entities()
            .map(|entity| {
                let mut sources: Vec<&SourceId> = self
                    .ledger
                    .sources(&entity.id)
                    .map(|s| s.keys().collect())
                    .unwrap_or_default();
                ranking.sort(&mut sources);
                (Arc::clone(entity), sources.into_iter().cloned().collect())
            })
            .collect();
        entities.sort_by(|a, b| a.0.id.cmp(&b.0.id));

        let delivery = Delivery::Bootstrap {
            generation: self.generation,
            entities: Arc::new(entities),
        };
        if handle.queue_tx.send(delivery).is_ok() {
            handle.active.store(true, Ordering::Release);
        }
    }

    fn dump(&self) -> StoreDump {
        let mut entities: Vec<EntityDump> = self
            .merge
            .entities()
            .map(|entity| EntityDump {
                merged: entity.as_ref().clone(),
                sources: self.ledger.sources(&entity.id).cloned().unwrap_or_default(),
            })
            .collect();
        entities.sort_by(|a, b| a.merged.id.cmp(&b.merged.id));
        StoreDump {
            generation: self.generation,
            entities,
        }
    }
}
