//! The workload entity store.
//!
//! [`Store`] is the single entry point: collectors push observations into it,
//! subscribers register with it, and readers query the merged view. Writes go
//! through a dedicated ingestion thread (see `ingest`); delivery to each
//! subscriber runs on its own thread (see `dispatcher`); queries read a
//! shared snapshot map that the ingestion thread updates once per cycle.

mod dispatcher;
mod gate;
mod ingest;
mod registry;
mod subscription;

pub use ingest::{EntityDump, StoreDump};
pub use registry::{Priority, SubscriptionId};
pub use subscription::Subscription;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Sender};
use tracing::{info, warn};

use crate::config::StoreConfig;
use crate::entity::{Attributes, Entity, EntityId, Kind};
use crate::error::{MalformedObservation, StoreError, StoreResult};
use crate::event::{ObservationKind, SourceEvent};
use crate::filter::{Filter, FilterState};
use crate::schema::ObservationValidator;
use crate::source::SourceId;
use crate::stats::{StoreCounters, StoreStats};

use dispatcher::{spawn_delivery, DeliverySettings};
use ingest::{IngestMsg, Ingestor};
use registry::Registry;

/// State shared by the store handle, the ingestion thread and delivery
/// tasks.
#[derive(Debug)]
pub(crate) struct Shared {
    pub view: RwLock<HashMap<EntityId, Arc<Entity>>>,
    pub registry: Arc<Registry>,
    pub counters: StoreCounters,
}

/// Cloneable submission handle onto the ingestion queue.
///
/// Validation happens here, on the caller's thread, so malformed
/// observations never reach the ledger.
#[derive(Debug, Clone)]
pub(crate) struct Ingress {
    tx: Sender<IngestMsg>,
    shared: Arc<Shared>,
    validator: Arc<ObservationValidator>,
}

impl Ingress {
    fn send(&self, msg: IngestMsg) -> StoreResult<()> {
        self.tx
            .send(msg)
            .map_err(|_| StoreError::disconnected("workloadmeta_ingest"))
    }

    fn reject(&self, err: &MalformedObservation) {
        StoreCounters::add(&self.shared.counters.observations_rejected, 1);
        warn!(
            entity = %err.entity_id,
            source = %err.source_id,
            reason = %err.reason,
            "observation rejected"
        );
    }

    /// Validates and enqueues a batch; rejected observations are returned.
    pub fn notify(&self, events: Vec<SourceEvent>) -> StoreResult<Vec<MalformedObservation>> {
        let mut accepted = Vec::with_capacity(events.len());
        let mut rejected = Vec::new();
        for event in events {
            match self.validator.check(&event) {
                Ok(()) => accepted.push(event),
                Err(err) => {
                    self.reject(&err);
                    rejected.push(err);
                }
            }
        }
        if !accepted.is_empty() {
            self.send(IngestMsg::Observations(accepted))?;
        }
        Ok(rejected)
    }

    pub fn apply(&self, event: SourceEvent) -> StoreResult<()> {
        match self.notify(vec![event])?.pop() {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    pub fn reset(
        &self,
        source: &SourceId,
        entities: Vec<(EntityId, Attributes)>,
    ) -> StoreResult<Vec<MalformedObservation>> {
        let mut accepted = Vec::with_capacity(entities.len());
        let mut retained = HashSet::new();
        let mut rejected = Vec::new();
        for (id, attributes) in entities {
            let event = SourceEvent::set(id, source.clone(), attributes);
            if let Err(err) = self.validator.check(&event) {
                self.reject(&err);
                retained.insert(event.entity_id);
                rejected.push(err);
                continue;
            }
            if let ObservationKind::Set(attributes) = event.kind {
                accepted.push((event.entity_id, attributes));
            }
        }
        self.send(IngestMsg::Reset {
            source: source.clone(),
            entities: accepted,
            retained,
        })?;
        Ok(rejected)
    }
}

/// The workload entity store.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use workloadmeta::{Entity, EntityId, Filter, Kind, Priority, SourceId, Store, StoreConfig, Value};
///
/// let store = Store::new(StoreConfig::default()).unwrap();
/// let sub = store.subscribe("example", Priority::Normal, Filter::new()).unwrap();
/// // The first bundle is the (empty) bootstrap snapshot.
/// sub.recv_timeout(Duration::from_secs(1)).unwrap().acknowledge();
///
/// let id = EntityId::new(Kind::KubernetesDeployment, "d1");
/// let attrs = Entity::new(id.clone()).with_attribute("replicas", 3).attributes;
/// store.notify(vec![workloadmeta::SourceEvent::set(id.clone(), SourceId::cluster_orchestrator(), attrs)]).unwrap();
///
/// let bundle = sub.recv_timeout(Duration::from_secs(1)).unwrap();
/// assert_eq!(bundle.events()[0].entity().unwrap().get("replicas"), Some(&Value::Int(3)));
/// bundle.acknowledge();
/// store.shutdown();
/// ```
#[derive(Debug)]
pub struct Store {
    config: StoreConfig,
    shared: Arc<Shared>,
    ingress: Ingress,
    shutdown_tx: Mutex<Option<Sender<()>>>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl Store {
    /// Starts a store with an open schema.
    pub fn new(config: StoreConfig) -> StoreResult<Self> {
        Self::with_validator(config, ObservationValidator::default())
    }

    /// Starts a store that checks every observation with `validator`.
    pub fn with_validator(config: StoreConfig, validator: ObservationValidator) -> StoreResult<Self> {
        config.validate()?;

        let shared = Arc::new(Shared {
            view: RwLock::new(HashMap::new()),
            registry: Arc::new(Registry::new()),
            counters: StoreCounters::default(),
        });
        let (ingest_tx, ingest_rx) = bounded::<IngestMsg>(config.ingest_queue_capacity);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);

        let ingestor = Ingestor::new(Arc::clone(&shared), config.ranking());
        let join = thread::Builder::new()
            .name("workloadmeta-ingest".to_string())
            .spawn(move || ingestor.run(ingest_rx, shutdown_rx))
            .map_err(|e| StoreError::Spawn {
                name: "workloadmeta-ingest".to_string(),
                message: e.to_string(),
            })?;

        info!(
            sources = ?config.source_priorities,
            ack_timeout_ms = ?config.ack_timeout_ms,
            "store started"
        );

        Ok(Self {
            ingress: Ingress {
                tx: ingest_tx,
                shared: Arc::clone(&shared),
                validator: Arc::new(validator),
            },
            config,
            shared,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            join: Mutex::new(Some(join)),
        })
    }

    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub(crate) fn ingress(&self) -> Ingress {
        self.ingress.clone()
    }

    // Collector input

    /// Submits one batch of observations. All resulting changes are
    /// delivered as a single bundle.
    ///
    /// Malformed observations are dropped individually and returned; the
    /// rest of the batch still applies. Blocks only while the ingestion
    /// queue is full.
    pub fn notify(&self, events: Vec<SourceEvent>) -> StoreResult<Vec<MalformedObservation>> {
        self.ingress.notify(events)
    }

    /// Submits a single observation.
    ///
    /// # Errors
    ///
    /// `StoreError::Malformed` if validation rejects it.
    pub fn apply_source_event(&self, entity_id: EntityId, source: SourceId, kind: ObservationKind) -> StoreResult<()> {
        self.ingress.apply(SourceEvent {
            entity_id,
            source,
            kind,
        })
    }

    /// Replaces the complete set of entities `source` contributes, as one
    /// bundle. Rejected entries keep their previous ledger contents.
    pub fn reset(
        &self,
        source: &SourceId,
        entities: Vec<(EntityId, Attributes)>,
    ) -> StoreResult<Vec<MalformedObservation>> {
        self.ingress.reset(source, entities)
    }

    // Subscriptions

    /// Registers a subscriber.
    ///
    /// The returned handle first yields a bootstrap bundle with a Set for
    /// every current entity matching `filter`, then every later change in
    /// order, without gaps or duplicates.
    pub fn subscribe(&self, name: &str, priority: Priority, filter: Filter) -> StoreResult<Subscription> {
        let (bundle_tx, bundle_rx) = bounded(1);
        let settings = DeliverySettings {
            ack_timeout: self.config.ack_timeout(),
            gate_poll_interval: self.config.gate_poll_interval(),
        };
        let registry = Arc::downgrade(&self.shared.registry);
        let handle = self.shared.registry.register(name, priority, |handle, queue_rx, cancel_rx| {
            spawn_delivery(
                handle,
                queue_rx,
                cancel_rx,
                bundle_tx,
                FilterState::new(filter),
                settings,
                registry.clone(),
            )
        })?;

        let subscription = Subscription::new(
            handle.id,
            name.to_string(),
            priority,
            bundle_rx,
            Arc::downgrade(&self.shared.registry),
        );
        // On failure the subscription is dropped, which unregisters it.
        self.ingress.send(IngestMsg::Bootstrap(handle))?;
        Ok(subscription)
    }

    /// Removes a subscriber. Idempotent.
    pub fn unsubscribe(&self, subscription: &Subscription) {
        subscription.unsubscribe();
    }

    // Queries

    fn view(&self) -> StoreResult<std::sync::RwLockReadGuard<'_, HashMap<EntityId, Arc<Entity>>>> {
        self.shared
            .view
            .read()
            .map_err(|_| StoreError::internal("entity view lock poisoned"))
    }

    /// Current merged snapshot of one entity.
    pub fn get_entity(&self, id: &EntityId) -> StoreResult<Arc<Entity>> {
        self.view()?
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound { id: id.clone() })
    }

    /// Entities of `kind`, ordered by id.
    pub fn list_entities(&self, kind: Kind) -> StoreResult<Vec<Arc<Entity>>> {
        self.list_entities_matching(kind, |_| true)
    }

    /// Entities of `kind` accepted by `predicate`, ordered by id.
    pub fn list_entities_matching<F>(&self, kind: Kind, predicate: F) -> StoreResult<Vec<Arc<Entity>>>
    where
        F: Fn(&Entity) -> bool,
    {
        let view = self.view()?;
        let mut out: Vec<Arc<Entity>> = view
            .values()
            .filter(|e| e.kind() == kind && predicate(e))
            .cloned()
            .collect();
        drop(view);
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    /// Every entity, ordered by id.
    pub fn list_all(&self) -> StoreResult<Vec<Arc<Entity>>> {
        let mut out: Vec<Arc<Entity>> = self.view()?.values().cloned().collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    pub fn entity_count(&self) -> StoreResult<usize> {
        Ok(self.view()?.len())
    }

    /// Entities with each source's snapshot, taken on the ingestion thread.
    pub fn dump(&self) -> StoreResult<StoreDump> {
        let (reply_tx, reply_rx) = bounded(1);
        self.ingress.send(IngestMsg::Dump(reply_tx))?;
        reply_rx
            .recv()
            .map_err(|_| StoreError::disconnected("workloadmeta_ingest"))
    }

    /// Waits until every submission made before this call has been applied.
    /// Returns the generation of the last bundle produced.
    pub fn sync(&self) -> StoreResult<u64> {
        let (reply_tx, reply_rx) = bounded(1);
        self.ingress.send(IngestMsg::Barrier(reply_tx))?;
        reply_rx
            .recv()
            .map_err(|_| StoreError::disconnected("workloadmeta_ingest"))
    }

    /// Like [`Store::sync`] but gives up after `timeout`.
    pub fn sync_timeout(&self, timeout: Duration) -> StoreResult<u64> {
        let (reply_tx, reply_rx) = bounded(1);
        self.ingress.send(IngestMsg::Barrier(reply_tx))?;
        reply_rx.recv_timeout(timeout).map_err(|_| StoreError::Timeout {
            duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        })
    }

    pub fn stats(&self) -> StoreStats {
        let entities = self
            .shared
            .view
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        self.shared.counters.snapshot(entities, self.shared.registry.stats())
    }

    /// Stops ingestion and every delivery task. Idempotent.
    ///
    /// Submissions already queued may be discarded. Bundles waiting for
    /// acknowledgment are abandoned; subscriber channels close.
    pub fn shutdown(&self) {
        let shutdown_tx = self
            .shutdown_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(shutdown_tx) = shutdown_tx else {
            return;
        };
        drop(shutdown_tx);

        let join = self.join.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(join) = join {
            let _ = join.join();
        }
        self.shared.registry.close_all();
        info!("store shut down");
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        self.shutdown();
    }
}
