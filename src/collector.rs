//! Collector contract.
//!
//! A collector watches one external system and reports what it sees as a
//! single source. It runs on its own thread, pushes observations through a
//! [`CollectorFeed`], and returns once its [`StopSignal`] fires.

use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::entity::{Attributes, EntityId};
use crate::error::{MalformedObservation, StoreResult};
use crate::event::{ObservationKind, SourceEvent};
use crate::source::SourceId;
use crate::store::{Ingress, Store};

/// A producer of observations for one source.
pub trait Collector: Send + 'static {
    /// Stable collector name, used for its thread and in logs.
    fn id(&self) -> &str;

    /// Source the collector reports as. Defaults to its id.
    fn source(&self) -> SourceId {
        SourceId::new(self.id())
    }

    /// Runs until `stop` fires. A returned error is logged; the ledger keeps
    /// whatever the collector already reported.
    fn run(&mut self, feed: CollectorFeed, stop: StopSignal) -> StoreResult<()>;
}

/// Source-bound handle for pushing observations into a store.
#[derive(Debug, Clone)]
pub struct CollectorFeed {
    source: SourceId,
    ingress: Ingress,
}

impl CollectorFeed {
    pub(crate) fn new(source: SourceId, ingress: Ingress) -> Self {
        Self { source, ingress }
    }

    #[must_use]
    pub fn source(&self) -> &SourceId {
        &self.source
    }

    /// Reports the entity as currently seen with `attributes`.
    pub fn set(&self, id: EntityId, attributes: Attributes) -> StoreResult<()> {
        self.ingress.apply(SourceEvent::set(id, self.source.clone(), attributes))
    }

    /// Reports the entity as no longer seen.
    pub fn unset(&self, id: EntityId) -> StoreResult<()> {
        self.ingress.apply(SourceEvent::unset(id, self.source.clone()))
    }

    /// Reports several changes as one batch (one bundle downstream).
    pub fn notify(&self, changes: Vec<(EntityId, ObservationKind)>) -> StoreResult<Vec<MalformedObservation>> {
        let events = changes
            .into_iter()
            .map(|(entity_id, kind)| SourceEvent {
                entity_id,
                source: self.source.clone(),
                kind,
            })
            .collect();
        self.ingress.notify(events)
    }

    /// Replaces everything this source reports with `entities`.
    pub fn reset(&self, entities: Vec<(EntityId, Attributes)>) -> StoreResult<Vec<MalformedObservation>> {
        self.ingress.reset(&self.source, entities)
    }
}

impl Store {
    /// A feed that submits observations as `source`.
    #[must_use]
    pub fn feed(&self, source: SourceId) -> CollectorFeed {
        CollectorFeed::new(source, self.ingress())
    }
}

/// Fires once, when its [`StopTrigger`] is dropped or triggered.
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: Receiver<()>,
}

impl StopSignal {
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Sleeps up to `timeout`, waking early on stop. Returns true if stopped.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        matches!(self.rx.recv_timeout(timeout), Err(RecvTimeoutError::Disconnected))
    }

    /// Blocks until stopped.
    pub fn wait(&self) {
        while self.rx.recv().is_ok() {}
    }

    /// The underlying channel, for use in `select!`. It disconnects on stop.
    #[must_use]
    pub fn receiver(&self) -> &Receiver<()> {
        &self.rx
    }
}

/// Owner side of a [`StopSignal`].
#[derive(Debug)]
pub struct StopTrigger {
    tx: Option<Sender<()>>,
}

impl StopTrigger {
    #[must_use]
    pub fn new() -> (Self, StopSignal) {
        let (tx, rx) = crossbeam_channel::bounded(0);
        (Self { tx: Some(tx) }, StopSignal { rx })
    }

    pub fn stop(&mut self) {
        self.tx.take();
    }
}
