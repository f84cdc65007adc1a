//! Collector input and subscriber output types.
//!
//! Collectors push [`SourceEvent`]s (one source's view of one entity). The
//! store turns them into [`Event`]s about the merged view and hands them to
//! subscribers in [`EventBundle`]s, each carrying a [`BundleAck`] that gates
//! delivery of the next bundle.

use std::fmt;
use std::sync::Arc;

use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};

use crate::entity::{Attributes, Entity, EntityId};
use crate::source::SourceId;

/// What a source observed about an entity.
#[derive(Debug, Clone, PartialEq)]
pub enum ObservationKind {
    /// The source currently sees the entity with these attributes.
    Set(Attributes),
    /// The source no longer sees the entity.
    Unset,
}

/// One source's observation of one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceEvent {
    pub entity_id: EntityId,
    pub source: SourceId,
    pub kind: ObservationKind,
}

impl SourceEvent {
    #[must_use]
    pub fn set(entity_id: EntityId, source: SourceId, attributes: Attributes) -> Self {
        Self {
            entity_id,
            source,
            kind: ObservationKind::Set(attributes),
        }
    }

    #[must_use]
    pub fn unset(entity_id: EntityId, source: SourceId) -> Self {
        Self {
            entity_id,
            source,
            kind: ObservationKind::Unset,
        }
    }
}

/// Type of a change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Set,
    Unset,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Set => f.write_str("set"),
            Self::Unset => f.write_str("unset"),
        }
    }
}

/// A change to the merged view.
///
/// `Set` carries the full merged snapshot; `Unset` carries only the id of the
/// entity that left the view. Both name the source whose observation caused
/// the recomputation.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Set { entity: Arc<Entity>, source: SourceId },
    Unset { id: EntityId, source: SourceId },
}

impl Event {
    #[must_use]
    pub const fn event_type(&self) -> EventType {
        match self {
            Self::Set { .. } => EventType::Set,
            Self::Unset { .. } => EventType::Unset,
        }
    }

    #[must_use]
    pub fn entity_id(&self) -> &EntityId {
        match self {
            Self::Set { entity, .. } => &entity.id,
            Self::Unset { id, .. } => id,
        }
    }

    /// The merged snapshot, for `Set` events.
    #[must_use]
    pub fn entity(&self) -> Option<&Entity> {
        match self {
            Self::Set { entity, .. } => Some(entity),
            Self::Unset { .. } => None,
        }
    }

    #[must_use]
    pub fn source(&self) -> &SourceId {
        match self {
            Self::Set { source, .. } | Self::Unset { source, .. } => source,
        }
    }
}

/// Acknowledgment handle attached to a delivered bundle.
///
/// The store withholds the subscriber's next bundle until this is released,
/// either explicitly with [`BundleAck::acknowledge`] or by dropping it.
#[derive(Debug)]
pub struct BundleAck {
    tx: Option<Sender<()>>,
}

impl BundleAck {
    pub(crate) fn new(tx: Sender<()>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Signals that the bundle has been fully processed.
    pub fn acknowledge(mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(());
        }
    }
}

/// An ordered batch of change events delivered to one subscriber.
#[derive(Debug)]
pub struct EventBundle {
    generation: u64,
    events: Vec<Event>,
    ack: BundleAck,
}

impl EventBundle {
    pub(crate) fn new(generation: u64, events: Vec<Event>, ack: BundleAck) -> Self {
        Self {
            generation,
            events,
            ack,
        }
    }

    /// Generation of the ingestion cycle that produced this bundle.
    ///
    /// Strictly increasing across the bundles one subscriber receives. The
    /// bootstrap bundle carries the generation it was snapshotted at.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Acknowledges the bundle, releasing the next one for delivery.
    pub fn acknowledge(self) {
        self.ack.acknowledge();
    }

    /// Splits the bundle so events can be consumed before acknowledging.
    #[must_use]
    pub fn into_parts(self) -> (Vec<Event>, BundleAck) {
        (self.events, self.ack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Kind;

    #[test]
    fn event_accessors() {
        let id = EntityId::new(Kind::Container, "c1");
        let set = Event::Set {
            entity: Arc::new(Entity::new(id.clone()).with_attribute("image", "a")),
            source: SourceId::runtime(),
        };
        assert_eq!(set.event_type(), EventType::Set);
        assert_eq!(set.entity_id(), &id);
        assert!(set.entity().is_some());

        let unset = Event::Unset {
            id: id.clone(),
            source: SourceId::runtime(),
        };
        assert_eq!(unset.event_type(), EventType::Unset);
        assert_eq!(unset.entity_id(), &id);
        assert!(unset.entity().is_none());
        assert_eq!(unset.source(), &SourceId::runtime());
    }

    #[test]
    fn acknowledge_signals_channel() {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let bundle = EventBundle::new(7, Vec::new(), BundleAck::new(tx));
        assert_eq!(bundle.generation(), 7);
        assert!(bundle.is_empty());
        bundle.acknowledge();
        assert_eq!(rx.recv(), Ok(()));
    }

    #[test]
    fn dropping_ack_disconnects() {
        let (tx, rx) = crossbeam_channel::bounded::<()>(1);
        let bundle = EventBundle::new(1, Vec::new(), BundleAck::new(tx));
        let (_events, ack) = bundle.into_parts();
        drop(ack);
        assert!(rx.recv().is_err());
    }
}
