//! Subscriber filters.
//!
//! A [`Filter`] narrows what a subscriber receives by kind, triggering source,
//! event type, and an arbitrary predicate over the merged entity. Unset events
//! carry no attributes, so they are routed by what the subscriber has already
//! been shown instead: see [`FilterState`].

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::entity::{Entity, EntityId, Kind};
use crate::event::{Event, EventType};
use crate::source::SourceId;

/// Predicate over merged entities.
pub type EntityPredicate = Arc<dyn Fn(&Entity) -> bool + Send + Sync>;

/// Which event types a subscriber wants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EventTypeFilter {
    #[default]
    All,
    Set,
    Unset,
}

impl EventTypeFilter {
    #[must_use]
    pub const fn allows(self, event_type: EventType) -> bool {
        matches!(
            (self, event_type),
            (Self::All, _) | (Self::Set, EventType::Set) | (Self::Unset, EventType::Unset)
        )
    }
}

/// Subscriber filter. The default filter matches everything.
///
/// # Examples
///
/// ```
/// use workloadmeta::{Filter, Kind};
///
/// let pods_with_ip = Filter::new()
///     .kinds([Kind::KubernetesPod])
///     .predicate(|e| e.get("ip").is_some());
/// ```
#[derive(Clone, Default)]
pub struct Filter {
    kinds: Option<HashSet<Kind>>,
    source: Option<SourceId>,
    event_type: EventTypeFilter,
    predicate: Option<EntityPredicate>,
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Filter")
            .field("kinds", &self.kinds)
            .field("source", &self.source)
            .field("event_type", &self.event_type)
            .field("predicate", &self.predicate.is_some())
            .finish()
    }
}

impl Filter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts to the given kinds.
    #[must_use]
    pub fn kinds(mut self, kinds: impl IntoIterator<Item = Kind>) -> Self {
        self.kinds = Some(kinds.into_iter().collect());
        self
    }

    /// Restricts Set events to those triggered by `source`.
    #[must_use]
    pub fn source(mut self, source: SourceId) -> Self {
        self.source = Some(source);
        self
    }

    #[must_use]
    pub fn event_type(mut self, event_type: EventTypeFilter) -> Self {
        self.event_type = event_type;
        self
    }

    #[must_use]
    pub fn predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Entity) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    #[must_use]
    pub fn matches_kind(&self, kind: Kind) -> bool {
        self.kinds.as_ref().map_or(true, |k| k.contains(&kind))
    }

    /// Kind and predicate check against a merged entity.
    #[must_use]
    pub fn matches_entity(&self, entity: &Entity) -> bool {
        self.matches_kind(entity.kind()) && self.predicate.as_ref().map_or(true, |p| p(entity))
    }

    fn matches_source<'a>(&self, mut contributing: impl Iterator<Item = &'a SourceId>) -> bool {
        match &self.source {
            None => true,
            Some(wanted) => contributing.any(|s| s == wanted),
        }
    }
}

/// Per-subscriber filtering state.
///
/// Remembers which entities the subscriber has been shown so that Unset events
/// (and entities that stop matching the predicate) reach exactly the
/// subscribers that saw the entity.
#[derive(Debug)]
pub struct FilterState {
    filter: Filter,
    seen: HashSet<EntityId>,
}

impl FilterState {
    #[must_use]
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            seen: HashSet::new(),
        }
    }

    /// Selects the bootstrap events: one Set per matching entity.
    ///
    /// Each entry pairs a merged entity with the sources contributing to it.
    pub fn bootstrap(&mut self, entities: &[(Arc<Entity>, Vec<SourceId>)]) -> Vec<Event> {
        let mut out = Vec::new();
        for (entity, sources) in entities {
            if !self.filter.matches_entity(entity) || !self.filter.matches_source(sources.iter()) {
                continue;
            }
            self.seen.insert(entity.id.clone());
            if self.filter.event_type.allows(EventType::Set) {
                let source = sources.first().cloned().unwrap_or_else(|| SourceId::new(""));
                out.push(Event::Set {
                    entity: Arc::clone(entity),
                    source,
                });
            }
        }
        out
    }

    /// Selects the events of one bundle this subscriber should receive.
    pub fn select(&mut self, events: &[Event]) -> Vec<Event> {
        let mut out = Vec::new();
        for event in events {
            match event {
                Event::Set { entity, source } => {
                    if !self.filter.matches_kind(entity.kind()) {
                        continue;
                    }
                    if !self.filter.matches_source(std::iter::once(source)) {
                        continue;
                    }
                    if self.filter.matches_entity(entity) {
                        self.seen.insert(entity.id.clone());
                        if self.filter.event_type.allows(EventType::Set) {
                            out.push(event.clone());
                        }
                    } else if self.seen.remove(&entity.id) {
                        // Stopped matching: retract what the subscriber saw.
                        if self.filter.event_type.allows(EventType::Unset) {
                            out.push(Event::Unset {
                                id: entity.id.clone(),
                                source: source.clone(),
                            });
                        }
                    }
                }
                Event::Unset { id, .. } => {
                    if self.seen.remove(id) && self.filter.event_type.allows(EventType::Unset) {
                        out.push(event.clone());
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn set(kind: Kind, id: &str, source: &str, fields: &[(&str, Value)]) -> Event {
        let mut entity = Entity::new(EntityId::new(kind, id));
        for (k, v) in fields {
            entity.attributes.insert((*k).to_string(), v.clone());
        }
        Event::Set {
            entity: Arc::new(entity),
            source: SourceId::new(source),
        }
    }

    fn unset(kind: Kind, id: &str, source: &str) -> Event {
        Event::Unset {
            id: EntityId::new(kind, id),
            source: SourceId::new(source),
        }
    }

    #[test]
    fn default_filter_passes_sets_and_seen_unsets() {
        let mut state = FilterState::new(Filter::new());
        let out = state.select(&[
            set(Kind::Container, "c1", "runtime", &[]),
            unset(Kind::Container, "c1", "runtime"),
            unset(Kind::Container, "never-seen", "runtime"),
        ]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].event_type(), EventType::Unset);
    }

    #[test]
    fn kind_filter() {
        let mut state = FilterState::new(Filter::new().kinds([Kind::KubernetesPod]));
        let out = state.select(&[
            set(Kind::Container, "c1", "runtime", &[]),
            set(Kind::KubernetesPod, "p1", "kubelet", &[]),
        ]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].entity_id().kind(), Kind::KubernetesPod);
    }

    #[test]
    fn source_filter_applies_to_sets_but_unsets_follow_seen() {
        let mut state = FilterState::new(Filter::new().source(SourceId::new("kubelet")));
        let out = state.select(&[
            set(Kind::Container, "c1", "runtime", &[]),
            set(Kind::Container, "c2", "kubelet", &[]),
        ]);
        assert_eq!(out.len(), 1);

        let out = state.select(&[
            unset(Kind::Container, "c2", "runtime"),
            unset(Kind::Container, "c1", "runtime"),
        ]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].entity_id().id(), "c2");
    }

    #[test]
    fn predicate_transition_emits_unset() {
        let mut state = FilterState::new(
            Filter::new().predicate(|e| e.get("ready") == Some(&Value::Bool(true))),
        );
        assert!(state
            .select(&[set(Kind::KubernetesPod, "p1", "kubelet", &[("ready", Value::Bool(false))])])
            .is_empty());

        let out = state.select(&[set(Kind::KubernetesPod, "p1", "kubelet", &[("ready", Value::Bool(true))])]);
        assert_eq!(out.len(), 1);

        let out = state.select(&[set(Kind::KubernetesPod, "p1", "kubelet", &[("ready", Value::Bool(false))])]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].event_type(), EventType::Unset);

        // Already retracted: the final unset is not delivered twice.
        assert!(state.select(&[unset(Kind::KubernetesPod, "p1", "kubelet")]).is_empty());
    }

    #[test]
    fn unset_only_subscriber_still_tracks_sets() {
        let mut state = FilterState::new(Filter::new().event_type(EventTypeFilter::Unset));
        assert!(state.select(&[set(Kind::Process, "1", "probe", &[])]).is_empty());
        let out = state.select(&[unset(Kind::Process, "1", "probe")]);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn bootstrap_applies_kind_predicate_and_source() {
        let pod = Arc::new(Entity::new(EntityId::new(Kind::KubernetesPod, "p1")));
        let ctr = Arc::new(Entity::new(EntityId::new(Kind::Container, "c1")));
        let entities = vec![
            (Arc::clone(&pod), vec![SourceId::new("kubelet")]),
            (Arc::clone(&ctr), vec![SourceId::runtime()]),
        ];

        let mut all = FilterState::new(Filter::new());
        assert_eq!(all.bootstrap(&entities).len(), 2);

        let mut kubelet_only = FilterState::new(Filter::new().source(SourceId::new("kubelet")));
        let out = kubelet_only.bootstrap(&entities);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].entity_id(), &pod.id);

        // Bootstrapped entities count as seen.
        let out = kubelet_only.select(&[unset(Kind::KubernetesPod, "p1", "kubelet")]);
        assert_eq!(out.len(), 1);
    }
}
