//! Source ledger: each source's last observed snapshot of each entity.
//!
//! Keeping every source's view separately lets the merge engine recompute an
//! entity from scratch whenever any one source changes or retracts.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::entity::{Attributes, EntityId};
use crate::source::SourceId;

/// One source's snapshot of one entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceSnapshot {
    pub attributes: Attributes,
    pub updated_at: DateTime<Utc>,
}

/// Result of removing a `(entity, source)` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// The source had no snapshot for the entity.
    NotPresent,
    /// The snapshot was removed; other sources still contribute.
    Removed,
    /// The snapshot was removed and it was the last one for the entity.
    LastSource,
}

/// Per-entity map from source to that source's snapshot.
///
/// Invariant: at most one snapshot per `(entity, source)`, and an entity with
/// no snapshots is not present at all.
#[derive(Debug, Default)]
pub struct SourceLedger {
    entries: HashMap<EntityId, BTreeMap<SourceId, SourceSnapshot>>,
    by_source: HashMap<SourceId, HashSet<EntityId>>,
}

impl SourceLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Upserts the snapshot for `(id, source)`. Returns true if the entity
    /// was not in the ledger before.
    pub fn upsert(&mut self, id: &EntityId, source: &SourceId, attributes: Attributes) -> bool {
        let snapshot = SourceSnapshot {
            attributes,
            updated_at: Utc::now(),
        };
        let created = !self.entries.contains_key(id);
        self.entries
            .entry(id.clone())
            .or_default()
            .insert(source.clone(), snapshot);
        self.by_source
            .entry(source.clone())
            .or_default()
            .insert(id.clone());
        created
    }

    /// Removes the snapshot for `(id, source)`.
    pub fn remove(&mut self, id: &EntityId, source: &SourceId) -> Removal {
        let Some(sources) = self.entries.get_mut(id) else {
            return Removal::NotPresent;
        };
        if sources.remove(source).is_none() {
            return Removal::NotPresent;
        }

        if let Some(ids) = self.by_source.get_mut(source) {
            ids.remove(id);
            if ids.is_empty() {
                self.by_source.remove(source);
            }
        }

        if sources.is_empty() {
            self.entries.remove(id);
            Removal::LastSource
        } else {
            Removal::Removed
        }
    }

    /// All snapshots for an entity, keyed by source.
    #[must_use]
    pub fn sources(&self, id: &EntityId) -> Option<&BTreeMap<SourceId, SourceSnapshot>> {
        self.entries.get(id)
    }

    #[must_use]
    pub fn snapshot(&self, id: &EntityId, source: &SourceId) -> Option<&SourceSnapshot> {
        self.entries.get(id).and_then(|s| s.get(source))
    }

    /// Entities the source currently contributes to.
    #[must_use]
    pub fn contributed_by(&self, source: &SourceId) -> Vec<EntityId> {
        self.by_source
            .get(source)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn contains(&self, id: &EntityId) -> bool {
        self.entries.contains_key(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Kind;
    use crate::value::Value;

    fn attrs(pairs: &[(&str, &str)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), Value::from(*v)))
            .collect()
    }

    #[test]
    fn upsert_creates_then_updates() {
        let mut ledger = SourceLedger::new();
        let id = EntityId::new(Kind::Container, "c1");
        assert!(ledger.upsert(&id, &SourceId::runtime(), attrs(&[("image", "a")])));
        assert!(!ledger.upsert(&id, &SourceId::runtime(), attrs(&[("image", "b")])));

        let snap = ledger.snapshot(&id, &SourceId::runtime()).unwrap();
        assert_eq!(snap.attributes.get("image"), Some(&Value::from("b")));
        assert_eq!(ledger.sources(&id).unwrap().len(), 1);
    }

    #[test]
    fn remove_reports_last_source() {
        let mut ledger = SourceLedger::new();
        let id = EntityId::new(Kind::Container, "c1");
        ledger.upsert(&id, &SourceId::runtime(), Attributes::new());
        ledger.upsert(&id, &SourceId::new("kubelet"), Attributes::new());

        assert_eq!(ledger.remove(&id, &SourceId::new("nope")), Removal::NotPresent);
        assert_eq!(ledger.remove(&id, &SourceId::runtime()), Removal::Removed);
        assert!(ledger.contains(&id));
        assert_eq!(ledger.remove(&id, &SourceId::new("kubelet")), Removal::LastSource);
        assert!(!ledger.contains(&id));
        assert!(ledger.is_empty());
        assert_eq!(ledger.remove(&id, &SourceId::new("kubelet")), Removal::NotPresent);
    }

    #[test]
    fn contributed_by_tracks_source_index() {
        let mut ledger = SourceLedger::new();
        let a = EntityId::new(Kind::Container, "a");
        let b = EntityId::new(Kind::Container, "b");
        ledger.upsert(&a, &SourceId::runtime(), Attributes::new());
        ledger.upsert(&b, &SourceId::runtime(), Attributes::new());
        ledger.upsert(&b, &SourceId::new("kubelet"), Attributes::new());

        let mut ids = ledger.contributed_by(&SourceId::runtime());
        ids.sort();
        assert_eq!(ids, vec![a.clone(), b.clone()]);

        ledger.remove(&a, &SourceId::runtime());
        ledger.remove(&b, &SourceId::runtime());
        assert!(ledger.contributed_by(&SourceId::runtime()).is_empty());
        assert_eq!(ledger.contributed_by(&SourceId::new("kubelet")), vec![b]);
    }
}
