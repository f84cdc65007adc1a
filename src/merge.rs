//! Merge engine: priority-based combination of all sources for an entity.
//!
//! For each field, the highest-ranked source with a non-null value wins.
//! Entities are always recomputed from the full ledger contents, never
//! patched incrementally, so the merged view is a pure function of the final
//! ledger state regardless of the order observations arrived in.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::entity::{Attributes, Entity, EntityId};
use crate::ledger::{SourceLedger, SourceSnapshot};
use crate::source::{SourceId, SourceRanking};

/// Merges per-source snapshots into one entity.
#[must_use]
pub fn merge_sources(
    id: &EntityId,
    sources: &BTreeMap<SourceId, SourceSnapshot>,
    ranking: &SourceRanking,
) -> Entity {
    let mut ordered: Vec<&SourceId> = sources.keys().collect();
    ranking.sort(&mut ordered);

    let mut attributes = Attributes::new();
    for source in ordered {
        let Some(snapshot) = sources.get(source) else {
            continue;
        };
        for (field, value) in &snapshot.attributes {
            if value.is_null() || attributes.contains_key(field) {
                continue;
            }
            attributes.insert(field.clone(), value.clone());
        }
    }

    Entity::with_attributes(id.clone(), attributes)
}

/// Result of recomputing one entity.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    /// The merged view is identical to the last emitted one.
    Unchanged,
    /// The entity is new or its merged view changed.
    Changed(Arc<Entity>),
    /// The entity has no contributing sources left.
    Removed,
}

/// Holds the last emitted merged view of every entity and detects changes.
#[derive(Debug, Default)]
pub struct MergeEngine {
    ranking: SourceRanking,
    merged: HashMap<EntityId, Arc<Entity>>,
}

impl MergeEngine {
    #[must_use]
    pub fn new(ranking: SourceRanking) -> Self {
        Self {
            ranking,
            merged: HashMap::new(),
        }
    }

    #[must_use]
    pub fn ranking(&self) -> &SourceRanking {
        &self.ranking
    }

    /// Recomputes `id` from the ledger and records the result.
    pub fn recompute(&mut self, ledger: &SourceLedger, id: &EntityId) -> MergeOutcome {
        let Some(sources) = ledger.sources(id) else {
            return if self.merged.remove(id).is_some() {
                MergeOutcome::Removed
            } else {
                MergeOutcome::Unchanged
            };
        };

        let entity = merge_sources(id, sources, &self.ranking);
        if self.merged.get(id).is_some_and(|prev| **prev == entity) {
            return MergeOutcome::Unchanged;
        }

        let entity = Arc::new(entity);
        self.merged.insert(id.clone(), Arc::clone(&entity));
        MergeOutcome::Changed(entity)
    }

    #[must_use]
    pub fn get(&self, id: &EntityId) -> Option<&Arc<Entity>> {
        self.merged.get(id)
    }

    pub fn entities(&self) -> impl Iterator<Item = &Arc<Entity>> {
        self.merged.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.merged.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.merged.is_empty()
    }
}
