//! Sources and source precedence.
//!
//! A source is one collector's independent observation stream. Sources have
//! no lifetime beyond "currently contributing" or "absent"; the store only
//! knows them by the id they report under.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies a collector instance ("runtime", "kubelet", "cloud-metadata", ...).
///
/// # Examples
///
/// ```
/// use workloadmeta::SourceId;
///
/// let runtime = SourceId::runtime();
/// assert_eq!(runtime.as_str(), "runtime");
/// assert_eq!(SourceId::new("trivy").to_string(), "trivy");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Container runtime watchers.
    #[must_use]
    pub fn runtime() -> Self {
        Self::new("runtime")
    }

    /// Node-level orchestrator (kubelet, ECS agent).
    #[must_use]
    pub fn node_orchestrator() -> Self {
        Self::new("node_orchestrator")
    }

    /// Cluster-level orchestrator (Kubernetes API server watchers).
    #[must_use]
    pub fn cluster_orchestrator() -> Self {
        Self::new("cluster_orchestrator")
    }

    /// Cloud metadata pollers.
    #[must_use]
    pub fn cloud_metadata() -> Self {
        Self::new("cloud_metadata")
    }

    /// Security probe enrichers.
    #[must_use]
    pub fn security_probe() -> Self {
        Self::new("security_probe")
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for SourceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Total order over sources used by the merge engine.
///
/// Configured sources rank by their position in the list (first is highest).
/// Unknown sources rank below every configured source and tie-break on the
/// source id string, so the order is total and stable.
#[derive(Debug, Clone, Default)]
pub struct SourceRanking {
    positions: HashMap<SourceId, usize>,
}

impl SourceRanking {
    /// Builds a ranking from a highest-first priority list.
    ///
    /// Duplicates keep their first (highest) position.
    #[must_use]
    pub fn new(priorities: impl IntoIterator<Item = SourceId>) -> Self {
        let mut positions = HashMap::new();
        for (idx, source) in priorities.into_iter().enumerate() {
            positions.entry(source).or_insert(idx);
        }
        Self { positions }
    }

    /// Position in the configured list, if configured.
    #[must_use]
    pub fn position(&self, source: &SourceId) -> Option<usize> {
        self.positions.get(source).copied()
    }

    /// Compares two sources, `Ordering::Less` meaning `a` wins over `b`.
    #[must_use]
    pub fn compare(&self, a: &SourceId, b: &SourceId) -> Ordering {
        let rank = |s: &SourceId| self.position(s).unwrap_or(usize::MAX);
        rank(a).cmp(&rank(b)).then_with(|| a.cmp(b))
    }

    /// Sorts sources highest-priority first.
    pub fn sort(&self, sources: &mut [&SourceId]) {
        sources.sort_by(|a, b| self.compare(a, b));
    }
}
