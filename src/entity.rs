//! Entity types and identity.
//!
//! An entity is a tracked workload resource (container, pod, process,
//! deployment, ...). Its identity is the pair of its [`Kind`] and an id that is
//! unique within that kind. The store holds at most one canonical merged
//! [`Entity`] per [`EntityId`]; references between entities are plain id
//! values, never ownership.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Classification of workload entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    /// A container managed by a container runtime
    Container,
    /// A Kubernetes pod
    KubernetesPod,
    /// A Kubernetes node
    KubernetesNode,
    /// A Kubernetes deployment
    KubernetesDeployment,
    /// An ECS task
    EcsTask,
    /// Image metadata for a container image
    ContainerImageMetadata,
    /// A host process
    Process,
}

impl Kind {
    /// All kinds, in declaration order.
    pub const ALL: [Kind; 7] = [
        Self::Container,
        Self::KubernetesPod,
        Self::KubernetesNode,
        Self::KubernetesDeployment,
        Self::EcsTask,
        Self::ContainerImageMetadata,
        Self::Process,
    ];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Container => "container",
            Self::KubernetesPod => "kubernetes_pod",
            Self::KubernetesNode => "kubernetes_node",
            Self::KubernetesDeployment => "kubernetes_deployment",
            Self::EcsTask => "ecs_task",
            Self::ContainerImageMetadata => "container_image_metadata",
            Self::Process => "process",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable entity identifier: kind plus an id unique within that kind.
///
/// Immutable once created.
///
/// # Examples
///
/// ```
/// use workloadmeta::{EntityId, Kind};
///
/// let id = EntityId::new(Kind::KubernetesDeployment, "d1");
/// assert_eq!(id.to_string(), "kubernetes_deployment://d1");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId {
    kind: Kind,
    id: String,
}

impl EntityId {
    #[must_use]
    pub fn new(kind: Kind, id: impl Into<String>) -> Self {
        Self { kind, id: id.into() }
    }

    #[must_use]
    pub const fn kind(&self) -> Kind {
        self.kind
    }

    /// The id within the kind.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.kind, self.id)
    }
}

/// Attribute fields of an entity, keyed by field name.
///
/// A `BTreeMap` keeps iteration (and therefore serialization and merge
/// output) deterministic.
pub type Attributes = BTreeMap<String, Value>;

/// A workload entity: identity plus its attribute set.
///
/// Equality is by value, so two snapshots with the same id and the same
/// attributes compare equal. The merge engine relies on this to suppress
/// no-op updates.
///
/// # Examples
///
/// ```
/// use workloadmeta::{Entity, EntityId, Kind, Value};
///
/// let entity = Entity::new(EntityId::new(Kind::Container, "c1"))
///     .with_attribute("image", "nginx:1.25");
/// assert_eq!(entity.get("image"), Some(&Value::from("nginx:1.25")));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,

    #[serde(default)]
    pub attributes: Attributes,
}

impl Entity {
    /// Creates an entity with no attributes.
    #[must_use]
    pub fn new(id: EntityId) -> Self {
        Self {
            id,
            attributes: Attributes::new(),
        }
    }

    #[must_use]
    pub fn with_attributes(id: EntityId, attributes: Attributes) -> Self {
        Self { id, attributes }
    }

    /// Builder-style attribute setter.
    #[must_use]
    pub fn with_attribute(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(field.into(), value.into());
        self
    }

    #[must_use]
    pub const fn kind(&self) -> Kind {
        self.id.kind()
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.attributes.get(field)
    }

    /// Ids of every entity this one references through relation attributes.
    #[must_use]
    pub fn relations(&self) -> Vec<&EntityId> {
        self.attributes
            .values()
            .filter_map(Value::as_relation)
            .collect()
    }
}
