//! Typed attribute values.
//!
//! Entity attributes hold strings, numbers, tag sets, timestamps, relations to
//! other entities, or structured JSON for anything richer.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::EntityId;

/// Possible values an attribute can hold.
///
/// `Null` is treated as absent by the merge engine: a source reporting `Null`
/// for a field does not shadow a lower-priority source's value.
///
/// # Examples
///
/// ```
/// use workloadmeta::Value;
///
/// let replicas = Value::Int(3);
/// let image = Value::from("nginx");
/// let tags = Value::tags(["env:prod", "team:web"]);
///
/// assert_eq!(replicas.as_int(), Some(3));
/// assert_eq!(image.as_string(), Some("nginx"));
/// assert!(tags.is_tags());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Tags(BTreeSet<String>),
    Timestamp(DateTime<Utc>),
    Relation(EntityId),
    Structured(serde_json::Value),
    Null,
}

impl Value {
    /// Builds a tag set value.
    #[must_use]
    pub fn tags<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Tags(tags.into_iter().map(Into::into).collect())
    }

    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub const fn is_tags(&self) -> bool {
        matches!(self, Self::Tags(_))
    }

    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub const fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    pub const fn as_tags(&self) -> Option<&BTreeSet<String>> {
        match self {
            Self::Tags(v) => Some(v),
            _ => None,
        }
    }

    pub const fn as_timestamp(&self) -> Option<&DateTime<Utc>> {
        match self {
            Self::Timestamp(v) => Some(v),
            _ => None,
        }
    }

    pub const fn as_relation(&self) -> Option<&EntityId> {
        match self {
            Self::Relation(v) => Some(v),
            _ => None,
        }
    }

    pub const fn as_structured(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Structured(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the type tag used by schemas.
    #[must_use]
    pub const fn value_type(&self) -> ValueType {
        match self {
            Self::Bool(_) => ValueType::Bool,
            Self::Int(_) => ValueType::Int,
            Self::Float(_) => ValueType::Float,
            Self::String(_) => ValueType::String,
            Self::Tags(_) => ValueType::Tags,
            Self::Timestamp(_) => ValueType::Timestamp,
            Self::Relation(_) => ValueType::Relation,
            Self::Structured(_) => ValueType::Structured,
            Self::Null => ValueType::Null,
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::Null
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "{v:?}"),
            Self::Tags(v) => {
                let joined: Vec<&str> = v.iter().map(String::as_str).collect();
                write!(f, "[{}]", joined.join(","))
            }
            Self::Timestamp(v) => write!(f, "{}", v.to_rfc3339()),
            Self::Relation(v) => write!(f, "ref:{v}"),
            Self::Structured(v) => write!(f, "{v}"),
            Self::Null => write!(f, "null"),
        }
    }
}

/// Type tag of a [`Value`], used by attribute schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Bool,
    Int,
    Float,
    String,
    Tags,
    Timestamp,
    Relation,
    Structured,
    Null,
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::String => "string",
            Self::Tags => "tags",
            Self::Timestamp => "timestamp",
            Self::Relation => "relation",
            Self::Structured => "structured",
            Self::Null => "null",
        };
        f.write_str(name)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Timestamp(v)
    }
}

impl From<EntityId> for Value {
    fn from(v: EntityId) -> Self {
        Self::Relation(v)
    }
}

impl From<BTreeSet<String>> for Value {
    fn from(v: BTreeSet<String>) -> Self {
        Self::Tags(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Self::Structured(v)
    }
}
