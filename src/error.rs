//! Error types for the workload entity store.
//!
//! All errors are strongly typed using thiserror so callers can match on the
//! specific condition (a rejected observation, a duplicate subscriber, a store
//! that has already shut down) instead of parsing messages.

use thiserror::Error;

use crate::entity::EntityId;
use crate::source::SourceId;

/// A collector observation that was rejected before it reached the ledger.
///
/// The ledger entry for `(entity_id, source)` is left untouched and the
/// observation is dropped as a whole; it never partially applies.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Malformed observation for {entity_id} from source '{source_id}': {reason}")]
pub struct MalformedObservation {
    pub entity_id: EntityId,
    pub source_id: SourceId,
    pub reason: String,
}

impl MalformedObservation {
    #[must_use]
    pub fn new(entity_id: EntityId, source_id: SourceId, reason: impl Into<String>) -> Self {
        Self {
            entity_id,
            source_id,
            reason: reason.into(),
        }
    }
}

/// Invalid store configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {message}")]
    Read { path: String, message: String },

    #[error("Failed to parse config: {message}")]
    Parse { message: String },

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Top-level error type for the store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}")]
    Malformed(#[from] MalformedObservation),

    #[error("Subscriber '{name}' is already registered")]
    DuplicateSubscriber { name: String },

    #[error("Entity not found: {id}")]
    NotFound { id: EntityId },

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Channel disconnected: {path}")]
    Disconnected { path: String },

    #[error("Timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    #[error("Failed to spawn thread '{name}': {message}")]
    Spawn { name: String, message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl StoreError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub(crate) fn disconnected(path: impl Into<String>) -> Self {
        Self::Disconnected { path: path.into() }
    }

    #[must_use]
    pub const fn is_malformed(&self) -> bool {
        matches!(self, Self::Malformed(_))
    }

    #[must_use]
    pub const fn is_duplicate_subscriber(&self) -> bool {
        matches!(self, Self::DuplicateSubscriber { .. })
    }

    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true if the store (or a stream) has shut down.
    #[must_use]
    pub const fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected { .. })
    }
}

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Renders a caught panic payload for logging.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Kind;

    #[test]
    fn malformed_observation_names_entity_and_source() {
        let err = MalformedObservation::new(
            EntityId::new(Kind::Container, "c1"),
            SourceId::new("runtime"),
            "empty field name",
        );
        let msg = err.to_string();
        assert!(msg.contains("container://c1"));
        assert!(msg.contains("runtime"));
        assert!(msg.contains("empty field name"));
        assert_eq!(err.source_id, SourceId::new("runtime"));
        // The reporting source is data, not an underlying cause.
        assert!(std::error::Error::source(&err).is_none());
    }

    #[test]
    fn store_error_from_malformed() {
        let err: StoreError = MalformedObservation::new(
            EntityId::new(Kind::Process, "42"),
            SourceId::new("probe"),
            "bad",
        )
        .into();
        assert!(err.is_malformed());
        assert!(!err.is_not_found());
    }

    #[test]
    fn store_error_predicates() {
        let dup = StoreError::DuplicateSubscriber {
            name: "tagger".to_string(),
        };
        assert!(dup.is_duplicate_subscriber());
        assert!(dup.to_string().contains("tagger"));

        let nf = StoreError::NotFound {
            id: EntityId::new(Kind::KubernetesPod, "p"),
        };
        assert!(nf.is_not_found());

        let dc = StoreError::disconnected("ingest");
        assert!(dc.is_disconnected());
        assert!(dc.to_string().contains("ingest"));
    }

    #[test]
    fn config_error_wraps() {
        let err: StoreError = ConfigError::InvalidValue {
            field: "ingest_queue_capacity".to_string(),
            reason: "must be > 0".to_string(),
        }
        .into();
        assert!(err.to_string().contains("ingest_queue_capacity"));
    }
}
