//! Attribute schemas and observation validation.
//!
//! Every collector observation is checked before it is queued for ingestion.
//! A [`Schema`] pins field types per kind (and can close a kind to unknown
//! fields); an optional [`FieldValidator`] supplied at construction time adds
//! deployment-specific rules on top.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::entity::Kind;
use crate::error::MalformedObservation;
use crate::event::{ObservationKind, SourceEvent};
use crate::value::{Value, ValueType};

/// Pluggable per-field validation hook.
///
/// Implemented for any `Fn(&str, &Value) -> Result<(), String>`, so a closure
/// can be injected directly.
pub trait FieldValidator: Send + Sync {
    /// Returns a rejection reason if `value` is not acceptable for `field`.
    fn validate(&self, field: &str, value: &Value) -> Result<(), String>;
}

impl<F> FieldValidator for F
where
    F: Fn(&str, &Value) -> Result<(), String> + Send + Sync,
{
    fn validate(&self, field: &str, value: &Value) -> Result<(), String> {
        self(field, value)
    }
}

/// Accepts only fields whose name starts with one of the given prefixes.
///
/// Used when a reduced collector set can only populate part of the model.
#[derive(Debug, Clone)]
pub struct AllowedFieldPrefixes {
    prefixes: Vec<String>,
    label: String,
}

impl AllowedFieldPrefixes {
    #[must_use]
    pub fn new<I, S>(label: impl Into<String>, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            prefixes: prefixes.into_iter().map(Into::into).collect(),
            label: label.into(),
        }
    }
}

impl FieldValidator for AllowedFieldPrefixes {
    fn validate(&self, field: &str, _value: &Value) -> Result<(), String> {
        if self.prefixes.iter().any(|p| field.starts_with(p.as_str())) {
            Ok(())
        } else {
            Err(format!("{field} is not available with {}", self.label))
        }
    }
}

/// Declared attribute types per kind.
///
/// Kinds without declarations accept any field. Declared fields must carry
/// their declared type (`Null` is always accepted, it means absent). A closed
/// kind additionally rejects undeclared fields.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    fields: HashMap<Kind, HashMap<String, ValueType>>,
    closed: HashSet<Kind>,
}

impl Schema {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares `field` of `kind` to hold values of type `ty`.
    #[must_use]
    pub fn field(mut self, kind: Kind, field: impl Into<String>, ty: ValueType) -> Self {
        self.fields.entry(kind).or_default().insert(field.into(), ty);
        self
    }

    /// Rejects fields of `kind` that were not declared.
    #[must_use]
    pub fn closed(mut self, kind: Kind) -> Self {
        self.closed.insert(kind);
        self
    }

    fn check_field(&self, kind: Kind, field: &str, value: &Value) -> Result<(), String> {
        match self.fields.get(&kind).and_then(|f| f.get(field)) {
            Some(expected) => {
                let actual = value.value_type();
                if actual == *expected || value.is_null() {
                    Ok(())
                } else {
                    Err(format!(
                        "field '{field}' of {kind} expects {expected}, got {actual}"
                    ))
                }
            }
            None if self.closed.contains(&kind) => {
                Err(format!("field '{field}' is not part of the {kind} schema"))
            }
            None => Ok(()),
        }
    }
}

/// Validation applied to every observation before it is queued.
#[derive(Clone, Default)]
pub struct ObservationValidator {
    schema: Schema,
    extra: Option<Arc<dyn FieldValidator>>,
}

impl fmt::Debug for ObservationValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservationValidator")
            .field("schema", &self.schema)
            .field("extra", &self.extra.is_some())
            .finish()
    }
}

impl ObservationValidator {
    #[must_use]
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            extra: None,
        }
    }

    #[must_use]
    pub fn with_field_validator(mut self, validator: Arc<dyn FieldValidator>) -> Self {
        self.extra = Some(validator);
        self
    }

    /// Checks one observation. The whole observation is rejected on the first
    /// offending field.
    pub fn check(&self, event: &SourceEvent) -> Result<(), MalformedObservation> {
        let reject = |reason: String| {
            MalformedObservation::new(event.entity_id.clone(), event.source.clone(), reason)
        };

        if event.entity_id.id().trim().is_empty() {
            return Err(reject("entity id cannot be empty".to_string()));
        }
        if event.source.as_str().trim().is_empty() {
            return Err(reject("source id cannot be empty".to_string()));
        }

        let ObservationKind::Set(attributes) = &event.kind else {
            return Ok(());
        };

        let kind = event.entity_id.kind();
        for (field, value) in attributes {
            if field.trim().is_empty() {
                return Err(reject("attribute name cannot be empty".to_string()));
            }
            if matches!(value, Value::Float(f) if !f.is_finite()) {
                return Err(reject(format!("field '{field}' must be a finite number")));
            }
            self.schema.check_field(kind, field, value).map_err(reject)?;
            if let Some(extra) = &self.extra {
                extra.validate(field, value).map_err(reject)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Attributes, EntityId};
    use crate::source::SourceId;

    fn set(kind: Kind, id: &str, fields: &[(&str, Value)]) -> SourceEvent {
        let attrs: Attributes = fields
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect();
        SourceEvent::set(EntityId::new(kind, id), SourceId::runtime(), attrs)
    }

    #[test]
    fn open_schema_accepts_anything() {
        let v = ObservationValidator::default();
        let ev = set(Kind::Container, "c1", &[("image", Value::from("a")), ("x", Value::Int(1))]);
        assert!(v.check(&ev).is_ok());
    }

    #[test]
    fn rejects_empty_ids_and_field_names() {
        let v = ObservationValidator::default();
        assert!(v.check(&set(Kind::Container, " ", &[])).is_err());
        let err = v
            .check(&set(Kind::Container, "c1", &[("", Value::Int(1))]))
            .unwrap_err();
        assert!(err.reason.contains("attribute name"));

        let ev = SourceEvent::unset(EntityId::new(Kind::Container, "c1"), SourceId::new(""));
        assert!(v.check(&ev).is_err());
    }

    #[test]
    fn declared_field_type_is_enforced() {
        let schema = Schema::new().field(Kind::KubernetesDeployment, "replicas", ValueType::Int);
        let v = ObservationValidator::new(schema);

        assert!(v
            .check(&set(Kind::KubernetesDeployment, "d1", &[("replicas", Value::Int(3))]))
            .is_ok());
        assert!(v
            .check(&set(Kind::KubernetesDeployment, "d1", &[("replicas", Value::Null)]))
            .is_ok());

        let err = v
            .check(&set(Kind::KubernetesDeployment, "d1", &[("replicas", Value::from("3"))]))
            .unwrap_err();
        assert!(err.reason.contains("expects int"));
    }

    #[test]
    fn closed_kind_rejects_unknown_fields() {
        let schema = Schema::new()
            .field(Kind::Process, "pid", ValueType::Int)
            .closed(Kind::Process);
        let v = ObservationValidator::new(schema);
        assert!(v.check(&set(Kind::Process, "1", &[("pid", Value::Int(1))])).is_ok());
        assert!(v.check(&set(Kind::Process, "1", &[("cmdline", Value::from("sh"))])).is_err());
        // Other kinds stay open.
        assert!(v.check(&set(Kind::Container, "c", &[("cmdline", Value::from("sh"))])).is_ok());
    }

    #[test]
    fn injected_prefix_validator() {
        let allowed = AllowedFieldPrefixes::new(
            "the reduced probe",
            ["exec.", "exit.", "open.", "process.", "container."],
        );
        let v = ObservationValidator::default().with_field_validator(Arc::new(allowed));
        assert!(v
            .check(&set(Kind::Process, "1", &[("process.file.path", Value::from("/bin/sh"))]))
            .is_ok());
        let err = v
            .check(&set(Kind::Process, "1", &[("network.device", Value::from("eth0"))]))
            .unwrap_err();
        assert!(err.reason.contains("not available"));
    }

    #[test]
    fn injected_closure_validator() {
        let v = ObservationValidator::default().with_field_validator(Arc::new(
            |field: &str, value: &Value| {
                if field == "replicas" && value.as_int().is_some_and(|n| n < 0) {
                    Err("replicas cannot be negative".to_string())
                } else {
                    Ok(())
                }
            },
        ));
        assert!(v
            .check(&set(Kind::KubernetesDeployment, "d", &[("replicas", Value::Int(-1))]))
            .is_err());
        assert!(v
            .check(&set(Kind::KubernetesDeployment, "d", &[("replicas", Value::Int(2))]))
            .is_ok());
    }

    #[test]
    fn non_finite_floats_are_rejected() {
        let v = ObservationValidator::default();
        for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let err = v
                .check(&set(Kind::Container, "c1", &[("cpu", Value::Float(bad))]))
                .unwrap_err();
            assert!(err.reason.contains("cpu"));
        }
        assert!(v
            .check(&set(Kind::Container, "c1", &[("cpu", Value::Float(0.5))]))
            .is_ok());
    }

    #[test]
    fn unset_skips_field_checks() {
        let schema = Schema::new().closed(Kind::Container);
        let v = ObservationValidator::new(schema);
        let ev = SourceEvent::unset(EntityId::new(Kind::Container, "c1"), SourceId::runtime());
        assert!(v.check(&ev).is_ok());
    }
}
