//! Store configuration.
//!
//! Plain struct with defaults, loadable from TOML:
//!
//! ```toml
//! source_priorities = ["runtime", "node_orchestrator", "cluster_orchestrator"]
//! ingest_queue_capacity = 4096
//! ack_timeout_ms = 1000
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::source::{SourceId, SourceRanking};

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Source precedence for the merge, highest first.
    pub source_priorities: Vec<SourceId>,
    /// Max queued collector submissions before collectors block.
    pub ingest_queue_capacity: usize,
    /// How long a subscriber may hold a bundle before lower tiers stop
    /// waiting for it. `None` waits indefinitely.
    pub ack_timeout_ms: Option<u64>,
    /// How often a delivery task blocked on the priority gate rechecks
    /// whether it was unsubscribed.
    pub gate_poll_interval_ms: u64,
    /// How long shutdown waits for collectors to honor the stop signal.
    pub collector_shutdown_grace_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            source_priorities: vec![
                SourceId::runtime(),
                SourceId::node_orchestrator(),
                SourceId::cluster_orchestrator(),
                SourceId::security_probe(),
                SourceId::cloud_metadata(),
            ],
            ingest_queue_capacity: 4096,
            ack_timeout_ms: None,
            gate_poll_interval_ms: 50,
            collector_shutdown_grace_ms: 2000,
        }
    }
}

impl StoreConfig {
    /// Parses and validates a TOML document. Missing keys take defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let cfg: Self = toml::from_str(text).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reads, parses, and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ingest_queue_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "ingest_queue_capacity".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.gate_poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "gate_poll_interval_ms".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.ack_timeout_ms == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "ack_timeout_ms".to_string(),
                reason: "use no value to disable the timeout".to_string(),
            });
        }
        if let Some(empty) = self.source_priorities.iter().find(|s| s.as_str().trim().is_empty()) {
            return Err(ConfigError::InvalidValue {
                field: "source_priorities".to_string(),
                reason: format!("empty source id '{empty}'"),
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn ranking(&self) -> SourceRanking {
        SourceRanking::new(self.source_priorities.iter().cloned())
    }

    #[must_use]
    pub fn ack_timeout(&self) -> Option<Duration> {
        self.ack_timeout_ms.map(Duration::from_millis)
    }

    #[must_use]
    pub fn gate_poll_interval(&self) -> Duration {
        Duration::from_millis(self.gate_poll_interval_ms.max(1))
    }

    #[must_use]
    pub fn collector_shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.collector_shutdown_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let cfg = StoreConfig::default();
        assert!(cfg.validate().is_ok());
        assert!(cfg.ack_timeout().is_none());
        assert_eq!(cfg.ranking().position(&SourceId::runtime()), Some(0));
    }

    #[test]
    fn parses_partial_toml() {
        let cfg = StoreConfig::from_toml_str(
            r#"
            source_priorities = ["runtime", "kubelet"]
            ack_timeout_ms = 250
            "#,
        )
        .unwrap();
        assert_eq!(cfg.source_priorities, vec![SourceId::runtime(), SourceId::new("kubelet")]);
        assert_eq!(cfg.ack_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(cfg.ingest_queue_capacity, 4096);
    }

    #[test]
    fn rejects_unknown_keys_and_bad_values() {
        assert!(matches!(
            StoreConfig::from_toml_str("bogus = 1"),
            Err(ConfigError::Parse { .. })
        ));
        assert!(matches!(
            StoreConfig::from_toml_str("ingest_queue_capacity = 0"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            StoreConfig::from_toml_str("ack_timeout_ms = 0"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            StoreConfig::from_toml_str(r#"source_priorities = [""]"#),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workloadmeta.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "source_priorities = [\"cloud_metadata\"]").unwrap();
        writeln!(file, "gate_poll_interval_ms = 10").unwrap();
        drop(file);

        let cfg = StoreConfig::load(&path).unwrap();
        assert_eq!(cfg.source_priorities, vec![SourceId::cloud_metadata()]);
        assert_eq!(cfg.gate_poll_interval(), Duration::from_millis(10));

        let missing = StoreConfig::load(dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Read { .. }));
    }
}
