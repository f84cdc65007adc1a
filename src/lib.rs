//! # workloadmeta - Workload Entity Store
//!
//! An in-process store that merges what several independent sources report
//! about running workloads (containers, pods, nodes, tasks, processes) into
//! one authoritative view per entity, and streams every change to
//! subscribers in acknowledged, ordered bundles.
//!
//! ## Core Concepts
//!
//! - **Source**: one observer (container runtime, node orchestrator, cloud
//!   metadata, ...) with a rank in a configured precedence order
//! - **Ledger**: every source's last snapshot of every entity
//! - **Merge**: per field, the highest-ranked source with a value wins
//! - **Bundle**: the changes of one ingestion cycle, delivered to each
//!   subscriber after higher-priority subscribers acknowledged it
//!
//! ## Usage
//!
//! ```rust
//! use std::time::Duration;
//! use workloadmeta::{Attributes, EntityId, Filter, Kind, Priority, SourceId, Store, StoreConfig, Value};
//!
//! let store = Store::new(StoreConfig::default())?;
//! let pods = store.subscribe("pod-watcher", Priority::High, Filter::new().kinds([Kind::KubernetesPod]))?;
//! pods.recv_timeout(Duration::from_secs(1))?.acknowledge(); // bootstrap
//!
//! let kubelet = store.feed(SourceId::node_orchestrator());
//! let mut attrs = Attributes::new();
//! attrs.insert("phase".to_string(), Value::from("Running"));
//! kubelet.set(EntityId::new(Kind::KubernetesPod, "web-0"), attrs)?;
//!
//! let bundle = pods.recv_timeout(Duration::from_secs(1))?;
//! assert_eq!(bundle.len(), 1);
//! bundle.acknowledge();
//! # Ok::<(), workloadmeta::StoreError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Data model
pub mod entity;
pub mod event;
pub mod source;
pub mod value;

// Ingestion pipeline
pub mod ledger;
pub mod merge;
pub mod schema;

// Store, delivery and collectors
pub mod bootstrap;
pub mod collector;
pub mod filter;
pub mod store;

pub mod config;
pub mod error;
pub mod stats;

// Re-export primary types at crate root for convenience
pub use bootstrap::{Agent, AgentBuilder};
pub use collector::{Collector, CollectorFeed, StopSignal, StopTrigger};
pub use config::StoreConfig;
pub use entity::{Attributes, Entity, EntityId, Kind};
pub use error::{ConfigError, MalformedObservation, StoreError, StoreResult};
pub use event::{BundleAck, Event, EventBundle, EventType, ObservationKind, SourceEvent};
pub use filter::{EntityPredicate, EventTypeFilter, Filter};
pub use ledger::{SourceLedger, SourceSnapshot};
pub use merge::{merge_sources, MergeEngine, MergeOutcome};
pub use schema::{AllowedFieldPrefixes, FieldValidator, ObservationValidator, Schema};
pub use source::{SourceId, SourceRanking};
pub use stats::{StoreStats, SubscriberStats};
pub use store::{EntityDump, Priority, Store, StoreDump, Subscription, SubscriptionId};
pub use value::{Value, ValueType};
