//! Store and subscriber counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters updated by the ingestion path and the validators.
#[derive(Debug, Default)]
pub(crate) struct StoreCounters {
    pub events_ingested: AtomicU64,
    pub observations_rejected: AtomicU64,
    pub noops_suppressed: AtomicU64,
    pub bundles_generated: AtomicU64,
}

impl StoreCounters {
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self, entities: usize, subscribers: Vec<SubscriberStats>) -> StoreStats {
        StoreStats {
            events_ingested: self.events_ingested.load(Ordering::Relaxed),
            observations_rejected: self.observations_rejected.load(Ordering::Relaxed),
            noops_suppressed: self.noops_suppressed.load(Ordering::Relaxed),
            bundles_generated: self.bundles_generated.load(Ordering::Relaxed),
            entities,
            subscribers,
        }
    }
}

/// Counters kept per subscriber by its delivery task.
#[derive(Debug, Default)]
pub(crate) struct SubscriberCounters {
    pub bundles_delivered: AtomicU64,
    pub events_delivered: AtomicU64,
    pub ack_timeouts: AtomicU64,
}

/// Point-in-time view of one subscriber's counters.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriberStats {
    pub name: String,
    pub priority: String,
    pub bundles_delivered: u64,
    pub events_delivered: u64,
    pub ack_timeouts: u64,
}

impl SubscriberCounters {
    pub fn snapshot(&self, name: &str, priority: &str) -> SubscriberStats {
        SubscriberStats {
            name: name.to_string(),
            priority: priority.to_string(),
            bundles_delivered: self.bundles_delivered.load(Ordering::Relaxed),
            events_delivered: self.events_delivered.load(Ordering::Relaxed),
            ack_timeouts: self.ack_timeouts.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the store's counters.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub events_ingested: u64,
    pub observations_rejected: u64,
    pub noops_suppressed: u64,
    pub bundles_generated: u64,
    pub entities: usize,
    pub subscribers: Vec<SubscriberStats>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reads_counters() {
        let counters = StoreCounters::default();
        StoreCounters::add(&counters.events_ingested, 3);
        StoreCounters::add(&counters.bundles_generated, 1);
        let stats = counters.snapshot(2, Vec::new());
        assert_eq!(stats.events_ingested, 3);
        assert_eq!(stats.bundles_generated, 1);
        assert_eq!(stats.entities, 2);
    }

    #[test]
    fn subscriber_snapshot_serializes() {
        let counters = SubscriberCounters::default();
        counters.ack_timeouts.fetch_add(1, Ordering::Relaxed);
        let stats = counters.snapshot("tagger", "critical");
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["name"], "tagger");
        assert_eq!(json["ack_timeouts"], 1);
    }
}
