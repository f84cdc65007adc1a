//! Explicit wiring of a store and its collectors.
//!
//! There is no global registry of collectors: the embedding process lists
//! them on an [`AgentBuilder`], which starts the store and one thread per
//! collector.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use tracing::{error, info, warn};

use crate::collector::{Collector, StopTrigger};
use crate::config::StoreConfig;
use crate::error::{panic_message, StoreError, StoreResult};
use crate::schema::ObservationValidator;
use crate::store::Store;

/// Collects the pieces of an [`Agent`].
#[derive(Default)]
pub struct AgentBuilder {
    config: StoreConfig,
    validator: ObservationValidator,
    collectors: Vec<Box<dyn Collector>>,
}

impl AgentBuilder {
    #[must_use]
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn validator(mut self, validator: ObservationValidator) -> Self {
        self.validator = validator;
        self
    }

    #[must_use]
    pub fn collector(mut self, collector: impl Collector) -> Self {
        self.collectors.push(Box::new(collector));
        self
    }

    /// Starts the store, then every collector.
    ///
    /// If a collector thread cannot be spawned, the ones already started are
    /// stopped and the error is returned.
    pub fn start(self) -> StoreResult<Agent> {
        let grace = self.config.collector_shutdown_grace();
        let store = Arc::new(Store::with_validator(self.config, self.validator)?);
        let (stop, signal) = StopTrigger::new();

        let mut agent = Agent {
            store,
            stop,
            collectors: Vec::with_capacity(self.collectors.len()),
            grace,
        };

        for mut collector in self.collectors {
            let id = collector.id().to_string();
            let feed = agent.store.feed(collector.source());
            let stop = signal.clone();
            let (done_tx, done_rx) = bounded::<()>(0);
            let thread_id = id.clone();

            let join = thread::Builder::new()
                .name(format!("workloadmeta-collector-{id}"))
                .spawn(move || {
                    let _done = done_tx;
                    match panic::catch_unwind(AssertUnwindSafe(|| collector.run(feed, stop))) {
                        Ok(Ok(())) => info!(collector = %thread_id, "collector stopped"),
                        Ok(Err(err)) => error!(collector = %thread_id, error = %err, "collector failed"),
                        Err(payload) => error!(
                            collector = %thread_id,
                            panic = %panic_message(payload.as_ref()),
                            "collector panicked"
                        ),
                    }
                })
                .map_err(|e| StoreError::Spawn {
                    name: format!("workloadmeta-collector-{id}"),
                    message: e.to_string(),
                })?;

            info!(collector = %id, "collector started");
            agent.collectors.push(CollectorThread { id, join, done_rx });
        }

        Ok(agent)
    }
}

struct CollectorThread {
    id: String,
    join: JoinHandle<()>,
    // Disconnects when the collector thread exits.
    done_rx: Receiver<()>,
}

/// A running store plus its collectors.
pub struct Agent {
    store: Arc<Store>,
    stop: StopTrigger,
    collectors: Vec<CollectorThread>,
    grace: Duration,
}

impl Agent {
    #[must_use]
    pub fn builder(config: StoreConfig) -> AgentBuilder {
        AgentBuilder::new(config)
    }

    #[must_use]
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Number of collectors still running.
    #[must_use]
    pub fn running_collectors(&self) -> usize {
        self.collectors.iter().filter(|c| !c.join.is_finished()).count()
    }

    /// Signals every collector to stop, waits up to the grace period for
    /// them, then shuts the store down. Collectors still running afterwards
    /// are detached; their submissions fail with a disconnection error.
    pub fn shutdown(mut self) {
        self.stop_collectors();
    }

    fn stop_collectors(&mut self) {
        self.stop.stop();
        let deadline = Instant::now() + self.grace;

        for collector in self.collectors.drain(..) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match collector.done_rx.recv_timeout(remaining) {
                Err(RecvTimeoutError::Disconnected) | Ok(()) => {
                    let _ = collector.join.join();
                }
                Err(RecvTimeoutError::Timeout) => {
                    warn!(collector = %collector.id, "collector ignored stop signal; detaching");
                }
            }
        }
        self.store.shutdown();
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        self.stop_collectors();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{CollectorFeed, StopSignal};
    use crate::entity::{Attributes, EntityId, Kind};
    use crate::value::Value;

    struct OneShot;

    impl Collector for OneShot {
        fn id(&self) -> &str {
            "one_shot"
        }

        fn run(&mut self, feed: CollectorFeed, stop: StopSignal) -> StoreResult<()> {
            let mut attrs = Attributes::new();
            attrs.insert("pid".to_string(), Value::Int(1));
            feed.set(EntityId::new(Kind::Process, "1"), attrs)?;
            stop.wait();
            Ok(())
        }
    }

    struct Stubborn;

    impl Collector for Stubborn {
        fn id(&self) -> &str {
            "stubborn"
        }

        fn run(&mut self, _feed: CollectorFeed, _stop: StopSignal) -> StoreResult<()> {
            thread::sleep(Duration::from_millis(500));
            Ok(())
        }
    }

    #[test]
    fn collector_feeds_store_and_stops() {
        let agent = Agent::builder(StoreConfig::default())
            .collector(OneShot)
            .start()
            .unwrap();
        let store = Arc::clone(agent.store());

        let id = EntityId::new(Kind::Process, "1");
        let deadline = Instant::now() + Duration::from_secs(2);
        while store.get_entity(&id).is_err() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(store.get_entity(&id).unwrap().get("pid"), Some(&Value::Int(1)));
        assert_eq!(agent.running_collectors(), 1);

        agent.shutdown();
        assert!(store.sync().unwrap_err().is_disconnected());
    }

    #[test]
    fn shutdown_does_not_wait_past_grace() {
        let config = StoreConfig {
            collector_shutdown_grace_ms: 20,
            ..StoreConfig::default()
        };
        let agent = Agent::builder(config).collector(Stubborn).start().unwrap();
        let started = Instant::now();
        agent.shutdown();
        assert!(started.elapsed() < Duration::from_millis(400));
    }
}
