use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use criterion::{criterion_group, criterion_main, Criterion, Throughput};

use workloadmeta::{
    merge_sources, Attributes, EntityId, Filter, Kind, MergeEngine, Priority, SourceId, SourceLedger,
    SourceRanking, Store, StoreConfig, Value,
};

fn attrs(seq: i64) -> Attributes {
    let mut a = Attributes::new();
    a.insert("image".to_string(), Value::from("nginx:1.25"));
    a.insert("seq".to_string(), Value::Int(seq));
    a
}

fn bench_merge(c: &mut Criterion) {
    let ranking = SourceRanking::new([
        SourceId::runtime(),
        SourceId::node_orchestrator(),
        SourceId::cluster_orchestrator(),
    ]);
    let id = EntityId::new(Kind::Container, "bench");
    let mut ledger = SourceLedger::new();
    for (i, source) in ["runtime", "node_orchestrator", "cluster_orchestrator", "extra"]
        .into_iter()
        .enumerate()
    {
        let mut a = attrs(i as i64);
        a.insert(format!("only_{source}"), Value::Bool(true));
        ledger.upsert(&id, &SourceId::new(source), a);
    }

    c.bench_function("merge/four_sources", |b| {
        let sources = ledger.sources(&id).map(Clone::clone).unwrap_or_default();
        b.iter(|| merge_sources(&id, &sources, &ranking));
    });

    c.bench_function("merge/recompute_noop", |b| {
        let mut engine = MergeEngine::new(ranking.clone());
        engine.recompute(&ledger, &id);
        b.iter(|| engine.recompute(&ledger, &id));
    });
}

fn bench_ingest_to_delivery(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch");
    group.throughput(Throughput::Elements(1));

    for subscribers in [1_usize, 4] {
        group.bench_function(format!("ingest_to_ack/{subscribers}_subscribers"), |b| {
            b.iter_custom(|iters| {
                let store = Arc::new(Store::new(StoreConfig::default()).expect("store"));
                let subs: Vec<_> = (0..subscribers)
                    .map(|i| {
                        let priority = if i % 2 == 0 { Priority::High } else { Priority::Normal };
                        let sub = store
                            .subscribe(&format!("bench-{i}"), priority, Filter::new())
                            .expect("subscribe");
                        sub.recv_timeout(Duration::from_secs(5)).expect("bootstrap").acknowledge();
                        sub
                    })
                    .collect();

                let consumers: Vec<_> = subs
                    .into_iter()
                    .map(|sub| {
                        thread::spawn(move || {
                            for _ in 0..iters {
                                sub.recv_timeout(Duration::from_secs(5)).expect("bundle").acknowledge();
                            }
                        })
                    })
                    .collect();

                let feed = store.feed(SourceId::runtime());
                let id = EntityId::new(Kind::Container, "bench");
                let start = Instant::now();
                for seq in 0..iters {
                    feed.set(id.clone(), attrs(seq as i64)).expect("set");
                }
                for consumer in consumers {
                    consumer.join().expect("consumer");
                }
                start.elapsed()
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_merge, bench_ingest_to_delivery);
criterion_main!(benches);
