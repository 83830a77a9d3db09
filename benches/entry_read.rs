use criterion::{criterion_group, criterion_main, Criterion};
use horizon_cache::{Entry, RefreshConfig, Registry};
use std::hint::black_box;
use std::time::Duration;
use tokio::runtime::Runtime;

fn bench_entry_hit(c: &mut Criterion) {
    let rt = Runtime::new().expect("build runtime");
    let entry = rt.block_on(async {
        let entry = Entry::builder(RefreshConfig::new(Duration::from_secs(3600)))
            .regenerate(|_| async { Ok(vec![0u8; 256]) })
            .build()
            .expect("build entry");
        entry.get().await.expect("prime entry");
        entry
    });

    let entry = &entry;
    c.bench_function("entry/get_fresh", |b| {
        b.to_async(&rt).iter(|| async move {
            let lookup = entry.get().await.expect("read");
            black_box(lookup.is_fresh());
        });
    });
}

fn bench_registry_hit(c: &mut Criterion) {
    let rt = Runtime::new().expect("build runtime");
    let registry = rt.block_on(async {
        let registry = Registry::builder("bench", RefreshConfig::new(Duration::from_secs(3600)))
            .regenerate(|id: u64, _| async move { Ok(id * 2) })
            .build()
            .expect("build registry");
        for id in 0..1024u64 {
            registry.fetch(&id).await.expect("prime registry");
        }
        registry
    });

    let mut id = 0u64;
    c.bench_function("registry/fetch_fresh", |b| {
        b.to_async(&rt).iter(|| {
            id = (id + 1) % 1024;
            let key = id;
            let registry = &registry;
            async move {
                let lookup = registry.fetch(black_box(&key)).await.expect("read");
                black_box(lookup.cloned());
            }
        });
    });
}

criterion_group!(benches, bench_entry_hit, bench_registry_hit);
criterion_main!(benches);
