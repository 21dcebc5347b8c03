//! Edge operation benchmarks: add throughput and parent/index queries.

use criterion::{criterion_group, criterion_main, Criterion};
use tempfile::tempdir;

use edgestore_core::{EdgeStore, Gid, IndexQuery, IndexSpec, StoreConfig};

fn bench_store(dir: &tempfile::TempDir) -> EdgeStore {
    let mut config = StoreConfig::default();
    config.sharding.hosts = vec![dir.path().to_str().unwrap().to_string()];
    EdgeStore::open(&config).unwrap()
}

fn bench_add(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let store = bench_store(&dir);
    let gid1 = Gid::new(5, 1);
    let mut counter = 2u32;

    c.bench_function("add_edge", |b| {
        b.iter(|| {
            let gid2 = Gid::new(5, counter);
            counter += 1;
            store.add(7, gid1, gid2, 1, b"payload", &[], false).unwrap()
        });
    });
}

fn bench_query_by_parent(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let store = bench_store(&dir);
    let gid1 = Gid::new(5, 1);

    for counter in 2..1002 {
        store
            .add(7, gid1, Gid::new(5, counter), 1, b"payload", &[], false)
            .unwrap();
    }

    c.bench_function("query_1k_by_parent", |b| {
        b.iter(|| store.query(7, None, Some(gid1), None).unwrap());
    });
}

fn bench_query_by_index(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let store = bench_store(&dir);
    let gid1 = Gid::new(5, 1);

    for counter in 2..1002u32 {
        let value = format!("v{counter:06}");
        store
            .add(
                7,
                gid1,
                Gid::new(5, counter),
                1,
                b"payload",
                &[IndexSpec::new(3, value)],
                false,
            )
            .unwrap();
    }

    let range = IndexQuery::new(3, "v000100", "v000200");
    c.bench_function("query_range_by_index", |b| {
        b.iter(|| store.query(7, Some(&range), Some(gid1), None).unwrap());
    });
}

criterion_group!(benches, bench_add, bench_query_by_parent, bench_query_by_index);
criterion_main!(benches);
