//! Registry store benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use regdb_bench::{generate_names, random_data};
use regdb_core::{Config, RegistryStore, SubkeyList, ValueData, ValueList};
use tempfile::TempDir;

const PARENT: &str = r"HKLM\SOFTWARE\Bench";

/// Benchmark replacing a subkey list, which adds and removes children.
fn bench_store_subkeys(c: &mut Criterion) {
    let mut group = c.benchmark_group("store_subkeys");

    for count in [10, 100].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let store = RegistryStore::open_in_memory(Config::default()).unwrap();
            let lists = [
                SubkeyList::from_names(generate_names(count)),
                SubkeyList::from_names(generate_names(count)),
            ];
            let mut turn = 0;

            b.iter(|| {
                turn ^= 1;
                store
                    .store_subkeys(PARENT, black_box(&lists[turn]))
                    .unwrap();
            });
        });
    }
    group.finish();
}

/// Benchmark reading a subkey list that does not change.
fn bench_fetch_subkeys(c: &mut Criterion) {
    let store = RegistryStore::open_in_memory(Config::default()).unwrap();
    store
        .store_subkeys(PARENT, &SubkeyList::from_names(generate_names(100)))
        .unwrap();

    c.bench_function("fetch_subkeys_100", |b| {
        b.iter(|| black_box(store.fetch_subkeys(black_box(PARENT)).unwrap()));
    });
}

/// Benchmark value writes on an on-disk database, with and without sync.
fn bench_store_values(c: &mut Criterion) {
    let mut group = c.benchmark_group("store_values");
    group.sample_size(20);

    for sync in [false, true] {
        group.bench_with_input(BenchmarkId::new("sync", sync), &sync, |b, &sync| {
            let dir = TempDir::new().unwrap();
            let config = Config::default().sync_on_commit(sync);
            let store = RegistryStore::open(&dir.path().join("registry.db"), config).unwrap();
            let mut counter = 0u32;

            b.iter(|| {
                counter = counter.wrapping_add(1);
                let mut values = ValueList::new();
                values.set("Counter", &ValueData::Dword(counter));
                values.set("Blob", &ValueData::Binary(random_data(64)));
                store.store_values(PARENT, black_box(&values)).unwrap();
            });
        });
    }
    group.finish();
}

/// Benchmark a second handle catching up with another handle's commits.
fn bench_catch_up(c: &mut Criterion) {
    c.bench_function("catch_up_10_commits", |b| {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("registry.db");
        let config = Config::default().sync_on_commit(false);
        let writer = RegistryStore::open(&path, config.clone()).unwrap();
        let reader = RegistryStore::open(&path, config).unwrap();
        let mut counter = 0u32;

        b.iter(|| {
            for _ in 0..10 {
                counter = counter.wrapping_add(1);
                let mut values = ValueList::new();
                values.set("Counter", &ValueData::Dword(counter));
                writer.store_values(PARENT, &values).unwrap();
            }
            black_box(reader.fetch_values(PARENT).unwrap());
        });
    });
}

criterion_group!(
    benches,
    bench_store_subkeys,
    bench_fetch_subkeys,
    bench_store_values,
    bench_catch_up,
);

criterion_main!(benches);
