//! Benchmarks for snapshot collection and exposition encoding

use std::collections::HashMap;
use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use smt_stats::host::{ContainerItems, GameData, ProductBatch, ProductListing};
use smt_stats::{HostSnapshot, MetricSource, SharedHost, SnapshotCollector, StoreMetrics};

/// A store with `products` products spread over every container category
fn generate_store(products: i32, shelves: usize) -> HostSnapshot {
    let mut snapshot = HostSnapshot::empty_store();
    for id in 0..products {
        snapshot = snapshot.with_product_name(id, format!("Product {}", id));
    }
    snapshot.game_data = Some(GameData {
        funds: 12_500.0,
        franchise_experience: 800.0,
        franchise_points: 4.0,
        supermarket_open: true,
    });
    snapshot.product_listing = Some(ProductListing {
        available_products: (0..products).collect(),
        player_prices: (0..products)
            .map(|id| (id, 1.5 + f64::from(id) * 0.25))
            .collect::<HashMap<_, _>>(),
    });

    let slots: Vec<Vec<i32>> = (0..shelves)
        .map(|shelf| {
            (0..4)
                .flat_map(|slot| [(shelf as i32 * 4 + slot) % products, 8])
                .collect()
        })
        .collect();
    snapshot.container_mut("Shelves").unwrap().items = ContainerItems::Slots(slots.clone());
    snapshot.container_mut("StorageShelves").unwrap().items = ContainerItems::Slots(slots);
    snapshot.container_mut("Boxes").unwrap().items = ContainerItems::Boxes(
        (0..shelves as i32)
            .map(|i| ProductBatch::new(i % products, 12))
            .collect(),
    );
    snapshot.employees = Some((0..10).map(|i| Some(ProductBatch::new(i % products, 6))).collect());
    snapshot.players = Some(vec![None, Some(ProductBatch::new(0, 4))]);
    snapshot
}

fn bench_collection(c: &mut Criterion) {
    let mut group = c.benchmark_group("collection");

    for shelves in [10usize, 100, 1000] {
        let host = Arc::new(SharedHost::new(generate_store(150, shelves)));
        let metrics = Arc::new(StoreMetrics::new().unwrap());
        let collector = SnapshotCollector::new(host, metrics);

        // Warm up the series set
        collector.collect();

        group.throughput(Throughput::Elements(shelves as u64));
        group.bench_with_input(BenchmarkId::new("collect", shelves), &collector, |b, collector| {
            b.iter(|| black_box(collector.collect()))
        });
    }

    group.finish();
}

fn bench_scrape(c: &mut Criterion) {
    let mut group = c.benchmark_group("scrape");

    let host = Arc::new(SharedHost::new(generate_store(150, 200)));
    let metrics = Arc::new(StoreMetrics::new().unwrap());
    let collector = SnapshotCollector::new(host, metrics);
    collector.collect();

    group.bench_function("gather_and_encode", |b| {
        b.iter(|| {
            let families = collector.gather();
            black_box(StoreMetrics::encode(&families).unwrap())
        })
    });

    group.finish();
}

criterion_group!(benches, bench_collection, bench_scrape);

criterion_main!(benches);
