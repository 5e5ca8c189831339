//! Snapshot collector.
//!
//! Runs once per collection cycle, right before a channel serializes the
//! registry. Each cycle recomputes every level metric from the host graph;
//! nothing is carried over from the previous cycle except the set of series
//! that already exist, which are zeroed before new values are written.

use std::collections::{BTreeMap, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use prometheus::proto::MetricFamily;
use tracing::{debug, error, warn};

use crate::error::{Result, StatsError};
use crate::exposition::MetricSource;
use crate::host::{
    product_name, ContainerItems, HostGraphReader, ProductBatch, BOXES_LOCATION,
    CONTAINER_CATEGORY_COUNT,
};
use crate::metrics::{zero_all_series, StoreMetrics};

/// Outcome of each step of one collection cycle
#[derive(Debug)]
pub struct CollectReport {
    /// Funds, franchise and open/closed gauges
    pub general: Result<()>,
    /// Per-product price gauge
    pub prices: Result<()>,
    /// Per-location product counts
    pub counts: Result<()>,
}

impl CollectReport {
    /// Whether every step completed
    pub fn is_complete(&self) -> bool {
        self.general.is_ok() && self.prices.is_ok() && self.counts.is_ok()
    }
}

/// Walks the host graph and writes level metrics.
pub struct SnapshotCollector {
    host: Arc<dyn HostGraphReader>,
    metrics: Arc<StoreMetrics>,
    /// Serializes cycles from the pull and push workers
    cycle: Mutex<()>,
    cycles: AtomicU64,
}

impl SnapshotCollector {
    pub fn new(host: Arc<dyn HostGraphReader>, metrics: Arc<StoreMetrics>) -> Self {
        Self {
            host,
            metrics,
            cycle: Mutex::new(()),
            cycles: AtomicU64::new(0),
        }
    }

    /// Metrics this collector writes into
    pub fn metrics(&self) -> &Arc<StoreMetrics> {
        &self.metrics
    }

    /// Number of cycles run so far
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::SeqCst)
    }

    /// Run one collection cycle.
    ///
    /// Steps are independent: a missing host object, a structural mismatch
    /// or a panic inside the host reader only skips the step it happened in.
    pub fn collect(&self) -> CollectReport {
        let _cycle = self.cycle.lock();
        self.collect_locked()
    }

    fn collect_locked(&self) -> CollectReport {
        self.cycles.fetch_add(1, Ordering::SeqCst);
        let report = CollectReport {
            general: run_step("general metrics", || self.update_general_metrics()),
            prices: run_step("product prices", || self.update_product_prices()),
            counts: run_step("product counts", || self.update_products_count()),
        };
        debug!(complete = report.is_complete(), "Collection cycle done");
        report
    }

    fn update_general_metrics(&self) -> Result<()> {
        let data = self
            .host
            .game_data()
            .ok_or(StatsError::MissingHostObject("game data"))?;
        self.metrics.update_general(&data);
        Ok(())
    }

    fn update_product_prices(&self) -> Result<()> {
        let listing = self
            .host
            .product_listing()
            .ok_or(StatsError::MissingHostObject("product listing"))?;

        let prices = &self.metrics.products_price;
        zero_all_series(prices);

        for product_id in &listing.available_products {
            match listing.player_prices.get(product_id) {
                Some(price) => {
                    let name = product_name(self.host.as_ref(), *product_id);
                    prices.get_metric_with_label_values(&[name.as_str()])?.set(*price);
                }
                None => warn!("No player price for available product {}", product_id),
            }
        }
        Ok(())
    }

    fn update_products_count(&self) -> Result<()> {
        let containers = self
            .host
            .containers()
            .ok_or(StatsError::MissingHostObject("container categories"))?;
        if containers.len() != CONTAINER_CATEGORY_COUNT {
            return Err(StatsError::StructuralMismatch {
                found: containers.len(),
                expected: CONTAINER_CATEGORY_COUNT,
            });
        }

        let mut tally = Tally::new(self.host.as_ref());
        for container in &containers {
            match &container.items {
                ContainerItems::Slots(items) => {
                    for slots in items {
                        for pair in slots.chunks_exact(2) {
                            tally.add(&container.name, pair[0], pair[1]);
                        }
                    }
                }
                ContainerItems::Boxes(items) => {
                    for batch in items {
                        tally.add(&container.name, batch.product_id, batch.count);
                    }
                }
            }
        }

        // Carried batches count as boxes
        match self.host.employee_loads() {
            Some(loads) => tally.add_carried(&loads),
            None => warn!("NPC manager not found, skipping products carried by employees"),
        }
        match self.host.player_loads() {
            Some(loads) => tally.add_carried(&loads),
            None => warn!("Network manager not found, skipping products carried by players"),
        }

        let counts = &self.metrics.products_count;
        zero_all_series(counts);
        for ((location, product), count) in tally.totals {
            counts
                .get_metric_with_label_values(&[location.as_str(), product.as_str()])?
                .add(count);
        }
        Ok(())
    }
}

impl MetricSource for SnapshotCollector {
    fn gather(&self) -> Vec<MetricFamily> {
        let _cycle = self.cycle.lock();
        self.collect_locked();
        self.metrics.gather()
    }
}

impl std::fmt::Debug for SnapshotCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotCollector")
            .field("cycles", &self.cycles())
            .finish()
    }
}

/// Product totals of one cycle, keyed by (location, product name)
struct Tally<'a> {
    host: &'a dyn HostGraphReader,
    names: HashMap<i32, String>,
    totals: BTreeMap<(String, String), f64>,
}

impl<'a> Tally<'a> {
    fn new(host: &'a dyn HostGraphReader) -> Self {
        Self {
            host,
            names: HashMap::new(),
            totals: BTreeMap::new(),
        }
    }

    fn add(&mut self, location: &str, product_id: i32, count: i32) {
        if count <= 0 {
            return;
        }
        let host = self.host;
        let name = self
            .names
            .entry(product_id)
            .or_insert_with(|| product_name(host, product_id))
            .clone();
        *self
            .totals
            .entry((location.to_string(), name))
            .or_insert(0.0) += f64::from(count);
    }

    fn add_carried(&mut self, loads: &[Option<ProductBatch>]) {
        for batch in loads.iter().flatten() {
            self.add(BOXES_LOCATION, batch.product_id, batch.count);
        }
    }
}

fn run_step<F>(step: &'static str, f: F) -> Result<()>
where
    F: FnOnce() -> Result<()>,
{
    let outcome =
        catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|_| Err(StatsError::HostPanic(step)));
    if let Err(e) = &outcome {
        if e.is_transient() {
            warn!("Skipping {}: {}", step, e);
        } else {
            error!("Skipping {}: {}", step, e);
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{Container, GameData, HostSnapshot, ProductListing, SharedHost};

    fn collector_for(snapshot: HostSnapshot) -> (Arc<SharedHost>, SnapshotCollector) {
        let host = Arc::new(SharedHost::new(snapshot));
        let metrics = Arc::new(StoreMetrics::new().unwrap());
        let collector = SnapshotCollector::new(host.clone(), metrics);
        (host, collector)
    }

    #[test]
    fn test_general_metrics() {
        let mut snapshot = HostSnapshot::empty_store();
        snapshot.game_data = Some(GameData {
            funds: 830.5,
            franchise_experience: 12.0,
            franchise_points: 1.0,
            supermarket_open: false,
        });
        let (_host, collector) = collector_for(snapshot);

        let report = collector.collect();
        assert!(report.is_complete());
        assert_eq!(collector.metrics().funds.get(), 830.5);
        assert_eq!(collector.metrics().supermarket_open.get(), 0.0);
    }

    #[test]
    fn test_missing_game_data_skips_only_general() {
        let mut snapshot = HostSnapshot::empty_store().with_product_name(1, "Rice");
        snapshot.game_data = None;
        snapshot.container_mut("Shelves").unwrap().items = ContainerItems::Slots(vec![vec![1, 5]]);
        let (_host, collector) = collector_for(snapshot);

        let report = collector.collect();
        assert!(matches!(
            report.general,
            Err(StatsError::MissingHostObject("game data"))
        ));
        assert!(report.prices.is_ok());
        assert!(report.counts.is_ok());
        assert_eq!(collector.metrics().product_count("Shelves", "Rice"), 5.0);
    }

    #[test]
    fn test_slot_pairs_sum_per_location() {
        let mut snapshot = HostSnapshot::empty_store()
            .with_product_name(1, "Rice")
            .with_product_name(2, "Beans");
        snapshot.container_mut("Shelves").unwrap().items =
            ContainerItems::Slots(vec![vec![1, 5, 2, 0], vec![1, 3, 2, 4, 9]]);
        let (_host, collector) = collector_for(snapshot);

        collector.collect();
        let metrics = collector.metrics();
        assert_eq!(metrics.product_count("Shelves", "Rice"), 8.0);
        assert_eq!(metrics.product_count("Shelves", "Beans"), 4.0);
    }

    #[test]
    fn test_prices_reset_when_product_leaves_listing() {
        let mut snapshot = HostSnapshot::empty_store()
            .with_product_name(1, "Rice")
            .with_product_name(2, "Beans");
        snapshot.product_listing = Some(ProductListing {
            available_products: vec![1, 2],
            player_prices: [(1, 4.5), (2, 2.0)].into_iter().collect(),
        });
        let (host, collector) = collector_for(snapshot);
        collector.collect();

        host.modify(|state| {
            state.product_listing = Some(ProductListing {
                available_products: vec![2],
                player_prices: [(1, 4.5), (2, 2.25)].into_iter().collect(),
            });
        });
        collector.collect();

        let prices = &collector.metrics().products_price;
        assert_eq!(prices.with_label_values(&["Rice"]).get(), 0.0);
        assert_eq!(prices.with_label_values(&["Beans"]).get(), 2.25);
    }

    #[test]
    fn test_available_product_without_price_is_skipped() {
        let mut snapshot = HostSnapshot::empty_store().with_product_name(5, "Tea");
        snapshot.product_listing = Some(ProductListing {
            available_products: vec![5, 6],
            player_prices: [(5, 3.0)].into_iter().collect(),
        });
        let (_host, collector) = collector_for(snapshot);

        assert!(collector.collect().prices.is_ok());
        assert_eq!(
            collector.metrics().products_price.with_label_values(&["Tea"]).get(),
            3.0
        );
    }

    #[test]
    fn test_missing_carriers_still_publish_containers() {
        let mut snapshot = HostSnapshot::empty_store().with_product_name(1, "Rice");
        snapshot.employees = None;
        snapshot.players = None;
        snapshot.containers = Some(vec![
            Container::slots("Shelves", vec![]),
            Container::slots("StorageShelves", vec![vec![1, 12]]),
            Container::boxes("Boxes", vec![]),
        ]);
        let (_host, collector) = collector_for(snapshot);

        assert!(collector.collect().counts.is_ok());
        assert_eq!(collector.metrics().product_count("StorageShelves", "Rice"), 12.0);
    }

    struct PanickingHost;

    impl HostGraphReader for PanickingHost {
        fn game_data(&self) -> Option<GameData> {
            Some(GameData {
                funds: 7.0,
                ..Default::default()
            })
        }
        fn product_listing(&self) -> Option<ProductListing> {
            panic!("listing resized while reading");
        }
        fn containers(&self) -> Option<Vec<Container>> {
            None
        }
        fn employee_loads(&self) -> Option<Vec<Option<ProductBatch>>> {
            None
        }
        fn player_loads(&self) -> Option<Vec<Option<ProductBatch>>> {
            None
        }
        fn localize(&self, key: &str) -> String {
            key.to_string()
        }
    }

    #[test]
    fn test_panicking_reader_only_skips_its_step() {
        let metrics = Arc::new(StoreMetrics::new().unwrap());
        let collector = SnapshotCollector::new(Arc::new(PanickingHost), metrics);

        let report = collector.collect();
        assert!(report.general.is_ok());
        assert!(matches!(
            report.prices,
            Err(StatsError::HostPanic("product prices"))
        ));
        assert!(matches!(
            report.counts,
            Err(StatsError::MissingHostObject(_))
        ));
        assert_eq!(collector.metrics().funds.get(), 7.0);
    }

    #[test]
    fn test_gather_runs_a_cycle() {
        let (_host, collector) = collector_for(HostSnapshot::empty_store());
        let families = MetricSource::gather(&collector);
        assert_eq!(collector.cycles(), 1);
        assert!(families.iter().any(|f| f.get_name() == "smt_funds"));
    }
}
