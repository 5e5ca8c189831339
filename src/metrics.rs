//! Prometheus metrics for store monitoring.
//!
//! This module defines all metrics exposed by the plugin, owned by a single
//! [`StoreMetrics`] instance with its own registry, and provides the update
//! functions used by the collector and the event hooks.

use prometheus::core::Collector;
use prometheus::proto::MetricFamily;
use prometheus::{
    Encoder, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};

use crate::error::{Result, StatsError};
use crate::host::GameData;

/// Label names of [`StoreMetrics::products_count`]
pub const COUNT_LABELS: [&str; 2] = ["location", "product"];

/// Label names of the per-product instruments
pub const PRODUCT_LABELS: [&str; 1] = ["product"];

/// Every instrument the plugin exposes, registered in one private registry.
///
/// Instruments are internally atomic, so the collector (channel worker
/// threads) and the event hooks (host thread) can write concurrently.
#[derive(Clone)]
pub struct StoreMetrics {
    registry: Registry,

    // ============================================================
    // Store level metrics (recomputed every collection cycle)
    // ============================================================
    /// Game funds
    pub funds: Gauge,

    /// Supermarket open (1 = open, 0 = closed)
    pub supermarket_open: Gauge,

    /// Franchise experience
    pub franchise_exp: Gauge,

    /// Franchise points
    pub franchise_points: Gauge,

    /// Products on hand, per location and product.
    ///
    /// Used as a level: every series is reset to zero then re-accumulated
    /// on each cycle.
    pub products_count: GaugeVec,

    /// Current player price per product
    pub products_price: GaugeVec,

    // ============================================================
    // Event counters (driven by host events, reset per trading period)
    // ============================================================
    /// Customers who found a product too expensive
    pub products_too_expensive: Gauge,

    /// Customers who did not find a product
    pub products_not_found: Gauge,

    /// Price each product was sold at
    pub products_checkout_price: HistogramVec,
}

impl StoreMetrics {
    /// Create all instruments and register them in a fresh registry.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let funds = Gauge::with_opts(Opts::new("smt_funds", "Game funds"))?;
        let supermarket_open =
            Gauge::with_opts(Opts::new("smt_supermarket_open", "Supermarket open"))?;
        let franchise_exp =
            Gauge::with_opts(Opts::new("smt_franchise_exp", "Franchise experience"))?;
        let franchise_points =
            Gauge::with_opts(Opts::new("smt_franchise_points", "Franchise points"))?;
        let products_too_expensive = Gauge::with_opts(Opts::new(
            "smt_products_too_expensive",
            "Number of product too expensive",
        ))?;
        let products_not_found = Gauge::with_opts(Opts::new(
            "smt_products_not_found",
            "Number of product not found",
        ))?;
        let products_count = GaugeVec::new(
            Opts::new(
                "smt_products_count",
                "Number of products per location (shelves, storage, boxes)",
            ),
            &COUNT_LABELS,
        )?;
        let products_price = GaugeVec::new(
            Opts::new("smt_products_price", "Current player price per product"),
            &PRODUCT_LABELS,
        )?;
        let products_checkout_price = HistogramVec::new(
            HistogramOpts::new(
                "smt_products_checkout_price",
                "Price of products at checkout",
            ),
            &PRODUCT_LABELS,
        )?;

        registry.register(Box::new(funds.clone()))?;
        registry.register(Box::new(supermarket_open.clone()))?;
        registry.register(Box::new(franchise_exp.clone()))?;
        registry.register(Box::new(franchise_points.clone()))?;
        registry.register(Box::new(products_too_expensive.clone()))?;
        registry.register(Box::new(products_not_found.clone()))?;
        registry.register(Box::new(products_count.clone()))?;
        registry.register(Box::new(products_price.clone()))?;
        registry.register(Box::new(products_checkout_price.clone()))?;

        Ok(Self {
            registry,
            funds,
            supermarket_open,
            franchise_exp,
            franchise_points,
            products_count,
            products_price,
            products_too_expensive,
            products_not_found,
            products_checkout_price,
        })
    }

    /// Registry holding every instrument
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Update store level metrics from the game data singleton.
    pub fn update_general(&self, data: &GameData) {
        self.funds.set(data.funds);
        self.franchise_exp.set(data.franchise_experience);
        self.franchise_points.set(data.franchise_points);
        self.supermarket_open
            .set(if data.supermarket_open { 1.0 } else { 0.0 });
    }

    /// Clear the event counters at the start or end of a trading period.
    pub fn reset_event_counters(&self) {
        self.products_too_expensive.set(0.0);
        self.products_not_found.set(0.0);
    }

    /// Current value of one `smt_products_count` series, 0 if it never existed
    ///
    /// Read-only: looking up an absent series does not create it.
    pub fn product_count(&self, location: &str, product: &str) -> f64 {
        let has = |metric: &prometheus::proto::Metric, name: &str, value: &str| {
            metric
                .get_label()
                .iter()
                .any(|pair| pair.get_name() == name && pair.get_value() == value)
        };
        self.products_count
            .collect()
            .iter()
            .flat_map(|family| family.get_metric().iter())
            .find(|metric| has(metric, "location", location) && has(metric, "product", product))
            .map(|metric| metric.get_gauge().get_value())
            .unwrap_or(0.0)
    }

    /// Snapshot every metric family
    pub fn gather(&self) -> Vec<MetricFamily> {
        self.registry.gather()
    }

    /// Encode metric families to Prometheus text format.
    pub fn encode(families: &[MetricFamily]) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(families, &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| StatsError::Prometheus(prometheus::Error::Msg(e.to_string())))
    }
}

impl std::fmt::Debug for StoreMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreMetrics")
            .field("families", &self.registry.gather().len())
            .finish()
    }
}

/// Every label tuple currently present on `vec`, in declared label order.
pub fn label_values(vec: &GaugeVec) -> Vec<Vec<String>> {
    let names: Vec<String> = vec
        .desc()
        .first()
        .map(|desc| desc.variable_labels.clone())
        .unwrap_or_default();

    let families = vec.collect();
    families
        .iter()
        .flat_map(|family| family.get_metric().iter())
        .map(|metric| {
            names
                .iter()
                .map(|name| {
                    metric
                        .get_label()
                        .iter()
                        .find(|pair| pair.get_name() == name)
                        .map(|pair| pair.get_value().to_string())
                        .unwrap_or_default()
                })
                .collect()
        })
        .collect()
}

/// Set every existing series of `vec` to zero.
///
/// Series are never removed: a product that disappears from the store must
/// read 0 rather than keep its last value or vanish from the exposition.
pub fn zero_all_series(vec: &GaugeVec) {
    for values in label_values(vec) {
        let refs: Vec<&str> = values.iter().map(String::as_str).collect();
        if let Ok(gauge) = vec.get_metric_with_label_values(&refs) {
            gauge.set(0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_registers_all_families() {
        let metrics = StoreMetrics::new().unwrap();
        metrics.products_count.with_label_values(&["Boxes", "Milk"]).set(1.0);
        metrics.products_price.with_label_values(&["Milk"]).set(2.0);
        metrics
            .products_checkout_price
            .with_label_values(&["Milk"])
            .observe(2.0);

        let names: Vec<String> = metrics
            .gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect();
        for expected in [
            "smt_funds",
            "smt_supermarket_open",
            "smt_franchise_exp",
            "smt_franchise_points",
            "smt_products_too_expensive",
            "smt_products_not_found",
            "smt_products_count",
            "smt_products_price",
            "smt_products_checkout_price",
        ] {
            assert!(names.iter().any(|n| n == expected), "missing {expected}");
        }
    }

    #[test]
    fn test_registries_are_isolated() {
        let a = StoreMetrics::new().unwrap();
        let b = StoreMetrics::new().unwrap();
        a.funds.set(10.0);
        assert_eq!(b.funds.get(), 0.0);
    }

    #[test]
    fn test_update_general() {
        let metrics = StoreMetrics::new().unwrap();
        metrics.update_general(&GameData {
            funds: 1500.25,
            franchise_experience: 40.0,
            franchise_points: 2.0,
            supermarket_open: true,
        });
        assert_eq!(metrics.funds.get(), 1500.25);
        assert_eq!(metrics.franchise_exp.get(), 40.0);
        assert_eq!(metrics.franchise_points.get(), 2.0);
        assert_eq!(metrics.supermarket_open.get(), 1.0);
    }

    #[test]
    fn test_label_values_declared_order() {
        let metrics = StoreMetrics::new().unwrap();
        metrics
            .products_count
            .with_label_values(&["StorageShelves", "Apple"])
            .set(3.0);

        let tuples = label_values(&metrics.products_count);
        assert_eq!(
            tuples,
            vec![vec!["StorageShelves".to_string(), "Apple".to_string()]]
        );
    }

    #[test]
    fn test_zero_all_series_keeps_series() {
        let metrics = StoreMetrics::new().unwrap();
        metrics.products_price.with_label_values(&["Apple"]).set(3.5);
        metrics.products_price.with_label_values(&["Pear"]).set(1.5);

        zero_all_series(&metrics.products_price);

        assert_eq!(label_values(&metrics.products_price).len(), 2);
        assert_eq!(metrics.products_price.with_label_values(&["Apple"]).get(), 0.0);
        assert_eq!(metrics.products_price.with_label_values(&["Pear"]).get(), 0.0);
    }

    #[test]
    fn test_encode_metrics() {
        let metrics = StoreMetrics::new().unwrap();
        metrics.funds.set(42.0);
        metrics.products_count.with_label_values(&["Shelves", "Soda"]).set(6.0);

        let output = StoreMetrics::encode(&metrics.gather()).unwrap();
        assert!(output.contains("smt_funds 42"));
        assert!(output.contains("smt_products_count{location=\"Shelves\",product=\"Soda\"} 6"));
    }
}
