//! # SMT Stats - Prometheus metrics for Supermarket Together
//!
//! Observes a running store and exposes its state as Prometheus metrics,
//! either scraped over HTTP or pushed to a Pushgateway.
//!
//! ## Key Features
//!
//! - **Snapshot collection**: level metrics recomputed from the host graph right before every export
//! - **Event hooks**: complaint counters and checkout prices driven by host events
//! - **Lifecycle control**: channels only run while the store scene is loaded and their flag is set
//! - **Hot reload**: configuration changes rebuild exactly the affected channel
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use smt_stats::{HostSnapshot, SharedHost, SnapshotCollector, StoreMetrics};
//!
//! let mut snapshot = HostSnapshot::empty_store().with_product_name(1, "Rice");
//! snapshot.container_mut("Shelves").unwrap().items =
//!     smt_stats::host::ContainerItems::Slots(vec![vec![1, 6]]);
//!
//! let host = Arc::new(SharedHost::new(snapshot));
//! let metrics = Arc::new(StoreMetrics::new().unwrap());
//! let collector = SnapshotCollector::new(host, metrics.clone());
//!
//! assert!(collector.collect().is_complete());
//! assert_eq!(metrics.product_count("Shelves", "Rice"), 6.0);
//! ```
//!
//! ## Modules
//!
//! - [`metrics`]: Metric registry and instruments
//! - [`collector`]: Snapshot collection from the host graph
//! - [`hooks`]: Host events and the counters they drive
//! - [`exposition`]: Pull server and push client
//! - [`lifecycle`]: Channel start/stop control
//! - [`config`]: Settings and change notification
//! - [`plugin`]: Bootstrap and teardown

// Modules
pub mod collector;
pub mod config;
pub mod error;
pub mod exposition;
pub mod hooks;
pub mod host;
pub mod lifecycle;
pub mod metrics;
pub mod observer;
pub mod plugin;

// Re-exports for convenient access
pub use collector::{CollectReport, SnapshotCollector};
pub use config::{ConfigStore, HandlerSettings, PushSettings, Settings};
pub use error::{Result, StatsError};
pub use exposition::{
    ChannelFactory, ChannelKind, ExpositionChannel, MetricSource, PrometheusChannels, PullServer,
    PushClient, PushTarget,
};
pub use hooks::{EventHooks, HostEvent, HostEventBus, NotificationCode};
pub use host::{HostGraphReader, HostSnapshot, SharedHost};
pub use lifecycle::{LifecycleController, SUPERMARKET_SCENE};
pub use metrics::StoreMetrics;
pub use observer::{Observers, Subscription};
pub use plugin::Plugin;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
