//! Plugin bootstrap and teardown.
//!
//! [`Plugin::load`] wires the registry, the collector, the event hooks and
//! the lifecycle controller to the host's extension points. Everything it
//! registers is released by [`Plugin::unload`], which also runs on drop.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use crate::collector::SnapshotCollector;
use crate::config::ConfigStore;
use crate::error::Result;
use crate::exposition::{ChannelFactory, ChannelKind, MetricSource, PrometheusChannels};
use crate::hooks::{EventHooks, HostEvent, HostEventBus};
use crate::host::HostGraphReader;
use crate::lifecycle::{LifecycleController, SUPERMARKET_SCENE};
use crate::metrics::StoreMetrics;
use crate::observer::Subscription;

/// A loaded instance of the statistics plugin.
pub struct Plugin {
    metrics: Arc<StoreMetrics>,
    collector: Arc<SnapshotCollector>,
    controller: Arc<Mutex<LifecycleController>>,
    subscriptions: Vec<Subscription>,
}

impl Plugin {
    /// Load the plugin with the real HTTP channels.
    ///
    /// `active_scene` is the scene already loaded when the plugin starts, if
    /// any; the channels are reconciled against it right away.
    pub fn load(
        config: Arc<ConfigStore>,
        host: Arc<dyn HostGraphReader>,
        bus: &HostEventBus,
        active_scene: Option<&str>,
    ) -> Result<Self> {
        Self::load_with_factory(config, host, bus, active_scene, |source| {
            Box::new(PrometheusChannels::new(source))
        })
    }

    /// Load the plugin, building channels through a custom factory.
    pub fn load_with_factory<F>(
        config: Arc<ConfigStore>,
        host: Arc<dyn HostGraphReader>,
        bus: &HostEventBus,
        active_scene: Option<&str>,
        make_factory: F,
    ) -> Result<Self>
    where
        F: FnOnce(Arc<dyn MetricSource>) -> Box<dyn ChannelFactory>,
    {
        let metrics = Arc::new(StoreMetrics::new()?);
        let collector = Arc::new(SnapshotCollector::new(
            Arc::clone(&host),
            Arc::clone(&metrics),
        ));
        let hooks = EventHooks::new(Arc::clone(&metrics), host);

        let source: Arc<dyn MetricSource> = collector.clone();
        let controller = Arc::new(Mutex::new(LifecycleController::new(
            make_factory(source),
            Arc::clone(&config),
            SUPERMARKET_SCENE,
        )));

        let on_config = Arc::clone(&controller);
        let config_sub = config.subscribe(move |_| on_config.lock().reconcile());

        let on_event = Arc::clone(&controller);
        let event_sub = bus.subscribe(move |event| match event {
            HostEvent::SceneLoaded { name } => on_event.lock().on_scene_loaded(name),
            HostEvent::SceneUnloaded => on_event.lock().on_scene_unloaded(),
            _ => hooks.handle(event),
        });

        {
            let mut controller = controller.lock();
            match active_scene {
                Some(scene) => controller.on_scene_loaded(scene),
                None => controller.reconcile(),
            }
        }

        info!("Plugin smt-stats {} is loaded!", crate::VERSION);

        Ok(Self {
            metrics,
            collector,
            controller,
            subscriptions: vec![config_sub, event_sub],
        })
    }

    /// Metrics registry of this instance
    pub fn metrics(&self) -> &Arc<StoreMetrics> {
        &self.metrics
    }

    /// Collector feeding the channels
    pub fn collector(&self) -> &Arc<SnapshotCollector> {
        &self.collector
    }

    pub fn session_active(&self) -> bool {
        self.controller.lock().session_active()
    }

    pub fn is_running(&self, kind: ChannelKind) -> bool {
        self.controller.lock().is_running(kind)
    }

    /// Detach from the host and stop both channels. Idempotent.
    pub fn unload(&mut self) {
        if self.subscriptions.is_empty() {
            return;
        }
        // Detach first; a trigger already in flight is ignored by the closed
        // controller.
        self.subscriptions.clear();
        self.controller.lock().shutdown();
        info!("Plugin smt-stats unloaded");
    }
}

impl Drop for Plugin {
    fn drop(&mut self) {
        self.unload();
    }
}

impl std::fmt::Debug for Plugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plugin")
            .field("controller", &*self.controller.lock())
            .field("subscriptions", &self.subscriptions.len())
            .finish()
    }
}
