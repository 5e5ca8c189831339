//! Event hooks and the host event bus.
//!
//! The host fires [`HostEvent`]s synchronously on its update thread at fixed
//! extension points. [`EventHooks`] turns the domain events into counter
//! updates; it only observes and never fails back into the host.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::error::Result;
use crate::host::{product_name, HostGraphReader};
use crate::metrics::StoreMetrics;
use crate::observer::{Observers, Subscription};

/// Something that happened in the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostEvent {
    /// A scene finished loading
    SceneLoaded { name: String },
    /// The current scene was unloaded
    SceneUnloaded,
    /// The supermarket opened its doors
    SupermarketOpened,
    /// The trading day was ended
    DayEnded,
    /// An NPC showed a notification above its head
    NpcNotification {
        message: String,
        #[serde(default)]
        addon: String,
    },
    /// A product went through checkout
    Checkout { product_id: i32, price: f64 },
}

/// NPC notification messages the hooks count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationCode {
    ProductNotFound,
    TooExpensive,
}

impl NotificationCode {
    /// Map a host message key to a code. Other messages are not counted.
    pub fn parse(message: &str) -> Option<Self> {
        match message {
            "NPCmessage0" => Some(NotificationCode::ProductNotFound),
            "NPCmessage1" => Some(NotificationCode::TooExpensive),
            _ => None,
        }
    }
}

/// Extension point the host publishes its events on.
#[derive(Default)]
pub struct HostEventBus {
    observers: Observers<HostEvent>,
}

impl HostEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a handler for every event
    #[must_use = "dropping the subscription detaches the handler immediately"]
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&HostEvent) + Send + Sync + 'static,
    {
        self.observers.subscribe(handler)
    }

    /// Deliver an event to every handler, on the calling thread
    pub fn publish(&self, event: &HostEvent) {
        self.observers.notify(event);
    }

    /// Number of attached handlers
    pub fn subscribers(&self) -> usize {
        self.observers.len()
    }
}

impl std::fmt::Debug for HostEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostEventBus")
            .field("subscribers", &self.subscribers())
            .finish()
    }
}

/// Counter updates driven by host events.
pub struct EventHooks {
    metrics: Arc<StoreMetrics>,
    host: Arc<dyn HostGraphReader>,
}

impl EventHooks {
    pub fn new(metrics: Arc<StoreMetrics>, host: Arc<dyn HostGraphReader>) -> Self {
        Self { metrics, host }
    }

    /// Handle one event. Failures are logged, never returned to the host.
    pub fn handle(&self, event: &HostEvent) {
        match catch_unwind(AssertUnwindSafe(|| self.dispatch(event))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Event hook failed on {:?}: {}", event, e),
            Err(_) => error!("Event hook panicked on {:?}", event),
        }
    }

    fn dispatch(&self, event: &HostEvent) -> Result<()> {
        match event {
            HostEvent::SupermarketOpened => {
                info!("Opening supermarket, clearing product counter");
                self.metrics.reset_event_counters();
            }
            HostEvent::DayEnded => {
                info!("End of the day, clearing product counter");
                self.metrics.reset_event_counters();
            }
            HostEvent::NpcNotification { message, .. } => match NotificationCode::parse(message) {
                Some(NotificationCode::ProductNotFound) => self.metrics.products_not_found.inc(),
                Some(NotificationCode::TooExpensive) => self.metrics.products_too_expensive.inc(),
                None => {}
            },
            HostEvent::Checkout { product_id, price } => {
                let name = product_name(self.host.as_ref(), *product_id);
                debug!("Checking out {} at {}", name, price);
                self.metrics
                    .products_checkout_price
                    .get_metric_with_label_values(&[name.as_str()])?
                    .observe(*price);
            }
            HostEvent::SceneLoaded { .. } | HostEvent::SceneUnloaded => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostSnapshot;

    fn hooks() -> EventHooks {
        let metrics = Arc::new(StoreMetrics::new().unwrap());
        let host = Arc::new(HostSnapshot::default().with_product_name(2, "Cereal"));
        EventHooks::new(metrics, host)
    }

    #[test]
    fn test_notification_codes() {
        assert_eq!(
            NotificationCode::parse("NPCmessage0"),
            Some(NotificationCode::ProductNotFound)
        );
        assert_eq!(
            NotificationCode::parse("NPCmessage1"),
            Some(NotificationCode::TooExpensive)
        );
        assert_eq!(NotificationCode::parse("NPCmessage2"), None);
    }

    #[test]
    fn test_notifications_increment_counters() {
        let hooks = hooks();
        for message in ["NPCmessage0", "NPCmessage1", "NPCmessage1", "NPCmessage7"] {
            hooks.handle(&HostEvent::NpcNotification {
                message: message.to_string(),
                addon: String::new(),
            });
        }
        assert_eq!(hooks.metrics.products_not_found.get(), 1.0);
        assert_eq!(hooks.metrics.products_too_expensive.get(), 2.0);
    }

    #[test]
    fn test_supermarket_opened_resets_counters() {
        let hooks = hooks();
        hooks.metrics.products_not_found.set(4.0);
        hooks.metrics.products_too_expensive.set(9.0);

        hooks.handle(&HostEvent::SupermarketOpened);

        assert_eq!(hooks.metrics.products_not_found.get(), 0.0);
        assert_eq!(hooks.metrics.products_too_expensive.get(), 0.0);
    }

    #[test]
    fn test_checkout_observes_price() {
        let hooks = hooks();
        hooks.handle(&HostEvent::Checkout {
            product_id: 2,
            price: 19.99,
        });

        let histogram = hooks
            .metrics
            .products_checkout_price
            .with_label_values(&["Cereal"]);
        assert_eq!(histogram.get_sample_count(), 1);
        approx::assert_relative_eq!(histogram.get_sample_sum(), 19.99);
    }

    #[test]
    fn test_bus_delivers_until_unsubscribed() {
        let hooks = Arc::new(hooks());
        let bus = HostEventBus::new();

        let handler = Arc::clone(&hooks);
        let sub = bus.subscribe(move |event| handler.handle(event));
        bus.publish(&HostEvent::NpcNotification {
            message: "NPCmessage0".to_string(),
            addon: String::new(),
        });
        drop(sub);
        bus.publish(&HostEvent::NpcNotification {
            message: "NPCmessage0".to_string(),
            addon: String::new(),
        });

        assert_eq!(bus.subscribers(), 0);
        assert_eq!(hooks.metrics.products_not_found.get(), 1.0);
    }

    #[test]
    fn test_event_json_shape() {
        let event: HostEvent =
            serde_json::from_str(r#"{ "type": "checkout", "product_id": 4, "price": 3.5 }"#)
                .unwrap();
        assert_eq!(
            event,
            HostEvent::Checkout {
                product_id: 4,
                price: 3.5
            }
        );
        let event: HostEvent =
            serde_json::from_str(r#"{ "type": "npc_notification", "message": "NPCmessage1" }"#)
                .unwrap();
        assert!(matches!(event, HostEvent::NpcNotification { .. }));
    }
}
