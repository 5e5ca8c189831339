//! Exposition channels.
//!
//! A channel serves or pushes the registry contents. Both implementations
//! run on a worker thread of their own and call [`MetricSource::gather`]
//! right before serializing, which is where the collection cycle happens.
//!
//! | Channel | Trigger | Worker |
//! |---------|---------|--------|
//! | [`PullServer`] | HTTP scrape of `/metrics` | tokio runtime thread |
//! | [`PushClient`] | timer, every `interval_ms` | plain thread |
//!
//! Stopping a channel joins its worker, so no collection started by the
//! channel can still be running once `stop` returns.

mod pull;
mod push;

use std::fmt;
use std::sync::Arc;

use prometheus::proto::MetricFamily;

use crate::config::{HandlerSettings, PushSettings};
use crate::error::Result;

pub use pull::PullServer;
pub use push::{PushClient, PushTarget};

/// Produces the metric families to expose, refreshing them first.
pub trait MetricSource: Send + Sync {
    fn gather(&self) -> Vec<MetricFamily>;
}

/// The two kinds of exposition channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// HTTP endpoint scraped by Prometheus
    Pull,
    /// Periodic push to a Pushgateway
    Push,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Pull => "metrics handler",
            ChannelKind::Push => "pushgateway",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A running channel instance.
pub trait ExpositionChannel: Send {
    fn kind(&self) -> ChannelKind;

    /// Whether the worker is still alive
    fn is_running(&self) -> bool;

    /// Stop the worker and wait for it. Idempotent.
    fn stop(&mut self);
}

/// Builds started channels from their settings.
///
/// Configuration is only read at construction, so applying new settings
/// means stopping the old instance and building a new one.
pub trait ChannelFactory: Send {
    fn start_pull(&self, settings: &HandlerSettings) -> Result<Box<dyn ExpositionChannel>>;

    fn start_push(&self, settings: &PushSettings) -> Result<Box<dyn ExpositionChannel>>;
}

/// Factory for the real HTTP channels.
pub struct PrometheusChannels {
    source: Arc<dyn MetricSource>,
}

impl PrometheusChannels {
    pub fn new(source: Arc<dyn MetricSource>) -> Self {
        Self { source }
    }
}

impl ChannelFactory for PrometheusChannels {
    fn start_pull(&self, settings: &HandlerSettings) -> Result<Box<dyn ExpositionChannel>> {
        Ok(Box::new(PullServer::start(settings, Arc::clone(&self.source))?))
    }

    fn start_push(&self, settings: &PushSettings) -> Result<Box<dyn ExpositionChannel>> {
        let target = PushTarget::from_settings(settings)?;
        Ok(Box::new(PushClient::start(target, Arc::clone(&self.source))?))
    }
}
