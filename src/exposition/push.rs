//! Push client: periodically sends the registry to a Pushgateway.

use std::collections::HashMap;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::{ChannelKind, ExpositionChannel, MetricSource};
use crate::config::PushSettings;
use crate::error::Result;

/// Where and how often to push
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushTarget {
    /// Gateway base address, without the `/metrics` suffix
    pub gateway: String,
    pub job: String,
    pub interval: Duration,
}

impl PushTarget {
    /// Build a target from settings.
    ///
    /// The endpoint is configured in its `.../metrics` form; the push client
    /// appends `/metrics/job/<job>` itself, so the suffix is stripped here.
    pub fn from_settings(settings: &PushSettings) -> Result<Self> {
        settings.validate()?;
        let endpoint = settings.endpoint.trim().trim_end_matches('/');
        let gateway = endpoint.strip_suffix("/metrics").unwrap_or(endpoint);
        Ok(Self {
            gateway: gateway.to_string(),
            job: settings.job.clone(),
            interval: Duration::from_millis(settings.interval_ms),
        })
    }

    /// Full URL pushes are sent to
    pub fn url(&self) -> String {
        format!("{}/metrics/job/{}", self.gateway, self.job)
    }
}

/// Pushgateway client running on its own thread.
///
/// The worker waits one interval, collects, pushes, and repeats until
/// stopped. A failed push is logged and retried on the next tick.
pub struct PushClient {
    target: PushTarget,
    stop_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl PushClient {
    pub fn start(target: PushTarget, source: Arc<dyn MetricSource>) -> Result<Self> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let worker_target = target.clone();

        let handle = thread::Builder::new()
            .name("smt-pushgateway".to_string())
            .spawn(move || run(worker_target, source, stop_rx))?;

        info!(
            "Pushing metrics to {} every {:?}",
            target.url(),
            target.interval
        );

        Ok(Self {
            target,
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    pub fn target(&self) -> &PushTarget {
        &self.target
    }
}

impl ExpositionChannel for PushClient {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Push
    }

    fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    fn stop(&mut self) {
        // Dropping the sender wakes the worker out of its wait.
        self.stop_tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Pushgateway thread panicked");
            }
            info!("Pushgateway client for job {} stopped", self.target.job);
        }
    }
}

impl Drop for PushClient {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(target: PushTarget, source: Arc<dyn MetricSource>, stop_rx: mpsc::Receiver<()>) {
    let mut failing = false;
    loop {
        match stop_rx.recv_timeout(target.interval) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }

        let families = source.gather();
        match prometheus::push_add_metrics(
            &target.job,
            HashMap::<String, String>::new(),
            &target.gateway,
            families,
            None,
        ) {
            Ok(()) => {
                if failing {
                    info!("Pushgateway {} reachable again", target.gateway);
                }
                failing = false;
            }
            Err(e) if failing => debug!("Push to {} still failing: {}", target.gateway, e),
            Err(e) => {
                warn!("Push to {} failed: {}", target.gateway, e);
                failing = true;
            }
        }
    }
}
