//! Pull endpoint: an HTTP server exposing the registry in text format.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::thread;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{error, info};

use super::{ChannelKind, ExpositionChannel, MetricSource};
use crate::config::HandlerSettings;
use crate::error::{Result, StatsError};
use crate::metrics::StoreMetrics;

/// Metrics handler bound to `address:port`.
///
/// The listener is bound before the worker starts, so a port already in use
/// is reported by [`PullServer::start`] rather than by the worker.
pub struct PullServer {
    local_addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl PullServer {
    /// Bind and start serving.
    pub fn start(settings: &HandlerSettings, source: Arc<dyn MetricSource>) -> Result<Self> {
        let ip: IpAddr = settings.address.parse().map_err(|_| {
            StatsError::InvalidConfig(format!("invalid handler address {:?}", settings.address))
        })?;
        let addr = SocketAddr::new(ip, settings.port);

        let listener =
            std::net::TcpListener::bind(addr).map_err(|source| StatsError::Bind { addr, source })?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let handle = thread::Builder::new()
            .name("smt-metrics-handler".to_string())
            .spawn(move || {
                runtime.block_on(async move {
                    let listener = match TcpListener::from_std(listener) {
                        Ok(listener) => listener,
                        Err(e) => {
                            error!("Metrics handler could not adopt its listener: {}", e);
                            return;
                        }
                    };
                    let shutdown = async {
                        let _ = shutdown_rx.await;
                    };
                    if let Err(e) = axum::serve(listener, router(source))
                        .with_graceful_shutdown(shutdown)
                        .await
                    {
                        error!("Metrics handler failed: {}", e);
                    }
                });
            })?;

        info!("Metrics endpoint: http://{}/metrics", local_addr);

        Ok(Self {
            local_addr,
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Address the listener is bound to (resolves port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl ExpositionChannel for PullServer {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Pull
    }

    fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Metrics handler thread panicked");
            }
            info!("Metrics handler on {} stopped", self.local_addr);
        }
    }
}

impl Drop for PullServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Routes of the metrics handler
pub(crate) fn router(source: Arc<dyn MetricSource>) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(source)
}

/// Root handler - shows a simple HTML page.
async fn root_handler() -> Html<&'static str> {
    Html(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>SMT Stats</title>
    <style>
        body { font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; max-width: 800px; margin: 50px auto; padding: 20px; }
        h1 { color: #2c3e50; }
        a { color: #3498db; text-decoration: none; }
        code { background: #e9ecef; padding: 2px 6px; border-radius: 4px; }
    </style>
</head>
<body>
    <h1>SMT Stats</h1>
    <p>Prometheus metrics for the running supermarket.</p>
    <ul>
        <li><a href="/metrics">/metrics</a> - Prometheus metrics</li>
        <li><a href="/health">/health</a> - Health check</li>
    </ul>
    <h2>Metrics</h2>
    <ul>
        <li><code>smt_funds</code>, <code>smt_franchise_exp</code>, <code>smt_franchise_points</code></li>
        <li><code>smt_supermarket_open</code> - 1 when open</li>
        <li><code>smt_products_count</code> - Products per location</li>
        <li><code>smt_products_price</code> - Player price per product</li>
        <li><code>smt_products_checkout_price</code> - Checkout price histogram</li>
        <li><code>smt_products_not_found</code>, <code>smt_products_too_expensive</code> - Customer complaints this day</li>
    </ul>
</body>
</html>"#,
    )
}

/// Metrics handler - runs a collection cycle and returns Prometheus text format.
async fn metrics_handler(State(source): State<Arc<dyn MetricSource>>) -> Response {
    let families = source.gather();
    match StoreMetrics::encode(&families) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Cannot encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
