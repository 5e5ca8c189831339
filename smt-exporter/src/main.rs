// SMT Exporter - Standalone exporter for Supermarket Together metrics
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # SMT Exporter
//!
//! Runs the smt-stats plugin outside the game, against a recorded session,
//! with the same configuration file and exposition channels.
//!
//! ## Usage
//!
//! ```bash
//! # Replay a recorded session ten times faster
//! smt-exporter --script session.json --speed 10.0
//!
//! # Serve an empty store, pick up config edits every 2s
//! smt-exporter --config smt-stats.toml --config-poll-ms 2000
//! ```

mod driver;
mod replay;
mod watcher;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use smt_stats::{ConfigStore, HostSnapshot, SUPERMARKET_SCENE};
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use driver::{HostCommand, HostThread};
use replay::{ReplayConfig, ReplayEngine, ReplayScript};
use watcher::watch_config;

/// Supermarket Together Prometheus exporter
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file, created with defaults if missing
    #[arg(short, long, default_value = "smt-stats.toml")]
    config: PathBuf,

    /// JSON session script to replay
    #[arg(short = 'r', long)]
    script: Option<PathBuf>,

    /// Replay speed multiplier (1.0 = real-time)
    #[arg(short, long, default_value = "1.0")]
    speed: f64,

    /// Loop the replay when it reaches the end
    #[arg(short, long, default_value_t = true, action = clap::ArgAction::Set)]
    loop_replay: bool,

    /// Configuration file poll interval in milliseconds
    #[arg(long, default_value = "1000")]
    config_poll_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = match args.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        };
        EnvFilter::from_default_env().add_directive(level.into())
    });

    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("SMT Exporter v{}", env!("CARGO_PKG_VERSION"));

    let config = match ConfigStore::load(&args.config) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("Failed to load {}: {}", args.config.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let script = match args.script.as_ref().map(ReplayScript::from_file).transpose() {
        Ok(script) => script,
        Err(e) => {
            error!("Failed to load replay script: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Without a script the store is open and empty from the start
    let (initial, scene) = match script {
        Some(_) => (HostSnapshot::default(), None),
        None => {
            info!("No script specified, running in static mode");
            (HostSnapshot::empty_store(), Some(SUPERMARKET_SCENE.to_string()))
        }
    };

    let host = match HostThread::spawn(Arc::clone(&config), initial, scene) {
        Ok(host) => host,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let replay = match script {
        Some(script) => {
            let config = ReplayConfig {
                speed: args.speed,
                loop_replay: args.loop_replay,
            };
            match ReplayEngine::new(script, config, host.handle()) {
                Ok(engine) => {
                    let engine = Arc::new(engine);
                    let runner = Arc::clone(&engine);
                    let task = tokio::spawn(async move {
                        runner.run().await;
                    });
                    Some((engine, task))
                }
                Err(e) => {
                    error!("Failed to start replay: {}", e);
                    tokio::task::spawn_blocking(move || host.shutdown()).await.ok();
                    return ExitCode::FAILURE;
                }
            }
        }
        None => None,
    };

    let reload = host.handle();
    let watcher = tokio::spawn(watch_config(
        args.config.clone(),
        Duration::from_millis(args.config_poll_ms.max(1)),
        move || reload.send(HostCommand::ReloadConfig).is_ok(),
    ));

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutting down"),
        Err(e) => error!("Unable to listen for shutdown signal: {}", e),
    }

    watcher.abort();
    if let Some((engine, task)) = replay {
        engine.stop();
        task.abort();
        let state = engine.state();
        info!(
            "Replay stopped at frame {}/{}",
            state.position.load(Ordering::SeqCst),
            state.total_frames.load(Ordering::SeqCst)
        );
    }

    // Joins the pull and push workers through the plugin unload
    if tokio::task::spawn_blocking(move || host.shutdown())
        .await
        .is_err()
    {
        error!("Host shutdown panicked");
        return ExitCode::FAILURE;
    }

    info!("Bye");
    ExitCode::SUCCESS
}
