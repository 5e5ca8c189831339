// SMT Exporter - Host thread driver
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! The host thread.
//!
//! Stands in for the game's main thread: it owns the plugin, the event bus
//! and the configuration store, and runs every host-side action one at a
//! time from a command queue. Replay, config watching and shutdown all go
//! through [`HostHandle::send`].

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use smt_stats::{ConfigStore, HostEvent, HostEventBus, HostSnapshot, Plugin, SharedHost, StatsError};
use tracing::{debug, error, info};

/// One action executed on the host thread
pub enum HostCommand {
    /// Fire a host event on the bus
    Event(HostEvent),
    /// Swap in a new host graph
    Replace(Box<HostSnapshot>),
    /// Re-read the configuration file
    ReloadConfig,
    /// Run a closure against the loaded plugin
    #[allow(dead_code)]
    Inspect(Box<dyn FnOnce(&Plugin) + Send>),
    /// Unload the plugin and exit the thread
    Shutdown,
}

impl std::fmt::Debug for HostCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostCommand::Event(event) => f.debug_tuple("Event").field(event).finish(),
            HostCommand::Replace(_) => f.write_str("Replace"),
            HostCommand::ReloadConfig => f.write_str("ReloadConfig"),
            HostCommand::Inspect(_) => f.write_str("Inspect"),
            HostCommand::Shutdown => f.write_str("Shutdown"),
        }
    }
}

/// Driver errors.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("Plugin failed to load: {0}")]
    Load(#[from] StatsError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Host thread is gone")]
    HostGone,
}

/// Cloneable sender into the host thread's queue
#[derive(Clone)]
pub struct HostHandle {
    tx: mpsc::Sender<HostCommand>,
}

impl HostHandle {
    /// Queue a command. Fails once the host thread has exited.
    pub fn send(&self, command: HostCommand) -> Result<(), DriverError> {
        self.tx.send(command).map_err(|_| DriverError::HostGone)
    }
}

/// The running host thread.
pub struct HostThread {
    handle: HostHandle,
    thread: Option<thread::JoinHandle<()>>,
}

impl HostThread {
    /// Spawn the host thread and load the plugin on it.
    ///
    /// Returns once the plugin is loaded, or with the load error.
    pub fn spawn(
        config: Arc<ConfigStore>,
        initial: HostSnapshot,
        active_scene: Option<String>,
    ) -> Result<Self, DriverError> {
        let (tx, rx) = mpsc::channel::<HostCommand>();
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<(), StatsError>>(1);

        let thread = thread::Builder::new()
            .name("smt-host".to_string())
            .spawn(move || {
                let host = Arc::new(SharedHost::new(initial));
                let bus = HostEventBus::new();
                let plugin = Plugin::load(
                    Arc::clone(&config),
                    host.clone(),
                    &bus,
                    active_scene.as_deref(),
                );
                match plugin {
                    Ok(mut plugin) => {
                        let _ = ready_tx.send(Ok(()));
                        run(&rx, &config, &host, &bus, &plugin);
                        plugin.unload();
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                handle: HostHandle { tx },
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(DriverError::Load(e))
            }
            Err(_) => {
                let _ = thread.join();
                Err(DriverError::HostGone)
            }
        }
    }

    pub fn handle(&self) -> HostHandle {
        self.handle.clone()
    }

    /// Unload the plugin and wait for the thread to exit.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let _ = self.handle.send(HostCommand::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Host thread panicked");
            }
        }
    }
}

impl Drop for HostThread {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(
    rx: &mpsc::Receiver<HostCommand>,
    config: &ConfigStore,
    host: &SharedHost,
    bus: &HostEventBus,
    plugin: &Plugin,
) {
    info!("Host thread running");
    // All senders dropped counts as shutdown
    while let Ok(command) = rx.recv() {
        debug!("Host command: {:?}", command);
        match command {
            HostCommand::Event(event) => bus.publish(&event),
            HostCommand::Replace(snapshot) => host.replace(*snapshot),
            HostCommand::ReloadConfig => {
                // A bad file is logged by the store and the old settings stay
                if let Ok(false) = config.reload() {
                    debug!("Configuration file touched, settings unchanged");
                }
            }
            HostCommand::Inspect(f) => f(plugin),
            HostCommand::Shutdown => break,
        }
    }
    info!("Host thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use smt_stats::Settings;

    fn quiet_config() -> Arc<ConfigStore> {
        let mut settings = Settings::default();
        settings.handler.enable = false;
        Arc::new(ConfigStore::new(settings))
    }

    fn inspect<T: Send + 'static>(
        handle: &HostHandle,
        f: impl FnOnce(&Plugin) -> T + Send + 'static,
    ) -> T {
        let (tx, rx) = mpsc::channel();
        handle
            .send(HostCommand::Inspect(Box::new(move |plugin| {
                let _ = tx.send(f(plugin));
            })))
            .unwrap();
        rx.recv().unwrap()
    }

    #[test]
    fn test_events_reach_plugin_in_order() {
        let host = HostThread::spawn(quiet_config(), HostSnapshot::empty_store(), None).unwrap();
        let handle = host.handle();

        handle
            .send(HostCommand::Event(HostEvent::SceneLoaded {
                name: smt_stats::SUPERMARKET_SCENE.to_string(),
            }))
            .unwrap();
        handle
            .send(HostCommand::Event(HostEvent::NpcNotification {
                message: "NPCmessage0".to_string(),
                addon: String::new(),
            }))
            .unwrap();

        let (active, not_found) = inspect(&handle, |plugin| {
            (
                plugin.session_active(),
                plugin.metrics().products_not_found.get(),
            )
        });
        assert!(active);
        assert_eq!(not_found, 1.0);

        host.shutdown();
        assert!(handle.send(HostCommand::ReloadConfig).is_err());
    }

    #[test]
    fn test_replace_is_seen_by_next_collection() {
        let host = HostThread::spawn(quiet_config(), HostSnapshot::empty_store(), None).unwrap();
        let handle = host.handle();

        let mut snapshot = HostSnapshot::empty_store();
        snapshot.game_data = Some(smt_stats::host::GameData {
            funds: 99.0,
            ..Default::default()
        });
        handle.send(HostCommand::Replace(Box::new(snapshot))).unwrap();

        let funds = inspect(&handle, |plugin| {
            plugin.collector().collect();
            plugin.metrics().funds.get()
        });
        assert_eq!(funds, 99.0);
    }

    #[test]
    fn test_channel_start_failure_does_not_fail_load() {
        let mut settings = Settings::default();
        settings.handler.address = "nowhere".to_string();
        let config = Arc::new(ConfigStore::new(settings));

        let host = HostThread::spawn(
            config,
            HostSnapshot::empty_store(),
            Some(smt_stats::SUPERMARKET_SCENE.to_string()),
        )
        .unwrap();
        let running = inspect(&host.handle(), |plugin| {
            plugin.is_running(smt_stats::ChannelKind::Pull)
        });
        assert!(!running);
    }
}
