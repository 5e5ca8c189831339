//! Lifecycle controller for the exposition channels.
//!
//! Keeps one invariant: a channel runs if and only if its `enable` flag is
//! set **and** the instrumented scene is loaded. Every trigger (config
//! change, scene loaded, scene left) goes through [`LifecycleController::reconcile`].
//!
//! Triggers come from the host thread only; the controller is not meant to
//! be driven from several threads at once.

use std::sync::Arc;

use tracing::{error, info};

use crate::config::{ConfigStore, HandlerSettings, PushSettings};
use crate::exposition::{ChannelFactory, ChannelKind, ExpositionChannel};

/// Scene in which the store is running
pub const SUPERMARKET_SCENE: &str = "B_Main";

/// A started channel and the settings it was built from
struct Live<S> {
    settings: S,
    channel: Box<dyn ExpositionChannel>,
}

/// Owns the pull server and push client handles.
pub struct LifecycleController {
    factory: Box<dyn ChannelFactory>,
    config: Arc<ConfigStore>,
    target_scene: String,
    session_active: bool,
    closed: bool,
    pull: Option<Live<HandlerSettings>>,
    push: Option<Live<PushSettings>>,
}

impl LifecycleController {
    /// New controller, session inactive, nothing running
    pub fn new(
        factory: Box<dyn ChannelFactory>,
        config: Arc<ConfigStore>,
        target_scene: impl Into<String>,
    ) -> Self {
        Self {
            factory,
            config,
            target_scene: target_scene.into(),
            session_active: false,
            closed: false,
            pull: None,
            push: None,
        }
    }

    /// Whether the instrumented scene is loaded
    pub fn session_active(&self) -> bool {
        self.session_active
    }

    /// Whether a channel of `kind` is currently running
    pub fn is_running(&self, kind: ChannelKind) -> bool {
        match kind {
            ChannelKind::Pull => self.pull.as_ref().is_some_and(|l| l.channel.is_running()),
            ChannelKind::Push => self.push.as_ref().is_some_and(|l| l.channel.is_running()),
        }
    }

    /// A scene finished loading.
    pub fn on_scene_loaded(&mut self, name: &str) {
        if self.closed {
            return;
        }
        info!("Loading scene {}", name);
        self.session_active = name == self.target_scene;
        if self.session_active {
            info!("In supermarket game !");
        } else {
            info!("Left supermarket game");
        }
        self.reconcile();
    }

    /// The current scene was unloaded.
    pub fn on_scene_unloaded(&mut self) {
        if self.closed {
            return;
        }
        if self.session_active {
            info!("Left supermarket game");
        }
        self.session_active = false;
        self.reconcile();
    }

    /// Bring the channels in line with the latest settings and session state.
    ///
    /// Channels that must not run, whose settings changed, or whose worker
    /// died are stopped first; then every channel that should run and is not
    /// running is started with fresh settings. With unchanged inputs this is
    /// a no-op, and after [`shutdown`](Self::shutdown) it never starts anything.
    pub fn reconcile(&mut self) {
        if self.closed {
            return;
        }
        let settings = self.config.snapshot();
        let want_pull =
            (self.session_active && settings.handler.enable).then_some(settings.handler);
        let want_push =
            (self.session_active && settings.pushgateway.enable).then_some(settings.pushgateway);

        // All stops before any start: a rebuilt pull server rebinds its port.
        if must_stop(&self.pull, want_pull.as_ref()) {
            stop(&mut self.pull, ChannelKind::Pull);
        }
        if must_stop(&self.push, want_push.as_ref()) {
            stop(&mut self.push, ChannelKind::Push);
        }

        if self.pull.is_none() {
            if let Some(wanted) = want_pull {
                info!("Starting {} on port {}", ChannelKind::Pull, wanted.port);
                self.pull = start(wanted, ChannelKind::Pull, |s| self.factory.start_pull(s));
            }
        }
        if self.push.is_none() {
            if let Some(wanted) = want_push {
                info!("Starting {} for job {}", ChannelKind::Push, wanted.job);
                self.push = start(wanted, ChannelKind::Push, |s| self.factory.start_push(s));
            }
        }
    }

    /// Stop both channels for good. Later triggers are ignored.
    pub fn shutdown(&mut self) {
        self.closed = true;
        self.session_active = false;
        stop(&mut self.pull, ChannelKind::Pull);
        stop(&mut self.push, ChannelKind::Push);
    }
}

impl Drop for LifecycleController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for LifecycleController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleController")
            .field("target_scene", &self.target_scene)
            .field("session_active", &self.session_active)
            .field("closed", &self.closed)
            .field("pull", &self.is_running(ChannelKind::Pull))
            .field("push", &self.is_running(ChannelKind::Push))
            .finish()
    }
}

fn must_stop<S: PartialEq>(live: &Option<Live<S>>, wanted: Option<&S>) -> bool {
    match (live, wanted) {
        (None, _) => false,
        (Some(_), None) => true,
        (Some(live), Some(wanted)) => live.settings != *wanted || !live.channel.is_running(),
    }
}

fn stop<S>(slot: &mut Option<Live<S>>, kind: ChannelKind) {
    if let Some(mut live) = slot.take() {
        info!("Stopping {}", kind);
        live.channel.stop();
    }
}

fn start<S, F>(settings: S, kind: ChannelKind, open: F) -> Option<Live<S>>
where
    F: FnOnce(&S) -> crate::error::Result<Box<dyn ExpositionChannel>>,
{
    match open(&settings) {
        Ok(channel) => Some(Live { settings, channel }),
        Err(e) => {
            error!("Cannot start {}: {}", kind, e);
            None
        }
    }
}
