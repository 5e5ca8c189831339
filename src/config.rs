//! Configuration types and the hot-reloadable settings store.
//!
//! Settings persist as TOML:
//!
//! ```toml
//! [handler]
//! enable = true
//! port = 1234
//!
//! [pushgateway]
//! enable = false
//! endpoint = "http://localhost:9091/metrics"
//! job = "SMT"
//! ```

use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, StatsError};
use crate::observer::{Observers, Subscription};

/// Shortest accepted push interval
pub const MIN_PUSH_INTERVAL_MS: u64 = 100;

/// Complete configuration snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Pull endpoint (metrics handler)
    pub handler: HandlerSettings,

    /// Push client (Pushgateway)
    pub pushgateway: PushSettings,
}

/// Pull endpoint settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandlerSettings {
    /// Enable metrics handler (default: true)
    pub enable: bool,

    /// Metrics handler port (default: 1234)
    pub port: u16,

    /// Listen address (default: all interfaces)
    pub address: String,
}

impl Default for HandlerSettings {
    fn default() -> Self {
        Self {
            enable: true,
            port: 1234,
            address: "0.0.0.0".to_string(),
        }
    }
}

/// Pushgateway settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PushSettings {
    /// Use Pushgateway (default: false)
    pub enable: bool,

    /// Pushgateway endpoint
    pub endpoint: String,

    /// Pushgateway job
    pub job: String,

    /// Delay between two pushes in milliseconds
    pub interval_ms: u64,
}

impl Default for PushSettings {
    fn default() -> Self {
        Self {
            enable: false,
            endpoint: "http://localhost:9091/metrics".to_string(),
            job: "SMT".to_string(),
            interval_ms: 1000,
        }
    }
}

impl Settings {
    /// Parse settings from TOML text. Missing keys take their defaults.
    pub fn from_toml(text: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Render settings as TOML text
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject values no channel could be built from.
    pub fn validate(&self) -> Result<()> {
        self.pushgateway.validate()
    }
}

impl PushSettings {
    /// Check the endpoint, job and interval.
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.trim().is_empty() {
            return Err(StatsError::InvalidConfig(
                "pushgateway.endpoint must not be empty".to_string(),
            ));
        }
        if self.job.is_empty() || self.job.contains('/') {
            return Err(StatsError::InvalidConfig(format!(
                "pushgateway.job must be a non-empty path segment, got {:?}",
                self.job
            )));
        }
        if self.interval_ms < MIN_PUSH_INTERVAL_MS {
            return Err(StatsError::InvalidConfig(format!(
                "pushgateway.interval_ms must be at least {}, got {}",
                MIN_PUSH_INTERVAL_MS, self.interval_ms
            )));
        }
        Ok(())
    }
}

/// Current settings plus change notification.
///
/// Observers are notified on the thread that applied the change, after the
/// new snapshot is visible, and only when the snapshot actually changed.
pub struct ConfigStore {
    current: RwLock<Settings>,
    path: Option<PathBuf>,
    observers: Observers<Settings>,
}

impl ConfigStore {
    /// In-memory store, not backed by a file
    pub fn new(settings: Settings) -> Self {
        Self {
            current: RwLock::new(settings),
            path: None,
            observers: Observers::new(),
        }
    }

    /// Load settings from `path`, writing the defaults there when the file
    /// does not exist yet.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let settings = if path.exists() {
            read_settings(&path)?
        } else {
            let settings = Settings::default();
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, settings.to_toml()?)?;
            info!("Wrote default configuration to {}", path.display());
            settings
        };

        Ok(Self {
            current: RwLock::new(settings),
            path: Some(path),
            observers: Observers::new(),
        })
    }

    /// File this store was loaded from, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Copy of the current settings
    pub fn snapshot(&self) -> Settings {
        self.current.read().clone()
    }

    /// Register a change observer
    #[must_use = "dropping the subscription detaches the observer immediately"]
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Settings) + Send + Sync + 'static,
    {
        self.observers.subscribe(callback)
    }

    /// Replace the settings. Returns whether anything changed.
    pub fn replace(&self, settings: Settings) -> Result<bool> {
        settings.validate()?;
        {
            let mut current = self.current.write();
            if *current == settings {
                return Ok(false);
            }
            *current = settings.clone();
        }
        info!("Config changed !");
        self.observers.notify(&settings);
        Ok(true)
    }

    /// Apply an in-place edit to a copy of the current settings.
    pub fn update<F>(&self, edit: F) -> Result<bool>
    where
        F: FnOnce(&mut Settings),
    {
        let mut settings = self.snapshot();
        edit(&mut settings);
        self.replace(settings)
    }

    /// Re-read the backing file.
    ///
    /// A file that fails to parse or validate leaves the current settings in
    /// place; the error is logged and returned.
    pub fn reload(&self) -> Result<bool> {
        let Some(path) = self.path.as_deref() else {
            return Ok(false);
        };
        match read_settings(path) {
            Ok(settings) => self.replace(settings),
            Err(e) => {
                warn!("Keeping previous configuration, reload of {} failed: {}", path.display(), e);
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigStore")
            .field("current", &*self.current.read())
            .field("path", &self.path)
            .field("observers", &self.observers.len())
            .finish()
    }
}

fn read_settings(path: &Path) -> Result<Settings> {
    let text = std::fs::read_to_string(path)?;
    Settings::from_toml(&text)
}
