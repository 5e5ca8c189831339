//! Error types for SMT Stats
//!
//! This module defines all error types used throughout the library.

use std::net::SocketAddr;

use thiserror::Error;

/// Result type alias for SMT Stats operations
pub type Result<T> = std::result::Result<T, StatsError>;

/// Main error type for SMT Stats operations
#[derive(Error, Debug)]
pub enum StatsError {
    /// I/O error (config file, worker thread spawn)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid TOML for [`crate::Settings`]
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Settings could not be rendered back to TOML
    #[error("Config serialize error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    /// Settings parsed but hold unusable values
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Pull server could not bind its listener
    #[error("Cannot bind metrics handler on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Error reported by the metrics registry or push client
    #[error("Prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),

    /// A host object the collection step depends on is not present
    #[error("Host object not found: {0}")]
    MissingHostObject(&'static str),

    /// Host graph does not have the expected shape
    #[error("Unexpected number of container categories: got {found}, expected {expected}")]
    StructuralMismatch { found: usize, expected: usize },

    /// The host reader panicked while a step was reading it
    #[error("Host reader panicked during {0}")]
    HostPanic(&'static str),
}

impl StatsError {
    /// Whether this error only means "nothing to read this cycle".
    ///
    /// Missing host objects are expected outside of a loaded store and are
    /// logged as warnings; everything else is logged as an error.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::MissingHostObject(_))
    }
}
