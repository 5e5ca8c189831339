// SMT Exporter - Store replay engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Store replay engine.
//!
//! Plays a recorded JSON script of host states and events through the host
//! thread, so the plugin sees the same sequence it would see in-game.
//!
//! ```json
//! { "frames": [
//!     { "at_ms": 0, "scene": "B_Main", "state": { "game_data": { "funds": 500.0 } } },
//!     { "at_ms": 1500, "events": [ { "type": "checkout", "product_id": 3, "price": 4.5 } ] }
//! ] }
//! ```

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use smt_stats::{HostEvent, HostSnapshot};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::driver::{HostCommand, HostHandle};

/// Configuration for replay.
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// Replay speed multiplier (1.0 = real-time, 10.0 = 10x faster).
    pub speed: f64,
    /// Whether to loop the script.
    pub loop_replay: bool,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            speed: 1.0,
            loop_replay: true,
        }
    }
}

/// One point of the recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayFrame {
    /// Offset from the start of the recording
    pub at_ms: u64,
    /// Scene loaded at this point, if it changed
    #[serde(default)]
    pub scene: Option<String>,
    /// Full host graph at this point, if it changed
    #[serde(default)]
    pub state: Option<HostSnapshot>,
    /// Events fired at this point, in order
    #[serde(default)]
    pub events: Vec<HostEvent>,
}

/// A recorded session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayScript {
    pub frames: Vec<ReplayFrame>,
}

impl ReplayScript {
    /// Load and check a script file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ReplayError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ReplayError::FileNotFound(path.display().to_string()));
        }
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Parse and check a script.
    pub fn from_json(text: &str) -> Result<Self, ReplayError> {
        let script: ReplayScript = serde_json::from_str(text)?;
        if script.frames.is_empty() {
            return Err(ReplayError::EmptyScript);
        }
        if let Some(pair) = script.frames.windows(2).find(|w| w[1].at_ms < w[0].at_ms) {
            return Err(ReplayError::InvalidFormat(format!(
                "frame at {}ms follows frame at {}ms",
                pair[1].at_ms, pair[0].at_ms
            )));
        }
        Ok(script)
    }

    /// Script information.
    pub fn info(&self) -> ScriptInfo {
        let duration_ms = match (self.frames.first(), self.frames.last()) {
            (Some(first), Some(last)) => last.at_ms - first.at_ms,
            _ => 0,
        };
        ScriptInfo {
            frame_count: self.frames.len(),
            event_count: self.frames.iter().map(|f| f.events.len()).sum(),
            duration_ms,
        }
    }
}

/// Script information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptInfo {
    pub frame_count: usize,
    pub event_count: usize,
    pub duration_ms: u64,
}

/// State of the replay engine.
#[derive(Debug)]
pub struct ReplayState {
    /// Index of the next frame to play.
    pub position: AtomicUsize,
    /// Total frames in the script.
    pub total_frames: AtomicUsize,
    /// Whether replay is running.
    pub running: AtomicBool,
}

impl Default for ReplayState {
    fn default() -> Self {
        Self {
            position: AtomicUsize::new(0),
            total_frames: AtomicUsize::new(0),
            running: AtomicBool::new(false),
        }
    }
}

/// Replay engine that feeds a script into the host thread.
pub struct ReplayEngine {
    config: ReplayConfig,
    state: Arc<ReplayState>,
    frames: Vec<ReplayFrame>,
    host: HostHandle,
}

impl ReplayEngine {
    pub fn new(
        script: ReplayScript,
        config: ReplayConfig,
        host: HostHandle,
    ) -> Result<Self, ReplayError> {
        if !(config.speed.is_finite() && config.speed > 0.0) {
            return Err(ReplayError::InvalidSpeed(config.speed));
        }

        let state = Arc::new(ReplayState::default());
        state
            .total_frames
            .store(script.frames.len(), Ordering::SeqCst);

        let info = script.info();
        info!(
            "Loaded script: {} frames, {} events, {}ms",
            info.frame_count, info.event_count, info.duration_ms
        );

        Ok(Self {
            config,
            state,
            frames: script.frames,
            host,
        })
    }

    /// Get the replay state.
    pub fn state(&self) -> Arc<ReplayState> {
        Arc::clone(&self.state)
    }

    /// Start the replay loop (runs until stopped, the script ends, or the
    /// host thread exits).
    pub async fn run(&self) {
        self.state.running.store(true, Ordering::SeqCst);
        info!(
            "Starting replay: speed={}, loop={}",
            self.config.speed, self.config.loop_replay
        );

        loop {
            if !self.state.running.load(Ordering::SeqCst) {
                break;
            }

            let position = self.state.position.load(Ordering::SeqCst);

            if position >= self.frames.len() {
                if self.config.loop_replay {
                    info!("Script complete, looping...");
                    self.state.position.store(0, Ordering::SeqCst);
                    continue;
                } else {
                    info!("Script complete, stopping");
                    self.state.running.store(false, Ordering::SeqCst);
                    break;
                }
            }

            let frame = &self.frames[position];
            if let Err(e) = self.play_frame(frame, position) {
                warn!("Stopping replay: {}", e);
                self.state.running.store(false, Ordering::SeqCst);
                break;
            }

            self.state.position.fetch_add(1, Ordering::SeqCst);

            // Nothing to wait for after the last frame of a one-shot replay
            let gap_ms = match self.frames.get(position + 1) {
                Some(next) => next.at_ms - frame.at_ms,
                None if self.config.loop_replay => 1_000,
                None => 0,
            };
            let sleep_ms = (gap_ms as f64 / self.config.speed) as u64;
            if sleep_ms > 0 {
                sleep(Duration::from_millis(sleep_ms)).await;
            }
        }
    }

    /// Send one frame to the host: state first, then scene, then events.
    fn play_frame(&self, frame: &ReplayFrame, position: usize) -> Result<(), ReplayError> {
        debug!("Playing frame {} at {}ms", position, frame.at_ms);

        if let Some(state) = &frame.state {
            self.send(HostCommand::Replace(Box::new(state.clone())))?;
        }
        if let Some(scene) = &frame.scene {
            self.send(HostCommand::Event(HostEvent::SceneLoaded {
                name: scene.clone(),
            }))?;
        }
        for event in &frame.events {
            self.send(HostCommand::Event(event.clone()))?;
        }
        Ok(())
    }

    fn send(&self, command: HostCommand) -> Result<(), ReplayError> {
        self.host.send(command).map_err(|_| ReplayError::HostGone)
    }

    /// Stop the replay after the frame in progress.
    pub fn stop(&self) {
        self.state.running.store(false, Ordering::SeqCst);
    }
}

/// Replay errors.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Empty script")]
    EmptyScript,

    #[error("Replay speed must be a positive number, got {0}")]
    InvalidSpeed(f64),

    #[error("Host thread is gone")]
    HostGone,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
