//! Adaptive trigger/streaming classification
//!
//! Every adaptive actuator carries a [`ModeDetector`]. Connection setup pushes
//! the upstream producer's classification into it; failing that, the first
//! event decides: a payload carrying a `fire` key means the producer speaks in
//! discrete triggers, anything else is a continuous value stream. Once the
//! detector leaves `Unknown` it stays put until the actuator is reconfigured.
//!
//! This auto-detection is what lets one actuator implementation sit downstream
//! of an arbitrary producer without static configuration.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::event::Event;

/// How a producer or consumer handles events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    /// Not yet determined; compatible with everything
    Unknown,
    /// Discrete momentary events carrying a fire flag
    Trigger,
    /// Continuous value stream, applied as it arrives
    Streaming,
}

/// Connection compatibility matrix.
///
/// Trigger may feed {Trigger, Streaming}; Streaming may feed {Streaming,
/// Trigger}; Unknown is compatible with everything. Kept explicit so site
/// policy can tighten it later without touching the router.
pub fn compatible(producer: Classification, consumer: Classification) -> bool {
    use Classification::*;
    match (producer, consumer) {
        (Unknown, _) | (_, Unknown) => true,
        (Trigger, Trigger) | (Trigger, Streaming) => true,
        (Streaming, Streaming) | (Streaming, Trigger) => true,
    }
}

/// Per-actuator sticky mode state
#[derive(Debug)]
pub struct ModeDetector {
    mode: Mutex<Classification>,
}

impl ModeDetector {
    pub fn new() -> Self {
        Self {
            mode: Mutex::new(Classification::Unknown),
        }
    }

    pub fn with(mode: Classification) -> Self {
        Self {
            mode: Mutex::new(mode),
        }
    }

    pub fn classification(&self) -> Classification {
        *self.mode.lock().unwrap()
    }

    /// Apply the upstream producer's classification (connection setup).
    ///
    /// `Unknown` is ignored - only `reset` returns the detector to the
    /// undetermined state.
    pub fn set_classification(&self, classification: Classification) {
        if classification == Classification::Unknown {
            return;
        }
        let mut mode = self.mode.lock().unwrap();
        if *mode != classification {
            debug!(from = ?*mode, to = ?classification, "mode set by upstream");
            *mode = classification;
        }
    }

    /// Back to `Unknown`, for reconfiguration with a different producer
    pub fn reset(&self) {
        *self.mode.lock().unwrap() = Classification::Unknown;
    }

    /// Resolve the mode to process `event` under.
    ///
    /// While `Unknown`, the event itself decides - presence of a `fire` key
    /// means `Trigger`, absence means `Streaming` - and the caller processes
    /// this same event under the new state. Never returns `Unknown`.
    pub fn resolve(&self, event: &Event) -> Classification {
        let mut mode = self.mode.lock().unwrap();
        if *mode == Classification::Unknown {
            *mode = if event.has_fire_flag() {
                Classification::Trigger
            } else {
                Classification::Streaming
            };
            debug!(source = %event.source, detected = ?*mode, "mode auto-detected");
        }
        *mode
    }
}

impl Default for ModeDetector {
    fn default() -> Self {
        Self::new()
    }
}
