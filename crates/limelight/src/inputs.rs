//! Producer adapters
//!
//! Producers run their I/O on dedicated threads (or on the shared listener
//! hub's reader threads) and only ever call into the router through an
//! [`EventSink`] with an already-parsed payload - they never block on
//! dispatch.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use limeproto::{CallbackId, OscListenerHub, OscMessage};

use crate::event::Payload;
use crate::modes::Classification;
use crate::module::{EventSink, Module};

/// Internal metronome configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClockInputConfig {
    pub interval_ms: u64,
    /// Tag stamped onto every tick payload
    pub tag: Option<String>,
}

impl Default for ClockInputConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            tag: None,
        }
    }
}

/// Internal clock producer: emits a tick payload at a configured interval
pub struct ClockInput {
    name: String,
    config: Mutex<ClockInputConfig>,
    sink: Mutex<Option<EventSink>>,
    stop: Arc<AtomicBool>,
    ticks: Arc<AtomicU64>,
    thread: Mutex<Option<JoinHandle<()>>>,
    /// Shared with the tick thread so update_config applies live
    live_config: Mutex<Option<Arc<Mutex<ClockInputConfig>>>>,
}

impl ClockInput {
    pub fn new(name: impl Into<String>, config: ClockInputConfig) -> Self {
        Self {
            name: name.into(),
            config: Mutex::new(config),
            sink: Mutex::new(None),
            stop: Arc::new(AtomicBool::new(false)),
            ticks: Arc::new(AtomicU64::new(0)),
            thread: Mutex::new(None),
            live_config: Mutex::new(None),
        }
    }

    pub fn tick_count(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }
}

impl Module for ClockInput {
    fn name(&self) -> &str {
        &self.name
    }

    /// Continuous tick stream
    fn classification(&self) -> Classification {
        Classification::Streaming
    }

    fn start(&self) -> Result<()> {
        let sink = self
            .sink
            .lock()
            .unwrap()
            .clone()
            .context("clock started without an event sink")?;

        self.stop.store(false, Ordering::Relaxed);
        let stop = self.stop.clone();
        let ticks = self.ticks.clone();
        let config = {
            // Snapshot is re-read each tick so update_config applies live
            let guard = self.config.lock().unwrap();
            guard.clone()
        };
        let config_cell = Arc::new(Mutex::new(config));
        {
            // keep a handle so update_config can reach the running thread
            let mut shared = self.live_config.lock().unwrap();
            *shared = Some(config_cell.clone());
        }

        let name = self.name.clone();
        let handle = thread::Builder::new()
            .name(format!("clock-{name}"))
            .spawn(move || {
                info!(clock = %name, "clock started");
                loop {
                    let (interval, tag) = {
                        let config = config_cell.lock().unwrap();
                        (config.interval_ms, config.tag.clone())
                    };
                    let mut slept = Duration::ZERO;
                    let interval = Duration::from_millis(interval.max(1));
                    while slept < interval {
                        if stop.load(Ordering::Relaxed) {
                            info!(clock = %name, "clock stopped");
                            return;
                        }
                        let step = (interval - slept).min(Duration::from_millis(50));
                        thread::sleep(step);
                        slept += step;
                    }

                    let tick = ticks.fetch_add(1, Ordering::Relaxed);
                    let mut payload = Payload::new();
                    payload.insert("tick".into(), json!(tick));
                    payload.insert("value".into(), json!(tick));
                    if let Some(tag) = &tag {
                        payload.insert("tag".into(), json!(tag));
                    }
                    sink.emit(payload);
                }
            })?;
        *self.thread.lock().unwrap() = Some(handle);
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
        Ok(())
    }

    fn update_config(&self, config: Value) -> Result<()> {
        let parsed: ClockInputConfig =
            serde_json::from_value(config).context("invalid clock config")?;
        *self.config.lock().unwrap() = parsed.clone();
        if let Some(cell) = self.live_config.lock().unwrap().as_ref() {
            *cell.lock().unwrap() = parsed;
        }
        debug!(clock = self.name, "clock reconfigured");
        Ok(())
    }

    fn set_event_sink(&self, sink: EventSink) {
        *self.sink.lock().unwrap() = Some(sink);
    }
}

/// OSC input configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OscInputConfig {
    pub port: u16,
    pub address: String,
    /// Tag stamped onto every payload; defaults to `network_trigger`
    #[serde(default = "default_osc_tag")]
    pub tag: String,
    /// Whether received messages carry a fire flag (discrete triggers)
    #[serde(default = "default_true")]
    pub fire: bool,
}

fn default_osc_tag() -> String {
    "network_trigger".into()
}

fn default_true() -> bool {
    true
}

/// Producer bridging the shared OSC listener hub into the router
pub struct OscInput {
    name: String,
    hub: Arc<OscListenerHub>,
    config: OscInputConfig,
    sink: Mutex<Option<EventSink>>,
    registration: Mutex<Option<CallbackId>>,
}

impl OscInput {
    pub fn new(name: impl Into<String>, hub: Arc<OscListenerHub>, config: OscInputConfig) -> Self {
        Self {
            name: name.into(),
            hub,
            config,
            sink: Mutex::new(None),
            registration: Mutex::new(None),
        }
    }
}

impl Module for OscInput {
    fn name(&self) -> &str {
        &self.name
    }

    fn classification(&self) -> Classification {
        if self.config.fire {
            Classification::Trigger
        } else {
            Classification::Streaming
        }
    }

    fn start(&self) -> Result<()> {
        let sink = self
            .sink
            .lock()
            .unwrap()
            .clone()
            .context("osc input started without an event sink")?;

        let tag = self.config.tag.clone();
        let fire = self.config.fire;
        let id = self.hub.register(
            self.config.port,
            &self.config.address,
            Arc::new(move |message: &OscMessage| {
                sink.emit(osc_payload(message, &tag, fire));
            }),
        )?;
        *self.registration.lock().unwrap() = Some(id);
        info!(
            input = self.name,
            port = self.config.port,
            address = self.config.address,
            "osc input listening"
        );
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        if let Some(id) = self.registration.lock().unwrap().take() {
            if !self.hub.unregister(self.config.port, &self.config.address, id) {
                warn!(input = self.name, "osc registration already gone");
            }
        }
        Ok(())
    }
}

/// Convert an OSC message into an event payload
fn osc_payload(message: &OscMessage, tag: &str, fire: bool) -> Payload {
    let mut payload = Payload::new();
    payload.insert("address".into(), json!(message.address));
    payload.insert(
        "args".into(),
        Value::Array(message.args.iter().map(|a| a.to_json()).collect()),
    );
    // First argument doubles as the carried value
    if let Some(first) = message.args.first() {
        payload.insert("value".into(), first.to_json());
    }
    payload.insert("tag".into(), json!(tag));
    if fire {
        payload.insert("fire".into(), json!(true));
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use limeproto::OscArg;

    #[test]
    fn test_osc_payload_shape() {
        let message = OscMessage::with_args("/pad/1", vec![OscArg::Int(7), OscArg::Float(0.5)]);
        let payload = osc_payload(&message, "network_trigger", true);

        assert_eq!(payload["address"], json!("/pad/1"));
        assert_eq!(payload["value"], json!(7));
        assert_eq!(payload["tag"], json!("network_trigger"));
        assert_eq!(payload["fire"], json!(true));
        assert_eq!(payload["args"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_streaming_osc_payload_has_no_fire() {
        let message = OscMessage::with_args("/fader", vec![OscArg::Float(0.8)]);
        let payload = osc_payload(&message, "fader", false);
        assert!(!payload.contains_key("fire"));
    }
}
