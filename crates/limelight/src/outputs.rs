//! Actuator adapters and DMX transports
//!
//! Three transports carry a finished frame to hardware: serial framing over a
//! byte sink, ArtDmx over UDP, and a validated hand-off to a platform sACN
//! sender. The [`DmxOutput`] actuator sits above whichever transport the site
//! configured and adapts to its upstream producer through a [`ModeDetector`]:
//! trigger events play a chase pass, streaming values land on one channel.

use std::io::Write;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use limeproto::{
    encode_art_dmx, encode_serial_dmx, ChannelRows, ChannelTable, DmxFrame, SacnOutput,
    ARTNET_PORT,
};

use crate::chase::{ChasePlayer, DmxTransport};
use crate::event::Event;
use crate::modes::{Classification, ModeDetector};
use crate::module::{Consumer, Module};

/// ArtDmx over UDP to one node
pub struct ArtnetTransport {
    socket: UdpSocket,
    target: SocketAddr,
    universe: u16,
}

impl ArtnetTransport {
    pub fn new(host: &str, universe: u16) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").context("binding art-net send socket")?;
        let target: SocketAddr = format!("{host}:{ARTNET_PORT}")
            .parse()
            .with_context(|| format!("invalid art-net host '{host}'"))?;
        Ok(Self {
            socket,
            target,
            universe,
        })
    }
}

impl DmxTransport for ArtnetTransport {
    fn send_frame(&self, frame: &DmxFrame) -> Result<()> {
        let packet = encode_art_dmx(self.universe, frame);
        self.socket
            .send_to(&packet, self.target)
            .with_context(|| format!("art-net send to {}", self.target))?;
        Ok(())
    }
}

/// Serial framing written to any byte sink (a serial port file in production)
pub struct SerialTransport<W: Write + Send> {
    sink: Mutex<W>,
}

impl<W: Write + Send> SerialTransport<W> {
    pub fn new(sink: W) -> Self {
        Self {
            sink: Mutex::new(sink),
        }
    }
}

impl<W: Write + Send> DmxTransport for SerialTransport<W> {
    fn send_frame(&self, frame: &DmxFrame) -> Result<()> {
        let packet = encode_serial_dmx(frame);
        let mut sink = self.sink.lock().unwrap();
        sink.write_all(&packet).context("serial write")?;
        sink.flush().context("serial flush")?;
        Ok(())
    }
}

/// Validated hand-off to the platform sACN multicast sender
pub struct SacnTransport {
    output: SacnOutput,
    universe: u16,
}

impl SacnTransport {
    pub fn new(output: SacnOutput, universe: u16) -> Self {
        Self { output, universe }
    }
}

impl DmxTransport for SacnTransport {
    fn send_frame(&self, frame: &DmxFrame) -> Result<()> {
        self.output.send(self.universe, frame)?;
        Ok(())
    }
}

/// DMX actuator configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DmxOutputConfig {
    /// 1-indexed DMX channel streaming values land on
    pub channel: usize,
    /// Chase playback rate in frames per second
    pub rate_hz: f64,
    /// Optional chase table; trigger events without one flash the channel
    pub table: Option<ChannelRows>,
}

impl Default for DmxOutputConfig {
    fn default() -> Self {
        Self {
            channel: 3,
            rate_hz: 30.0,
            table: None,
        }
    }
}

struct DmxState {
    config: DmxOutputConfig,
    chase: Option<ChasePlayer>,
    /// Last frame written, so streaming updates keep other channels intact
    frame: DmxFrame,
}

/// Adaptive DMX actuator.
///
/// Sits downstream of an arbitrary producer. Trigger events play one chase
/// pass (or flash the configured channel when no table is loaded); streaming
/// values are applied to the configured channel as they arrive. A `frame_no`
/// key in the payload is stamped onto DMX channels 1-2 before sending.
pub struct DmxOutput {
    name: String,
    transport: Arc<dyn DmxTransport>,
    detector: ModeDetector,
    state: Mutex<DmxState>,
    /// Transport currently faulting; gates the warn/recover log pair
    down: AtomicBool,
}

impl DmxOutput {
    pub fn new(
        name: impl Into<String>,
        config: DmxOutputConfig,
        transport: Arc<dyn DmxTransport>,
    ) -> Self {
        let chase = build_chase(&config, &transport);
        Self {
            name: name.into(),
            transport,
            detector: ModeDetector::new(),
            state: Mutex::new(DmxState {
                config,
                chase,
                frame: DmxFrame::zeroed(),
            }),
            down: AtomicBool::new(false),
        }
    }

    /// Current detected mode, for diagnostics
    pub fn mode(&self) -> Classification {
        self.detector.classification()
    }

    fn send(&self, frame: &DmxFrame) -> Result<()> {
        match self.transport.send_frame(frame) {
            Ok(()) => {
                if self.down.swap(false, Ordering::Relaxed) {
                    info!(output = self.name, "dmx transport recovered");
                }
                Ok(())
            }
            Err(e) => {
                // Log the first fault, then stay quiet until recovery; the
                // next event retries the transport regardless.
                if !self.down.swap(true, Ordering::Relaxed) {
                    warn!(output = self.name, error = %e, "dmx transport fault");
                }
                Err(e)
            }
        }
    }

    fn handle_trigger(&self, event: &Event) -> Result<()> {
        if !event.fire() {
            debug!(output = self.name, "unset fire flag ignored");
            return Ok(());
        }

        let mut state = self.state.lock().unwrap();
        if let Some(chase) = &state.chase {
            chase.trigger();
            return Ok(());
        }

        // No table loaded: flash the configured channel at full for one frame
        let channel = state.config.channel;
        state.frame.set(channel.saturating_sub(1), 255);
        if let Some(frame_no) = frame_number(event) {
            state.frame.set_frame_number(frame_no);
        }
        let frame = state.frame.clone();
        drop(state);
        self.send(&frame)
    }

    fn handle_streaming(&self, event: &Event) -> Result<()> {
        let Some(level) = event.value().and_then(channel_level) else {
            debug!(output = self.name, "streaming event without usable value");
            return Ok(());
        };

        let mut state = self.state.lock().unwrap();
        let channel = state.config.channel;
        state.frame.set(channel.saturating_sub(1), level);
        if let Some(frame_no) = frame_number(event) {
            state.frame.set_frame_number(frame_no);
        }
        let frame = state.frame.clone();
        drop(state);
        self.send(&frame)
    }
}

impl Module for DmxOutput {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&self) -> Result<()> {
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        if let Some(chase) = &self.state.lock().unwrap().chase {
            chase.cancel();
        }
        Ok(())
    }

    fn update_config(&self, config: Value) -> Result<()> {
        let parsed: DmxOutputConfig =
            serde_json::from_value(config).context("invalid dmx output config")?;
        let mut state = self.state.lock().unwrap();
        if let Some(chase) = state.chase.take() {
            chase.cancel();
        }
        state.chase = build_chase(&parsed, &self.transport);
        state.config = parsed;
        // New wiring may mean a different producer; detect afresh
        self.detector.reset();
        info!(output = self.name, "dmx output reconfigured");
        Ok(())
    }

    fn set_input_classification(&self, classification: Classification) {
        self.detector.set_classification(classification);
    }

    fn as_consumer(self: Arc<Self>) -> Option<Arc<dyn Consumer>> {
        Some(self)
    }
}

impl Consumer for DmxOutput {
    fn handle_event(&self, event: Arc<Event>) -> Result<()> {
        match self.detector.resolve(&event) {
            Classification::Trigger => self.handle_trigger(&event),
            Classification::Streaming => self.handle_streaming(&event),
            // resolve() never leaves a detector at Unknown
            Classification::Unknown => Ok(()),
        }
    }
}

fn build_chase(config: &DmxOutputConfig, transport: &Arc<dyn DmxTransport>) -> Option<ChasePlayer> {
    let rows = config.table.as_ref()?;
    let table: ChannelTable = rows.clone().into();
    if table.is_empty() {
        return None;
    }
    Some(ChasePlayer::new(
        Arc::new(table),
        config.rate_hz,
        transport.clone(),
    ))
}

/// `frame_no` payload key, clamped into u16
fn frame_number(event: &Event) -> Option<u16> {
    event
        .payload
        .get("frame_no")
        .and_then(Value::as_u64)
        .map(|n| (n % (u16::MAX as u64 + 1)) as u16)
}

/// Map a payload value onto one DMX channel level.
///
/// Integers clamp into 0..=255; floats are treated as normalized 0.0..=1.0
/// and scaled. Anything else is unusable.
fn channel_level(value: &Value) -> Option<u8> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i.clamp(0, 255) as u8)
            } else {
                n.as_f64()
                    .map(|f| (f.clamp(0.0, 1.0) * 255.0).round() as u8)
            }
        }
        Value::Bool(b) => Some(if *b { 255 } else { 0 }),
        _ => None,
    }
}
