//! Limelight daemon
//!
//! Loads configuration, builds the scheduler and router, instantiates the
//! configured modules, wires their connections, and runs until interrupted.
//! Takes an optional config file path as its only argument.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use limeconf::LimeConfig;
use limeproto::OscListenerHub;

use limelight::inputs::{ClockInput, ClockInputConfig, OscInput, OscInputConfig};
use limelight::outputs::{ArtnetTransport, DmxOutput, DmxOutputConfig, SerialTransport};
use limelight::{
    EventRouter, Module, ModuleRegistry, PriorityPolicy, Scheduler, SourceId,
};

/// Bounded drain for in-flight scheduler tasks at shutdown
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = LimeConfig::load_from(config_path.as_deref())?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.telemetry.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        modules = config.modules.len(),
        connections = config.connections.len(),
        "limelight starting"
    );

    let scheduler = Arc::new(Scheduler::with_config(&config.scheduler)?);
    let router = Arc::new(EventRouter::new(
        scheduler.clone(),
        &config.router,
        PriorityPolicy::from_config(&config.priority),
    ));
    let hub = Arc::new(OscListenerHub::new());

    let registry = ModuleRegistry::new();
    register_builtins(&registry, hub.clone());

    for spec in &config.modules {
        let module_config = serde_json::to_value(&spec.config)
            .with_context(|| format!("config for module '{}'", spec.name))?;
        let module = registry.create(&spec.kind, &spec.name, module_config)?;
        module.set_event_sink(router.sink_for(SourceId::new(&spec.name)));
    }

    for conn in &config.connections {
        let from = registry
            .get(&conn.from)
            .ok_or_else(|| anyhow!("connection from unknown module '{}'", conn.from))?;
        let to = registry
            .get(&conn.to)
            .ok_or_else(|| anyhow!("connection to unknown module '{}'", conn.to))?;
        if !router.connect(&from, &to) {
            warn!(from = conn.from, to = conn.to, "connection refused");
        }
    }

    registry.start_all()?;
    info!("limelight running, ctrl-c to stop");

    tokio::signal::ctrl_c().await?;
    info!("interrupt received, shutting down");

    // Reverse of startup: stop producers first so nothing new enters the
    // router, then drain what is already in flight.
    registry.stop_all();
    hub.shutdown();
    router.shutdown();
    scheduler.shutdown(SHUTDOWN_TIMEOUT);

    let stats = router.stats();
    info!(
        routed = stats.routed,
        dropped = stats.dropped,
        avg_latency_us = stats.avg_latency_us,
        "limelight stopped"
    );
    Ok(())
}

/// Art-Net actuator: transport target plus the shared DMX tuning
#[derive(Debug, Deserialize)]
struct ArtnetOutputSpec {
    host: String,
    #[serde(default)]
    universe: u16,
    #[serde(flatten)]
    dmx: DmxOutputConfig,
}

/// Serial actuator: device path plus the shared DMX tuning
#[derive(Debug, Deserialize)]
struct SerialOutputSpec {
    device: PathBuf,
    #[serde(flatten)]
    dmx: DmxOutputConfig,
}

fn register_builtins(registry: &ModuleRegistry, hub: Arc<OscListenerHub>) {
    registry.register_factory(
        "clock",
        Box::new(|name, config| {
            let config: ClockInputConfig = serde_json::from_value(config)
                .with_context(|| format!("clock config for '{name}'"))?;
            Ok(Arc::new(ClockInput::new(name, config)) as Arc<dyn Module>)
        }),
    );

    registry.register_factory("osc_input", {
        let hub = hub.clone();
        Box::new(move |name, config| {
            let config: OscInputConfig = serde_json::from_value(config)
                .with_context(|| format!("osc config for '{name}'"))?;
            Ok(Arc::new(OscInput::new(name, hub.clone(), config)) as Arc<dyn Module>)
        })
    });

    registry.register_factory(
        "artnet_output",
        Box::new(|name, config| {
            let spec: ArtnetOutputSpec = serde_json::from_value(config)
                .with_context(|| format!("art-net config for '{name}'"))?;
            let transport = Arc::new(ArtnetTransport::new(&spec.host, spec.universe)?);
            Ok(Arc::new(DmxOutput::new(name, spec.dmx, transport)) as Arc<dyn Module>)
        }),
    );

    registry.register_factory(
        "serial_output",
        Box::new(|name, config| {
            let spec: SerialOutputSpec = serde_json::from_value(config)
                .with_context(|| format!("serial config for '{name}'"))?;
            let port = std::fs::OpenOptions::new()
                .write(true)
                .open(&spec.device)
                .with_context(|| format!("opening serial device {}", spec.device.display()))?;
            let transport = Arc::new(SerialTransport::new(port));
            Ok(Arc::new(DmxOutput::new(name, spec.dmx, transport)) as Arc<dyn Module>)
        }),
    );
}
