//! Minimal configuration loading for Limelight.
//!
//! This crate provides configuration loading with minimal dependencies so it
//! can be imported by every Limelight crate without dependency cycles.
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/limelight/config.toml` (system)
//! 2. `~/.config/limelight/config.toml` (user)
//! 3. `./limelight.toml` (local override)
//! 4. Environment variables (`LIMELIGHT_*`)
//!
//! # Example Config
//!
//! ```toml
//! [scheduler]
//! worker_floor = 2
//! worker_ceiling = 8
//!
//! [router]
//! batch_threshold = 100
//! flush_interval_us = 500
//!
//! [priority]
//! critical_tags = ["audio_trigger", "video_trigger", "network_trigger"]
//! high_tags = ["user_input"]
//! low_tags = ["diagnostic", "log"]
//!
//! [telemetry]
//! log_level = "info"
//!
//! [[modules]]
//! kind = "osc_input"
//! name = "pad-1"
//! config = { port = 9000, address = "/pad/1" }
//!
//! [[modules]]
//! kind = "artnet_output"
//! name = "wash"
//! config = { host = "10.0.0.20", universe = 0, channel = 3 }
//!
//! [[connections]]
//! from = "pad-1"
//! to = "wash"
//! ```

pub mod loader;

pub use loader::{discover_config_files, discover_config_files_with_override, ConfigSources};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Worker pool tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Workers spawned at startup. Failing to reach the floor is fatal.
    pub worker_floor: usize,
    /// Pool never grows past this.
    pub worker_ceiling: usize,
    /// Monitor sampling interval.
    pub monitor_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_floor: 2,
            worker_ceiling: 8,
            monitor_interval_ms: 1000,
        }
    }
}

/// Event router tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// A non-critical queue crossing this size triggers an early flush.
    pub batch_threshold: usize,
    /// Fixed wakeup interval for the batch flush loop, microseconds.
    pub flush_interval_us: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            batch_threshold: 100,
            flush_interval_us: 500,
        }
    }
}

/// Content-based priority classification.
///
/// The tag strings are site policy, not protocol: these defaults match the
/// common installation wiring but any tag set can be configured.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorityConfig {
    pub critical_tags: Vec<String>,
    pub high_tags: Vec<String>,
    pub low_tags: Vec<String>,
}

impl Default for PriorityConfig {
    fn default() -> Self {
        Self {
            critical_tags: vec![
                "audio_trigger".into(),
                "video_trigger".into(),
                "network_trigger".into(),
            ],
            high_tags: vec!["user_input".into()],
            low_tags: vec!["diagnostic".into(), "log".into()],
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Default tracing filter; `RUST_LOG` wins when set.
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
        }
    }
}

/// One module instance to create at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleSpec {
    /// Factory name in the module registry (e.g. `clock`, `osc_input`).
    pub kind: String,
    /// Unique instance name, used as the routing source id.
    pub name: String,
    /// Module-specific configuration, passed through verbatim.
    #[serde(default)]
    pub config: toml::Table,
}

/// One producer -> consumer edge to connect at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionSpec {
    pub from: String,
    pub to: String,
}

/// Complete Limelight configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LimeConfig {
    pub scheduler: SchedulerConfig,
    pub router: RouterConfig,
    pub priority: PriorityConfig,
    pub telemetry: TelemetryConfig,
    pub modules: Vec<ModuleSpec>,
    pub connections: Vec<ConnectionSpec>,
}

impl LimeConfig {
    /// Load configuration from all sources.
    ///
    /// Load order (later wins):
    /// 1. Compiled defaults
    /// 2. `/etc/limelight/config.toml`
    /// 3. `~/.config/limelight/config.toml`
    /// 4. `./limelight.toml`
    /// 5. Environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration from a specific file path, then apply env overrides.
    ///
    /// If `config_path` is provided it takes precedence over the local
    /// `./limelight.toml` override. System and user configs still load first.
    pub fn load_from(config_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration and report where values came from.
    pub fn load_with_sources_from(
        config_path: Option<&std::path::Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        loader::load(config_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LimeConfig::default();
        assert_eq!(config.scheduler.worker_floor, 2);
        assert_eq!(config.scheduler.worker_ceiling, 8);
        assert_eq!(config.router.batch_threshold, 100);
        assert_eq!(config.router.flush_interval_us, 500);
        assert!(config
            .priority
            .critical_tags
            .contains(&"audio_trigger".to_string()));
        assert!(config.modules.is_empty());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: LimeConfig = toml::from_str(
            r#"
            [scheduler]
            worker_ceiling = 4
            "#,
        )
        .unwrap();
        assert_eq!(config.scheduler.worker_ceiling, 4);
        assert_eq!(config.scheduler.worker_floor, 2);
        assert_eq!(config.router.batch_threshold, 100);
    }

    #[test]
    fn test_modules_and_connections_parse() {
        let config: LimeConfig = toml::from_str(
            r#"
            [[modules]]
            kind = "clock"
            name = "metronome"
            config = { interval_ms = 250 }

            [[connections]]
            from = "metronome"
            to = "wash"
            "#,
        )
        .unwrap();
        assert_eq!(config.modules.len(), 1);
        assert_eq!(config.modules[0].kind, "clock");
        assert_eq!(config.connections[0].to, "wash");
    }
}
