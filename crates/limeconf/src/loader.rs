//! Config file discovery, loading, and environment variable overlay.

use crate::{ConfigError, LimeConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
///
/// Returns paths in load order (system, user, local).
/// Only returns files that exist.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
/// Returns paths in load order (system, user, local/cli).
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    // System config
    let system = PathBuf::from("/etc/limelight/config.toml");
    if system.exists() {
        files.push(system);
    }

    // User config (XDG_CONFIG_HOME or ~/.config)
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("limelight/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    // CLI override takes precedence over local
    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    // Local override (current directory)
    let local = PathBuf::from("limelight.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Load and merge all config sources.
pub fn load(cli_path: Option<&Path>) -> Result<(LimeConfig, ConfigSources), ConfigError> {
    let mut sources = ConfigSources::default();
    let mut merged = toml::Table::new();

    for path in discover_config_files_with_override(cli_path) {
        let table = read_table(&path)?;
        merge_tables(&mut merged, table);
        sources.files.push(path);
    }

    let mut config: LimeConfig =
        toml::Value::Table(merged)
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::Parse {
                path: PathBuf::from("<merged>"),
                message: e.to_string(),
            })?;

    apply_env_overrides(&mut config, &mut sources);
    Ok((config, sources))
}

/// Load config from a single TOML file.
pub fn load_from_file(path: &Path) -> Result<LimeConfig, ConfigError> {
    let table = read_table(path)?;
    toml::Value::Table(table)
        .try_into()
        .map_err(|e: toml::de::Error| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

fn read_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    contents
        .parse()
        .map_err(|e: toml::de::Error| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

/// Recursive merge: values from `overlay` win, tables merge key-by-key.
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Apply `LIMELIGHT_*` environment variables over the loaded config.
fn apply_env_overrides(config: &mut LimeConfig, sources: &mut ConfigSources) {
    if let Ok(level) = env::var("LIMELIGHT_LOG_LEVEL") {
        config.telemetry.log_level = level;
        sources.env_overrides.push("LIMELIGHT_LOG_LEVEL".into());
    }
    if let Some(floor) = env_usize("LIMELIGHT_WORKER_FLOOR", sources) {
        config.scheduler.worker_floor = floor;
    }
    if let Some(ceiling) = env_usize("LIMELIGHT_WORKER_CEILING", sources) {
        config.scheduler.worker_ceiling = ceiling;
    }
    if let Some(threshold) = env_usize("LIMELIGHT_BATCH_THRESHOLD", sources) {
        config.router.batch_threshold = threshold;
    }
}

fn env_usize(name: &str, sources: &mut ConfigSources) -> Option<usize> {
    let value = env::var(name).ok()?.parse().ok()?;
    sources.env_overrides.push(name.to_string());
    Some(value)
}
