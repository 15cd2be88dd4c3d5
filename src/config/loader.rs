//! Configuration loading and management
//!
//! This module handles loading configuration from files and environment variables.

use std::path::Path;

use tracing::{debug, info};

use super::types::Config;
use crate::error::ConfigError;

/// Override for the TCP node bind address
pub const ENV_TCP_ADDR: &str = "NODE_RUNTIME_TCP_ADDR";
/// Override for the UDP node bind address
pub const ENV_UDP_ADDR: &str = "NODE_RUNTIME_UDP_ADDR";
/// Override for the log level
pub const ENV_LOG_LEVEL: &str = "NODE_RUNTIME_LOG_LEVEL";
/// Override for the TCP worker count and the UDP concurrency limit
pub const ENV_MAX_CONCURRENCY: &str = "NODE_RUNTIME_MAX_CONCURRENCY";

/// Load configuration from a JSON file
///
/// # Arguments
///
/// * `path` - Path to the configuration file
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read or parsed.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();

    debug!("Loading configuration from {:?}", path);

    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: path.display().to_string(),
        });
    }

    let contents = std::fs::read_to_string(path)?;

    let config: Config = serde_json::from_str(&contents).map_err(|e| {
        ConfigError::ParseError(format!("Failed to parse JSON: {e} at {path:?}"))
    })?;

    config.validate()?;

    info!(
        tcp = ?config.tcp.as_ref().map(|t| t.address),
        udp = ?config.udp.as_ref().map(|u| u.address),
        "Configuration loaded"
    );

    Ok(config)
}

/// Load configuration from a JSON string
///
/// # Errors
///
/// Returns `ConfigError` if parsing or validation fails.
pub fn load_config_str(json: &str) -> Result<Config, ConfigError> {
    let config: Config =
        serde_json::from_str(json).map_err(|e| ConfigError::ParseError(e.to_string()))?;

    config.validate()?;

    Ok(config)
}

/// Load configuration with environment variable overrides
///
/// Environment variables:
/// - `NODE_RUNTIME_TCP_ADDR`: Override the TCP bind address
/// - `NODE_RUNTIME_UDP_ADDR`: Override the UDP bind address
/// - `NODE_RUNTIME_LOG_LEVEL`: Override log level
/// - `NODE_RUNTIME_MAX_CONCURRENCY`: Override TCP worker count and UDP concurrency
///
/// An address override only applies to a node present in the file.
///
/// # Errors
///
/// Returns `ConfigError` if loading, parsing or an override fails.
pub fn load_config_with_env(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let mut config = load_config(path)?;
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    Ok(config)
}

/// Apply overrides read through `lookup` and re-validate.
fn apply_env_overrides(
    config: &mut Config,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    if let Some(addr) = lookup(ENV_TCP_ADDR) {
        if let Some(tcp) = config.tcp.as_mut() {
            tcp.address = addr.parse().map_err(|_| ConfigError::EnvError {
                name: ENV_TCP_ADDR.into(),
                reason: format!("Invalid socket address: {addr}"),
            })?;
            debug!("TCP address overridden to {}", tcp.address);
        }
    }

    if let Some(addr) = lookup(ENV_UDP_ADDR) {
        if let Some(udp) = config.udp.as_mut() {
            udp.address = addr.parse().map_err(|_| ConfigError::EnvError {
                name: ENV_UDP_ADDR.into(),
                reason: format!("Invalid socket address: {addr}"),
            })?;
            debug!("UDP address overridden to {}", udp.address);
        }
    }

    if let Some(level) = lookup(ENV_LOG_LEVEL) {
        config.log.level = level;
        debug!("Log level overridden to {}", config.log.level);
    }

    if let Some(max) = lookup(ENV_MAX_CONCURRENCY) {
        let max: usize = max.parse().map_err(|_| ConfigError::EnvError {
            name: ENV_MAX_CONCURRENCY.into(),
            reason: format!("Invalid number: {max}"),
        })?;
        if let Some(tcp) = config.tcp.as_mut() {
            tcp.max_concurrent_connections = max;
        }
        if let Some(udp) = config.udp.as_mut() {
            udp.max_concurrency = max;
        }
        debug!("Max concurrency overridden to {}", max);
    }

    // Re-validate after overrides
    config.validate()
}

/// Create a default configuration file at the given path
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be written.
pub fn create_default_config(path: impl AsRef<Path>) -> Result<(), ConfigError> {
    let config = Config::default_config();
    let json = serde_json::to_string_pretty(&config)
        .map_err(|e| ConfigError::ParseError(format!("Failed to serialize config: {e}")))?;

    std::fs::write(path, json)?;
    Ok(())
}
