use cadence_core::ControllerConfig;
use std::{net::SocketAddr, str::FromStr, time::Duration};
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub log_level: Level,
    pub greeting: Option<String>,
    pub barge_in_min_chars: usize,
    pub transcript_flush_interval: Duration,
    pub default_stream_id: u32,
    pub agent_stream_id: u32,
    /// Names of the downstream sinks flushed on every interruption.
    pub output_sinks: Vec<String>,
}

/// Reads `var` and parses it, falling back to `default` when unset.
fn parse_var<T>(var: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(var.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let greeting = std::env::var("GREETING")
            .ok()
            .filter(|g| !g.trim().is_empty());

        let defaults = ControllerConfig::default();
        let barge_in_min_chars = parse_var("BARGE_IN_MIN_CHARS", defaults.barge_in_min_chars)?;
        let flush_ms = parse_var(
            "TRANSCRIPT_FLUSH_INTERVAL_MS",
            defaults.flush_interval.as_millis() as u64,
        )?;
        let default_stream_id = parse_var("DEFAULT_STREAM_ID", defaults.default_stream_id)?;
        let agent_stream_id = parse_var("AGENT_STREAM_ID", defaults.agent_stream_id)?;

        let output_sinks: Vec<String> = std::env::var("OUTPUT_SINKS")
            .unwrap_or_else(|_| "rtc".to_string())
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(String::from)
            .collect();

        Ok(Self {
            bind_address,
            log_level,
            greeting,
            barge_in_min_chars,
            transcript_flush_interval: Duration::from_millis(flush_ms),
            default_stream_id,
            agent_stream_id,
            output_sinks,
        })
    }

    /// The per-conversation settings handed to every new controller.
    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            greeting: self.greeting.clone(),
            barge_in_min_chars: self.barge_in_min_chars,
            default_stream_id: self.default_stream_id,
            agent_stream_id: self.agent_stream_id,
            flush_interval: self.transcript_flush_interval,
        }
    }
}
