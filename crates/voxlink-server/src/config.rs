//! Server configuration loading from file and environment variables.

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;
use voxlink_voice::{CaptureConfig, Credentials, PlaybackConfig, ServiceConfig};

/// Top-level server configuration.
///
/// Credentials are deliberately absent: they come only from the environment
/// (see [`load_credentials`]).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Voice service endpoint and session policy.
    #[serde(default)]
    pub service: ServiceConfig,

    /// Microphone recorder process.
    #[serde(default)]
    pub capture: CaptureConfig,

    /// Audio player process.
    #[serde(default)]
    pub playback: PlaybackConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "voxlink_voice=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// A required credential is missing from the environment.
    #[error("missing credential: {0}")]
    MissingCredential(String),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `VOXLINK_HOST` overrides `server.host`
/// - `VOXLINK_PORT` overrides `server.port`
/// - `VOXLINK_SERVICE_URL` overrides `service.url`
/// - `VOXLINK_TOKEN_URL` overrides `service.token_url` (empty clears it)
/// - `VOXLINK_RESUME_ENABLED` overrides `service.resume_enabled`
/// - `VOXLINK_LOG_LEVEL` overrides `logging.level`
/// - `VOXLINK_LOG_JSON` overrides `logging.json` (set to "true" to enable)
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    load_config_with(path, |key| std::env::var(key).ok())
}

/// [`load_config`] with an explicit environment lookup.
pub fn load_config_with(
    path: Option<&str>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    if let Some(host) = env("VOXLINK_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Some(port) = env("VOXLINK_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Some(url) = env("VOXLINK_SERVICE_URL") {
        config.service.url = url;
    }
    if let Some(token_url) = env("VOXLINK_TOKEN_URL") {
        config.service.token_url = Some(token_url).filter(|url| !url.trim().is_empty());
    }
    if let Some(resume) = env("VOXLINK_RESUME_ENABLED") {
        config.service.resume_enabled = resume == "true" || resume == "1";
    }
    if let Some(level) = env("VOXLINK_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = env("VOXLINK_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }

    Ok(config)
}

/// Reads the voice service credentials from the environment.
///
/// # Errors
///
/// Returns `ConfigError::MissingCredential` if the key or secret is unset or
/// blank.
pub fn load_credentials() -> Result<Credentials, ConfigError> {
    Credentials::from_env().map_err(|e| ConfigError::MissingCredential(e.to_string()))
}
