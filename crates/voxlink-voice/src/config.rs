use crate::error::VoiceError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use voxlink_types::AudioFormat;

/// Environment variable holding the service API key.
pub const API_KEY_ENV: &str = "VOXLINK_API_KEY";
/// Environment variable holding the service secret key.
pub const SECRET_KEY_ENV: &str = "VOXLINK_SECRET_KEY";
/// Environment variable holding the optional service configuration id.
pub const CONFIG_ID_ENV: &str = "VOXLINK_CONFIG_ID";

/// Credentials used to authenticate with the voice service.
///
/// Only ever read from the environment. `Debug` redacts every field, so a
/// stray `{:?}` in a log line cannot leak them.
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
    secret_key: String,
    config_id: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"[REDACTED]")
            .field("secret_key", &"[REDACTED]")
            .field("config_id", &self.config_id.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl Credentials {
    /// Builds credentials, rejecting empty key or secret.
    ///
    /// An empty or whitespace-only `config_id` is treated as absent.
    pub fn new(
        api_key: impl Into<String>,
        secret_key: impl Into<String>,
        config_id: Option<String>,
    ) -> Result<Self, VoiceError> {
        let api_key = api_key.into();
        let secret_key = secret_key.into();
        if api_key.trim().is_empty() {
            return Err(VoiceError::Config("API key must not be empty".to_string()));
        }
        if secret_key.trim().is_empty() {
            return Err(VoiceError::Config(
                "secret key must not be empty".to_string(),
            ));
        }
        let config_id = config_id.filter(|id| !id.trim().is_empty());
        Ok(Self {
            api_key,
            secret_key,
            config_id,
        })
    }

    /// Reads credentials from `VOXLINK_API_KEY`, `VOXLINK_SECRET_KEY` and
    /// `VOXLINK_CONFIG_ID`.
    pub fn from_env() -> Result<Self, VoiceError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads credentials through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, VoiceError> {
        let api_key = lookup(API_KEY_ENV)
            .ok_or_else(|| VoiceError::Config(format!("{API_KEY_ENV} is not set")))?;
        let secret_key = lookup(SECRET_KEY_ENV)
            .ok_or_else(|| VoiceError::Config(format!("{SECRET_KEY_ENV} is not set")))?;
        Self::new(api_key, secret_key, lookup(CONFIG_ID_ENV))
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn secret_key(&self) -> &str {
        &self.secret_key
    }

    pub fn config_id(&self) -> Option<&str> {
        self.config_id.as_deref()
    }
}

fn default_service_url() -> String {
    "ws://127.0.0.1:8787/v0/chat".to_string()
}

fn default_resume_enabled() -> bool {
    true
}

/// Where and how to reach the voice service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// WebSocket endpoint of the conversation service.
    #[serde(default = "default_service_url")]
    pub url: String,
    /// Optional OAuth token endpoint. When set, an access token is fetched
    /// with the key/secret before every connect.
    #[serde(default)]
    pub token_url: Option<String>,
    /// Whether the resume token is carried across reconnects and kept after
    /// an explicit disconnect.
    #[serde(default = "default_resume_enabled")]
    pub resume_enabled: bool,
    #[serde(default)]
    pub reconnect: ReconnectPolicy,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            url: default_service_url(),
            token_url: None,
            resume_enabled: default_resume_enabled(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

fn default_backoff_base_ms() -> u64 {
    250
}

fn default_max_delay_ms() -> u64 {
    10_000
}

/// Reconnect behaviour after the transport closes while the user still
/// wants to be connected.
///
/// The first reconnect after a close waits `initial_delay_ms` (immediate by
/// default). Every consecutive failed attempt doubles the wait starting at
/// `backoff_base_ms`, capped at `max_delay_ms`. `max_attempts = None`
/// retries forever.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    #[serde(default)]
    pub initial_delay_ms: u64,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 0,
            backoff_base_ms: default_backoff_base_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the given 1-based reconnect attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::from_millis(self.initial_delay_ms);
        }
        let exp = (attempt - 2).min(16);
        let ms = self
            .backoff_base_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_delay_ms);
        Duration::from_millis(ms)
    }

    /// Whether the given 1-based reconnect attempt may be made.
    pub fn allows(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt <= max)
    }
}

fn default_capture_command() -> String {
    "arecord".to_string()
}

fn default_capture_args() -> Vec<String> {
    ["-q", "-D", "{device}", "-f", "S16_LE", "-r", "16000", "-c", "1", "-t", "wav"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_capture_devices() -> Vec<String> {
    vec!["default".to_string()]
}

fn default_capture_formats() -> Vec<AudioFormat> {
    vec![AudioFormat::Wav]
}

fn default_chunk_interval_ms() -> u64 {
    100
}

/// Microphone capture through an external recorder process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Recorder binary; must write the encoded stream to stdout.
    #[serde(default = "default_capture_command")]
    pub command: String,
    /// Recorder arguments. `{device}` is replaced with the device name.
    #[serde(default = "default_capture_args")]
    pub args: Vec<String>,
    /// Input devices. Each one is a track; capture requires exactly one.
    #[serde(default = "default_capture_devices")]
    pub devices: Vec<String>,
    /// Formats the recorder command can produce.
    #[serde(default = "default_capture_formats")]
    pub formats: Vec<AudioFormat>,
    #[serde(default = "default_chunk_interval_ms")]
    pub chunk_interval_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            command: default_capture_command(),
            args: default_capture_args(),
            devices: default_capture_devices(),
            formats: default_capture_formats(),
            chunk_interval_ms: default_chunk_interval_ms(),
        }
    }
}

impl CaptureConfig {
    pub fn chunk_interval(&self) -> Duration {
        Duration::from_millis(self.chunk_interval_ms.max(1))
    }
}

fn default_playback_command() -> String {
    "aplay".to_string()
}

fn default_playback_args() -> Vec<String> {
    vec!["-q".to_string(), "-".to_string()]
}

/// Audio output through an external player process reading stdin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    #[serde(default = "default_playback_command")]
    pub command: String,
    #[serde(default = "default_playback_args")]
    pub args: Vec<String>,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            command: default_playback_command(),
            args: default_playback_args(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn credentials_reject_empty_values() {
        assert!(matches!(
            Credentials::new("", "secret", None),
            Err(VoiceError::Config(_))
        ));
        assert!(matches!(
            Credentials::new("key", "   ", None),
            Err(VoiceError::Config(_))
        ));
        let creds = Credentials::new("key", "secret", Some(" ".to_string())).unwrap();
        assert_eq!(creds.config_id(), None);
    }

    #[test]
    fn credentials_debug_is_redacted() {
        let creds = Credentials::new("key-123", "secret-456", Some("cfg-789".into())).unwrap();
        let debug = format!("{:?}", creds);
        assert!(!debug.contains("key-123"));
        assert!(!debug.contains("secret-456"));
        assert!(!debug.contains("cfg-789"));
    }

    #[test]
    fn credentials_from_lookup() {
        let vars: HashMap<&str, &str> = [(API_KEY_ENV, "k"), (SECRET_KEY_ENV, "s")].into();
        let creds = Credentials::from_lookup(|name| vars.get(name).map(|v| v.to_string())).unwrap();
        assert_eq!(creds.api_key(), "k");
        assert_eq!(creds.secret_key(), "s");
        assert_eq!(creds.config_id(), None);

        let err = Credentials::from_lookup(|_| None).unwrap_err();
        assert!(err.to_string().contains(API_KEY_ENV));
    }

    #[test]
    fn reconnect_backoff_is_capped() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::ZERO);
        assert_eq!(policy.delay_for(2), Duration::from_millis(250));
        assert_eq!(policy.delay_for(3), Duration::from_millis(500));
        assert_eq!(policy.delay_for(40), Duration::from_millis(10_000));
        assert!(policy.allows(1_000));

        let capped = ReconnectPolicy {
            max_attempts: Some(3),
            ..Default::default()
        };
        assert!(capped.allows(3));
        assert!(!capped.allows(4));
    }
}
