//! Client Configuration Settings
//!
//! Configuration types for the streaming client, loaded from environment
//! variables. Unparsable values fall back to defaults; structurally invalid
//! combinations are reported by [`ClientConfig::validate`].

use std::path::PathBuf;
use std::time::Duration;

use crate::domain::streaming::Symbol;
use crate::infrastructure::cache::{DEFAULT_CACHE_EXPIRY, DEFAULT_UPDATE_CAPACITY};
use crate::infrastructure::feed::auth::{Credentials, DEFAULT_AUTH_TIMEOUT};
use crate::infrastructure::feed::connection::{ConnectionSettings, DEFAULT_CONNECT_TIMEOUT};
use crate::infrastructure::feed::heartbeat::HeartbeatConfig;
use crate::infrastructure::feed::reconnect::{DEFAULT_RECONNECT_INTERVAL, ReconnectConfig};

/// Price cache settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    /// Snapshot file.
    pub path: PathBuf,
    /// Snapshots older than this are discarded at load.
    pub expiry: Duration,
    /// Capacity of the price update broadcast channel.
    pub update_capacity: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("price_cache.json"),
            expiry: DEFAULT_CACHE_EXPIRY,
            update_capacity: DEFAULT_UPDATE_CAPACITY,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Health check HTTP port (0 = disabled).
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

/// Complete client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket endpoint. Empty disables connecting.
    pub url: String,
    /// Optional credential; `None` skips the handshake.
    pub credentials: Option<Credentials>,
    /// Master switch.
    pub enabled: bool,
    /// Reconnect schedule.
    pub reconnect: ReconnectConfig,
    /// Ping/pong liveness.
    pub heartbeat: HeartbeatConfig,
    /// Bound on opening the transport.
    pub connect_timeout: Duration,
    /// Bound on a full handshake.
    pub auth_timeout: Duration,
    /// Price cache settings.
    pub cache: CacheSettings,
    /// Server port settings.
    pub server: ServerSettings,
    /// Symbols the binary subscribes at startup.
    pub initial_symbols: Vec<Symbol>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new("")
    }
}

impl ClientConfig {
    /// Configuration for `url` with defaults everywhere else.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            credentials: None,
            enabled: true,
            reconnect: ReconnectConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
            cache: CacheSettings::default(),
            server: ServerSettings::default(),
            initial_symbols: Vec::new(),
        }
    }

    /// Set the credential. A blank key clears it.
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.credentials = Credentials::new(api_key);
        self
    }

    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the resulting configuration fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if the resulting configuration fails validation.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader { lookup };
        let defaults = Self::default();

        let interval = env.duration_millis("PRICE_STREAM_RECONNECT_INTERVAL_MS", DEFAULT_RECONNECT_INTERVAL);
        let reconnect = ReconnectConfig {
            initial_delay: interval,
            max_delay: env.duration_millis("PRICE_STREAM_RECONNECT_MAX_MS", interval),
            multiplier: env.parse("PRICE_STREAM_RECONNECT_MULTIPLIER", 1.0),
            jitter_factor: env.parse("PRICE_STREAM_RECONNECT_JITTER", 0.0),
            max_attempts: env.parse("PRICE_STREAM_MAX_RECONNECT_ATTEMPTS", 0),
        };

        let heartbeat = HeartbeatConfig::new(
            env.duration_secs(
                "PRICE_STREAM_HEARTBEAT_INTERVAL_SECS",
                defaults.heartbeat.ping_interval,
            ),
            env.duration_secs(
                "PRICE_STREAM_HEARTBEAT_TIMEOUT_SECS",
                defaults.heartbeat.pong_timeout,
            ),
        );

        let cache = CacheSettings {
            path: env
                .string("PRICE_CACHE_PATH")
                .map_or(defaults.cache.path, PathBuf::from),
            expiry: env.duration_secs("PRICE_CACHE_EXPIRY_SECS", defaults.cache.expiry),
            update_capacity: env.parse(
                "PRICE_STREAM_UPDATE_CAPACITY",
                defaults.cache.update_capacity,
            ),
        };

        let config = Self {
            url: env.string("PRICE_STREAM_URL").unwrap_or_default(),
            credentials: env.string("PRICE_STREAM_API_KEY").and_then(Credentials::new),
            enabled: env.bool("PRICE_STREAM_ENABLED", true),
            reconnect,
            heartbeat,
            connect_timeout: env
                .duration_secs("PRICE_STREAM_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT),
            auth_timeout: env.duration_secs("PRICE_STREAM_AUTH_TIMEOUT_SECS", DEFAULT_AUTH_TIMEOUT),
            cache,
            server: ServerSettings {
                health_port: env.parse("PRICE_STREAM_HEALTH_PORT", defaults.server.health_port),
            },
            initial_symbols: env
                .string("PRICE_STREAM_SYMBOLS")
                .map(|list| parse_symbol_list(&list))
                .unwrap_or_default(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for invalid combinations.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.url.trim();
        if !url.is_empty() && !url.starts_with("ws://") && !url.starts_with("wss://") {
            return Err(ConfigError::InvalidUrl(self.url.clone()));
        }
        if self.connect_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "PRICE_STREAM_CONNECT_TIMEOUT_SECS",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.auth_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "PRICE_STREAM_AUTH_TIMEOUT_SECS",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.reconnect.initial_delay.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "PRICE_STREAM_RECONNECT_INTERVAL_MS",
                reason: "must be greater than zero".to_string(),
            });
        }
        if !self.reconnect.multiplier.is_finite() || self.reconnect.multiplier < 1.0 {
            return Err(ConfigError::InvalidValue {
                key: "PRICE_STREAM_RECONNECT_MULTIPLIER",
                reason: format!("must be at least 1.0, got {}", self.reconnect.multiplier),
            });
        }
        if !(0.0..=1.0).contains(&self.reconnect.jitter_factor) {
            return Err(ConfigError::InvalidValue {
                key: "PRICE_STREAM_RECONNECT_JITTER",
                reason: format!("must be within 0.0..=1.0, got {}", self.reconnect.jitter_factor),
            });
        }
        if self.heartbeat.is_enabled() && self.heartbeat.pong_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "PRICE_STREAM_HEARTBEAT_TIMEOUT_SECS",
                reason: "must be greater than zero while the heartbeat is enabled".to_string(),
            });
        }
        Ok(())
    }

    /// Transport settings for the connection manager.
    #[must_use]
    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            url: self.url.trim().to_string(),
            enabled: self.enabled,
            reconnect: self.reconnect.clone(),
            heartbeat: self.heartbeat.clone(),
            connect_timeout: self.connect_timeout,
        }
    }

    /// Check if an endpoint is configured.
    #[must_use]
    pub fn has_endpoint(&self) -> bool {
        !self.url.trim().is_empty()
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Endpoint is not a WebSocket URL.
    #[error("invalid price feed URL {0:?}: expected ws:// or wss://")]
    InvalidUrl(String),
    /// Value out of range.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// Environment variable name.
        key: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

/// Split a comma or whitespace separated symbol list.
#[must_use]
pub fn parse_symbol_list(list: &str) -> Vec<Symbol> {
    list.split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.string(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    fn bool(&self, key: &str, default: bool) -> bool {
        self.string(key)
            .map_or(default, |v| match v.to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => default,
            })
    }

    fn duration_secs(&self, key: &str, default: Duration) -> Duration {
        self.string(key)
            .and_then(|v| v.parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn duration_millis(&self, key: &str, default: Duration) -> Duration {
        self.string(key)
            .and_then(|v| v.parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }
}
