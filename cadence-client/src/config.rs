//! Configuration loading for the Cadence client.
//!
//! Endpoints and the token store location are required; timing knobs fall
//! back to the protocol constants when omitted.

use cadence_core::{EventKind, Product};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_MUTATION_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_CHORD_TIMEOUT_MS: u64 = 500;
/// Close code the server uses to reject the stream credential.
pub const DEFAULT_AUTH_CLOSE_CODE: u16 = 4001;
/// Upper bound for every millisecond interval in the config (one day).
pub const MAX_INTERVAL_MS: u64 = 24 * 60 * 60 * 1000;
/// Largest accepted reconnect growth factor.
pub const MAX_RECONNECT_MULTIPLIER: f64 = 10.0;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    pub api_base_url: String,
    pub ws_endpoint: String,
    #[serde(default)]
    pub product: Product,
    pub token_store_path: PathBuf,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_mutation_timeout_ms")]
    pub mutation_timeout_ms: u64,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_auth_close_code")]
    pub auth_close_code: u16,
    #[serde(default = "default_chord_timeout_ms")]
    pub chord_timeout_ms: u64,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub log: LogConfig,
    /// Resource name -> REST path template (`/clients/{id}`).
    #[serde(default)]
    pub routes: BTreeMap<String, String>,
    /// Extra event -> resource invalidation rows.
    #[serde(default)]
    pub invalidation: Vec<InvalidationRule>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReconnectConfig {
    pub initial_ms: u64,
    pub max_ms: u64,
    pub multiplier: f64,
    #[serde(default)]
    pub jitter_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_ms: 1_000,
            max_ms: 30_000,
            multiplier: 2.0,
            jitter_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Age after which a confirmed entry is refetched on read.
    pub stale_after_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            stale_after_ms: 30_000,
        }
    }
}

impl CacheConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct LogConfig {
    #[serde(default)]
    pub format: LogFormat,
    /// `EnvFilter` directives used when `RUST_LOG` is unset.
    pub filter: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InvalidationRule {
    pub event: EventKind,
    pub resources: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing configuration file path (use --config or CADENCE_CONFIG)")]
    MissingConfigPath,
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

fn default_mutation_timeout_ms() -> u64 {
    DEFAULT_MUTATION_TIMEOUT_MS
}

fn default_heartbeat_interval_ms() -> u64 {
    DEFAULT_HEARTBEAT_INTERVAL_MS
}

fn default_auth_close_code() -> u16 {
    DEFAULT_AUTH_CLOSE_CODE
}

fn default_chord_timeout_ms() -> u64 {
    DEFAULT_CHORD_TIMEOUT_MS
}

impl ClientConfig {
    /// Config with the given endpoints and every other field at its default.
    pub fn new(
        api_base_url: impl Into<String>,
        ws_endpoint: impl Into<String>,
        token_store_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            ws_endpoint: ws_endpoint.into(),
            product: Product::default(),
            token_store_path: token_store_path.into(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            mutation_timeout_ms: DEFAULT_MUTATION_TIMEOUT_MS,
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            auth_close_code: DEFAULT_AUTH_CLOSE_CODE,
            chord_timeout_ms: DEFAULT_CHORD_TIMEOUT_MS,
            reconnect: ReconnectConfig::default(),
            cache: CacheConfig::default(),
            log: LogConfig::default(),
            routes: BTreeMap::new(),
            invalidation: Vec::new(),
        }
    }

    pub fn load() -> Result<Self, ConfigError> {
        let path = config_path_from_args().or_else(config_path_from_env);
        let path = path.ok_or(ConfigError::MissingConfigPath)?;
        let config = Self::from_path(&path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = toml::from_str(contents)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_base_url.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "api_base_url",
                reason: "must not be empty".to_string(),
            });
        }
        if !self.api_base_url.starts_with("http://") && !self.api_base_url.starts_with("https://")
        {
            return Err(ConfigError::InvalidValue {
                field: "api_base_url",
                reason: "must be an http(s) URL".to_string(),
            });
        }
        if !self.ws_endpoint.starts_with("ws://") && !self.ws_endpoint.starts_with("wss://") {
            return Err(ConfigError::InvalidValue {
                field: "ws_endpoint",
                reason: "must be a ws(s) URL".to_string(),
            });
        }
        if self.token_store_path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "token_store_path",
                reason: "must not be empty".to_string(),
            });
        }
        for (field, value) in [
            ("request_timeout_ms", self.request_timeout_ms),
            ("mutation_timeout_ms", self.mutation_timeout_ms),
            ("heartbeat_interval_ms", self.heartbeat_interval_ms),
            ("chord_timeout_ms", self.chord_timeout_ms),
            ("reconnect.max_ms", self.reconnect.max_ms),
            ("reconnect.jitter_ms", self.reconnect.jitter_ms),
        ] {
            if value > MAX_INTERVAL_MS {
                return Err(ConfigError::InvalidValue {
                    field,
                    reason: format!("must be <= {} ms", MAX_INTERVAL_MS),
                });
            }
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "request_timeout_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.mutation_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "mutation_timeout_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "heartbeat_interval_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.chord_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "chord_timeout_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if !(4000..=4999).contains(&self.auth_close_code) {
            return Err(ConfigError::InvalidValue {
                field: "auth_close_code",
                reason: "must be in the application range 4000-4999".to_string(),
            });
        }
        if self.reconnect.initial_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "reconnect.initial_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.reconnect.max_ms < self.reconnect.initial_ms {
            return Err(ConfigError::InvalidValue {
                field: "reconnect.max_ms",
                reason: "must be >= initial_ms".to_string(),
            });
        }
        if !(1.0..=MAX_RECONNECT_MULTIPLIER).contains(&self.reconnect.multiplier) {
            return Err(ConfigError::InvalidValue {
                field: "reconnect.multiplier",
                reason: format!("must be between 1.0 and {}", MAX_RECONNECT_MULTIPLIER),
            });
        }
        for (resource, path) in &self.routes {
            if !path.starts_with('/') {
                return Err(ConfigError::InvalidValue {
                    field: "routes",
                    reason: format!("path for '{}' must start with '/'", resource),
                });
            }
        }
        if self.invalidation.iter().any(|rule| rule.resources.is_empty()) {
            return Err(ConfigError::InvalidValue {
                field: "invalidation",
                reason: "every rule must name at least one resource".to_string(),
            });
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn mutation_timeout(&self) -> Duration {
        Duration::from_millis(self.mutation_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn chord_timeout(&self) -> Duration {
        Duration::from_millis(self.chord_timeout_ms)
    }
}

fn config_path_from_env() -> Option<PathBuf> {
    std::env::var("CADENCE_CONFIG").ok().map(PathBuf::from)
}

fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
        api_base_url = "https://api.example.com/api/v1"
        ws_endpoint = "wss://api.example.com/ws"
        product = "talent"
        token_store_path = "/tmp/cadence/tokens.json"
        heartbeat_interval_ms = 15000

        [reconnect]
        initial_ms = 500
        max_ms = 10000
        multiplier = 1.5

        [cache]
        stale_after_ms = 5000

        [log]
        format = "json"

        [routes]
        unread-count = "/notifications/unread-count"

        [[invalidation]]
        event = "offer_updated"
        resources = ["dashboard"]
    "#;

    #[test]
    fn parses_full_config() {
        let config = ClientConfig::from_toml_str(FULL).unwrap();
        config.validate().unwrap();
        assert_eq!(config.product, Product::Talent);
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(15));
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.auth_close_code, DEFAULT_AUTH_CLOSE_CODE);
        assert_eq!(config.reconnect.jitter_ms, 0);
        assert_eq!(config.log.format, LogFormat::Json);
        assert_eq!(config.invalidation[0].event, EventKind::OfferUpdated);
        assert_eq!(
            config.routes.get("unread-count").map(String::as_str),
            Some("/notifications/unread-count")
        );
    }

    #[test]
    fn minimal_config_uses_protocol_defaults() {
        let config = ClientConfig::from_toml_str(
            r#"
            api_base_url = "http://localhost:8000"
            ws_endpoint = "ws://localhost:8000/ws"
            token_store_path = "tokens.json"
            "#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.reconnect.initial_ms, 1_000);
        assert_eq!(config.reconnect.max_ms, 30_000);
        assert_eq!(config.chord_timeout(), Duration::from_millis(500));
        assert_eq!(config.product, Product::Practice);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let result = ClientConfig::from_toml_str(
            r#"
            api_base_url = "http://localhost:8000"
            ws_endpoint = "ws://localhost:8000/ws"
            token_store_path = "tokens.json"
            retries = 3
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn rejects_non_websocket_endpoint() {
        let config = ClientConfig::new("http://localhost", "http://localhost/ws", "t.json");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue {
                field: "ws_endpoint",
                ..
            })
        ));
    }

    #[test]
    fn rejects_reserved_close_code_outside_application_range() {
        let mut config = ClientConfig::new("http://localhost", "ws://localhost/ws", "t.json");
        config.auth_close_code = 1008;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_unbounded_reconnect_multiplier() {
        let config = ClientConfig::from_toml_str(
            r#"
            api_base_url = "http://localhost:8000"
            ws_endpoint = "ws://localhost:8000/ws"
            token_store_path = "tokens.json"

            [reconnect]
            initial_ms = 1000
            max_ms = 30000
            multiplier = inf
            "#,
        )
        .unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue {
                field: "reconnect.multiplier",
                ..
            })
        ));

        let mut config = ClientConfig::new("http://localhost", "ws://localhost/ws", "t.json");
        config.reconnect.multiplier = f64::NAN;
        assert!(config.validate().is_err());
        config.reconnect.multiplier = 1e20;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_oversized_heartbeat_interval() {
        let mut config = ClientConfig::new("http://localhost", "ws://localhost/ws", "t.json");
        config.heartbeat_interval_ms = u64::MAX;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue {
                field: "heartbeat_interval_ms",
                ..
            })
        ));
        config.heartbeat_interval_ms = MAX_INTERVAL_MS;
        config.validate().unwrap();
    }
}
