//! Configuration management for Postguard.
//!
//! Configuration is layered: built-in defaults, then an optional YAML file,
//! then `POSTGUARD__<SECTION>__<FIELD>` environment variables. The result is
//! validated once at startup and never mutated afterwards.

use jsonwebtoken::Algorithm;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::error::{PostguardError, Result};

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "POSTGUARD";

/// Main configuration for the Postguard service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostguardConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Shared counter store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Credential configuration
    #[serde(default)]
    pub auth: AuthConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8000))
}

/// Rate limiting configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Maximum requests allowed per window
    #[serde(default = "default_limit")]
    pub limit: u64,

    /// Window length in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Prefix of every counter key in the store
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Path prefixes that are never rate limited
    #[serde(default = "default_exempt_paths")]
    pub exempt_paths: Vec<String>,

    /// Upper bound on a single store round-trip, in milliseconds
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            window_secs: default_window_secs(),
            key_prefix: default_key_prefix(),
            exempt_paths: default_exempt_paths(),
            store_timeout_ms: default_store_timeout_ms(),
        }
    }
}

impl RateLimitingConfig {
    /// Store round-trip timeout as a `Duration`.
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    /// Whether `path` falls under one of the exempt prefixes.
    pub fn is_exempt(&self, path: &str) -> bool {
        self.exempt_paths.iter().any(|p| path.starts_with(p.as_str()))
    }
}

fn default_limit() -> u64 {
    100
}

fn default_window_secs() -> u64 {
    60
}

fn default_key_prefix() -> String {
    "rl".to_string()
}

fn default_exempt_paths() -> Vec<String> {
    ["/docs", "/openapi.json", "/healthz", "/static"]
        .iter()
        .map(|p| p.to_string())
        .collect()
}

fn default_store_timeout_ms() -> u64 {
    250
}

/// Shared counter store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Redis connection URL. Takes precedence over `in_memory`.
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Count in process memory when no Redis URL is set. With neither, the
    /// limiter runs without a store and lets every request through.
    #[serde(default)]
    pub in_memory: bool,

    /// How often expired in-memory records are reclaimed, in seconds
    #[serde(default = "default_purge_interval_secs")]
    pub purge_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            in_memory: false,
            purge_interval_secs: default_purge_interval_secs(),
        }
    }
}

fn default_purge_interval_secs() -> u64 {
    60
}

/// Bearer credential configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Shared secret used to sign and verify tokens
    #[serde(default = "default_secret")]
    pub secret: String,

    /// Signature algorithm
    #[serde(default = "default_algorithm")]
    pub algorithm: Algorithm,

    /// Lifetime of minted access tokens
    #[serde(default = "default_token_expire_minutes")]
    pub access_token_expire_minutes: i64,

    /// Reject expired tokens when resolving client identity
    #[serde(default = "default_verify_expiry")]
    pub verify_expiry: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret: default_secret(),
            algorithm: default_algorithm(),
            access_token_expire_minutes: default_token_expire_minutes(),
            verify_expiry: default_verify_expiry(),
        }
    }
}

fn default_secret() -> String {
    "supersecret".to_string()
}

fn default_algorithm() -> Algorithm {
    Algorithm::HS256
}

fn default_token_expire_minutes() -> i64 {
    120
}

fn default_verify_expiry() -> bool {
    true
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl PostguardConfig {
    /// Load configuration from an optional file and the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, environment())
    }

    /// Load configuration from an optional file and the given environment source.
    pub fn load_with_env(path: Option<&Path>, env: config::Environment) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        let config: PostguardConfig = builder.add_source(env).build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: PostguardConfig = serde_yaml::from_str(yaml)
            .map_err(|e| PostguardError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        let rl = &self.rate_limiting;
        if rl.limit == 0 {
            return Err(PostguardError::Config("rate_limiting.limit must be positive".into()));
        }
        if rl.window_secs == 0 {
            return Err(PostguardError::Config(
                "rate_limiting.window_secs must be positive".into(),
            ));
        }
        if rl.store_timeout_ms == 0 {
            return Err(PostguardError::Config(
                "rate_limiting.store_timeout_ms must be positive".into(),
            ));
        }
        if rl.key_prefix.is_empty() {
            return Err(PostguardError::Config("rate_limiting.key_prefix must not be empty".into()));
        }
        if self.store.purge_interval_secs == 0 {
            return Err(PostguardError::Config(
                "store.purge_interval_secs must be positive".into(),
            ));
        }
        if self.auth.secret.is_empty() {
            return Err(PostguardError::Config("auth.secret must not be empty".into()));
        }
        // Only shared-secret keys are configurable.
        if !matches!(
            self.auth.algorithm,
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
        ) {
            return Err(PostguardError::Config(format!(
                "auth.algorithm {:?} is not an HMAC algorithm",
                self.auth.algorithm
            )));
        }
        if self.auth.access_token_expire_minutes <= 0 {
            return Err(PostguardError::Config(
                "auth.access_token_expire_minutes must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Environment source for `POSTGUARD__<SECTION>__<FIELD>` variables.
pub fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("__")
        .separator("__")
        .list_separator(",")
        .with_list_parse_key("rate_limiting.exempt_paths")
        .try_parsing(true)
}
