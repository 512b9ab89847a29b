//! # Configuration Management
//!
//! Hierarchical configuration for the Singura platform, loaded in order of
//! precedence:
//!
//! 1. **Environment variables** (highest precedence)
//! 2. **Environment-specific TOML files** (e.g. `config/production.toml`)
//! 3. **Default TOML file** (`config/default.toml`)
//!
//! The environment is selected with the `ENVIRONMENT` variable
//! (`development` by default). Secrets (the credential master key, the
//! socket token secret, OAuth client secrets, database passwords) must be
//! provided via environment variables in production; `Config::load` fails
//! fast when placeholder values leak into a production deployment.

use config::{ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

/// Main configuration structure containing all application settings.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// PostgreSQL connection and pool settings
    pub database: DatabaseConfig,
    /// Redis settings (discovery run queue)
    pub redis: RedisConfig,
    /// HTTP server settings
    pub server: ServerConfig,
    /// Credential encryption key material
    pub encryption: EncryptionConfig,
    /// Realtime socket token signing
    pub auth: AuthConfig,
    /// Per-platform OAuth client settings
    pub oauth: OAuthConfig,
    /// Discovery orchestrator settings
    pub discovery: DiscoveryConfig,
    /// Detector thresholds
    pub detection: DetectionConfig,
    /// Realtime fan-out settings
    pub realtime: RealtimeConfig,
    /// Prometheus metrics settings
    pub metrics: MetricsConfig,
    /// Application-level settings
    pub app: AppConfig,
    /// Cross-Origin Resource Sharing policies
    pub cors: CorsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL. In production this comes from the
    /// `DATABASE_URL` environment variable, never from a file.
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
}

/// AES-256-GCM key material for credentials at rest.
#[derive(Debug, Deserialize, Clone)]
pub struct EncryptionConfig {
    /// Must be exactly 32 bytes. Generate with:
    /// `openssl rand -base64 32 | cut -c1-32`
    pub master_key: String,
    /// Recorded on every encrypted row; decryption rejects rows written
    /// under a version this deployment does not hold.
    pub key_version: i32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    /// HS256 secret for short-lived realtime socket tokens. Minimum 32
    /// characters.
    pub socket_token_secret: String,
    pub socket_token_ttl_seconds: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OAuthConfig {
    pub google: OAuthClientConfig,
    pub slack: OAuthClientConfig,
    pub microsoft: OAuthClientConfig,
}

/// One platform's OAuth client registration. Token endpoints are
/// overridable so tests can point them at a local mock server; the
/// Microsoft endpoint contains a `{tenant}` placeholder.
#[derive(Debug, Deserialize, Clone)]
pub struct OAuthClientConfig {
    pub client_id: String,
    pub client_secret: String,
    pub token_endpoint: String,
    #[serde(default)]
    pub revoke_endpoint: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DiscoveryConfig {
    /// Concurrent discovery runs across connections.
    pub worker_pool_size: usize,
    /// Activity window when a connection has no previous run.
    pub default_lookback_days: i64,
    /// Attempts for transient refresh failures before the connection is
    /// marked errored.
    pub max_refresh_retries: u32,
    /// Redis key prefix for the run queue.
    pub run_queue: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DetectionConfig {
    pub velocity_events_per_second: f64,
    pub batch_min_actions: usize,
    pub batch_window_seconds: i64,
    /// Coefficient-of-variation ceiling under which inter-event intervals
    /// count as machine-regular.
    pub interval_variance_threshold: f64,
    /// Local hour at which the off-hours window opens (inclusive).
    pub off_hours_start: u32,
    /// Local hour at which the off-hours window closes (exclusive).
    pub off_hours_end: u32,
    pub data_volume_baseline_bytes: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RealtimeConfig {
    /// Capacity of each organization's broadcast channel. This doubles as
    /// the per-subscriber buffer: a subscriber that falls further behind
    /// loses the overrun (dropped and counted) instead of applying
    /// backpressure to producers.
    pub channel_capacity: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub namespace: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub environment: String,
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
    pub expose_headers: Vec<String>,
    pub max_age: Option<u64>,
    pub allow_credentials: bool,
}

impl Config {
    /// Loads configuration from TOML files and environment variables, then
    /// validates it. Designed to be called once at startup; the resulting
    /// struct is cloned into the application state.
    pub fn load() -> Result<Self, ConfigError> {
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let builder = config::Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            .add_source(Environment::with_prefix("").separator("_"));

        let config = builder.build()?;
        let loaded_config: Config = config.try_deserialize()?;

        loaded_config.validate(&environment)?;

        Ok(loaded_config)
    }

    /// Validates the loaded configuration; fails fast on insecure or
    /// malformed values so a misconfigured deployment never starts.
    fn validate(&self, environment: &str) -> Result<(), ConfigError> {
        if self.encryption.master_key.len() != 32 {
            return Err(ConfigError::Message(format!(
                "encryption master key must be exactly 32 bytes (current: {})",
                self.encryption.master_key.len()
            )));
        }

        if self.auth.socket_token_secret.len() < 32 {
            return Err(ConfigError::Message(format!(
                "socket token secret must be at least 32 characters (current: {})",
                self.auth.socket_token_secret.len()
            )));
        }

        if !self.database.url.starts_with("postgresql://") {
            return Err(ConfigError::Message(
                "database URL must start with 'postgresql://'".to_string(),
            ));
        }

        if !self.redis.url.starts_with("redis://") {
            return Err(ConfigError::Message(
                "redis URL must start with 'redis://'".to_string(),
            ));
        }

        if self.auth.socket_token_ttl_seconds <= 0 || self.auth.socket_token_ttl_seconds > 3600 {
            return Err(ConfigError::Message(
                "socket token TTL must be between 1 second and 1 hour".to_string(),
            ));
        }

        if self.discovery.worker_pool_size == 0 {
            return Err(ConfigError::Message(
                "discovery worker pool size must be at least 1".to_string(),
            ));
        }

        if self.detection.off_hours_start > 23 || self.detection.off_hours_end > 23 {
            return Err(ConfigError::Message(
                "off-hours boundaries must be hours in 0..=23".to_string(),
            ));
        }

        if environment == "production" {
            self.validate_production_security()?;
        }

        Ok(())
    }

    /// Production deployments must not carry placeholder secrets.
    fn validate_production_security(&self) -> Result<(), ConfigError> {
        let indicators = [
            "INSECURE_DEFAULT",
            "CHANGE_THIS",
            "NOT_SET",
            "PLACEHOLDER",
        ];

        let checks: [(&str, &str); 6] = [
            ("encryption master key", &self.encryption.master_key),
            ("socket token secret", &self.auth.socket_token_secret),
            ("database URL", &self.database.url),
            ("google OAuth client secret", &self.oauth.google.client_secret),
            ("slack OAuth client secret", &self.oauth.slack.client_secret),
            (
                "microsoft OAuth client secret",
                &self.oauth.microsoft.client_secret,
            ),
        ];

        for (name, value) in checks {
            for indicator in &indicators {
                if value.contains(indicator) {
                    return Err(ConfigError::Message(format!(
                        "production deployment detected placeholder {} (contains {}); set the corresponding environment variable",
                        name, indicator
                    )));
                }
            }
        }

        for origin in &self.cors.allowed_origins {
            if origin == "*" {
                return Err(ConfigError::Message(
                    "production deployment must not use wildcard (*) CORS origins".to_string(),
                ));
            }
        }

        Ok(())
    }
}

impl OAuthConfig {
    pub fn for_platform(&self, platform: crate::types::PlatformType) -> &OAuthClientConfig {
        match platform {
            crate::types::PlatformType::Google => &self.google,
            crate::types::PlatformType::Slack => &self.slack,
            crate::types::PlatformType::Microsoft => &self.microsoft,
        }
    }
}
