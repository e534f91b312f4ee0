//! Application configuration module
//!
//! Type-safe configuration loading from environment variables using the
//! `config` and `dotenvy` crates. Values are read with the `THREADLINE`
//! prefix and nested sections use double underscores as separators.
//!
//! # Example
//!
//! ```no_run
//! use threadline::config::AppConfig;
//!
//! let config = AppConfig::load().expect("Failed to load configuration");
//! config.validate().expect("Invalid configuration");
//! ```

mod ai;
mod database;
mod error;
mod limits;
mod redis;
mod server;

pub use ai::{
    available_models, resolve_model_id, AiConfig, ModelInfo, DEFAULT_MODEL,
    GENERATION_TEMPERATURE,
};
pub use database::DatabaseConfig;
pub use error::{ConfigError, ValidationError};
pub use limits::LimitsConfig;
pub use redis::RedisConfig;
pub use server::ServerConfig;

use serde::Deserialize;

/// Root application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server configuration (host, port, timeouts)
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration (PostgreSQL connection)
    pub database: DatabaseConfig,

    /// Redis configuration (rate limit counters, stream registry)
    pub redis: RedisConfig,

    /// Model provider configuration
    #[serde(default)]
    pub ai: AiConfig,

    /// Daily quotas and stream lifetime
    #[serde(default)]
    pub limits: LimitsConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// 1. Loads `.env` file if present (for development)
    /// 2. Reads environment variables with the `THREADLINE` prefix
    /// 3. Uses `__` (double underscore) to separate nested values
    ///
    /// # Environment Variable Format
    ///
    /// - `THREADLINE__SERVER__PORT=8080` -> `server.port = 8080`
    /// - `THREADLINE__DATABASE__URL=...` -> `database.url = ...`
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .prefix("THREADLINE")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Validate all configuration values
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.database.validate()?;
        self.redis.validate()?;
        self.ai.validate()?;
        self.limits.validate()?;
        Ok(())
    }
}
