// config.rs
use std::{env, fmt::Display, str::FromStr, time::Duration};

use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid {key} value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("{0} must be set")]
    Missing(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(format!("unknown store backend {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub store_backend: StoreBackend,
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub lock_timeout: Duration,
    pub results_cache_ttl: Duration,
    pub results_cache_capacity: u64,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let store_backend = try_load("STORE_BACKEND", "postgres")?;
        let database_url = env::var("DATABASE_URL").ok();
        if store_backend == StoreBackend::Postgres && database_url.is_none() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }

        Ok(Self {
            port: try_load("PORT", "3030")?,
            store_backend,
            database_url,
            max_connections: try_load("DATABASE_MAX_CONNECTIONS", "5")?,
            lock_timeout: Duration::from_millis(try_load("LOCK_TIMEOUT_MS", "5000")?),
            results_cache_ttl: Duration::from_secs(try_load("RESULTS_CACHE_TTL_SECS", "5")?),
            results_cache_capacity: try_load("RESULTS_CACHE_CAPACITY", "10000")?,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3030,
            store_backend: StoreBackend::Memory,
            database_url: None,
            max_connections: 5,
            lock_timeout: Duration::from_secs(5),
            results_cache_ttl: Duration::from_secs(5),
            results_cache_capacity: 10_000,
        }
    }
}

fn try_load<T: FromStr>(key: &'static str, default: &str) -> Result<T, ConfigError>
where
    T::Err: Display,
{
    let value = env::var(key).unwrap_or_else(|_| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });

    value.parse().map_err(|e: T::Err| {
        warn!("Invalid {key} value: {e}");
        ConfigError::Invalid {
            key,
            reason: e.to_string(),
            value,
        }
    })
}
