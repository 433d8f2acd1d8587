use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::application::retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{key} has invalid value '{value}'")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub storage: StorageBackend,
    pub database_url: Option<String>,
    pub pool_size: u32,
    pub unit_timeout: Duration,
    pub retry: RetryPolicy,
    pub seed_sample_data: bool,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let storage = match lookup("STORAGE").as_deref() {
            None | Some("postgres") => StorageBackend::Postgres,
            Some("memory") => StorageBackend::Memory,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "STORAGE",
                    value: other.to_string(),
                })
            }
        };
        let database_url = lookup("DATABASE_URL");
        if storage == StorageBackend::Postgres && database_url.is_none() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }

        let retry = RetryPolicy {
            max_attempts: parse_or(&lookup, "TX_MAX_ATTEMPTS", 3)?,
            base_delay: Duration::from_millis(parse_or(&lookup, "TX_RETRY_BASE_DELAY_MS", 50)?),
            ..RetryPolicy::default()
        };

        Ok(Self {
            host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(&lookup, "PORT", 8080)?,
            storage,
            database_url,
            pool_size: parse_or(&lookup, "DB_POOL_SIZE", 10)?,
            unit_timeout: Duration::from_millis(parse_or(&lookup, "TX_TIMEOUT_MS", 5000)?),
            retry,
            seed_sample_data: parse_or(&lookup, "SEED_SAMPLE_DATA", false)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub host: String,
    pub port: u16,
    pub inventory_service_url: String,
    pub order_service_url: String,
}

impl GatewaySettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            host: lookup("GATEWAY_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(&lookup, "GATEWAY_PORT", 8080)?,
            inventory_service_url: or_warn(&lookup, "INVENTORY_SERVICE_URL", "http://localhost:8081"),
            order_service_url: or_warn(&lookup, "ORDER_SERVICE_URL", "http://localhost:8082"),
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}

fn or_warn<F>(lookup: &F, key: &str, fallback: &str) -> String
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).unwrap_or_else(|| {
        log::warn!("Environment variable {} not set, using default value: {}", key, fallback);
        fallback.to_string()
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn postgres_requires_database_url() {
        let err = Settings::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("DATABASE_URL")));
    }

    #[test]
    fn memory_backend_needs_no_database() {
        let settings = Settings::from_lookup(lookup(&[("STORAGE", "memory")])).unwrap();
        assert_eq!(settings.storage, StorageBackend::Memory);
        assert_eq!(settings.port, 8080);
        assert_eq!(settings.host, "0.0.0.0");
        assert_eq!(settings.unit_timeout, Duration::from_secs(5));
        assert_eq!(settings.retry.max_attempts, 3);
        assert!(!settings.seed_sample_data);
    }

    #[test]
    fn reads_overrides() {
        let settings = Settings::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://u:p@db/orders"),
            ("PORT", "9000"),
            ("DB_POOL_SIZE", "4"),
            ("TX_TIMEOUT_MS", "250"),
            ("TX_MAX_ATTEMPTS", "5"),
            ("TX_RETRY_BASE_DELAY_MS", "10"),
            ("SEED_SAMPLE_DATA", "true"),
        ]))
        .unwrap();
        assert_eq!(settings.storage, StorageBackend::Postgres);
        assert_eq!(settings.database_url.as_deref(), Some("postgres://u:p@db/orders"));
        assert_eq!(settings.port, 9000);
        assert_eq!(settings.pool_size, 4);
        assert_eq!(settings.unit_timeout, Duration::from_millis(250));
        assert_eq!(settings.retry.max_attempts, 5);
        assert_eq!(settings.retry.base_delay, Duration::from_millis(10));
        assert!(settings.seed_sample_data);
    }

    #[test]
    fn rejects_unparsable_values() {
        let err = Settings::from_lookup(lookup(&[("STORAGE", "memory"), ("PORT", "eighty")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "PORT", .. }));

        let err = Settings::from_lookup(lookup(&[("STORAGE", "mongo")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "STORAGE", .. }));
    }

    #[test]
    fn gateway_falls_back_to_local_services() {
        let settings = GatewaySettings::from_lookup(lookup(&[("ORDER_SERVICE_URL", "http://orders:80")]))
            .unwrap();
        assert_eq!(settings.inventory_service_url, "http://localhost:8081");
        assert_eq!(settings.order_service_url, "http://orders:80");
        assert_eq!(settings.port, 8080);
    }
}
