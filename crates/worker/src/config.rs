//! Worker configuration loaded from environment variables.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use outbox::PublisherConfig;

use crate::error::ConfigError;

/// Which repository backend to run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreKind {
    #[default]
    Memory,
    Postgres,
}

/// Where published events go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BrokerKind {
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Worker configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `STORE`: `memory` or `postgres` (default: `memory`)
/// - `DATABASE_URL`: required when `STORE=postgres`
/// - `BROKER`: `memory` or `redis` (default: `memory`)
/// - `REDIS_URL`: default `redis://127.0.0.1:6379`
/// - `OUTBOX_POLL_INTERVAL_MS`, `OUTBOX_BATCH_SIZE`, `OUTBOX_MAX_RETRIES`,
///   `OUTBOX_RETENTION_SECS`: publisher tuning (defaults 1000, 100, 10, 604800)
/// - `SWEEP_INTERVAL_MS`, `SWEEP_BATCH_SIZE`: expiry sweeper (defaults 30000, 100)
/// - `REAPER_INTERVAL_SECS`: retention reaper (default 3600)
/// - `METRICS_ADDR`: Prometheus listener (default `0.0.0.0:9000`)
/// - `LOG_FORMAT`: `text` or `json` (default: `text`)
/// - `RUST_LOG`: tracing filter directive (default: `info`)
#[derive(Debug, Clone)]
pub struct Config {
    pub store: StoreKind,
    pub database_url: Option<String>,
    pub broker: BrokerKind,
    pub redis_url: String,
    pub publisher: PublisherConfig,
    pub sweep_interval: Duration,
    pub sweep_batch_size: usize,
    pub reaper_interval: Duration,
    pub metrics_addr: SocketAddr,
    pub log_format: LogFormat,
    pub log_level: String,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let store = match lookup("STORE").as_deref() {
            None | Some("memory") => StoreKind::Memory,
            Some("postgres") => StoreKind::Postgres,
            Some(other) => return Err(ConfigError::invalid("STORE", other)),
        };
        let database_url = lookup("DATABASE_URL");
        if store == StoreKind::Postgres && database_url.is_none() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }

        let broker = match lookup("BROKER").as_deref() {
            None | Some("memory") => BrokerKind::Memory,
            Some("redis") => BrokerKind::Redis,
            Some(other) => return Err(ConfigError::invalid("BROKER", other)),
        };

        let log_format = match lookup("LOG_FORMAT").as_deref() {
            None | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => return Err(ConfigError::invalid("LOG_FORMAT", other)),
        };

        let publisher = PublisherConfig {
            poll_interval: Duration::from_millis(parse_positive(
                &lookup,
                "OUTBOX_POLL_INTERVAL_MS",
                defaults.publisher.poll_interval.as_millis() as u64,
            )?),
            batch_size: parse_positive(
                &lookup,
                "OUTBOX_BATCH_SIZE",
                defaults.publisher.batch_size,
            )?,
            max_retries: parse_positive(
                &lookup,
                "OUTBOX_MAX_RETRIES",
                defaults.publisher.max_retries,
            )?,
            retention: Duration::from_secs(parse(
                &lookup,
                "OUTBOX_RETENTION_SECS",
                defaults.publisher.retention.as_secs(),
            )?),
            ..defaults.publisher
        };

        Ok(Self {
            store,
            database_url,
            broker,
            redis_url: lookup("REDIS_URL").unwrap_or(defaults.redis_url),
            publisher,
            sweep_interval: Duration::from_millis(parse_positive(
                &lookup,
                "SWEEP_INTERVAL_MS",
                defaults.sweep_interval.as_millis() as u64,
            )?),
            sweep_batch_size: parse_positive(
                &lookup,
                "SWEEP_BATCH_SIZE",
                defaults.sweep_batch_size,
            )?,
            reaper_interval: Duration::from_secs(parse_positive(
                &lookup,
                "REAPER_INTERVAL_SECS",
                defaults.reaper_interval.as_secs(),
            )?),
            metrics_addr: parse(&lookup, "METRICS_ADDR", defaults.metrics_addr)?,
            log_format,
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
        })
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        Some(raw) => raw.parse().map_err(|_| ConfigError::invalid(key, &raw)),
        None => Ok(default),
    }
}

/// Like [`parse`], but rejects zero and negative values. Intervals and batch
/// sizes must be positive for the poll loops to make progress.
fn parse_positive<T: FromStr + PartialOrd + Default>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    let value = parse(lookup, key, default)?;
    if value <= T::default() {
        return Err(ConfigError::invalid(key, &lookup(key).unwrap_or_default()));
    }
    Ok(value)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: StoreKind::Memory,
            database_url: None,
            broker: BrokerKind::Memory,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            publisher: PublisherConfig::default(),
            sweep_interval: Duration::from_secs(30),
            sweep_batch_size: 100,
            reaper_interval: Duration::from_secs(3600),
            metrics_addr: SocketAddr::from(([0, 0, 0, 0], 9000)),
            log_format: LogFormat::Text,
            log_level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = load(&[]).unwrap();
        assert_eq!(config.store, StoreKind::Memory);
        assert_eq!(config.broker, BrokerKind::Memory);
        assert_eq!(config.publisher.poll_interval, Duration::from_secs(1));
        assert_eq!(config.publisher.batch_size, 100);
        assert_eq!(config.publisher.max_retries, 10);
        assert_eq!(config.publisher.retention, Duration::from_secs(604_800));
        assert_eq!(config.sweep_batch_size, 100);
        assert_eq!(config.metrics_addr.port(), 9000);
        assert_eq!(config.log_format, LogFormat::Text);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("STORE", "postgres"),
            ("DATABASE_URL", "postgres://localhost/wms"),
            ("BROKER", "redis"),
            ("OUTBOX_POLL_INTERVAL_MS", "250"),
            ("OUTBOX_MAX_RETRIES", "3"),
            ("SWEEP_INTERVAL_MS", "5000"),
            ("METRICS_ADDR", "127.0.0.1:9100"),
            ("LOG_FORMAT", "json"),
        ])
        .unwrap();
        assert_eq!(config.store, StoreKind::Postgres);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/wms"));
        assert_eq!(config.broker, BrokerKind::Redis);
        assert_eq!(config.publisher.poll_interval, Duration::from_millis(250));
        assert_eq!(config.publisher.max_retries, 3);
        assert_eq!(config.publisher.cleanup_every, 60);
        assert_eq!(config.sweep_interval, Duration::from_secs(5));
        assert_eq!(config.metrics_addr.to_string(), "127.0.0.1:9100");
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_postgres_requires_database_url() {
        let err = load(&[("STORE", "postgres")]).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("DATABASE_URL")));
    }

    #[test]
    fn test_rejects_bad_values() {
        let err = load(&[("OUTBOX_BATCH_SIZE", "lots")]).unwrap_err();
        assert_eq!(err.to_string(), "Invalid value for OUTBOX_BATCH_SIZE: lots");
        assert!(load(&[("BROKER", "kafka")]).is_err());
    }

    #[test]
    fn test_rejects_zero_intervals_and_batch_sizes() {
        for key in [
            "OUTBOX_POLL_INTERVAL_MS",
            "OUTBOX_BATCH_SIZE",
            "OUTBOX_MAX_RETRIES",
            "SWEEP_INTERVAL_MS",
            "SWEEP_BATCH_SIZE",
            "REAPER_INTERVAL_SECS",
        ] {
            let err = load(&[(key, "0")]).unwrap_err();
            assert_eq!(err.to_string(), format!("Invalid value for {key}: 0"));
        }
        assert!(load(&[("OUTBOX_MAX_RETRIES", "-1")]).is_err());
        // Zero retention just deletes published rows on every cleanup.
        assert!(load(&[("OUTBOX_RETENTION_SECS", "0")]).is_ok());
    }
}
