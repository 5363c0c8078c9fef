use std::env;
use std::str::FromStr;

use serde::Deserialize;

pub const DEFAULT_PROVIDER_URL: &str = "https://provider.code-challenge.feverup.com/api/events";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub provider: ProviderConfig,
    pub sync: SyncConfig,
    pub cache: CacheConfig,
    pub rate_limit: RateLimitConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Allowed CORS origin.
    pub frontend_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub url: String,
    /// Hard timeout for a single request, in milliseconds.
    pub timeout_ms: u64,
    /// Retries after the first attempt.
    pub retries: u32,
    /// Backoff unit: retry `n` waits `backoff_base_ms * 2^n`.
    pub backoff_base_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    pub enabled: bool,
    pub interval_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub search_ttl_seconds: u64,
    pub stats_ttl_seconds: u64,
    pub sweep_interval_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Seconds between quota replenishments, per client IP.
    pub per_second: u64,
    pub burst: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub format: LogFormat,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let defaults = Config::default();

        let config = Config {
            server: ServerConfig {
                host: env::var("HOST").unwrap_or(defaults.server.host),
                port: env_parse("PORT", defaults.server.port)?,
                frontend_url: env::var("FRONTEND_URL").unwrap_or(defaults.server.frontend_url),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").unwrap_or(defaults.database.url),
                max_connections: env_parse(
                    "DATABASE_MAX_CONNECTIONS",
                    defaults.database.max_connections,
                )?,
            },
            provider: ProviderConfig {
                url: env::var("PROVIDER_URL").unwrap_or(defaults.provider.url),
                timeout_ms: env_parse("PROVIDER_TIMEOUT_MS", defaults.provider.timeout_ms)?,
                retries: env_parse("PROVIDER_RETRIES", defaults.provider.retries)?,
                backoff_base_ms: env_parse(
                    "PROVIDER_BACKOFF_BASE_MS",
                    defaults.provider.backoff_base_ms,
                )?,
            },
            sync: SyncConfig {
                enabled: match env::var("SYNC_ENABLED") {
                    Ok(v) => parse_flag(&v)
                        .ok_or_else(|| ConfigError::InvalidValue("SYNC_ENABLED".to_string()))?,
                    Err(_) => defaults.sync.enabled,
                },
                interval_seconds: env_parse(
                    "SYNC_INTERVAL_SECONDS",
                    defaults.sync.interval_seconds,
                )?,
            },
            cache: CacheConfig {
                search_ttl_seconds: env_parse(
                    "CACHE_SEARCH_TTL",
                    defaults.cache.search_ttl_seconds,
                )?,
                stats_ttl_seconds: env_parse("CACHE_STATS_TTL", defaults.cache.stats_ttl_seconds)?,
                sweep_interval_seconds: env_parse(
                    "CACHE_SWEEP_INTERVAL_SECONDS",
                    defaults.cache.sweep_interval_seconds,
                )?,
            },
            rate_limit: RateLimitConfig {
                per_second: env_parse("RATE_LIMIT_PER_SECOND", defaults.rate_limit.per_second)?,
                burst: env_parse("RATE_LIMIT_BURST", defaults.rate_limit.burst)?,
            },
            logging: LoggingConfig {
                format: match env::var("LOG_FORMAT") {
                    Ok(v) => parse_log_format(&v)
                        .ok_or_else(|| ConfigError::InvalidValue("LOG_FORMAT".to_string()))?,
                    Err(_) => defaults.logging.format,
                },
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values that would stall timers or disable the rate limiter.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let must_be_positive = [
            ("PROVIDER_TIMEOUT_MS", self.provider.timeout_ms),
            ("SYNC_INTERVAL_SECONDS", self.sync.interval_seconds),
            (
                "CACHE_SWEEP_INTERVAL_SECONDS",
                self.cache.sweep_interval_seconds,
            ),
            ("RATE_LIMIT_PER_SECOND", self.rate_limit.per_second),
            ("RATE_LIMIT_BURST", u64::from(self.rate_limit.burst)),
            (
                "DATABASE_MAX_CONNECTIONS",
                u64::from(self.database.max_connections),
            ),
        ];

        for (name, value) in must_be_positive {
            if value == 0 {
                return Err(ConfigError::InvalidValue(name.to_string()));
            }
        }

        url::Url::parse(&self.provider.url)
            .map_err(|_| ConfigError::InvalidValue("PROVIDER_URL".to_string()))?;

        Ok(())
    }
}

fn env_parse<T: FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(name.to_string())),
        Err(_) => Ok(default),
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

fn parse_log_format(value: &str) -> Option<LogFormat> {
    match value.trim().to_lowercase().as_str() {
        "text" | "pretty" => Some(LogFormat::Text),
        "json" => Some(LogFormat::Json),
        _ => None,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
                frontend_url: "http://localhost:3001".to_string(),
            },
            database: DatabaseConfig {
                url: "sqlite://data/plans.db".to_string(),
                max_connections: 5,
            },
            provider: ProviderConfig {
                url: DEFAULT_PROVIDER_URL.to_string(),
                timeout_ms: 10_000,
                retries: 3,
                backoff_base_ms: 1_000,
            },
            sync: SyncConfig {
                enabled: true,
                interval_seconds: 300,
            },
            cache: CacheConfig {
                search_ttl_seconds: 300,
                stats_ttl_seconds: 60,
                sweep_interval_seconds: 300,
            },
            rate_limit: RateLimitConfig {
                per_second: 2,
                burst: 100,
            },
            logging: LoggingConfig {
                format: LogFormat::Text,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.provider.retries, 3);
        assert_eq!(config.cache.search_ttl_seconds, 300);
        assert_eq!(config.cache.stats_ttl_seconds, 60);
    }

    #[test]
    fn zero_intervals_are_rejected() {
        let mut config = Config::default();
        config.sync.interval_seconds = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue(name)) if name == "SYNC_INTERVAL_SECONDS"
        ));
    }

    #[test]
    fn provider_url_must_parse() {
        let mut config = Config::default();
        config.provider.url = "not a url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn flags_and_formats() {
        assert_eq!(parse_flag("YES"), Some(true));
        assert_eq!(parse_flag("0"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
        assert_eq!(parse_log_format("JSON"), Some(LogFormat::Json));
        assert_eq!(parse_log_format("xml"), None);
    }

    #[test]
    fn unset_variables_fall_back_to_default() {
        assert_eq!(
            env_parse("PLANS_SERVICE_TEST_SURELY_UNSET", 42u32).unwrap(),
            42
        );
    }
}
