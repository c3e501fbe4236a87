//! Service configuration
//!
//! Defaults match a local Redis with conservative retry and breaker settings. Values can
//! be overridden from environment variables ([`MapperConfig::from_env`]) or a TOML file
//! ([`MapperConfig::from_file`]).

use crate::error::{MappingError, Result};
use crate::error_recovery::{BackoffPolicy, CircuitBreakerConfig, ResilienceConfig, RetryPolicy};
use crate::services::redirect;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapperConfig {
    pub environment: Environment,
    pub redis: RedisConfig,
    pub affiliate: AffiliateConfig,
    pub retry: RetryPolicy,
    pub circuit_breaker: CircuitBreakerConfig,
    pub logging: LoggingConfig,
}

/// Redis connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Connection URL
    pub url: String,
    /// Prefix prepended to every key
    pub key_prefix: Option<String>,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            key_prefix: None,
        }
    }
}

/// Where visitors are redirected once their triplet has a code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AffiliateConfig {
    /// Base URL; the code is added as the `our_param` query parameter
    pub base_url: String,
}

impl Default for AffiliateConfig {
    fn default() -> Self {
        Self {
            base_url: "https://affiliate-network.com".to_string(),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
    /// Also write to this file, rotated daily
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

/// Deployment environment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
    Test,
}

impl Environment {
    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

impl FromStr for Environment {
    type Err = MappingError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            "test" => Ok(Environment::Test),
            other => Err(MappingError::config(format!(
                "unknown environment '{}', use development, production or test",
                other
            ))),
        }
    }
}

fn parse_env<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| MappingError::config(format!("Invalid {}: {}", name, e))),
        Err(_) => Ok(None),
    }
}

fn parse_env_millis(name: &str) -> Result<Option<Duration>> {
    Ok(parse_env::<u64>(name)?.map(Duration::from_millis))
}

impl MapperConfig {
    /// Load configuration from environment variables on top of the defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(url) = env::var("REDIS_URL") {
            config.redis.url = url;
        }
        if let Ok(prefix) = env::var("REDIS_KEY_PREFIX") {
            config.redis.key_prefix = Some(prefix).filter(|p| !p.is_empty());
        }

        if let Ok(base_url) = env::var("AFFILIATE_BASE_URL") {
            config.affiliate.base_url = base_url;
        }

        if let Some(delay) = parse_env_millis("REDIS_RETRY_BASE_DELAY")? {
            config.retry.backoff.base_delay = delay;
        }
        if let Some(delay) = parse_env_millis("REDIS_RETRY_MAX_DELAY")? {
            config.retry.backoff.max_delay = delay;
        }
        if let Some(retries) = parse_env("REDIS_RETRY_MAX_RETRIES")? {
            config.retry.max_retries = retries;
        }

        if let Some(threshold) = parse_env("REDIS_CB_FAILURE_THRESHOLD")? {
            config.circuit_breaker.failure_threshold = threshold;
        }
        if let Some(threshold) = parse_env("REDIS_CB_SUCCESS_THRESHOLD")? {
            config.circuit_breaker.success_threshold = threshold;
        }
        if let Some(cooldown) = parse_env_millis("REDIS_CB_TIMEOUT")? {
            config.circuit_breaker.cooldown = cooldown;
        }

        if let Ok(level) = env::var("LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Some(json) = parse_env("LOG_JSON")? {
            config.logging.json = json;
        }
        if let Ok(file) = env::var("LOG_FILE") {
            config.logging.file = Some(PathBuf::from(file));
        }

        // APP_ENV wins when both are set
        if let Some(environment) = parse_env("NODE_ENV")? {
            config.environment = environment;
        }
        if let Some(environment) = parse_env("APP_ENV")? {
            config.environment = environment;
        }

        Ok(config)
    }

    /// Load configuration from a TOML file; missing keys keep their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let settings = ::config::Config::builder()
            .add_source(::config::File::from(path).format(::config::FileFormat::Toml))
            .build()?;

        let config: Self = settings.try_deserialize()?;
        Ok(config)
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| MappingError::internal(format!("Failed to render config: {}", e)))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !self.redis.url.starts_with("redis://")
            && !self.redis.url.starts_with("rediss://")
            && !self.redis.url.starts_with("unix://")
        {
            return Err(MappingError::config(format!(
                "Redis URL must use redis, rediss or unix scheme: {}",
                self.redis.url
            )));
        }

        redirect::parse_base_url(&self.affiliate.base_url)?;

        let backoff: &BackoffPolicy = &self.retry.backoff;
        if backoff.base_delay > backoff.max_delay {
            return Err(MappingError::config(format!(
                "Retry base delay ({:?}) exceeds max delay ({:?})",
                backoff.base_delay, backoff.max_delay
            )));
        }

        if self.circuit_breaker.failure_threshold == 0 {
            return Err(MappingError::config("Failure threshold must be at least 1"));
        }
        if self.circuit_breaker.success_threshold == 0 {
            return Err(MappingError::config("Success threshold must be at least 1"));
        }

        Ok(())
    }

    /// Affiliate redirect target for `code`
    pub fn redirect_url(&self, code: &str) -> Result<url::Url> {
        redirect::redirect_url(&self.affiliate.base_url, code)
    }

    /// Resilience settings for the mapping executor
    pub fn resilience(&self) -> ResilienceConfig {
        ResilienceConfig {
            retry: self.retry.clone(),
            circuit_breaker: self.circuit_breaker.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MapperConfig::default();
        assert_eq!(config.redis.url, "redis://localhost:6379");
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.backoff.base_delay, Duration::from_millis(250));
        assert_eq!(config.retry.backoff.max_delay, Duration::from_secs(5));
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.circuit_breaker.success_threshold, 2);
        assert_eq!(config.circuit_breaker.cooldown, Duration::from_secs(15));
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.affiliate.base_url, "https://affiliate-network.com");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_redirect_url_uses_affiliate_base() {
        let mut config = MapperConfig::default();
        assert_eq!(
            config.redirect_url("aB3dE5gH7j").unwrap().as_str(),
            "https://affiliate-network.com/?our_param=aB3dE5gH7j"
        );

        config.affiliate.base_url = "mailto:someone@example.com".to_string();
        assert!(matches!(config.validate(), Err(MappingError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_inverted_delays() {
        let mut config = MapperConfig::default();
        config.retry.backoff.base_delay = Duration::from_secs(10);
        assert!(matches!(config.validate(), Err(MappingError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_thresholds() {
        let mut config = MapperConfig::default();
        config.circuit_breaker.success_threshold = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_environment_parsing() {
        assert_eq!("PRODUCTION".parse::<Environment>().unwrap(), Environment::Production);
        assert_eq!("dev".parse::<Environment>().unwrap(), Environment::Development);
        assert!("staging".parse::<Environment>().is_err());
    }

    #[test]
    fn test_toml_output_reads_back() {
        let rendered = MapperConfig::default().to_toml().unwrap();
        assert!(rendered.contains("[circuit_breaker]"));
        assert!(rendered.contains("cooldown = \"15s\""));

        let parsed: MapperConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, MapperConfig::default());
    }
}
