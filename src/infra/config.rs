use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::core::error::{ErrorCategory, TypedError};
use crate::infra::runtime::circuit_breaker::CircuitBreakerConfig;
use crate::infra::runtime::retry::RetryConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl From<ConfigError> for TypedError {
    fn from(e: ConfigError) -> Self {
        let path = match &e {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => {
                Some(path.display().to_string())
            }
            ConfigError::Invalid(_) => None,
        };
        let mut builder = TypedError::builder(ErrorCategory::Configuration, e.to_string());
        if let Some(path) = path {
            builder = builder.context("path", path);
        }
        builder.cause(e).build()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryProfile {
    Light,
    #[default]
    Standard,
    Aggressive,
}

impl RetryProfile {
    pub fn retry_config(self) -> RetryConfig {
        match self {
            RetryProfile::Light => RetryConfig::light(),
            RetryProfile::Standard => RetryConfig::default(),
            RetryProfile::Aggressive => RetryConfig::aggressive(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub retry_profile: RetryProfile,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            timeout_ms: 6_000,
            connect_timeout_ms: 2_000,
            retry_profile: RetryProfile::Standard,
        }
    }
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CircuitSettings {
    pub enabled: bool,
    pub failure_threshold: u32,
    pub minimum_requests: u32,
    pub recovery_timeout_ms: u64,
    pub monitoring_period_ms: u64,
}

impl Default for CircuitSettings {
    fn default() -> Self {
        let d = CircuitBreakerConfig::default();
        Self {
            enabled: true,
            failure_threshold: d.failure_threshold,
            minimum_requests: d.minimum_requests,
            recovery_timeout_ms: d.recovery_timeout.as_millis() as u64,
            monitoring_period_ms: d.monitoring_period.as_millis() as u64,
        }
    }
}

impl CircuitSettings {
    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            minimum_requests: self.minimum_requests,
            recovery_timeout: Duration::from_millis(self.recovery_timeout_ms),
            monitoring_period: Duration::from_millis(self.monitoring_period_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ShutdownSettings {
    pub global_timeout_ms: u64,
    pub handler_timeout_ms: u64,
}

impl Default for ShutdownSettings {
    fn default() -> Self {
        Self {
            global_timeout_ms: 30_000,
            handler_timeout_ms: 5_000,
        }
    }
}

impl ShutdownSettings {
    pub fn global_timeout(&self) -> Duration {
        Duration::from_millis(self.global_timeout_ms)
    }

    pub fn handler_timeout(&self) -> Duration {
        Duration::from_millis(self.handler_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub port: u16,
    pub environment: String,
    pub upstream: UpstreamConfig,
    pub circuit: CircuitSettings,
    pub shutdown: ShutdownSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            environment: "development".into(),
            upstream: UpstreamConfig::default(),
            circuit: CircuitSettings::default(),
            shutdown: ShutdownSettings::default(),
        }
    }
}

impl Config {
    /// Defaults plus environment overrides. No file is read.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.apply_env();
        cfg
    }

    /// Load the TOML file named by `GATEWAY_CONFIG` (if set), then apply
    /// environment overrides on top.
    pub fn from_env_and_toml() -> Result<Self, ConfigError> {
        let mut cfg = match std::env::var("GATEWAY_CONFIG") {
            Ok(path) if !path.is_empty() => Self::from_toml_file(Path::new(&path))?,
            _ => Self::default(),
        };
        cfg.apply_env();
        Ok(cfg)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        toml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })
    }

    fn apply_env(&mut self) {
        if let Some(port) = env_parse::<u16>("PORT") {
            self.port = port;
        }
        if let Ok(env) = std::env::var("APP_ENV") {
            if !env.is_empty() {
                self.environment = env;
            }
        }
        if let Ok(url) = std::env::var("UPSTREAM_BASE_URL") {
            self.upstream.base_url = url;
        }
        if let Some(ms) = env_parse::<u64>("UPSTREAM_TIMEOUT_MS") {
            self.upstream.timeout_ms = ms;
        }
        if let Some(ms) = env_parse::<u64>("SHUTDOWN_TIMEOUT_MS") {
            self.shutdown.global_timeout_ms = ms;
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::Invalid("port cannot be 0".into()));
        }
        if self.upstream.timeout_ms == 0 {
            return Err(ConfigError::Invalid("upstream.timeout_ms must be > 0".into()));
        }
        let base = &self.upstream.base_url;
        if !base.is_empty() && !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "upstream.base_url must be http(s): {base}"
            )));
        }
        if self.circuit.failure_threshold == 0 || self.circuit.minimum_requests == 0 {
            return Err(ConfigError::Invalid(
                "circuit thresholds must be at least 1".into(),
            ));
        }
        if self.shutdown.handler_timeout_ms > self.shutdown.global_timeout_ms {
            return Err(ConfigError::Invalid(
                "shutdown.handler_timeout_ms exceeds shutdown.global_timeout_ms".into(),
            ));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse::<T>().ok())
}
