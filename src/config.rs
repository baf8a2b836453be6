//! JSON configuration for [`ComplexityServerBuilder`].
//!
//! ```rust
//! use rpc_complexity::config::ComplexityConfig;
//! use rpc_complexity::ComplexityServer;
//!
//! let config = ComplexityConfig::from_json_str(r#"{
//!     "max_wait_ms": 5000,
//!     "global": { "per_second": 3.0, "burst": 3 },
//!     "limiters": { "db": { "every_ms": 100, "burst": 10 } }
//! }"#).unwrap();
//!
//! let server = ComplexityServer::builder().apply_config(&config).unwrap().build().unwrap();
//! assert!(server.pool().is_configured("db"));
//! ```

use crate::rate_limit::{Rate, TokenBucket};
use crate::server::ComplexityServerBuilder;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Errors from loading or applying a configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The document is not valid JSON for [`ComplexityConfig`].
    #[error("invalid complexity config: {0}")]
    Parse(#[from] serde_json::Error),
    /// A limiter sets both `per_second` and `every_ms`.
    #[error("limiter {name:?} sets both per_second and every_ms")]
    ConflictingRate {
        /// `"global"` or the token name.
        name: String,
    },
    /// A limiter's rate is negative or not a number.
    #[error("limiter {name:?} has invalid rate {value}")]
    InvalidRate {
        /// `"global"` or the token name.
        name: String,
        /// Offending value.
        value: f64,
    },
}

/// One token bucket.
///
/// At most one of `per_second` and `every_ms` may be set; with neither the
/// limiter never throttles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LimiterConfig {
    /// Refill rate in units per second.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_second: Option<f64>,
    /// Refill interval of one unit, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub every_ms: Option<u64>,
    /// Bucket capacity.
    pub burst: u64,
}

impl LimiterConfig {
    /// Resolve the configured refill rate.
    pub fn rate(&self, name: &str) -> Result<Rate, ConfigError> {
        match (self.per_second, self.every_ms) {
            (Some(_), Some(_)) => Err(ConfigError::ConflictingRate { name: name.to_string() }),
            (Some(value), None) if value.is_nan() || value < 0.0 => {
                Err(ConfigError::InvalidRate { name: name.to_string(), value })
            }
            (Some(value), None) => Ok(Rate::per_second(value)),
            (None, Some(ms)) => Ok(Rate::every(Duration::from_millis(ms))),
            (None, None) => Ok(Rate::INFINITE),
        }
    }

    fn bucket(&self, name: &str) -> Result<TokenBucket, ConfigError> {
        Ok(TokenBucket::new(self.rate(name)?, self.burst))
    }
}

/// Server-wide complexity settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ComplexityConfig {
    /// Longest a call may wait for quota, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_wait_ms: Option<u64>,
    /// Limiter for tokens without a dedicated one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global: Option<LimiterConfig>,
    /// Dedicated limiters keyed by token.
    #[serde(default)]
    pub limiters: BTreeMap<String, LimiterConfig>,
}

impl ComplexityConfig {
    /// Parse a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Check every limiter without building anything.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(global) = &self.global {
            global.rate("global")?;
        }
        for (token, limiter) in &self.limiters {
            limiter.rate(token)?;
        }
        Ok(())
    }
}

impl<K> ComplexityServerBuilder<K> {
    /// Apply every setting present in `config`. Absent settings keep their
    /// current values.
    pub fn apply_config(self, config: &ComplexityConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut builder = self;
        if let Some(ms) = config.max_wait_ms {
            builder = builder.max_wait(Duration::from_millis(ms));
        }
        if let Some(global) = &config.global {
            builder = builder.global_limiter(global.bucket("global")?);
        }
        for (token, limiter) in &config.limiters {
            builder = builder.limiter(token.as_str(), limiter.bucket(token)?);
        }
        Ok(builder)
    }
}
