//! Configuration types, loaded from the environment.

use std::time::Duration;

use crate::error::ConfigError;

/// Idempotency gate configuration.
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// How long a claim on a provider message id stays exclusive.
    pub ttl: Duration,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60 * 60 * 24),
        }
    }
}

/// Per-tenant token bucket configuration.
#[derive(Debug, Clone)]
pub struct LimiterConfig {
    /// Maximum tokens a bucket can hold. Must be > 0.
    pub capacity: f64,
    /// Tokens restored per second. 0 is valid and means no organic
    /// refill: the bucket becomes a fixed counter that only decreases.
    pub refill_rate_per_second: f64,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            capacity: 100.0,
            refill_rate_per_second: 50.0,
        }
    }
}

/// Recovery worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Insert attempts per envelope before dead-lettering. Must be >= 1.
    pub max_retries: u32,
    /// First retry delay; doubles on each subsequent attempt.
    pub base_backoff: Duration,
    /// How long a single queue pop may block waiting for work.
    pub poll_block_timeout: Duration,
    /// When set, envelopes carrying `metadata.simulate_failure = true`
    /// fail their insert attempts deterministically (chaos drills only).
    pub simulation_mode: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff: Duration::from_millis(100),
            poll_block_timeout: Duration::from_millis(1000),
            simulation_mode: false,
        }
    }
}

/// HTTP surface configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub port: u16,
    /// Expose the internal diagnostics endpoints (event counts, DLQ).
    pub enable_internal_endpoints: bool,
    pub enable_cors: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: 3005,
            enable_internal_endpoints: true,
            enable_cors: true,
        }
    }
}

/// Full gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Path of the libSQL database file.
    pub db_path: String,
    pub gate: GateConfig,
    pub limiter: LimiterConfig,
    pub worker: WorkerConfig,
    pub api: ApiConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            db_path: "./data/ingest-gateway.db".to_string(),
            gate: GateConfig::default(),
            limiter: LimiterConfig::default(),
            worker: WorkerConfig::default(),
            api: ApiConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through a variable lookup function.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let config = Self {
            db_path: lookup("INGEST_DB_PATH").unwrap_or(defaults.db_path),
            gate: GateConfig {
                ttl: Duration::from_secs(optional_number(
                    &lookup,
                    "IDEMPOTENCY_TTL_SECONDS",
                    86_400,
                )?),
            },
            limiter: LimiterConfig {
                capacity: optional_number(&lookup, "RATE_LIMIT_CAPACITY", 100.0)?,
                refill_rate_per_second: optional_number(&lookup, "RATE_LIMIT_REFILL_RATE", 50.0)?,
            },
            worker: WorkerConfig {
                max_retries: optional_number(&lookup, "WORKER_MAX_RETRIES", 3)?,
                base_backoff: Duration::from_millis(optional_number(
                    &lookup,
                    "WORKER_BASE_BACKOFF_MS",
                    100,
                )?),
                poll_block_timeout: Duration::from_millis(optional_number(
                    &lookup,
                    "WORKER_POLL_BLOCK_MS",
                    1000,
                )?),
                simulation_mode: optional_bool(&lookup, "ENABLE_SIMULATION_MODE", false)?,
            },
            api: ApiConfig {
                port: optional_number(&lookup, "PORT", 3005)?,
                enable_internal_endpoints: optional_bool(&lookup, "ENABLE_INTERNAL_ENDPOINTS", true)?,
                enable_cors: optional_bool(&lookup, "ENABLE_CORS", true)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Range checks on the recognized configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.gate.ttl.is_zero() {
            return Err(invalid("IDEMPOTENCY_TTL_SECONDS", "must be > 0"));
        }
        if self.limiter.capacity <= 0.0 {
            return Err(invalid("RATE_LIMIT_CAPACITY", "must be > 0"));
        }
        if self.limiter.refill_rate_per_second < 0.0 {
            return Err(invalid("RATE_LIMIT_REFILL_RATE", "must be >= 0"));
        }
        if self.worker.max_retries < 1 {
            return Err(invalid("WORKER_MAX_RETRIES", "must be >= 1"));
        }
        if self.worker.poll_block_timeout.is_zero() {
            return Err(invalid("WORKER_POLL_BLOCK_MS", "must be > 0"));
        }
        Ok(())
    }
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

/// Parse an optional numeric variable, falling back to a default.
fn optional_number<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    fallback: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        None => Ok(fallback),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("not a valid number: {raw:?}"),
        }),
    }
}

/// Parse an optional boolean variable (`true/1/yes` or `false/0/no`).
fn optional_bool(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    fallback: bool,
) -> Result<bool, ConfigError> {
    match lookup(key) {
        None => Ok(fallback),
        Some(raw) => match raw.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("not a valid boolean: {raw:?}"),
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_env_is_empty() {
        let config = GatewayConfig::from_lookup(env(&[])).unwrap();
        assert_eq!(config.gate.ttl, Duration::from_secs(86_400));
        assert_eq!(config.limiter.capacity, 100.0);
        assert_eq!(config.limiter.refill_rate_per_second, 50.0);
        assert_eq!(config.worker.max_retries, 3);
        assert!(!config.worker.simulation_mode);
        assert!(config.api.enable_internal_endpoints);
    }

    #[test]
    fn reads_overrides() {
        let config = GatewayConfig::from_lookup(env(&[
            ("RATE_LIMIT_CAPACITY", "5"),
            ("RATE_LIMIT_REFILL_RATE", "0"),
            ("WORKER_MAX_RETRIES", "7"),
            ("ENABLE_SIMULATION_MODE", "yes"),
            ("ENABLE_CORS", "0"),
        ]))
        .unwrap();
        assert_eq!(config.limiter.capacity, 5.0);
        assert_eq!(config.limiter.refill_rate_per_second, 0.0);
        assert_eq!(config.worker.max_retries, 7);
        assert!(config.worker.simulation_mode);
        assert!(!config.api.enable_cors);
    }

    #[test]
    fn rejects_bad_number() {
        let err = GatewayConfig::from_lookup(env(&[("WORKER_MAX_RETRIES", "lots")]));
        assert!(err.is_err());
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(GatewayConfig::from_lookup(env(&[("RATE_LIMIT_CAPACITY", "0")])).is_err());
        assert!(GatewayConfig::from_lookup(env(&[("RATE_LIMIT_REFILL_RATE", "-1")])).is_err());
        assert!(GatewayConfig::from_lookup(env(&[("WORKER_MAX_RETRIES", "0")])).is_err());
        assert!(GatewayConfig::from_lookup(env(&[("WORKER_POLL_BLOCK_MS", "0")])).is_err());
    }

    #[test]
    fn rejects_bad_boolean() {
        assert!(GatewayConfig::from_lookup(env(&[("ENABLE_CORS", "maybe")])).is_err());
    }
}
