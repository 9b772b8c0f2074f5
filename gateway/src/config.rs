//! Configuration for the accounting gateway
//!
//! Every setting comes from an `ACCT_`-prefixed environment variable and
//! falls back to the default below when unset.

use crate::accounting::OpenCircuitAck;
use crate::error::{GatewayError, Result};
use crate::rate_limiter::{MAX_TPS, RateLimitPolicy};
use crate::resilience::{CircuitBreakerConfig, RetryConfig};
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Main configuration for the gateway
#[derive(Debug, Clone)]
pub struct Config {
    /// UDP accounting address
    pub bind_addr: SocketAddr,

    /// RADIUS shared secret for all clients
    pub shared_secret: String,

    /// Metrics server address
    pub metrics_addr: SocketAddr,

    /// Consecutive publish failures before the circuit opens
    pub failure_threshold: u32,

    /// Seconds the circuit stays open before a trial call
    pub circuit_timeout_secs: u64,

    /// Republish attempts before dead-lettering
    pub max_retry_attempts: u32,

    /// Backoff base in milliseconds
    pub retry_delay_ms: u64,

    /// Failed message store capacity
    pub max_queue_size: usize,

    /// Accepted accounting requests per second
    pub rate_limit_tps: u32,

    pub rate_limit_policy: RateLimitPolicy,

    /// Seconds between retry sweeps
    pub retry_sweep_interval_secs: u64,

    /// Messages polled per retry sweep
    pub retry_batch_size: usize,

    /// Cap on one publisher or dead-letter call, in milliseconds
    pub publish_timeout_ms: u64,

    pub open_circuit_ack: OpenCircuitAck,

    /// Event bus endpoint; stdout when unset
    pub publisher_url: Option<String>,

    /// Dead-letter endpoint; error log when unset
    pub dlq_url: Option<String>,

    /// Log level
    pub log_level: String,

    /// Log format (json or pretty)
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 1813)),
            shared_secret: "sharedsecret".to_string(),
            metrics_addr: SocketAddr::from(([0, 0, 0, 0], 9090)),
            failure_threshold: 5,
            circuit_timeout_secs: 60,
            max_retry_attempts: 3,
            retry_delay_ms: 1000,
            max_queue_size: 10_000,
            rate_limit_tps: 1000,
            rate_limit_policy: RateLimitPolicy::Reject,
            retry_sweep_interval_secs: 5,
            retry_batch_size: 10,
            publish_timeout_ms: 5000,
            open_circuit_ack: OpenCircuitAck::Acknowledge,
            publisher_url: None,
            dlq_url: None,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to its value
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        parse_into(&lookup, "ACCT_BIND_ADDR", &mut config.bind_addr)?;
        if let Some(secret) = lookup("ACCT_SHARED_SECRET") {
            config.shared_secret = secret;
        }
        parse_into(&lookup, "ACCT_METRICS_ADDR", &mut config.metrics_addr)?;
        parse_into(&lookup, "ACCT_FAILURE_THRESHOLD", &mut config.failure_threshold)?;
        parse_into(&lookup, "ACCT_CIRCUIT_TIMEOUT_SECONDS", &mut config.circuit_timeout_secs)?;
        parse_into(&lookup, "ACCT_MAX_RETRY_ATTEMPTS", &mut config.max_retry_attempts)?;
        parse_into(&lookup, "ACCT_RETRY_DELAY_MS", &mut config.retry_delay_ms)?;
        parse_into(&lookup, "ACCT_MAX_QUEUE_SIZE", &mut config.max_queue_size)?;
        parse_into(&lookup, "ACCT_RATE_LIMIT_TPS", &mut config.rate_limit_tps)?;
        parse_into(&lookup, "ACCT_RATE_LIMIT_POLICY", &mut config.rate_limit_policy)?;
        parse_into(
            &lookup,
            "ACCT_RETRY_SWEEP_INTERVAL_SECONDS",
            &mut config.retry_sweep_interval_secs,
        )?;
        parse_into(&lookup, "ACCT_RETRY_BATCH_SIZE", &mut config.retry_batch_size)?;
        parse_into(&lookup, "ACCT_PUBLISH_TIMEOUT_MS", &mut config.publish_timeout_ms)?;
        parse_into(&lookup, "ACCT_OPEN_CIRCUIT_ACK", &mut config.open_circuit_ack)?;

        config.publisher_url = lookup("ACCT_PUBLISHER_URL").filter(|url| !url.is_empty());
        config.dlq_url = lookup("ACCT_DLQ_URL").filter(|url| !url.is_empty());

        if let Some(level) = lookup("ACCT_LOG_LEVEL") {
            config.log_level = level;
        }

        if let Some(format) = lookup("ACCT_LOG_FORMAT") {
            config.log_format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "pretty" => LogFormat::Pretty,
                other => {
                    return Err(GatewayError::Config(format!(
                        "invalid ACCT_LOG_FORMAT: {other} (expected 'json' or 'pretty')"
                    )));
                }
            };
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would disable the pipeline outright
    pub fn validate(&self) -> Result<()> {
        let zero = [
            ("ACCT_FAILURE_THRESHOLD", self.failure_threshold == 0),
            ("ACCT_MAX_QUEUE_SIZE", self.max_queue_size == 0),
            ("ACCT_RETRY_BATCH_SIZE", self.retry_batch_size == 0),
            (
                "ACCT_RETRY_SWEEP_INTERVAL_SECONDS",
                self.retry_sweep_interval_secs == 0,
            ),
            ("ACCT_PUBLISH_TIMEOUT_MS", self.publish_timeout_ms == 0),
        ];
        if let Some((name, _)) = zero.iter().find(|(_, is_zero)| *is_zero) {
            return Err(GatewayError::Config(format!("invalid {name}: must be > 0")));
        }
        if self.rate_limit_tps > MAX_TPS {
            return Err(GatewayError::Config(format!(
                "invalid ACCT_RATE_LIMIT_TPS: must be <= {MAX_TPS}"
            )));
        }
        if self.shared_secret.is_empty() {
            return Err(GatewayError::Config(
                "invalid ACCT_SHARED_SECRET: must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn circuit_breaker(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            reset_timeout: Duration::from_secs(self.circuit_timeout_secs),
        }
    }

    pub fn retry(&self) -> RetryConfig {
        RetryConfig {
            interval: Duration::from_secs(self.retry_sweep_interval_secs),
            batch_size: self.retry_batch_size,
            max_attempts: self.max_retry_attempts,
            base_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }
}

fn parse_into<F, T>(lookup: &F, key: &str, target: &mut T) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = lookup(key) {
        *target = raw
            .trim()
            .parse()
            .map_err(|e| GatewayError::Config(format!("invalid {key}: {e}")))?;
    }
    Ok(())
}
