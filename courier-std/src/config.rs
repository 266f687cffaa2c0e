//! Configuration.
//!
//! Courier consumes configuration but does not own where it comes from. A
//! [`CourierConfig`] can be built in code, parsed from TOML, or loaded from
//! the first existing file among a list of candidates (overridable through
//! `COURIER_CONFIG`).
//!
//! ```toml
//! service = "orders"
//!
//! [publisher]
//! exchange = "orders.exchange"
//! routing_key = "orders"
//! reply_timeout_ms = 5000
//! pass_through_headers = ["x-trace-id"]
//!
//! [consumer]
//! queue = "orders.queue"
//! concurrency = "1-4"
//! prefetch = 10
//!
//! [retry]
//! max_attempts = 3
//! initial_interval_ms = 1000
//! multiplier = 2.0
//! max_interval_ms = 10000
//!
//! [dead_letter]
//! exchange = "orders.dlx"
//! routing_key = "orders.dead"
//! queue = "orders.dlq"
//! ```

use crate::{
    publisher::PublisherConfig,
    retry::{DeadLetterTarget, RetryPolicy},
};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};
use thiserror::Error;
use tracing::debug;

/// Errors from loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read {path}")]
    Io {
        /// The file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for [`CourierConfig`].
    #[error("failed to parse configuration")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Service-wide settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CourierConfig {
    /// This service's identity, stamped as message source and origin.
    pub service: String,
    /// Outbound settings.
    pub publisher: PublisherSection,
    /// Inbound settings.
    pub consumer: ConsumerSection,
    /// Retry settings.
    pub retry: RetrySection,
    /// Dead-letter destination.
    pub dead_letter: DeadLetterSection,
}

impl Default for CourierConfig {
    fn default() -> Self {
        Self {
            service: "courier".to_string(),
            publisher: PublisherSection::default(),
            consumer: ConsumerSection::default(),
            retry: RetrySection::default(),
            dead_letter: DeadLetterSection::default(),
        }
    }
}

/// `[publisher]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherSection {
    /// Default target exchange.
    pub exchange: String,
    /// Default routing key.
    pub routing_key: String,
    /// Reply timeout for blocking calls.
    pub reply_timeout_ms: u64,
    /// Context values copied onto outgoing messages.
    pub pass_through_headers: Vec<String>,
}

impl Default for PublisherSection {
    fn default() -> Self {
        Self {
            exchange: "courier.exchange".to_string(),
            routing_key: "courier".to_string(),
            reply_timeout_ms: 5_000,
            pass_through_headers: Vec::new(),
        }
    }
}

/// `[consumer]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerSection {
    /// The queue to consume.
    pub queue: String,
    /// Worker range.
    pub concurrency: ConcurrencyRange,
    /// Unacknowledged deliveries the broker may push ahead.
    pub prefetch: u16,
}

impl Default for ConsumerSection {
    fn default() -> Self {
        Self {
            queue: "courier.queue".to_string(),
            concurrency: ConcurrencyRange::default(),
            prefetch: 10,
        }
    }
}

/// `[retry]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    /// Total invocations per delivery.
    pub max_attempts: u32,
    /// First backoff.
    pub initial_interval_ms: u64,
    /// Backoff growth factor.
    pub multiplier: f64,
    /// Backoff cap.
    pub max_interval_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_interval_ms: 1_000,
            multiplier: 2.0,
            max_interval_ms: 10_000,
        }
    }
}

/// `[dead_letter]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeadLetterSection {
    /// Dead-letter exchange.
    pub exchange: String,
    /// Dead-letter routing key.
    pub routing_key: String,
    /// Queue bound to the dead-letter destination.
    pub queue: String,
}

impl Default for DeadLetterSection {
    fn default() -> Self {
        Self {
            exchange: "courier.dlx".to_string(),
            routing_key: "courier.dead".to_string(),
            queue: "courier.dlq".to_string(),
        }
    }
}

/// A `min-max` worker range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RangeRepr", into = "String")]
pub struct ConcurrencyRange {
    /// Lower bound.
    pub min: usize,
    /// Upper bound; the number of deliveries processed at once.
    pub max: usize,
}

impl ConcurrencyRange {
    /// Create a range.
    pub fn new(min: usize, max: usize) -> Result<Self, ConfigError> {
        if max == 0 {
            return Err(ConfigError::Invalid("concurrency max must be at least 1".into()));
        }
        if min > max {
            return Err(ConfigError::Invalid(format!(
                "concurrency min {min} exceeds max {max}"
            )));
        }
        Ok(Self { min, max })
    }
}

impl Default for ConcurrencyRange {
    fn default() -> Self {
        Self { min: 1, max: 1 }
    }
}

impl FromStr for ConcurrencyRange {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = |part: &str| {
            part.trim()
                .parse::<usize>()
                .map_err(|_| ConfigError::Invalid(format!("invalid concurrency {s:?}")))
        };
        match s.split_once('-') {
            Some((min, max)) => Self::new(parse(min)?, parse(max)?),
            None => {
                let n = parse(s)?;
                Self::new(n, n)
            }
        }
    }
}

impl fmt::Display for ConcurrencyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.min, self.max)
    }
}

impl From<ConcurrencyRange> for String {
    fn from(range: ConcurrencyRange) -> Self {
        range.to_string()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RangeRepr {
    Count(usize),
    Text(String),
}

impl TryFrom<RangeRepr> for ConcurrencyRange {
    type Error = ConfigError;

    fn try_from(repr: RangeRepr) -> Result<Self, Self::Error> {
        match repr {
            RangeRepr::Count(n) => Self::new(n, n),
            RangeRepr::Text(text) => text.parse(),
        }
    }
}

impl CourierConfig {
    /// Environment variable naming a configuration file to load instead of
    /// the candidates.
    pub const ENV_CONFIG_PATH: &str = "COURIER_CONFIG";

    /// Parse and validate TOML.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&raw)?;
        debug!(path = %path.display(), service = %config.service, "configuration loaded");
        Ok(config)
    }

    /// Load from `COURIER_CONFIG` if set, else from the first existing
    /// candidate, else defaults.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self, ConfigError> {
        if let Ok(path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !path.trim().is_empty() {
                return Self::from_toml_file(path);
            }
        }
        for candidate in candidates {
            if candidate.as_ref().exists() {
                return Self::from_toml_file(candidate);
            }
        }
        debug!("no configuration file found, using defaults");
        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    /// Check every value is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("service", &self.service),
            ("publisher.exchange", &self.publisher.exchange),
            ("publisher.routing_key", &self.publisher.routing_key),
            ("consumer.queue", &self.consumer.queue),
            ("dead_letter.exchange", &self.dead_letter.exchange),
            ("dead_letter.queue", &self.dead_letter.queue),
        ];
        if let Some((name, _)) = required.iter().find(|(_, value)| value.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!("{name} must not be empty")));
        }

        let concurrency = self.consumer.concurrency;
        ConcurrencyRange::new(concurrency.min, concurrency.max)?;

        if self.publisher.reply_timeout_ms == 0 {
            return Err(ConfigError::Invalid("publisher.reply_timeout_ms must be positive".into()));
        }

        let retry = &self.retry;
        if retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".into()));
        }
        if !retry.multiplier.is_finite() || retry.multiplier < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "retry.multiplier must be at least 1.0, got {}",
                retry.multiplier
            )));
        }
        if retry.initial_interval_ms > retry.max_interval_ms {
            return Err(ConfigError::Invalid(format!(
                "retry.initial_interval_ms {} exceeds retry.max_interval_ms {}",
                retry.initial_interval_ms, retry.max_interval_ms
            )));
        }
        Ok(())
    }

    /// Publisher settings.
    pub fn publisher_config(&self) -> PublisherConfig {
        PublisherConfig {
            service: self.service.clone(),
            exchange: self.publisher.exchange.clone(),
            routing_key: self.publisher.routing_key.clone(),
            reply_timeout: Duration::from_millis(self.publisher.reply_timeout_ms),
            pass_through: self.publisher.pass_through_headers.clone(),
        }
    }

    /// Retry policy.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_attempts,
            Duration::from_millis(self.retry.initial_interval_ms),
            self.retry.multiplier,
            Duration::from_millis(self.retry.max_interval_ms),
        )
    }

    /// Dead-letter destination.
    pub fn dead_letter_target(&self) -> DeadLetterTarget {
        DeadLetterTarget::new(&self.dead_letter.exchange, &self.dead_letter.routing_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
        service = "orders"

        [publisher]
        exchange = "orders.exchange"
        routing_key = "orders"
        reply_timeout_ms = 2500
        pass_through_headers = ["x-trace-id", "x-request-id"]

        [consumer]
        queue = "orders.queue"
        concurrency = "2-8"
        prefetch = 20

        [retry]
        max_attempts = 5
        initial_interval_ms = 200
        multiplier = 3.0
        max_interval_ms = 5000

        [dead_letter]
        exchange = "orders.dlx"
        routing_key = "orders.dead"
        queue = "orders.dlq"
    "#;

    #[test]
    fn test_parse_full_config() {
        let config = CourierConfig::from_toml_str(FULL).unwrap();
        assert_eq!(config.service, "orders");
        assert_eq!(config.consumer.concurrency, ConcurrencyRange { min: 2, max: 8 });
        assert_eq!(config.consumer.prefetch, 20);

        let publisher = config.publisher_config();
        assert_eq!(publisher.reply_timeout, Duration::from_millis(2500));
        assert_eq!(publisher.pass_through, vec!["x-trace-id", "x-request-id"]);

        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts(), 5);
        assert_eq!(policy.backoff(2), Duration::from_millis(600));

        assert_eq!(config.dead_letter_target(), DeadLetterTarget::new("orders.dlx", "orders.dead"));
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let config = CourierConfig::from_toml_str(r#"service = "billing""#).unwrap();
        assert_eq!(config.retry, RetrySection::default());
        assert_eq!(config.consumer.concurrency, ConcurrencyRange::default());
    }

    #[test]
    fn test_concurrency_forms() {
        assert_eq!("3".parse::<ConcurrencyRange>().unwrap(), ConcurrencyRange { min: 3, max: 3 });
        assert_eq!(" 1 - 4 ".parse::<ConcurrencyRange>().unwrap().max, 4);
        assert!("4-1".parse::<ConcurrencyRange>().is_err());
        assert!("0".parse::<ConcurrencyRange>().is_err());
        assert!("a-b".parse::<ConcurrencyRange>().is_err());

        let config = CourierConfig::from_toml_str("[consumer]\nconcurrency = 6").unwrap();
        assert_eq!(config.consumer.concurrency.max, 6);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let cases = [
            "service = \"\"",
            "[retry]\nmax_attempts = 0",
            "[retry]\nmultiplier = 0.5",
            "[retry]\ninitial_interval_ms = 20000",
            "[publisher]\nreply_timeout_ms = 0",
            "[consumer]\nqueue = \" \"",
        ];
        for raw in cases {
            assert!(
                matches!(CourierConfig::from_toml_str(raw), Err(ConfigError::Invalid(_))),
                "accepted {raw:?}"
            );
        }
    }

    #[test]
    fn test_bad_toml_is_parse_error() {
        assert!(matches!(
            CourierConfig::from_toml_str("service = "),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        assert!(matches!(
            CourierConfig::from_toml_file("/nonexistent/courier.toml"),
            Err(ConfigError::Io { .. })
        ));
    }
}
