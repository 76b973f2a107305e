//! Producer settings resolved from a hierarchical configuration tree.
//!
//! Every topic reads its settings below its own identifier:
//!
//! ```toml
//! [orders]
//! serviceName = "kafka_native"
//! topic-name = "orders-v2"
//!
//! [orders.producer]
//! buffer-size = 500
//! overflow-strategy = "backpressure"
//! min-backoff = "1s"
//! max-backoff = "20s"
//! random-factor = 0.1
//!
//! [orders.producer.kafka-clients]
//! "compression.type" = "snappy"
//! ```
//!
//! Missing fields fall back to the defaults below. Brokers come from service
//! discovery when `serviceName` is set, then from `bootstrap.servers` in
//! `kafka-clients`, then from the process-wide `kafka.brokers` list.

use crate::discovery::{resolve_bootstrap_servers, ServiceLocator, DISCOVERY_TIMEOUT};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, instrument};

pub const DEFAULT_BUFFER_SIZE: usize = 100;
pub const DEFAULT_MIN_BACKOFF: Duration = Duration::from_secs(3);
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(30);
pub const DEFAULT_RANDOM_FACTOR: f64 = 0.2;
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_BOOTSTRAP_SERVERS: &str = "localhost:9092";

/// Loads the configuration tree from a file, with `TOPIC_PRODUCER__*`
/// environment variables layered on top.
///
/// Environment names cannot carry `-`, so a variable such as
/// `TOPIC_PRODUCER__ORDERS__PRODUCER__BUFFER_SIZE` lands on
/// `orders.producer.buffer_size`. Producer settings accept that underscore
/// spelling and prefer it over the hyphenated one from the file. The
/// `kafka-clients` table is only read from its hyphenated key.
pub fn load<P: AsRef<Path>>(path: P) -> Result<config::Config> {
    let settings = config::Config::builder()
        .add_source(config::File::from(path.as_ref()))
        .add_source(environment())
        .build()?;

    Ok(settings)
}

fn environment() -> config::Environment {
    config::Environment::with_prefix("TOPIC_PRODUCER")
        .prefix_separator("__")
        .separator("__")
}

/// What a full queue does with a newly arriving record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowStrategy {
    /// Evict the oldest queued record, then accept the new one.
    #[default]
    DropHead,
    /// Reject the new record.
    DropTail,
    /// Evict every queued record, then accept the new one.
    DropBuffer,
    /// Reject the new record.
    DropNew,
    /// Suspend the caller until space frees up.
    Backpressure,
    /// Fail the queue.
    Fail,
}

impl OverflowStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverflowStrategy::DropHead => "drop-head",
            OverflowStrategy::DropTail => "drop-tail",
            OverflowStrategy::DropBuffer => "drop-buffer",
            OverflowStrategy::DropNew => "drop-new",
            OverflowStrategy::Backpressure => "backpressure",
            OverflowStrategy::Fail => "fail",
        }
    }
}

impl fmt::Display for OverflowStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OverflowStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "drop-head" => Ok(OverflowStrategy::DropHead),
            "drop-tail" => Ok(OverflowStrategy::DropTail),
            "drop-buffer" => Ok(OverflowStrategy::DropBuffer),
            "drop-new" => Ok(OverflowStrategy::DropNew),
            "backpressure" => Ok(OverflowStrategy::Backpressure),
            "fail" => Ok(OverflowStrategy::Fail),
            other => Err(Error::InvalidConfiguration(format!(
                "unknown overflow strategy '{}'",
                other
            ))),
        }
    }
}

/// Fully resolved settings of one topic producer.
#[derive(Debug, Clone, PartialEq)]
pub struct ProducerConfig {
    /// Topic identifier the producer is registered under.
    pub topic_id: String,
    /// Kafka topic the records are written to.
    pub topic_name: String,
    pub bootstrap_servers: String,
    pub buffer_size: usize,
    pub overflow_strategy: OverflowStrategy,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
    pub random_factor: f64,
    /// How long a shutdown waits for the queue to drain.
    pub close_timeout: Duration,
    /// Raw librdkafka properties from `producer.kafka-clients`.
    pub client_properties: BTreeMap<String, String>,
}

impl ProducerConfig {
    /// Settings with every default and the given brokers.
    pub fn with_defaults(topic_id: impl Into<String>, bootstrap_servers: impl Into<String>) -> Self {
        let topic_id = topic_id.into();
        Self {
            topic_name: topic_id.clone(),
            topic_id,
            bootstrap_servers: bootstrap_servers.into(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            overflow_strategy: OverflowStrategy::default(),
            min_backoff: DEFAULT_MIN_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            random_factor: DEFAULT_RANDOM_FACTOR,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            client_properties: BTreeMap::new(),
        }
    }

    /// Resolves the settings of `topic_id` from `config`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidConfiguration`] for unknown strategies, malformed
    ///   numbers or durations, and out-of-range values
    /// - [`Error::ResolutionTimeout`] / [`Error::Discovery`] when `serviceName`
    ///   is set and cannot be resolved
    #[instrument(skip(config, locator), fields(topic = %topic_id))]
    pub async fn resolve(
        topic_id: &str,
        config: &config::Config,
        locator: &dyn ServiceLocator,
    ) -> Result<Self> {
        if topic_id.is_empty() {
            return Err(Error::InvalidConfiguration(
                "topic identifier must not be empty".to_string(),
            ));
        }

        let producer = format!("{}.producer", topic_id);

        let mut client_properties = BTreeMap::new();
        if let Some(table) =
            lookup_exact(config, &format!("{}.kafka-clients", producer), config::Value::into_table)?
        {
            flatten_properties("", table, &mut client_properties)?;
        }

        // Discovery wins over explicit client properties, which win over the
        // process-wide default.
        let service_path = format!("{}.serviceName", topic_id);
        let bootstrap_servers = match lookup(config, &service_path, config::Value::into_string)? {
            Some(service) => {
                resolve_bootstrap_servers(locator, &service, DISCOVERY_TIMEOUT).await?
            }
            None => match client_properties.get("bootstrap.servers") {
                Some(servers) => servers.clone(),
                None => default_bootstrap_servers(config)?,
            },
        };
        client_properties.remove("bootstrap.servers");

        let mut settings = Self::with_defaults(topic_id, bootstrap_servers);
        settings.client_properties = client_properties;

        if let Some(name) = lookup(config, &format!("{}.topic-name", topic_id), config::Value::into_string)? {
            settings.topic_name = name;
        }

        if let Some(size) = lookup(config, &format!("{}.buffer-size", producer), config::Value::into_int)? {
            if size <= 0 {
                return Err(Error::InvalidConfiguration(format!(
                    "{}.buffer-size must be positive, got {}",
                    producer, size
                )));
            }
            settings.buffer_size = size as usize;
        }

        if let Some(strategy) =
            lookup(config, &format!("{}.overflow-strategy", producer), config::Value::into_string)?
        {
            settings.overflow_strategy = strategy.parse()?;
        }

        if let Some(min) = lookup_duration(config, &format!("{}.min-backoff", producer))? {
            settings.min_backoff = min;
        }
        if let Some(max) = lookup_duration(config, &format!("{}.max-backoff", producer))? {
            settings.max_backoff = max;
        }
        if settings.min_backoff > settings.max_backoff {
            return Err(Error::InvalidConfiguration(format!(
                "{}.min-backoff ({:?}) exceeds max-backoff ({:?})",
                producer, settings.min_backoff, settings.max_backoff
            )));
        }

        if let Some(factor) =
            lookup(config, &format!("{}.random-factor", producer), config::Value::into_float)?
        {
            if !(0.0..=1.0).contains(&factor) {
                return Err(Error::InvalidConfiguration(format!(
                    "{}.random-factor must be within [0, 1], got {}",
                    producer, factor
                )));
            }
            settings.random_factor = factor;
        }

        if let Some(timeout) = lookup_duration(config, &format!("{}.close-timeout", producer))? {
            settings.close_timeout = timeout;
        }

        debug!(
            topic_name = %settings.topic_name,
            bootstrap_servers = %settings.bootstrap_servers,
            buffer_size = settings.buffer_size,
            overflow_strategy = %settings.overflow_strategy,
            "Resolved producer settings"
        );

        Ok(settings)
    }
}

/// Reads `path`, trying its underscore spelling first when it has one.
fn lookup<T>(
    config: &config::Config,
    path: &str,
    convert: impl Fn(config::Value) -> std::result::Result<T, config::ConfigError>,
) -> Result<Option<T>> {
    if path.contains('-') {
        if let Some(value) = lookup_exact(config, &path.replace('-', "_"), &convert)? {
            return Ok(Some(value));
        }
    }
    lookup_exact(config, path, convert)
}

/// Reads `path`, distinguishing an absent key from an unusable value.
fn lookup_exact<T>(
    config: &config::Config,
    path: &str,
    convert: impl FnOnce(config::Value) -> std::result::Result<T, config::ConfigError>,
) -> Result<Option<T>> {
    match config.get::<config::Value>(path) {
        Ok(value) => convert(value)
            .map(Some)
            .map_err(|e| Error::InvalidConfiguration(format!("{}: {}", path, e))),
        Err(config::ConfigError::NotFound(_)) => Ok(None),
        Err(e) => Err(Error::InvalidConfiguration(format!("{}: {}", path, e))),
    }
}

fn lookup_duration(config: &config::Config, path: &str) -> Result<Option<Duration>> {
    match lookup(config, path, config::Value::into_string)? {
        Some(raw) => parse_duration(&raw)
            .map(Some)
            .map_err(|e| Error::InvalidConfiguration(format!("{}: {}", path, e))),
        None => Ok(None),
    }
}

fn default_bootstrap_servers(config: &config::Config) -> Result<String> {
    let value = match config.get::<config::Value>("kafka.brokers") {
        Ok(value) => value,
        Err(config::ConfigError::NotFound(_)) => return Ok(DEFAULT_BOOTSTRAP_SERVERS.to_string()),
        Err(e) => return Err(Error::InvalidConfiguration(format!("kafka.brokers: {}", e))),
    };

    let brokers = match value.clone().into_array() {
        Ok(items) => items
            .into_iter()
            .map(config::Value::into_string)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::InvalidConfiguration(format!("kafka.brokers: {}", e)))?
            .join(","),
        Err(_) => value
            .into_string()
            .map_err(|e| Error::InvalidConfiguration(format!("kafka.brokers: {}", e)))?,
    };

    if brokers.trim().is_empty() {
        return Ok(DEFAULT_BOOTSTRAP_SERVERS.to_string());
    }
    Ok(brokers)
}

/// Nested tables become dotted property names (`[a] b = 1` -> `a.b`).
fn flatten_properties(
    prefix: &str,
    table: config::Map<String, config::Value>,
    out: &mut BTreeMap<String, String>,
) -> Result<()> {
    for (key, value) in table {
        let name = if prefix.is_empty() {
            key
        } else {
            format!("{}.{}", prefix, key)
        };
        match value.clone().into_table() {
            Ok(nested) => flatten_properties(&name, nested, out)?,
            Err(_) => {
                let raw = value
                    .into_string()
                    .map_err(|e| Error::InvalidConfiguration(format!("kafka-clients.{}: {}", name, e)))?;
                out.insert(name, raw);
            }
        }
    }
    Ok(())
}

/// Parses durations such as `500ms`, `3s`, `1.5 seconds`, `2m` or `1h`.
///
/// A bare number is read as milliseconds.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let trimmed = input.trim();
    let split = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);

    let value: f64 = number
        .parse()
        .map_err(|_| Error::InvalidConfiguration(format!("malformed duration '{}'", input)))?;

    let seconds = match unit.trim() {
        "" | "ms" | "milli" | "millis" | "millisecond" | "milliseconds" => value / 1000.0,
        "s" | "second" | "seconds" => value,
        "m" | "minute" | "minutes" => value * 60.0,
        "h" | "hour" | "hours" => value * 3600.0,
        other => {
            return Err(Error::InvalidConfiguration(format!(
                "unknown duration unit '{}' in '{}'",
                other, input
            )))
        }
    };

    Duration::try_from_secs_f64(seconds)
        .map_err(|_| Error::InvalidConfiguration(format!("duration out of range '{}'", input)))
}
