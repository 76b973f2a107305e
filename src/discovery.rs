//! Service discovery for broker bootstrap addresses.
//!
//! A topic may name a logical service (`<topic>.serviceName`) instead of
//! listing brokers. The name is resolved through a [`ServiceLocator`] once,
//! at producer construction, under a fixed timeout.

use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Upper bound for a discovery lookup during producer construction.
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Resolves a logical service name to network addresses.
#[async_trait]
pub trait ServiceLocator: Send + Sync {
    /// Returns every known URI (e.g. `tcp://10.0.0.5:9092`) for `name`.
    async fn locate_all(&self, name: &str) -> Result<Vec<String>>;
}

/// Locator backed by a fixed name -> URI table.
#[derive(Debug, Clone, Default)]
pub struct StaticServiceLocator {
    services: HashMap<String, Vec<String>>,
}

impl StaticServiceLocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_service<I, S>(mut self, name: impl Into<String>, uris: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.services
            .insert(name.into(), uris.into_iter().map(Into::into).collect());
        self
    }

    /// Builds a locator from the `services` table of the configuration.
    ///
    /// Each entry maps a service name to a list of URIs or a single
    /// comma-separated string. A missing table yields an empty locator.
    pub fn from_config(config: &config::Config) -> Result<Self> {
        let table = match config.get_table("services") {
            Ok(table) => table,
            Err(config::ConfigError::NotFound(_)) => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };

        let mut locator = Self::default();
        for (name, value) in table {
            let uris = match value.clone().into_array() {
                Ok(items) => items
                    .into_iter()
                    .map(|item| item.into_string())
                    .collect::<std::result::Result<Vec<_>, _>>()?,
                Err(_) => value
                    .into_string()?
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            };
            locator.services.insert(name, uris);
        }
        Ok(locator)
    }
}

#[async_trait]
impl ServiceLocator for StaticServiceLocator {
    async fn locate_all(&self, name: &str) -> Result<Vec<String>> {
        Ok(self.services.get(name).cloned().unwrap_or_default())
    }
}

/// Resolves `service` to a comma-joined `host:port` list.
///
/// URIs without an explicit host and port are skipped.
///
/// # Errors
///
/// - [`Error::ResolutionTimeout`] if the locator does not answer within `timeout`
/// - [`Error::Discovery`] if no usable address remains
#[instrument(skip(locator), fields(service = %service))]
pub async fn resolve_bootstrap_servers(
    locator: &dyn ServiceLocator,
    service: &str,
    timeout: Duration,
) -> Result<String> {
    let uris = tokio::time::timeout(timeout, locator.locate_all(service))
        .await
        .map_err(|_| Error::ResolutionTimeout {
            service: service.to_string(),
            timeout,
        })??;

    let authorities: Vec<String> = uris
        .iter()
        .filter_map(|uri| {
            let authority = authority_of(uri);
            if authority.is_none() {
                warn!("Ignoring address without host and port: {}", uri);
            }
            authority
        })
        .collect();

    if authorities.is_empty() {
        return Err(Error::Discovery(format!(
            "service '{}' resolved to no usable address",
            service
        )));
    }

    let servers = authorities.join(",");
    debug!("Resolved bootstrap servers: {}", servers);
    Ok(servers)
}

/// Extracts `host:port` from a URI, if both parts are present.
fn authority_of(uri: &str) -> Option<String> {
    let rest = uri.split_once("://").map_or(uri, |(_, rest)| rest);
    let authority = rest.split(['/', '?', '#']).next()?;
    let authority = authority.rsplit_once('@').map_or(authority, |(_, host)| host);
    let (host, port) = authority.rsplit_once(':')?;
    if host.is_empty() || port.parse::<u16>().is_err() {
        return None;
    }
    Some(format!("{}:{}", host, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowLocator;

    #[async_trait]
    impl ServiceLocator for SlowLocator {
        async fn locate_all(&self, _name: &str) -> Result<Vec<String>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(vec![])
        }
    }

    #[test]
    fn test_authority_extraction() {
        assert_eq!(authority_of("tcp://kafka-1:9092"), Some("kafka-1:9092".to_string()));
        assert_eq!(authority_of("kafka-2:9093"), Some("kafka-2:9093".to_string()));
        assert_eq!(authority_of("http://user@host:80/path"), Some("host:80".to_string()));
        assert_eq!(authority_of("tcp://no-port"), None);
        assert_eq!(authority_of("tcp://:9092"), None);
    }

    #[tokio::test]
    async fn test_resolve_joins_usable_addresses() {
        let locator = StaticServiceLocator::new().with_service(
            "kafka_native",
            ["tcp://10.0.0.1:9092", "tcp://no-port", "tcp://10.0.0.2:9092"],
        );

        let servers = resolve_bootstrap_servers(&locator, "kafka_native", DISCOVERY_TIMEOUT)
            .await
            .unwrap();
        assert_eq!(servers, "10.0.0.1:9092,10.0.0.2:9092");
    }

    #[tokio::test]
    async fn test_resolve_unknown_service() {
        let locator = StaticServiceLocator::new();
        let result = resolve_bootstrap_servers(&locator, "missing", DISCOVERY_TIMEOUT).await;
        assert!(matches!(result, Err(Error::Discovery(_))));
    }

    #[tokio::test]
    async fn test_resolve_timeout() {
        let result =
            resolve_bootstrap_servers(&SlowLocator, "slow", Duration::from_millis(20)).await;
        match result {
            Err(Error::ResolutionTimeout { service, .. }) => assert_eq!(service, "slow"),
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[test]
    fn test_static_locator_from_config() {
        let config = config::Config::builder()
            .add_source(config::File::from_str(
                r#"
                [services]
                kafka_native = ["tcp://k1:9092", "tcp://k2:9092"]
                legacy = "k3:9092, k4:9092"
                "#,
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap();

        let locator = StaticServiceLocator::from_config(&config).unwrap();
        assert_eq!(locator.services["kafka_native"].len(), 2);
        assert_eq!(locator.services["legacy"], vec!["k3:9092", "k4:9092"]);
    }
}
