use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::kafka::broker::BrokerAddress;
use crate::kafka::producer::ProducerConfig;

pub const BOOTSTRAP_ENV: &str = "KAFKA_BOOTSTRAP";
pub const CLIENT_ID_ENV: &str = "KAFKA_CLIENT_ID";

/// Connection and producer settings for the command line client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub client_id: Option<String>,
    /// Broker to connect to, `host:port`
    pub bootstrap: String,
    pub request_timeout_ms: u64,
    pub producer: ProducerConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_id: Some("kafka-produce".to_string()),
            bootstrap: "localhost:9092".to_string(),
            request_timeout_ms: 30_000,
            producer: ProducerConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: ClientConfig =
            serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Defaults with `KAFKA_BOOTSTRAP` and `KAFKA_CLIENT_ID` applied.
    pub fn from_env() -> Result<Self> {
        let mut config = ClientConfig::default();
        if let Ok(bootstrap) = env::var(BOOTSTRAP_ENV) {
            config.bootstrap = bootstrap;
        }
        if let Ok(client_id) = env::var(CLIENT_ID_ENV) {
            config.client_id = Some(client_id).filter(|id| !id.is_empty());
        }
        config.validate()?;
        Ok(config)
    }

    pub fn bootstrap_address(&self) -> Result<BrokerAddress> {
        self.bootstrap.parse()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        self.bootstrap_address()?;
        if self.request_timeout_ms == 0 {
            return Err(Error::Config("request_timeout_ms must be positive".to_string()));
        }
        self.producer.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kafka::messages::Acks;

    #[test]
    fn test_from_json() {
        let config = ClientConfig::from_json(
            r#"{
                "bootstrap": "kafka-1:19092",
                "producer": { "acks": 0, "max_batch_size": 50 }
            }"#,
        )
        .unwrap();
        assert_eq!(config.bootstrap_address().unwrap().port, 19092);
        assert_eq!(config.client_id.as_deref(), Some("kafka-produce"));
        assert_eq!(config.producer.acks, Acks::None);
        assert_eq!(config.producer.max_batch_size, 50);
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_invalid_json_config() {
        assert!(matches!(
            ClientConfig::from_json(r#"{"bootstrap": ""}"#),
            Err(Error::InvalidAddress(_))
        ));
        assert!(matches!(
            ClientConfig::from_json(r#"{"producer": {"max_batch_size": 0}}"#),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            ClientConfig::from_json("not json"),
            Err(Error::Config(_))
        ));
    }
}
