use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::kafka::messages::Acks;

const DEFAULT_PRODUCE_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_LINGER_MS: u64 = 10;
const DEFAULT_MAX_BATCH_SIZE: usize = 500;

/// Settings for one [`Producer`](super::Producer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerConfig {
    /// Acknowledgement mode sent with every produce request
    pub acks: Acks,
    /// Time the broker may spend waiting on replicas
    pub produce_timeout_ms: u64,
    /// Longest time a record waits for more records before being flushed
    pub linger_ms: u64,
    /// Buffered record count that forces an immediate flush
    pub max_batch_size: usize,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            acks: Acks::default(),
            produce_timeout_ms: DEFAULT_PRODUCE_TIMEOUT_MS,
            linger_ms: DEFAULT_LINGER_MS,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
        }
    }
}

impl ProducerConfig {
    pub fn builder() -> ProducerConfigBuilder {
        ProducerConfigBuilder::default()
    }

    pub fn linger(&self) -> Duration {
        Duration::from_millis(self.linger_ms)
    }

    /// Broker side timeout, clamped to what fits the wire field.
    pub fn produce_timeout_ms_i32(&self) -> i32 {
        i32::try_from(self.produce_timeout_ms).unwrap_or(i32::MAX)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_batch_size == 0 {
            return Err(Error::Config("max_batch_size must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ProducerConfigBuilder {
    config: ProducerConfig,
}

impl ProducerConfigBuilder {
    pub fn acks(mut self, acks: Acks) -> Self {
        self.config.acks = acks;
        self
    }

    pub fn produce_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.config.produce_timeout_ms = timeout_ms;
        self
    }

    pub fn linger_ms(mut self, linger_ms: u64) -> Self {
        self.config.linger_ms = linger_ms;
        self
    }

    pub fn max_batch_size(mut self, size: usize) -> Self {
        self.config.max_batch_size = size;
        self
    }

    pub fn build(self) -> Result<ProducerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
