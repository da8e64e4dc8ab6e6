pub mod config;
pub mod error;
pub mod kafka;
pub mod protocol;

pub use config::ClientConfig;
pub use error::{Error, ErrorCode, ProduceError, Result};
pub use kafka::broker::{BrokerAddress, KafkaBroker, Transport};
pub use kafka::messages::Acks;
pub use kafka::producer::{DeliveryFuture, ProduceData, ProduceResult, Producer, ProducerConfig};
