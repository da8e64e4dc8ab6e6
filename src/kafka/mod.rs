pub mod broker;
pub mod messages;
pub mod producer;

pub use broker::{BrokerAddress, KafkaBroker};
pub use producer::{Producer, ProducerConfig};
