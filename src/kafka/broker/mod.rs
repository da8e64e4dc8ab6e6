mod broker;
mod capabilities;
mod connection;
mod types;

pub use broker::KafkaBroker;
pub use capabilities::{BrokerCapabilities, RequestFactory};
pub use connection::{TcpConnection, Transport};
pub use types::{BrokerAddress, DEFAULT_PORT};
