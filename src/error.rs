use std::fmt;
use std::io;
use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),

    /// Not enough bytes left to decode the requested value
    #[error("Unexpected EOF")]
    UnexpectedEof,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Failed to encode request: {0}")]
    Encode(String),

    /// The broker answered the ApiVersions handshake with an error
    #[error("Error trying to get broker api versions: {0}")]
    Negotiation(ErrorCode),

    /// Client and broker share no version of the operation
    #[error("No mutually supported version for api key {api_key} (client {client_min}..={client_max}, broker {broker})")]
    UnsupportedVersion {
        api_key: i16,
        client_min: i16,
        client_max: i16,
        broker: String,
    },

    #[error("Unexpected response kind for request")]
    UnexpectedResponse,

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Invalid broker address: {0}")]
    InvalidAddress(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Producer closed")]
    ProducerClosed,

    #[error(transparent)]
    Produce(#[from] ProduceError),
}

/// Outcome of a single record that did not make it into the log.
///
/// Cloned out to every record of a failed batch, so it only carries owned,
/// cheaply cloned data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProduceError {
    #[error("Broker rejected record ({code}): {}", describe(.partition_message, .record_message))]
    Broker {
        code: ErrorCode,
        partition_message: Option<String>,
        record_message: Option<String>,
    },

    /// The request carrying the record never got a usable response
    #[error("Failed to deliver produce request: {0}")]
    Transport(String),

    #[error("Broker response did not include {topic}/{partition}")]
    MissingPartition { topic: String, partition: i32 },

    /// The sender went away before resolving the record
    #[error("Record dropped before delivery")]
    Dropped,
}

fn describe(partition_message: &Option<String>, record_message: &Option<String>) -> String {
    match (partition_message, record_message) {
        (Some(p), Some(r)) => format!("{}; {}", p, r),
        (Some(m), None) | (None, Some(m)) => m.clone(),
        (None, None) => "no message".to_string(),
    }
}

/// Error code as reported by a Kafka broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ErrorCode(pub i16);

impl ErrorCode {
    pub const NONE: ErrorCode = ErrorCode(0);
    pub const UNKNOWN_SERVER_ERROR: ErrorCode = ErrorCode(-1);
    pub const CORRUPT_MESSAGE: ErrorCode = ErrorCode(2);
    pub const UNKNOWN_TOPIC_OR_PARTITION: ErrorCode = ErrorCode(3);
    pub const INVALID_FETCH_SIZE: ErrorCode = ErrorCode(4);
    pub const LEADER_NOT_AVAILABLE: ErrorCode = ErrorCode(5);
    pub const NOT_LEADER_OR_FOLLOWER: ErrorCode = ErrorCode(6);
    pub const REQUEST_TIMED_OUT: ErrorCode = ErrorCode(7);
    pub const MESSAGE_TOO_LARGE: ErrorCode = ErrorCode(10);
    pub const NOT_ENOUGH_REPLICAS: ErrorCode = ErrorCode(19);
    pub const NOT_ENOUGH_REPLICAS_AFTER_APPEND: ErrorCode = ErrorCode(20);
    pub const INVALID_REQUIRED_ACKS: ErrorCode = ErrorCode(21);
    pub const TOPIC_AUTHORIZATION_FAILED: ErrorCode = ErrorCode(29);
    pub const UNSUPPORTED_VERSION: ErrorCode = ErrorCode(35);
    pub const INVALID_RECORD: ErrorCode = ErrorCode(87);

    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    pub fn name(self) -> &'static str {
        match self {
            ErrorCode::NONE => "NONE",
            ErrorCode::UNKNOWN_SERVER_ERROR => "UNKNOWN_SERVER_ERROR",
            ErrorCode::CORRUPT_MESSAGE => "CORRUPT_MESSAGE",
            ErrorCode::UNKNOWN_TOPIC_OR_PARTITION => "UNKNOWN_TOPIC_OR_PARTITION",
            ErrorCode::INVALID_FETCH_SIZE => "INVALID_FETCH_SIZE",
            ErrorCode::LEADER_NOT_AVAILABLE => "LEADER_NOT_AVAILABLE",
            ErrorCode::NOT_LEADER_OR_FOLLOWER => "NOT_LEADER_OR_FOLLOWER",
            ErrorCode::REQUEST_TIMED_OUT => "REQUEST_TIMED_OUT",
            ErrorCode::MESSAGE_TOO_LARGE => "MESSAGE_TOO_LARGE",
            ErrorCode::NOT_ENOUGH_REPLICAS => "NOT_ENOUGH_REPLICAS",
            ErrorCode::NOT_ENOUGH_REPLICAS_AFTER_APPEND => "NOT_ENOUGH_REPLICAS_AFTER_APPEND",
            ErrorCode::INVALID_REQUIRED_ACKS => "INVALID_REQUIRED_ACKS",
            ErrorCode::TOPIC_AUTHORIZATION_FAILED => "TOPIC_AUTHORIZATION_FAILED",
            ErrorCode::UNSUPPORTED_VERSION => "UNSUPPORTED_VERSION",
            ErrorCode::INVALID_RECORD => "INVALID_RECORD",
            _ => "UNKNOWN",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.0)
    }
}

impl From<i16> for ErrorCode {
    fn from(code: i16) -> Self {
        ErrorCode(code)
    }
}
