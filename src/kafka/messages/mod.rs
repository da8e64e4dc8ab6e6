//! Versioned request/response shapes.
//!
//! Every operation is one variant of [`RequestKind`] / [`ResponseKind`]. The
//! variant's payload carries the wire version it was built for and encodes or
//! decodes itself accordingly. Choosing the version is left to
//! [`RequestFactory`](crate::kafka::broker::RequestFactory).

mod api_versions;
mod offset_commit;
mod produce;

use bytes::{Bytes, BytesMut};
use kafka_protocol::messages::ApiKey;
use kafka_protocol::protocol::VersionRange;

use crate::error::{Error, Result};
use crate::protocol::Encodable;

pub use api_versions::{ApiVersion, ApiVersionsRequest, ApiVersionsResponse, HANDSHAKE_VERSION};
pub use offset_commit::{
    OffsetCommitPartition, OffsetCommitPartitionResponse, OffsetCommitRequest,
    OffsetCommitResponse, OffsetCommitTopic, OffsetCommitTopicResponse,
};
pub use produce::{
    Acks, PartitionProduceData, PartitionProduceResponse, ProduceRequest, ProduceResponse,
    RecordError, TopicProduceData, TopicProduceResponse,
};

#[inline]
fn is_valid_version(version: i16, range: &VersionRange) -> bool {
    version >= range.min && version <= range.max
}

/// Versions of `api_key` this client can speak, if it speaks it at all.
pub fn client_versions(api_key: ApiKey) -> Option<VersionRange> {
    match api_key {
        ApiKey::ApiVersions => Some(ApiVersionsRequest::VERSIONS),
        ApiKey::Produce => Some(ProduceRequest::VERSIONS),
        ApiKey::OffsetCommit => Some(OffsetCommitRequest::VERSIONS),
        _ => None,
    }
}

#[derive(Debug)]
pub enum RequestKind {
    ApiVersions(ApiVersionsRequest),
    Produce(ProduceRequest),
    OffsetCommit(OffsetCommitRequest),
}

impl RequestKind {
    pub fn api_key(&self) -> ApiKey {
        match self {
            RequestKind::ApiVersions(_) => ApiVersionsRequest::API_KEY,
            RequestKind::Produce(_) => ProduceRequest::API_KEY,
            RequestKind::OffsetCommit(_) => OffsetCommitRequest::API_KEY,
        }
    }

    pub fn api_version(&self) -> i16 {
        match self {
            RequestKind::ApiVersions(req) => req.version,
            RequestKind::Produce(req) => req.version,
            RequestKind::OffsetCommit(req) => req.version,
        }
    }

    /// Produce with acks = 0 is the only request the broker never answers.
    pub fn expects_response(&self) -> bool {
        match self {
            RequestKind::Produce(req) => req.expects_response(),
            _ => true,
        }
    }

    /// Rejects versions this client has no encoder for.
    pub fn validate(&self) -> Result<()> {
        let api_key = self.api_key();
        let version = self.api_version();
        match client_versions(api_key) {
            Some(range) if is_valid_version(version, &range) => Ok(()),
            Some(range) => Err(Error::UnsupportedVersion {
                api_key: api_key as i16,
                client_min: range.min,
                client_max: range.max,
                broker: format!("request built for v{}", version),
            }),
            None => Err(Error::Protocol(format!("Unsupported api key: {:?}", api_key))),
        }
    }
}

impl Encodable for RequestKind {
    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        match self {
            RequestKind::ApiVersions(req) => req.encode(buf),
            RequestKind::Produce(req) => req.encode(buf),
            RequestKind::OffsetCommit(req) => req.encode(buf),
        }
    }
}

impl From<ApiVersionsRequest> for RequestKind {
    fn from(req: ApiVersionsRequest) -> Self {
        RequestKind::ApiVersions(req)
    }
}

impl From<ProduceRequest> for RequestKind {
    fn from(req: ProduceRequest) -> Self {
        RequestKind::Produce(req)
    }
}

impl From<OffsetCommitRequest> for RequestKind {
    fn from(req: OffsetCommitRequest) -> Self {
        RequestKind::OffsetCommit(req)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseKind {
    ApiVersions(ApiVersionsResponse),
    Produce(ProduceResponse),
    OffsetCommit(OffsetCommitResponse),
}

impl ResponseKind {
    /// Decodes the body of the response to a request of `api_key` at `version`.
    pub fn decode(api_key: ApiKey, version: i16, buf: &mut Bytes) -> Result<Self> {
        let response = match api_key {
            ApiKey::ApiVersions => {
                ResponseKind::ApiVersions(ApiVersionsResponse::decode(buf, version)?)
            }
            ApiKey::Produce => ResponseKind::Produce(ProduceResponse::decode(buf, version)?),
            ApiKey::OffsetCommit => {
                ResponseKind::OffsetCommit(OffsetCommitResponse::decode(buf, version)?)
            }
            other => {
                return Err(Error::Protocol(format!(
                    "No response decoder for api key {:?}",
                    other
                )));
            }
        };
        Ok(response)
    }

    pub fn encode(&self, buf: &mut BytesMut, version: i16) -> Result<()> {
        match self {
            ResponseKind::ApiVersions(resp) => resp.encode(buf, version),
            ResponseKind::Produce(resp) => resp.encode(buf, version),
            ResponseKind::OffsetCommit(resp) => resp.encode(buf, version),
        }
    }

    pub fn api_key(&self) -> ApiKey {
        match self {
            ResponseKind::ApiVersions(_) => ApiKey::ApiVersions,
            ResponseKind::Produce(_) => ApiKey::Produce,
            ResponseKind::OffsetCommit(_) => ApiKey::OffsetCommit,
        }
    }
}
