use std::collections::HashMap;

use kafka_protocol::messages::ApiKey;
use kafka_protocol::protocol::VersionRange;

use crate::error::{Error, Result};
use crate::kafka::messages::{
    self, Acks, ApiVersionsResponse, OffsetCommitRequest, ProduceRequest,
};

/// Version ranges a broker advertised in its ApiVersions response.
#[derive(Debug, Clone, Default)]
pub struct BrokerCapabilities {
    ranges: HashMap<i16, VersionRange>,
}

impl BrokerCapabilities {
    pub fn new(ranges: impl IntoIterator<Item = (ApiKey, VersionRange)>) -> Self {
        Self {
            ranges: ranges
                .into_iter()
                .map(|(api_key, range)| (api_key as i16, range))
                .collect(),
        }
    }

    pub fn from_response(response: &ApiVersionsResponse) -> Self {
        Self {
            ranges: response
                .api_keys
                .iter()
                .map(|v| {
                    (
                        v.api_key,
                        VersionRange {
                            min: v.min_version,
                            max: v.max_version,
                        },
                    )
                })
                .collect(),
        }
    }

    pub fn range(&self, api_key: ApiKey) -> Option<VersionRange> {
        self.ranges.get(&(api_key as i16)).copied()
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

/// Builds requests at the highest version both sides understand.
#[derive(Debug, Clone)]
pub struct RequestFactory {
    capabilities: BrokerCapabilities,
    client: HashMap<i16, VersionRange>,
}

impl RequestFactory {
    pub fn new(capabilities: BrokerCapabilities) -> Self {
        let client = [ApiKey::ApiVersions, ApiKey::Produce, ApiKey::OffsetCommit]
            .into_iter()
            .filter_map(|api_key| {
                messages::client_versions(api_key).map(|range| (api_key as i16, range))
            })
            .collect();
        Self {
            capabilities,
            client,
        }
    }

    /// Overrides the client side of the negotiation for `api_key`.
    pub fn with_client_versions(mut self, api_key: ApiKey, range: VersionRange) -> Self {
        self.client.insert(api_key as i16, range);
        self
    }

    pub fn capabilities(&self) -> &BrokerCapabilities {
        &self.capabilities
    }

    pub fn select_version(&self, api_key: ApiKey) -> Result<i16> {
        let client = self.client.get(&(api_key as i16)).copied().ok_or_else(|| {
            Error::Protocol(format!("Client does not implement {:?}", api_key))
        })?;

        let mismatch = |broker: String| Error::UnsupportedVersion {
            api_key: api_key as i16,
            client_min: client.min,
            client_max: client.max,
            broker,
        };

        let broker = self
            .capabilities
            .range(api_key)
            .ok_or_else(|| mismatch("not advertised".to_string()))?;

        let min = client.min.max(broker.min);
        let max = client.max.min(broker.max);
        if min > max {
            return Err(mismatch(format!("{}..={}", broker.min, broker.max)));
        }
        Ok(max)
    }

    pub fn produce_request(&self, acks: Acks, timeout_ms: i32) -> Result<ProduceRequest> {
        let version = self.select_version(ApiKey::Produce)?;
        Ok(ProduceRequest::new(version, acks, timeout_ms))
    }

    pub fn offset_commit_request(
        &self,
        group_id: &str,
        generation_id: i32,
        member_id: &str,
    ) -> Result<OffsetCommitRequest> {
        let version = self.select_version(ApiKey::OffsetCommit)?;
        Ok(OffsetCommitRequest::new(
            version,
            group_id,
            generation_id,
            member_id,
        ))
    }
}
