use bytes::{BufMut, Bytes, BytesMut};
use kafka_protocol::messages::ApiKey;
use kafka_protocol::protocol::VersionRange;

use crate::error::{ErrorCode, Result};
use crate::protocol::{self, Decodable, Encodable};

/// Offset commit request, v2 through v4.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetCommitRequest {
    pub version: i16,
    pub group_id: String,
    pub generation_id: i32,
    pub member_id: String,
    pub retention_time_ms: i64,
    pub topics: Vec<OffsetCommitTopic>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetCommitTopic {
    pub name: String,
    pub partitions: Vec<OffsetCommitPartition>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetCommitPartition {
    pub index: i32,
    pub offset: i64,
    pub metadata: Option<String>,
}

impl OffsetCommitRequest {
    pub const API_KEY: ApiKey = ApiKey::OffsetCommit;
    pub const VERSIONS: VersionRange = VersionRange { min: 2, max: 4 };

    /// Retention of `-1` defers to the broker's configured retention.
    pub fn new(version: i16, group_id: &str, generation_id: i32, member_id: &str) -> Self {
        Self {
            version,
            group_id: group_id.to_string(),
            generation_id,
            member_id: member_id.to_string(),
            retention_time_ms: -1,
            topics: Vec::new(),
        }
    }

    pub fn add_offset(&mut self, topic: &str, partition: i32, offset: i64, metadata: Option<&str>) {
        let entry = OffsetCommitPartition {
            index: partition,
            offset,
            metadata: metadata.map(str::to_string),
        };
        match self.topics.iter_mut().find(|t| t.name == topic) {
            Some(t) => t.partitions.push(entry),
            None => self.topics.push(OffsetCommitTopic {
                name: topic.to_string(),
                partitions: vec![entry],
            }),
        }
    }
}

impl Encodable for OffsetCommitRequest {
    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        protocol::write_string(buf, &self.group_id)?;
        buf.put_i32(self.generation_id);
        protocol::write_string(buf, &self.member_id)?;
        buf.put_i64(self.retention_time_ms);
        protocol::write_array(buf, &self.topics)
    }
}

impl Encodable for OffsetCommitTopic {
    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        protocol::write_string(buf, &self.name)?;
        protocol::write_array(buf, &self.partitions)
    }
}

impl Encodable for OffsetCommitPartition {
    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_i32(self.index);
        buf.put_i64(self.offset);
        protocol::write_nullable_string(buf, self.metadata.as_deref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OffsetCommitResponse {
    pub throttle_time_ms: i32,
    pub topics: Vec<OffsetCommitTopicResponse>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetCommitTopicResponse {
    pub name: String,
    pub partitions: Vec<OffsetCommitPartitionResponse>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetCommitPartitionResponse {
    pub index: i32,
    pub error_code: ErrorCode,
}

impl Decodable for OffsetCommitTopicResponse {
    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(OffsetCommitTopicResponse {
            name: protocol::read_string(buf)?,
            partitions: protocol::read_array(buf)?,
        })
    }
}

impl Encodable for OffsetCommitTopicResponse {
    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        protocol::write_string(buf, &self.name)?;
        protocol::write_array(buf, &self.partitions)
    }
}

impl Decodable for OffsetCommitPartitionResponse {
    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(OffsetCommitPartitionResponse {
            index: protocol::read_i32(buf)?,
            error_code: ErrorCode(protocol::read_i16(buf)?),
        })
    }
}

impl Encodable for OffsetCommitPartitionResponse {
    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_i32(self.index);
        buf.put_i16(self.error_code.0);
        Ok(())
    }
}

impl OffsetCommitResponse {
    pub fn decode(buf: &mut Bytes, version: i16) -> Result<Self> {
        let throttle_time_ms = if version >= 3 {
            protocol::read_i32(buf)?
        } else {
            0
        };
        Ok(OffsetCommitResponse {
            throttle_time_ms,
            topics: protocol::read_array(buf)?,
        })
    }

    pub fn encode(&self, buf: &mut BytesMut, version: i16) -> Result<()> {
        if version >= 3 {
            buf.put_i32(self.throttle_time_ms);
        }
        protocol::write_array(buf, &self.topics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_v2_layout() {
        let mut request = OffsetCommitRequest::new(2, "group", 5, "member-1");
        request.add_offset("orders", 0, 42, None);
        request.add_offset("orders", 1, 43, Some("meta"));

        let mut buf = BytesMut::new();
        request.encode(&mut buf).unwrap();
        let mut bytes = buf.freeze();

        assert_eq!(protocol::read_string(&mut bytes).unwrap(), "group");
        assert_eq!(protocol::read_i32(&mut bytes).unwrap(), 5);
        assert_eq!(protocol::read_string(&mut bytes).unwrap(), "member-1");
        assert_eq!(protocol::read_i64(&mut bytes).unwrap(), -1);
        assert_eq!(protocol::read_i32(&mut bytes).unwrap(), 1);
        assert_eq!(protocol::read_string(&mut bytes).unwrap(), "orders");
        assert_eq!(protocol::read_i32(&mut bytes).unwrap(), 2);
        assert_eq!(protocol::read_i32(&mut bytes).unwrap(), 0);
        assert_eq!(protocol::read_i64(&mut bytes).unwrap(), 42);
        assert_eq!(protocol::read_nullable_string(&mut bytes).unwrap(), None);
        assert_eq!(protocol::read_i32(&mut bytes).unwrap(), 1);
        assert_eq!(protocol::read_i64(&mut bytes).unwrap(), 43);
        assert_eq!(
            protocol::read_nullable_string(&mut bytes).unwrap().as_deref(),
            Some("meta")
        );
        assert!(bytes.is_empty());
    }

    #[test]
    fn test_response_throttle_by_version() {
        let response = OffsetCommitResponse {
            throttle_time_ms: 9,
            topics: vec![OffsetCommitTopicResponse {
                name: "orders".to_string(),
                partitions: vec![OffsetCommitPartitionResponse {
                    index: 0,
                    error_code: ErrorCode::NONE,
                }],
            }],
        };

        let mut buf = BytesMut::new();
        response.encode(&mut buf, 3).unwrap();
        assert_eq!(OffsetCommitResponse::decode(&mut buf.freeze(), 3).unwrap(), response);

        let mut buf = BytesMut::new();
        response.encode(&mut buf, 2).unwrap();
        let decoded = OffsetCommitResponse::decode(&mut buf.freeze(), 2).unwrap();
        assert_eq!(decoded.throttle_time_ms, 0);
        assert_eq!(decoded.topics, response.topics);
    }
}
