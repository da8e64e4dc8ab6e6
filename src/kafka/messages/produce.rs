use bytes::{BufMut, Bytes, BytesMut};
use indexmap::IndexMap;
use kafka_protocol::messages::ApiKey;
use kafka_protocol::protocol::VersionRange;
use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::error::{ErrorCode, Result};
use crate::protocol::{self, Decodable, Encodable, RecordBatch};

/// How many replicas must confirm a write before the broker answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize_repr, Deserialize_repr)]
#[repr(i16)]
pub enum Acks {
    /// Fire and forget, the broker sends no response at all
    None = 0,
    #[default]
    Leader = 1,
    All = -1,
}

/// Produce request, v3 through v8 share this layout:
///
/// ```text
/// transactional_id acks timeout_ms [topic_data]
///   topic_data => name [partition_data]
///     partition_data => index records
/// ```
#[derive(Debug)]
pub struct ProduceRequest {
    pub version: i16,
    pub transactional_id: Option<String>,
    pub acks: Acks,
    pub timeout_ms: i32,
    pub topics: IndexMap<String, TopicProduceData>,
}

#[derive(Debug)]
pub struct TopicProduceData {
    pub name: String,
    pub partitions: IndexMap<i32, PartitionProduceData>,
}

#[derive(Debug)]
pub struct PartitionProduceData {
    pub index: i32,
    pub records: RecordBatch,
}

impl ProduceRequest {
    pub const API_KEY: ApiKey = ApiKey::Produce;
    pub const VERSIONS: VersionRange = VersionRange { min: 3, max: 8 };

    pub fn new(version: i16, acks: Acks, timeout_ms: i32) -> Self {
        Self {
            version,
            transactional_id: None,
            acks,
            timeout_ms,
            topics: IndexMap::new(),
        }
    }

    /// Gets or creates the entry for `name`.
    pub fn topic_mut(&mut self, name: &str) -> &mut TopicProduceData {
        self.topics
            .entry(name.to_string())
            .or_insert_with(|| TopicProduceData {
                name: name.to_string(),
                partitions: IndexMap::new(),
            })
    }

    pub fn is_empty(&self) -> bool {
        self.record_count() == 0
    }

    pub fn record_count(&self) -> usize {
        self.topics
            .values()
            .flat_map(|t| t.partitions.values())
            .map(|p| p.records.len())
            .sum()
    }

    pub fn expects_response(&self) -> bool {
        self.acks != Acks::None
    }
}

impl TopicProduceData {
    /// Gets or creates the batch for partition `index`.
    pub fn partition_mut(&mut self, index: i32) -> &mut PartitionProduceData {
        self.partitions
            .entry(index)
            .or_insert_with(|| PartitionProduceData {
                index,
                records: RecordBatch::new(),
            })
    }
}

impl Encodable for ProduceRequest {
    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        protocol::write_nullable_string(buf, self.transactional_id.as_deref())?;
        buf.put_i16(self.acks as i16);
        buf.put_i32(self.timeout_ms);
        protocol::write_array(buf, self.topics.values())
    }
}

impl Encodable for TopicProduceData {
    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        protocol::write_string(buf, &self.name)?;
        protocol::write_array(buf, self.partitions.values())
    }
}

impl Encodable for PartitionProduceData {
    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_i32(self.index);
        protocol::write_message(buf, &self.records)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProduceResponse {
    pub topics: Vec<TopicProduceResponse>,
    pub throttle_time_ms: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicProduceResponse {
    pub name: String,
    pub partitions: Vec<PartitionProduceResponse>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionProduceResponse {
    pub index: i32,
    pub error_code: ErrorCode,
    pub base_offset: i64,
    pub log_append_time_ms: i64,
    pub log_start_offset: i64,
    pub record_errors: Vec<RecordError>,
    pub error_message: Option<String>,
}

impl Default for PartitionProduceResponse {
    fn default() -> Self {
        Self {
            index: 0,
            error_code: ErrorCode::NONE,
            base_offset: -1,
            log_append_time_ms: -1,
            log_start_offset: -1,
            record_errors: Vec::new(),
            error_message: None,
        }
    }
}

impl PartitionProduceResponse {
    /// The record-level error reported for `batch_index`, if any.
    pub fn record_error(&self, batch_index: i32) -> Option<&RecordError> {
        self.record_errors
            .iter()
            .find(|e| e.batch_index == batch_index)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordError {
    pub batch_index: i32,
    pub message: Option<String>,
}

impl Decodable for RecordError {
    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(RecordError {
            batch_index: protocol::read_i32(buf)?,
            message: protocol::read_nullable_string(buf)?,
        })
    }
}

impl Encodable for RecordError {
    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_i32(self.batch_index);
        protocol::write_nullable_string(buf, self.message.as_deref())
    }
}

impl ProduceResponse {
    pub fn decode(buf: &mut Bytes, version: i16) -> Result<Self> {
        let topics = protocol::read_array_with(buf, |buf| TopicProduceResponse::decode(buf, version))?;
        let throttle_time_ms = if version >= 1 {
            protocol::read_i32(buf)?
        } else {
            0
        };
        Ok(ProduceResponse {
            topics,
            throttle_time_ms,
        })
    }

    pub fn encode(&self, buf: &mut BytesMut, version: i16) -> Result<()> {
        buf.put_i32(self.topics.len() as i32);
        for topic in &self.topics {
            topic.encode(buf, version)?;
        }
        if version >= 1 {
            buf.put_i32(self.throttle_time_ms);
        }
        Ok(())
    }
}

impl TopicProduceResponse {
    fn decode(buf: &mut Bytes, version: i16) -> Result<Self> {
        let name = protocol::read_string(buf)?;
        let partitions =
            protocol::read_array_with(buf, |buf| PartitionProduceResponse::decode(buf, version))?;
        Ok(TopicProduceResponse { name, partitions })
    }

    fn encode(&self, buf: &mut BytesMut, version: i16) -> Result<()> {
        protocol::write_string(buf, &self.name)?;
        buf.put_i32(self.partitions.len() as i32);
        for partition in &self.partitions {
            partition.encode(buf, version)?;
        }
        Ok(())
    }
}

impl PartitionProduceResponse {
    fn decode(buf: &mut Bytes, version: i16) -> Result<Self> {
        let mut partition = PartitionProduceResponse {
            index: protocol::read_i32(buf)?,
            error_code: ErrorCode(protocol::read_i16(buf)?),
            base_offset: protocol::read_i64(buf)?,
            ..Default::default()
        };
        if version >= 2 {
            partition.log_append_time_ms = protocol::read_i64(buf)?;
        }
        if version >= 5 {
            partition.log_start_offset = protocol::read_i64(buf)?;
        }
        if version >= 8 {
            partition.record_errors = protocol::read_array(buf)?;
            partition.error_message = protocol::read_nullable_string(buf)?;
        }
        Ok(partition)
    }

    fn encode(&self, buf: &mut BytesMut, version: i16) -> Result<()> {
        buf.put_i32(self.index);
        buf.put_i16(self.error_code.0);
        buf.put_i64(self.base_offset);
        if version >= 2 {
            buf.put_i64(self.log_append_time_ms);
        }
        if version >= 5 {
            buf.put_i64(self.log_start_offset);
        }
        if version >= 8 {
            protocol::write_array(buf, &self.record_errors)?;
            protocol::write_nullable_string(buf, self.error_message.as_deref())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use bytes::Buf;

    fn partition_response(version: i16) -> ProduceResponse {
        ProduceResponse {
            topics: vec![TopicProduceResponse {
                name: "orders".to_string(),
                partitions: vec![PartitionProduceResponse {
                    index: 2,
                    error_code: ErrorCode::INVALID_RECORD,
                    base_offset: 100,
                    log_append_time_ms: -1,
                    log_start_offset: if version >= 5 { 7 } else { -1 },
                    record_errors: if version >= 8 {
                        vec![RecordError {
                            batch_index: 1,
                            message: Some("bad record".to_string()),
                        }]
                    } else {
                        Vec::new()
                    },
                    error_message: if version >= 8 {
                        Some("partial failure".to_string())
                    } else {
                        None
                    },
                }],
            }],
            throttle_time_ms: 3,
        }
    }

    #[test]
    fn test_request_v8_layout() {
        let mut request = ProduceRequest::new(8, Acks::All, 1500);
        request
            .topic_mut("orders")
            .partition_mut(2)
            .records
            .add_record(None, Some(Bytes::from_static(b"payload")), &[]);

        let mut buf = BytesMut::new();
        request.encode(&mut buf).unwrap();
        let mut bytes = buf.freeze();

        assert_eq!(protocol::read_nullable_string(&mut bytes).unwrap(), None);
        assert_eq!(protocol::read_i16(&mut bytes).unwrap(), -1);
        assert_eq!(protocol::read_i32(&mut bytes).unwrap(), 1500);
        assert_eq!(protocol::read_i32(&mut bytes).unwrap(), 1);
        assert_eq!(protocol::read_string(&mut bytes).unwrap(), "orders");
        assert_eq!(protocol::read_i32(&mut bytes).unwrap(), 1);
        assert_eq!(protocol::read_i32(&mut bytes).unwrap(), 2);
        let batch = protocol::read_nullable_bytes(&mut bytes).unwrap().unwrap();
        assert!(!batch.is_empty());
        assert_eq!(bytes.remaining(), 0);
    }

    #[test]
    fn test_get_or_create_entries() {
        let mut request = ProduceRequest::new(8, Acks::Leader, 1000);
        assert!(request.is_empty());

        request
            .topic_mut("a")
            .partition_mut(0)
            .records
            .add_record(None, None, &[]);
        request
            .topic_mut("a")
            .partition_mut(0)
            .records
            .add_record(None, None, &[]);
        request
            .topic_mut("b")
            .partition_mut(1)
            .records
            .add_record(None, None, &[]);

        assert_eq!(request.topics.len(), 2);
        assert_eq!(request.topics["a"].partitions.len(), 1);
        assert_eq!(request.record_count(), 3);
        assert!(request.expects_response());
        assert!(!ProduceRequest::new(8, Acks::None, 1000).expects_response());
    }

    #[test]
    fn test_response_versions() {
        for version in [3, 5, 7, 8] {
            let response = partition_response(version);
            let mut buf = BytesMut::new();
            response.encode(&mut buf, version).unwrap();
            let decoded = ProduceResponse::decode(&mut buf.freeze(), version).unwrap();
            assert_eq!(decoded, response, "version {}", version);
        }
    }

    #[test]
    fn test_record_error_lookup() {
        let response = partition_response(8);
        let partition = &response.topics[0].partitions[0];
        assert_eq!(
            partition.record_error(1).and_then(|e| e.message.as_deref()),
            Some("bad record")
        );
        assert!(partition.record_error(0).is_none());
    }

    #[test]
    fn test_acks_serde() {
        assert_eq!(serde_json::to_string(&Acks::All).unwrap(), "-1");
        let acks: Acks = serde_json::from_str("0").unwrap();
        assert_eq!(acks, Acks::None);
    }

    #[test]
    fn test_oversized_counts_fail_without_allocating() {
        let err = ProduceResponse::decode(&mut Bytes::from_static(&[0x7f, 0xff, 0xff, 0xff]), 8)
            .unwrap_err();
        assert!(matches!(err, Error::UnexpectedEof));

        let mut buf = BytesMut::new();
        buf.put_i32(1);
        protocol::write_string(&mut buf, "orders").unwrap();
        buf.put_i32(i32::MAX);
        let err = ProduceResponse::decode(&mut buf.freeze(), 8).unwrap_err();
        assert!(matches!(err, Error::UnexpectedEof));
    }
}
