//! Record batch builder.
//!
//! Accumulates the records for one topic-partition and serializes them as a
//! single v2 record batch. Offset deltas are handed out in insertion order and
//! never reused; records cannot be removed once added.

use bytes::{Bytes, BytesMut};
use indexmap::IndexMap;
use kafka_protocol::protocol::StrBytes;
use kafka_protocol::records::{
    Compression, NO_PARTITION_LEADER_EPOCH, NO_PRODUCER_EPOCH, NO_PRODUCER_ID, NO_SEQUENCE,
    Record, RecordBatchEncoder, RecordEncodeOptions, TimestampType,
};

use super::Encodable;
use crate::error::{Error, Result};

/// A record header as supplied by the caller.
pub type Header = (String, Option<Bytes>);

#[derive(Debug, Default)]
pub struct RecordBatch {
    records: Vec<Record>,
}

impl RecordBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// The offset delta the next added record will receive.
    pub fn next_offset_delta(&self) -> i32 {
        self.records.len() as i32
    }

    /// Offset delta of the most recently added record, `-1` when empty.
    pub fn last_offset_delta(&self) -> i32 {
        self.records.len() as i32 - 1
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Appends a record and returns its offset delta within the batch.
    pub fn add_record(
        &mut self,
        key: Option<Bytes>,
        value: Option<Bytes>,
        headers: &[Header],
    ) -> i32 {
        let offset_delta = self.next_offset_delta();

        let headers: IndexMap<StrBytes, Option<Bytes>> = headers
            .iter()
            .map(|(k, v)| (StrBytes::from_string(k.clone()), v.clone()))
            .collect();

        self.records.push(Record {
            transactional: false,
            control: false,
            partition_leader_epoch: NO_PARTITION_LEADER_EPOCH,
            producer_id: NO_PRODUCER_ID,
            producer_epoch: NO_PRODUCER_EPOCH,
            timestamp_type: TimestampType::Creation,
            offset: offset_delta as i64,
            sequence: NO_SEQUENCE,
            timestamp: chrono::Utc::now().timestamp_millis(),
            key,
            value,
            headers,
        });

        offset_delta
    }
}

impl Encodable for RecordBatch {
    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        let options = RecordEncodeOptions {
            version: 2,
            compression: Compression::None,
        };
        RecordBatchEncoder::encode_with_custom_compression(
            buf,
            self.records.iter(),
            &options,
            None::<fn(&mut BytesMut, &mut BytesMut, Compression) -> anyhow::Result<()>>,
        )
        .map_err(|e| Error::Encode(format!("Failed to encode record batch: {:?}", e)))
    }
}
