use bytes::{Buf, BufMut, Bytes, BytesMut};
use kafka_protocol::messages::ApiKey;
use kafka_protocol::protocol::VersionRange;

use crate::error::{ErrorCode, Result};
use crate::protocol::{self, Decodable, Encodable};

/// The handshake itself is never negotiated.
pub const HANDSHAKE_VERSION: i16 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiVersionsRequest {
    pub version: i16,
}

impl ApiVersionsRequest {
    pub const API_KEY: ApiKey = ApiKey::ApiVersions;
    pub const VERSIONS: VersionRange = VersionRange { min: 0, max: 2 };

    pub fn new() -> Self {
        Self {
            version: HANDSHAKE_VERSION,
        }
    }
}

impl Default for ApiVersionsRequest {
    fn default() -> Self {
        Self::new()
    }
}

impl Encodable for ApiVersionsRequest {
    // v0-v2 carry no body
    fn encode(&self, _buf: &mut BytesMut) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiVersion {
    pub api_key: i16,
    pub min_version: i16,
    pub max_version: i16,
}

impl Decodable for ApiVersion {
    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(ApiVersion {
            api_key: protocol::read_i16(buf)?,
            min_version: protocol::read_i16(buf)?,
            max_version: protocol::read_i16(buf)?,
        })
    }
}

impl Encodable for ApiVersion {
    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_i16(self.api_key);
        buf.put_i16(self.min_version);
        buf.put_i16(self.max_version);
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApiVersionsResponse {
    pub error_code: ErrorCode,
    pub api_keys: Vec<ApiVersion>,
    pub throttle_time_ms: i32,
}

impl ApiVersionsResponse {
    pub fn decode(buf: &mut Bytes, version: i16) -> Result<Self> {
        let error_code = ErrorCode(protocol::read_i16(buf)?);
        let api_keys = protocol::read_array(buf)?;
        // Brokers answer unsupported handshake versions in the v0 layout,
        // so the throttle time may be missing even when asked for v1+
        let throttle_time_ms = if version >= 1 && buf.remaining() >= 4 {
            protocol::read_i32(buf)?
        } else {
            0
        };
        Ok(ApiVersionsResponse {
            error_code,
            api_keys,
            throttle_time_ms,
        })
    }

    pub fn encode(&self, buf: &mut BytesMut, version: i16) -> Result<()> {
        buf.put_i16(self.error_code.0);
        protocol::write_array(buf, &self.api_keys)?;
        if version >= 1 {
            buf.put_i32(self.throttle_time_ms);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_v2_layout() {
        let mut buf = BytesMut::new();
        buf.put_i16(0);
        buf.put_i32(1);
        buf.put_i16(0);
        buf.put_i16(3);
        buf.put_i16(8);
        buf.put_i32(25);

        let resp = ApiVersionsResponse::decode(&mut buf.freeze(), 2).unwrap();
        assert!(resp.error_code.is_none());
        assert_eq!(
            resp.api_keys,
            vec![ApiVersion {
                api_key: 0,
                min_version: 3,
                max_version: 8
            }]
        );
        assert_eq!(resp.throttle_time_ms, 25);
    }

    #[test]
    fn test_v0_fallback_without_throttle() {
        let mut buf = BytesMut::new();
        buf.put_i16(35);
        buf.put_i32(0);

        let resp = ApiVersionsResponse::decode(&mut buf.freeze(), 2).unwrap();
        assert_eq!(resp.error_code, ErrorCode::UNSUPPORTED_VERSION);
        assert!(resp.api_keys.is_empty());
        assert_eq!(resp.throttle_time_ms, 0);
    }
}
