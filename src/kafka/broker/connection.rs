use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use log::{debug, error, trace, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout, timeout_at};

use super::types::BrokerAddress;
use crate::error::{Error, Result};
use crate::kafka::messages::{RequestKind, ResponseKind};
use crate::protocol::{self, MAX_FRAME_SIZE, RequestHeader};

type InFlight = DashMap<i32, oneshot::Sender<Result<Bytes>>>;

/// Request/response exchange with one broker.
///
/// `send` resolves to `None` only for requests that expect no response.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: RequestKind) -> Result<Option<ResponseKind>>;

    async fn close(&self);
}

/// A TCP connection to a single broker.
///
/// Requests are pipelined: callers write their frame under the writer lock
/// and then wait on their own channel, while a background task routes every
/// response frame to its caller by correlation id.
pub struct TcpConnection {
    address: BrokerAddress,
    client_id: Option<String>,
    request_timeout: Duration,
    correlation_id: AtomicI32,
    writer: Mutex<OwnedWriteHalf>,
    in_flight: Arc<InFlight>,
    closed: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl TcpConnection {
    pub async fn connect(
        address: BrokerAddress,
        client_id: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let stream = timeout(
            request_timeout,
            TcpStream::connect((address.host.as_str(), address.port)),
        )
        .await
        .map_err(|_| Error::Timeout(request_timeout))??;
        stream.set_nodelay(true).ok();
        debug!("Connected to broker {}", address);

        let (tcp_reader, tcp_writer) = stream.into_split();
        let in_flight: Arc<InFlight> = Arc::new(DashMap::new());
        let closed = Arc::new(AtomicBool::new(false));

        let reader = tokio::spawn(read_loop(
            tcp_reader,
            in_flight.clone(),
            closed.clone(),
            address.clone(),
        ));

        Ok(Self {
            address,
            client_id,
            request_timeout,
            correlation_id: AtomicI32::new(0),
            writer: Mutex::new(tcp_writer),
            in_flight,
            closed,
            reader,
        })
    }

    pub fn address(&self) -> &BrokerAddress {
        &self.address
    }

    /// Marks the connection dead after a frame was only partly written.
    ///
    /// The peer can no longer find the next frame boundary, so nothing else
    /// may be written and every caller still waiting is failed.
    async fn abandon(&self, writer: &mut OwnedWriteHalf) {
        self.closed.store(true, Ordering::Release);
        self.reader.abort();
        if let Err(e) = writer.shutdown().await {
            debug!("Error shutting down connection to {}: {}", self.address, e);
        }
        fail_in_flight(&self.in_flight);
    }
}

#[async_trait]
impl Transport for TcpConnection {
    async fn send(&self, request: RequestKind) -> Result<Option<ResponseKind>> {
        request.validate()?;
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::ConnectionClosed);
        }

        let api_key = request.api_key();
        let api_version = request.api_version();
        let correlation_id = self.correlation_id.fetch_add(1, Ordering::Relaxed);
        let header = RequestHeader {
            api_key: api_key as i16,
            api_version,
            correlation_id,
            client_id: self.client_id.clone(),
        };
        let frame = protocol::encode_request_frame(&header, &request)?;

        let rx = if request.expects_response() {
            let (tx, rx) = oneshot::channel();
            self.in_flight.insert(correlation_id, tx);
            Some(rx)
        } else {
            None
        };
        // The read loop may have drained in_flight just before the insert
        if self.closed.load(Ordering::Acquire) {
            self.in_flight.remove(&correlation_id);
            return Err(Error::ConnectionClosed);
        }

        let deadline = Instant::now() + self.request_timeout;
        let timed_out = || {
            self.in_flight.remove(&correlation_id);
            warn!(
                "Request {:?} v{} to {} timed out after {:?}",
                api_key, api_version, self.address, self.request_timeout
            );
            Error::Timeout(self.request_timeout)
        };

        {
            let Ok(mut writer) = timeout_at(deadline, self.writer.lock()).await else {
                return Err(timed_out());
            };
            if self.closed.load(Ordering::Acquire) {
                self.in_flight.remove(&correlation_id);
                return Err(Error::ConnectionClosed);
            }

            let written = timeout_at(deadline, async {
                writer.write_all(&frame).await?;
                writer.flush().await
            })
            .await;
            match written {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!("Failed to write request to {}: {}", self.address, e);
                    self.abandon(&mut writer).await;
                    return Err(e.into());
                }
                Err(_) => {
                    let err = timed_out();
                    self.abandon(&mut writer).await;
                    return Err(err);
                }
            }
        }
        trace!(
            "Wrote request correlation_id={} ({} bytes) to {}",
            correlation_id,
            frame.len(),
            self.address
        );

        let body = match rx {
            Some(rx) => match timeout_at(deadline, rx).await {
                Ok(Ok(result)) => Some(result?),
                Ok(Err(_)) => return Err(Error::ConnectionClosed),
                Err(_) => return Err(timed_out()),
            },
            None => None,
        };

        match body {
            Some(mut body) => ResponseKind::decode(api_key, api_version, &mut body).map(Some),
            None => Ok(None),
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.reader.abort();
        if let Err(e) = self.writer.lock().await.shutdown().await {
            debug!("Error shutting down connection to {}: {}", self.address, e);
        }
        fail_in_flight(&self.in_flight);
    }
}

impl Drop for TcpConnection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_loop(
    mut tcp_reader: OwnedReadHalf,
    in_flight: Arc<InFlight>,
    closed: Arc<AtomicBool>,
    address: BrokerAddress,
) {
    match read_frames(&mut tcp_reader, &in_flight, &address).await {
        Err(Error::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
            debug!("Broker {} closed the connection", address);
        }
        Err(e) => error!("Error in read loop for {}: {}", address, e),
        Ok(()) => {}
    }
    closed.store(true, Ordering::Release);
    fail_in_flight(&in_flight);
}

async fn read_frames(
    tcp_reader: &mut OwnedReadHalf,
    in_flight: &InFlight,
    address: &BrokerAddress,
) -> Result<()> {
    loop {
        let message_size = tcp_reader.read_i32().await?;
        if message_size < 4 || message_size > MAX_FRAME_SIZE {
            return Err(Error::Protocol(format!("Invalid message size: {}", message_size)));
        }

        let mut buf = BytesMut::with_capacity(message_size as usize);
        buf.resize(message_size as usize, 0);
        tcp_reader.read_exact(&mut buf).await?;

        let (correlation_id, body) = protocol::split_response_frame(buf.freeze())?;
        trace!(
            "Read response correlation_id={} ({} bytes) from {}",
            correlation_id, message_size, address
        );
        match in_flight.remove(&correlation_id) {
            Some((_, tx)) => {
                let _ = tx.send(Ok(body));
            }
            None => warn!(
                "Dropping response with unknown correlation id {} from {}",
                correlation_id, address
            ),
        }
    }
}

fn fail_in_flight(in_flight: &InFlight) {
    let pending: Vec<i32> = in_flight.iter().map(|entry| *entry.key()).collect();
    for correlation_id in pending {
        if let Some((_, tx)) = in_flight.remove(&correlation_id) {
            let _ = tx.send(Err(Error::ConnectionClosed));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::protocol::Decodable;
    use crate::kafka::messages::{
        Acks, ApiVersion, ApiVersionsRequest, ApiVersionsResponse, PartitionProduceResponse,
        ProduceRequest, ProduceResponse, TopicProduceResponse,
    };
    use bytes::BufMut;
    use kafka_protocol::messages::ApiKey;
    use tokio::net::TcpListener;

    /// Answers every request on one accepted connection with `respond`,
    /// recording the request headers it saw.
    async fn fake_broker<F>(respond: F) -> (BrokerAddress, JoinHandle<Vec<RequestHeader>>)
    where
        F: Fn(&RequestHeader) -> Option<ResponseKind> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut seen = Vec::new();
            loop {
                let size = match socket.read_i32().await {
                    Ok(size) => size,
                    Err(_) => return seen,
                };
                let mut buf = BytesMut::with_capacity(size as usize);
                buf.resize(size as usize, 0);
                socket.read_exact(&mut buf).await.unwrap();
                let header = RequestHeader::decode(&mut buf.freeze()).unwrap();

                if let Some(response) = respond(&header) {
                    let mut out = BytesMut::new();
                    out.put_i32(header.correlation_id);
                    response.encode(&mut out, header.api_version).unwrap();
                    socket.write_i32(out.len() as i32).await.unwrap();
                    socket.write_all(&out).await.unwrap();
                }
                seen.push(header);
            }
        });
        (BrokerAddress::new("127.0.0.1", port).unwrap(), handle)
    }

    #[tokio::test]
    async fn test_api_versions_round_trip() {
        let (address, broker) = fake_broker(|_| {
            Some(ResponseKind::ApiVersions(ApiVersionsResponse {
                error_code: ErrorCode::NONE,
                api_keys: vec![ApiVersion {
                    api_key: ApiKey::Produce as i16,
                    min_version: 3,
                    max_version: 9,
                }],
                throttle_time_ms: 0,
            }))
        })
        .await;

        let conn = TcpConnection::connect(address, Some("test-client".to_string()), Duration::from_secs(5))
            .await
            .unwrap();
        let response = conn.send(ApiVersionsRequest::new().into()).await.unwrap();
        match response {
            Some(ResponseKind::ApiVersions(resp)) => {
                assert_eq!(resp.api_keys.len(), 1);
                assert_eq!(resp.api_keys[0].max_version, 9);
            }
            other => panic!("unexpected response: {:?}", other),
        }

        conn.close().await;
        let seen = broker.await.unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].api_key, ApiKey::ApiVersions as i16);
        assert_eq!(seen[0].api_version, 2);
        assert_eq!(seen[0].client_id.as_deref(), Some("test-client"));
    }

    #[tokio::test]
    async fn test_produce_without_acks_skips_response() {
        let (address, broker) = fake_broker(|header| {
            if header.api_key == ApiKey::Produce as i16 {
                None
            } else {
                Some(ResponseKind::Produce(ProduceResponse::default()))
            }
        })
        .await;

        let conn = TcpConnection::connect(address, None, Duration::from_secs(5))
            .await
            .unwrap();
        let mut request = ProduceRequest::new(8, Acks::None, 1000);
        request
            .topic_mut("events")
            .partition_mut(0)
            .records
            .add_record(None, Some(Bytes::from_static(b"v")), &[]);

        assert!(conn.send(request.into()).await.unwrap().is_none());
        conn.close().await;
        let seen = broker.await.unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].correlation_id, 0);
    }

    #[tokio::test]
    async fn test_produce_response_decoded_at_request_version() {
        let (address, _broker) = fake_broker(|_| {
            Some(ResponseKind::Produce(ProduceResponse {
                topics: vec![TopicProduceResponse {
                    name: "events".to_string(),
                    partitions: vec![PartitionProduceResponse {
                        index: 0,
                        base_offset: 41,
                        ..Default::default()
                    }],
                }],
                throttle_time_ms: 0,
            }))
        })
        .await;

        let conn = TcpConnection::connect(address, None, Duration::from_secs(5))
            .await
            .unwrap();
        let mut request = ProduceRequest::new(5, Acks::Leader, 1000);
        request
            .topic_mut("events")
            .partition_mut(0)
            .records
            .add_record(None, Some(Bytes::from_static(b"v")), &[]);

        match conn.send(request.into()).await.unwrap() {
            Some(ResponseKind::Produce(resp)) => {
                assert_eq!(resp.topics[0].partitions[0].base_offset, 41);
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_silent_broker_times_out() {
        let (address, _broker) = fake_broker(|_| None).await;
        let conn = TcpConnection::connect(address, None, Duration::from_millis(100))
            .await
            .unwrap();

        let err = conn.send(ApiVersionsRequest::new().into()).await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert!(conn.in_flight.is_empty());
    }

    #[tokio::test]
    async fn test_closed_connection_rejects_requests() {
        let (address, _broker) = fake_broker(|_| None).await;
        let conn = TcpConnection::connect(address, None, Duration::from_secs(1))
            .await
            .unwrap();
        conn.close().await;

        let err = conn.send(ApiVersionsRequest::new().into()).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_partial_write_closes_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_millis(500)).await;
            let mut sink = vec![0u8; 64 * 1024];
            while let Ok(n) = socket.read(&mut sink).await {
                if n == 0 {
                    break;
                }
            }
        });

        let address = BrokerAddress::new("127.0.0.1", port).unwrap();
        let conn = TcpConnection::connect(address, None, Duration::from_millis(200))
            .await
            .unwrap();

        let mut request = ProduceRequest::new(8, Acks::Leader, 1000);
        request
            .topic_mut("events")
            .partition_mut(0)
            .records
            .add_record(None, Some(Bytes::from(vec![b'x'; 32 * 1024 * 1024])), &[]);

        let err = conn.send(request.into()).await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert!(conn.closed.load(Ordering::Acquire));

        tokio::time::sleep(Duration::from_millis(500)).await;
        let err = conn.send(ApiVersionsRequest::new().into()).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_peer_hangup_fails_pending_request() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let _ = socket.read_i32().await;
        });

        let address = BrokerAddress::new("127.0.0.1", port).unwrap();
        let conn = TcpConnection::connect(address, None, Duration::from_secs(30))
            .await
            .unwrap();

        let started = std::time::Instant::now();
        let err = conn.send(ApiVersionsRequest::new().into()).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(conn.in_flight.is_empty());

        let err = conn.send(ApiVersionsRequest::new().into()).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));
    }
}
