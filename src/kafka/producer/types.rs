use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::error::ProduceError;
use crate::protocol::record_batch::Header;

pub type DeliveryResult = std::result::Result<ProduceResult, ProduceError>;

/// A record as handed in by the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProduceData {
    pub topic: String,
    pub key: Option<Bytes>,
    pub value: Option<Bytes>,
    pub headers: Vec<Header>,
}

impl ProduceData {
    pub fn new(topic: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            key: None,
            value: Some(value.into()),
            headers: Vec::new(),
        }
    }

    pub fn with_key(mut self, key: impl Into<Bytes>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: Option<Bytes>) -> Self {
        self.headers.push((name.into(), value));
        self
    }
}

/// Where a record landed in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProduceResult {
    pub topic: String,
    pub partition: i32,
    /// Absolute offset, `-1` when produced with acks = 0
    pub offset: i64,
    pub data: ProduceData,
}

/// A record waiting in the current batch.
#[derive(Debug)]
pub(crate) struct ProduceQueueItem {
    pub data: ProduceData,
    pub partition_id: i32,
    pub offset_delta: i32,
    pub completion: oneshot::Sender<DeliveryResult>,
}

impl ProduceQueueItem {
    pub fn new(data: ProduceData, partition_id: i32) -> (Self, DeliveryFuture) {
        let (tx, rx) = oneshot::channel();
        let item = Self {
            data,
            partition_id,
            offset_delta: -1,
            completion: tx,
        };
        (item, DeliveryFuture { rx })
    }

    pub fn succeed(self, offset: i64) {
        let result = ProduceResult {
            topic: self.data.topic.clone(),
            partition: self.partition_id,
            offset,
            data: self.data,
        };
        // Receiver may have been dropped by a caller that stopped waiting
        let _ = self.completion.send(Ok(result));
    }

    pub fn fail(self, error: ProduceError) {
        let _ = self.completion.send(Err(error));
    }
}

/// Resolves once the batch carrying the record has been answered.
#[derive(Debug)]
pub struct DeliveryFuture {
    rx: oneshot::Receiver<DeliveryResult>,
}

impl Future for DeliveryFuture {
    type Output = DeliveryResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(ProduceError::Dropped)),
            Poll::Pending => Poll::Pending,
        }
    }
}
