mod config;
mod sender;
mod types;

use std::sync::Arc;

use futures::future::join_all;
use kafka_protocol::messages::ApiKey;
use log::{debug, error, info};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

pub use config::{ProducerConfig, ProducerConfigBuilder};
pub use sender::ProducerSender;
pub use types::{DeliveryFuture, DeliveryResult, ProduceData, ProduceResult};

use crate::error::Result;
use crate::kafka::broker::KafkaBroker;

/// Batching producer bound to one broker.
///
/// Records are buffered per topic-partition and sent when either
/// `max_batch_size` records are waiting or `linger_ms` has passed since the
/// last flush. Dropping the producer stops the linger task after a final
/// flush; [`Producer::close`] also waits for it and closes the connection.
pub struct Producer {
    sender: Arc<ProducerSender>,
    shutdown: watch::Sender<bool>,
    linger_task: Mutex<Option<JoinHandle<()>>>,
}

impl Producer {
    /// Negotiates the Produce version up front, so capability errors surface
    /// here instead of on the first flush.
    pub async fn new(broker: Arc<KafkaBroker>, config: ProducerConfig) -> Result<Self> {
        config.validate()?;
        let version = broker
            .request_factory()
            .await?
            .select_version(ApiKey::Produce)?;
        info!(
            "Producer for broker {} using produce v{} (acks={:?}, linger={}ms, batch={})",
            broker.address(),
            version,
            config.acks,
            config.linger_ms,
            config.max_batch_size
        );

        let sender = Arc::new(ProducerSender::new(broker, config, version));
        let (shutdown, rx) = watch::channel(false);
        let linger_task = tokio::spawn(sender::linger_loop(sender.clone(), rx));

        Ok(Self {
            sender,
            shutdown,
            linger_task: Mutex::new(Some(linger_task)),
        })
    }

    pub fn sender(&self) -> &ProducerSender {
        &self.sender
    }

    /// Buffers a record and returns a future for its delivery outcome.
    pub async fn enqueue(&self, data: ProduceData, partition: i32) -> Result<DeliveryFuture> {
        self.sender.enqueue(data, partition).await
    }

    /// Buffers a record and waits until the broker has answered for it.
    pub async fn produce(&self, data: ProduceData, partition: i32) -> Result<ProduceResult> {
        let delivery = self.enqueue(data, partition).await?;
        Ok(delivery.await?)
    }

    /// Buffers every record before waiting on any of them.
    pub async fn send_all(
        &self,
        records: impl IntoIterator<Item = (ProduceData, i32)>,
    ) -> Result<Vec<DeliveryResult>> {
        let mut deliveries = Vec::new();
        for (data, partition) in records {
            deliveries.push(self.enqueue(data, partition).await?);
        }
        Ok(join_all(deliveries).await)
    }

    pub async fn flush(&self) -> usize {
        self.sender.flush().await
    }

    /// Stops accepting records, waits for the final flush and closes the
    /// broker connection.
    pub async fn close(&self) {
        self.sender.close_intake();
        let _ = self.shutdown.send(true);

        if let Some(task) = self.linger_task.lock().await.take() {
            if let Err(e) = task.await {
                error!("Linger task failed: {}", e);
            }
        }

        // Covers records that raced the linger task's final flush
        self.sender.flush().await;
        self.sender.broker().close().await;
        debug!("Producer closed");
    }
}
