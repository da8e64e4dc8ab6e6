use std::collections::HashMap;
use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use log::{debug, error, trace, warn};
use tokio::sync::{Mutex, watch};
use tokio::time::Instant;

use super::config::ProducerConfig;
use super::types::{DeliveryFuture, ProduceData, ProduceQueueItem};
use crate::error::{Error, ProduceError, Result};
use crate::kafka::broker::KafkaBroker;
use crate::kafka::messages::{ProduceRequest, ProduceResponse};

/// Linger ticks never run closer together than this.
const MIN_LINGER: Duration = Duration::from_millis(1);

type PendingIndex = HashMap<(String, i32), Vec<ProduceQueueItem>>;

/// The request being built together with the items it carries.
///
/// Both halves are swapped out in one step so a flush only ever answers the
/// items that were part of the request it sent.
struct Pending {
    request: ProduceRequest,
    items: PendingIndex,
}

/// Accumulates records per topic-partition and ships them to one broker.
pub struct ProducerSender {
    broker: Arc<KafkaBroker>,
    config: ProducerConfig,
    version: i16,
    pending: Mutex<Pending>,
    message_count: AtomicUsize,
    started: Instant,
    last_flush_ms: AtomicU64,
    closed: AtomicBool,
}

impl ProducerSender {
    /// `version` is the Produce version every request is built at.
    pub fn new(broker: Arc<KafkaBroker>, config: ProducerConfig, version: i16) -> Self {
        let request = ProduceRequest::new(version, config.acks, config.produce_timeout_ms_i32());
        Self {
            broker,
            config,
            version,
            pending: Mutex::new(Pending {
                request,
                items: HashMap::new(),
            }),
            message_count: AtomicUsize::new(0),
            started: Instant::now(),
            last_flush_ms: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &ProducerConfig {
        &self.config
    }

    pub fn broker(&self) -> &Arc<KafkaBroker> {
        &self.broker
    }

    /// Records currently buffered and not yet claimed by a flush.
    pub fn pending_count(&self) -> usize {
        self.message_count.load(Ordering::Acquire)
    }

    /// Adds a record to the current batch, flushing inline once the batch
    /// reaches `max_batch_size`.
    pub async fn enqueue(&self, data: ProduceData, partition: i32) -> Result<DeliveryFuture> {
        let (mut item, delivery) = ProduceQueueItem::new(data, partition);

        let count = {
            let mut pending = self.pending.lock().await;
            if self.closed.load(Ordering::Acquire) {
                return Err(Error::ProducerClosed);
            }

            let Pending { request, items } = &mut *pending;
            let batch = &mut request
                .topic_mut(&item.data.topic)
                .partition_mut(partition)
                .records;
            item.offset_delta = batch.add_record(
                item.data.key.clone(),
                item.data.value.clone(),
                &item.data.headers,
            );

            items
                .entry((item.data.topic.clone(), partition))
                .or_default()
                .push(item);

            self.message_count.fetch_add(1, Ordering::AcqRel) + 1
        };

        if count >= self.config.max_batch_size {
            trace!("Batch size {} reached, flushing", count);
            self.flush().await;
        }

        Ok(delivery)
    }

    /// Sends everything buffered so far. Returns the number of records that
    /// were part of the flush, zero when another flush already claimed them.
    pub async fn flush(&self) -> usize {
        let (request, items, count) = {
            let mut pending = self.pending.lock().await;
            let count = self.message_count.swap(0, Ordering::AcqRel);
            if count == 0 {
                return 0;
            }
            let fresh = ProduceRequest::new(
                self.version,
                self.config.acks,
                self.config.produce_timeout_ms_i32(),
            );
            let request = mem::replace(&mut pending.request, fresh);
            let items = mem::take(&mut pending.items);
            (request, items, count)
        };

        debug!(
            "Flushing {} records in {} partitions to broker {}",
            count,
            items.len(),
            self.broker.address()
        );

        let outcome = self.broker.produce(request).await;
        self.mark_flushed();
        complete(items, outcome);
        count
    }

    pub(crate) fn close_intake(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn mark_flushed(&self) {
        let now = self.started.elapsed().as_millis() as u64;
        self.last_flush_ms.store(now, Ordering::Release);
    }

    fn since_last_flush(&self) -> Duration {
        let last = Duration::from_millis(self.last_flush_ms.load(Ordering::Acquire));
        self.started.elapsed().saturating_sub(last)
    }
}

/// Resolves every captured item from the outcome of its flush.
fn complete(mut items: PendingIndex, outcome: Result<Option<ProduceResponse>>) {
    let response = match outcome {
        Ok(Some(response)) => response,
        Ok(None) => {
            for item in items.into_values().flatten() {
                item.succeed(-1);
            }
            return;
        }
        Err(e) => {
            error!("Produce request failed: {}", e);
            let err = ProduceError::Transport(e.to_string());
            for item in items.into_values().flatten() {
                item.fail(err.clone());
            }
            return;
        }
    };

    for topic in response.topics {
        for partition in topic.partitions {
            let Some(queued) = items.remove(&(topic.name.clone(), partition.index)) else {
                warn!(
                    "Broker answered for {}/{} which was not part of the request",
                    topic.name, partition.index
                );
                continue;
            };

            if !partition.error_code.is_none() {
                warn!(
                    "Broker rejected batch for {}/{}: {}",
                    topic.name, partition.index, partition.error_code
                );
            }

            for item in queued {
                let record_error = partition.record_error(item.offset_delta);
                if partition.error_code.is_none() && record_error.is_none() {
                    let offset = partition.base_offset + i64::from(item.offset_delta);
                    item.succeed(offset);
                } else {
                    item.fail(ProduceError::Broker {
                        code: partition.error_code,
                        partition_message: partition.error_message.clone(),
                        record_message: record_error.and_then(|e| e.message.clone()),
                    });
                }
            }
        }
    }

    for ((topic, partition), queued) in items {
        warn!(
            "Broker response did not include {}/{}, failing {} records",
            topic,
            partition,
            queued.len()
        );
        for item in queued {
            item.fail(ProduceError::MissingPartition {
                topic: topic.clone(),
                partition,
            });
        }
    }
}

/// Flushes whenever the linger interval has passed since the last flush.
/// Runs one final flush once `shutdown` fires or its sender goes away.
pub(crate) async fn linger_loop(sender: Arc<ProducerSender>, mut shutdown: watch::Receiver<bool>) {
    let linger = sender.config.linger().max(MIN_LINGER);

    loop {
        if *shutdown.borrow() {
            break;
        }

        let elapsed = sender.since_last_flush();
        if elapsed < linger {
            tokio::select! {
                _ = tokio::time::sleep(linger - elapsed) => continue,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }
        }

        if sender.flush().await == 0 {
            // Idle tick, restart the window
            sender.mark_flushed();
        }
    }

    let flushed = sender.flush().await;
    debug!("Linger task stopped after final flush of {} records", flushed);
}
