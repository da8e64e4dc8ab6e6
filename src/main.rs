use std::sync::Arc;

use anyhow::{Context, Result};
use log::{error, info};
use tokio::io::{AsyncBufReadExt, BufReader};

use kafka_client::{ClientConfig, KafkaBroker, ProduceData, Producer};

/// Reads lines from stdin and produces each one as a record.
///
/// Usage: `kafka-produce <topic> [partition] [config.json]`
#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let topic = args
        .next()
        .context("usage: kafka-produce <topic> [partition] [config.json]")?;
    let partition: i32 = match args.next() {
        Some(p) => p.parse().context("partition must be an integer")?,
        None => 0,
    };
    let config = match args.next() {
        Some(path) => ClientConfig::from_file(&path)
            .with_context(|| format!("Failed to load config from {}", path))?,
        None => ClientConfig::from_env()?,
    };

    info!("Connecting to {}", config.bootstrap);
    let broker = KafkaBroker::connect(
        config.bootstrap_address()?,
        0,
        config.client_id.clone(),
        config.request_timeout(),
    )
    .await?;
    let producer = Producer::new(Arc::new(broker), config.producer.clone()).await?;

    let mut deliveries = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        deliveries.push(producer.enqueue(ProduceData::new(&topic, line), partition).await?);
    }
    producer.close().await;

    let mut failed = 0;
    for result in futures::future::join_all(deliveries).await {
        match result {
            Ok(result) => info!(
                "Produced to {}/{} at offset {}",
                result.topic, result.partition, result.offset
            ),
            Err(e) => {
                failed += 1;
                error!("Failed to produce record: {}", e);
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} records failed", failed);
    }
    Ok(())
}
