use crate::{PurchaseError, Result};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::ClientConfig;
use serde::Serialize;
use std::time::Duration;

#[derive(Clone)]
pub struct KafkaProducer {
    producer: FutureProducer,
}

impl KafkaProducer {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let producer: FutureProducer = config.create()?;
        Ok(Self { producer })
    }

    pub async fn send<T>(&self, topic: &str, key: &str, value: &T) -> Result<()>
    where
        T: Serialize,
    {
        let payload = serde_json::to_vec(value)?;
        self.send_raw(topic, key, &payload).await
    }

    /// Sends pre-serialized bytes and waits for the broker acknowledgement.
    pub async fn send_raw(&self, topic: &str, key: &str, payload: &[u8]) -> Result<()> {
        let record = FutureRecord::to(topic)
            .key(key)
            .payload(payload);

        self.producer
            .send(record, Duration::from_secs(10))
            .await
            .map_err(|(kafka_err, _)| PurchaseError::Kafka(kafka_err))?;

        Ok(())
    }

    pub async fn flush(&self, timeout: Duration) -> Result<()> {
        self.producer.flush(timeout)?;
        Ok(())
    }
}
