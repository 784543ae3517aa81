use crate::{KafkaProducer, Result};
use async_trait::async_trait;
use tracing::debug;

/// Broker side of outbox delivery. `Ok(false)` and `Err` both mean the
/// message is not known to be delivered.
#[async_trait]
pub trait BrokerPublisher: Send + Sync {
    async fn publish(&self, payload: &[u8], routing_key: &str) -> Result<bool>;
}

/// Publishes to one Kafka topic, using the routing key as record key.
#[derive(Clone)]
pub struct KafkaBrokerPublisher {
    producer: KafkaProducer,
    topic: String,
}

impl KafkaBrokerPublisher {
    pub fn new(producer: KafkaProducer, topic: impl Into<String>) -> Self {
        Self {
            producer,
            topic: topic.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[async_trait]
impl BrokerPublisher for KafkaBrokerPublisher {
    async fn publish(&self, payload: &[u8], routing_key: &str) -> Result<bool> {
        self.producer.send_raw(&self.topic, routing_key, payload).await?;
        debug!("Message sent to Kafka. topic={}, partitionKey={}", self.topic, routing_key);
        Ok(true)
    }
}
