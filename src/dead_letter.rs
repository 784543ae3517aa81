use crate::{Clock, KafkaProducer, Metrics, Result, SeatLock, TicketCreated};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

pub const DEFAULT_SERVICE_NAME: &str = "PurchaseService";

/// Operator-facing record of an event that could not be delivered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterRecord {
    pub original_payload: String,
    pub routing_key: String,
    pub error_reason: String,
    pub timestamp: DateTime<Utc>,
    pub retry_count: u32,
    pub retryable: bool,
    pub service_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seat: Option<String>,
}

#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn emit(&self, record: &DeadLetterRecord) -> Result<()>;
}

/// Writes dead letters to the service log at error level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogDeadLetterSink;

#[async_trait]
impl DeadLetterSink for LogDeadLetterSink {
    async fn emit(&self, record: &DeadLetterRecord) -> Result<()> {
        error!(
            routing_key = %record.routing_key,
            ticket_id = ?record.ticket_id,
            event_id = ?record.event_id,
            seat = ?record.seat,
            reason = %record.error_reason,
            payload = %record.original_payload,
            "Dead letter"
        );
        Ok(())
    }
}

/// Publishes dead letters as JSON to a Kafka DLQ topic.
#[derive(Clone)]
pub struct KafkaDeadLetterSink {
    producer: KafkaProducer,
    topic: String,
}

impl KafkaDeadLetterSink {
    pub fn new(producer: KafkaProducer, topic: impl Into<String>) -> Self {
        Self {
            producer,
            topic: topic.into(),
        }
    }
}

#[async_trait]
impl DeadLetterSink for KafkaDeadLetterSink {
    async fn emit(&self, record: &DeadLetterRecord) -> Result<()> {
        self.producer.send(&self.topic, &record.routing_key, record).await?;
        info!(
            topic = %self.topic,
            partition_key = %record.routing_key,
            "Message sent to DLQ"
        );
        Ok(())
    }
}

/// Fallback for a failed synchronous publish: frees the seat and records the
/// event for manual handling. Never fails itself.
pub struct DeadLetterHandler {
    seat_lock: Arc<dyn SeatLock>,
    sink: Arc<dyn DeadLetterSink>,
    clock: Arc<dyn Clock>,
    service_name: String,
    metrics: Option<Metrics>,
}

impl DeadLetterHandler {
    pub fn new(seat_lock: Arc<dyn SeatLock>, sink: Arc<dyn DeadLetterSink>, clock: Arc<dyn Clock>) -> Self {
        Self {
            seat_lock,
            sink,
            clock,
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            metrics: None,
        }
    }

    pub fn with_service_name(mut self, service_name: impl Into<String>) -> Self {
        self.service_name = service_name.into();
        self
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub async fn handle(&self, payload: &[u8], routing_key: &str, reason: &str) -> DeadLetterRecord {
        let original_payload = String::from_utf8_lossy(payload).into_owned();
        let mut record = DeadLetterRecord {
            original_payload,
            routing_key: routing_key.to_string(),
            error_reason: reason.to_string(),
            timestamp: self.clock.now(),
            retry_count: 0,
            retryable: true,
            service_name: self.service_name.clone(),
            ticket_id: None,
            event_id: None,
            seat: None,
        };

        match serde_json::from_slice::<TicketCreated>(payload) {
            Ok(event) => {
                let seat = event.seat();
                if let Err(e) = self.seat_lock.release(&seat) {
                    error!(
                        ticket_id = %event.ticket_id,
                        seat = %seat,
                        seat_leak = true,
                        "CRITICAL: failed to release seat for dead-lettered ticket: {}", e
                    );
                } else {
                    info!(ticket_id = %event.ticket_id, seat = %seat, "Released seat for dead-lettered ticket");
                }
                record.seat = Some(seat.seat_label());
                record.ticket_id = Some(event.ticket_id);
                record.event_id = Some(event.event_id);
            }
            Err(e) => {
                warn!(routing_key, "Dead letter payload is not a ticket event, no seat released: {}", e);
            }
        }

        if let Err(e) = self.sink.emit(&record).await {
            error!(routing_key, "Failed to emit dead letter record: {}", e);
        }
        if let Some(metrics) = &self.metrics {
            metrics.dead_letters.inc();
        }

        record
    }
}
