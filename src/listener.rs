use crate::{BrokerPublisher, DeadLetterHandler, PurchaseError, Result, TicketCreated};
use std::sync::Arc;
use tracing::{error, info};

/// Synchronous delivery of `TicketCreated`: publish right away and hand
/// anything the broker did not accept to the dead letter handler.
#[derive(Clone)]
pub struct TicketEventListener {
    publisher: Arc<dyn BrokerPublisher>,
    dead_letters: Arc<DeadLetterHandler>,
}

impl TicketEventListener {
    pub fn new(publisher: Arc<dyn BrokerPublisher>, dead_letters: Arc<DeadLetterHandler>) -> Self {
        Self {
            publisher,
            dead_letters,
        }
    }

    /// `Err(PublishRejected)` once the event has been dead-lettered. The dead
    /// letter handler owns the seat release in that case, so callers must not
    /// release again. Any other error leaves the seat held.
    pub async fn on_ticket_created(&self, event: &TicketCreated) -> Result<()> {
        let partition_key = event.partition_key();
        info!(ticket_id = %event.ticket_id, "Processing TicketCreated event");

        let payload = serde_json::to_vec(event)
            .map_err(|e| PurchaseError::SerializationFailure(e.to_string()))?;

        let reason = match self.publisher.publish(&payload, partition_key).await {
            Ok(true) => {
                info!(ticket_id = %event.ticket_id, "Event sent to Kafka successfully");
                return Ok(());
            }
            Ok(false) => "Kafka publish returned false".to_string(),
            Err(e) => format!("Exception: {}", e),
        };

        error!(ticket_id = %event.ticket_id, reason = %reason, "Failed to send event to Kafka");
        self.dead_letters.handle(&payload, partition_key, &reason).await;
        Err(PurchaseError::PublishRejected(reason))
    }
}
