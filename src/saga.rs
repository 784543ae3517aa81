//! Seat purchase workflow.
//!
//! Occupy the seat, then record the sale through one delivery strategy. If
//! recording fails the seat is released again before the failure reaches
//! the caller. There is no distributed transaction between the two steps.

use crate::{
    retry_with_backoff, Clock, EventTypes, Metrics, NewOutboxEntry, OutboxStore, PurchaseError,
    Result, RetryConfig, SeatKey, SeatLock, TicketCreated, TicketEventListener, TicketReceipt,
    TicketStatus, VenueRegistry,
};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// How a completed sale reaches the broker. A saga runs exactly one.
#[derive(Clone)]
pub enum DeliveryStrategy {
    /// Stage the event in the outbox; a relay publishes it later.
    Outbox(Arc<dyn OutboxStore>),
    /// Publish before returning, dead-lettering on failure.
    Direct(TicketEventListener),
}

impl DeliveryStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Outbox(_) => "outbox",
            Self::Direct(_) => "direct",
        }
    }
}

pub struct PurchaseSaga {
    seat_lock: Arc<dyn SeatLock>,
    venues: Arc<VenueRegistry>,
    delivery: DeliveryStrategy,
    clock: Arc<dyn Clock>,
    release_retry: RetryConfig,
    metrics: Option<Metrics>,
}

impl PurchaseSaga {
    pub fn new(
        seat_lock: Arc<dyn SeatLock>,
        venues: Arc<VenueRegistry>,
        delivery: DeliveryStrategy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            seat_lock,
            venues,
            delivery,
            clock,
            release_retry: RetryConfig::seat_release(3),
            metrics: None,
        }
    }

    pub fn with_release_retry(mut self, release_retry: RetryConfig) -> Self {
        self.release_retry = release_retry;
        self
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn delivery(&self) -> &DeliveryStrategy {
        &self.delivery
    }

    pub async fn purchase(&self, seat: SeatKey) -> Result<TicketReceipt> {
        if let Some(metrics) = &self.metrics {
            metrics.purchases_attempted.inc();
        }

        let seat = self.venues.validate(&seat)?;

        if !self.seat_lock.occupy(&seat)?.is_acquired() {
            if let Some(metrics) = &self.metrics {
                metrics.seat_conflicts.inc();
            }
            info!(seat = %seat, "Seat already occupied");
            return Err(PurchaseError::SeatConflict(seat));
        }

        let receipt = TicketReceipt {
            ticket_id: Uuid::new_v4().to_string(),
            seat,
            status: TicketStatus::Paid,
            created_on: self.clock.now(),
        };

        if let Err(cause) = self.record_sale(&receipt).await {
            if let Some(metrics) = &self.metrics {
                metrics.purchases_failed.inc();
            }
            if self.released_by_delivery(&cause) {
                warn!(
                    ticket_id = %receipt.ticket_id,
                    seat = %receipt.seat,
                    strategy = self.delivery.name(),
                    "Recording sale failed, seat already released by the dead letter handler: {}", cause
                );
            } else {
                warn!(
                    ticket_id = %receipt.ticket_id,
                    seat = %receipt.seat,
                    strategy = self.delivery.name(),
                    "Recording sale failed, releasing seat: {}", cause
                );
                self.compensate(&receipt).await;
            }
            return Err(PurchaseError::PurchaseFailed {
                ticket_id: receipt.ticket_id,
                source: Box::new(cause),
            });
        }

        if let Some(metrics) = &self.metrics {
            metrics.purchases_succeeded.inc();
        }
        info!(
            ticket_id = %receipt.ticket_id,
            seat = %receipt.seat,
            strategy = self.delivery.name(),
            "Ticket purchased"
        );
        Ok(receipt)
    }

    async fn record_sale(&self, receipt: &TicketReceipt) -> Result<()> {
        let event = TicketCreated::from_receipt(receipt);
        match &self.delivery {
            DeliveryStrategy::Outbox(outbox) => {
                let entry = NewOutboxEntry::json(EventTypes::TICKET_CREATED, &event)?
                    .with_aggregate_id(&event.ticket_id)
                    .with_partition_key(event.partition_key());
                outbox.append(entry)?;
                if let Some(metrics) = &self.metrics {
                    metrics.outbox_appended.inc();
                }
                Ok(())
            }
            DeliveryStrategy::Direct(listener) => listener.on_ticket_created(&event).await,
        }
    }

    /// A rejected direct publish has been dead-lettered, and the dead letter
    /// handler has released the seat. Releasing it again here could free a
    /// hold another buyer took in between.
    fn released_by_delivery(&self, cause: &PurchaseError) -> bool {
        matches!(
            (&self.delivery, cause),
            (DeliveryStrategy::Direct(_), PurchaseError::PublishRejected(_))
        )
    }

    /// Best-effort release. A seat that cannot be released stays sold with
    /// no ticket behind it, so that case is logged for an operator.
    async fn compensate(&self, receipt: &TicketReceipt) {
        let seat = &receipt.seat;
        let released = retry_with_backoff(&self.release_retry, "release seat", move || async move {
            self.seat_lock.release(seat)
        })
        .await;

        match released {
            Ok(()) => {
                if let Some(metrics) = &self.metrics {
                    metrics.compensations.inc();
                }
                info!(ticket_id = %receipt.ticket_id, seat = %seat, "Seat released after failed purchase");
            }
            Err(e) => {
                if let Some(metrics) = &self.metrics {
                    metrics.compensation_failures.inc();
                }
                error!(
                    ticket_id = %receipt.ticket_id,
                    seat = %seat,
                    seat_leak = true,
                    "Seat release failed, manual cleanup required: {}", e
                );
            }
        }
    }
}
