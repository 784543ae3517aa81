use crate::{PurchaseError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxState {
    Pending,
    Sent,
    Dead,
}

impl OutboxState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Sent | Self::Dead)
    }
}

/// Envelope handed to `OutboxStore::append`.
#[derive(Debug, Clone)]
pub struct NewOutboxEntry {
    pub event_type: String,
    pub payload: String,
    pub aggregate_id: Option<String>,
    pub partition_key: Option<String>,
}

impl NewOutboxEntry {
    pub fn new(event_type: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            payload: payload.into(),
            aggregate_id: None,
            partition_key: None,
        }
    }

    /// Serialize `event` as the JSON payload.
    pub fn json<T: Serialize>(event_type: impl Into<String>, event: &T) -> Result<Self> {
        let payload = serde_json::to_string(event)
            .map_err(|e| PurchaseError::SerializationFailure(format!("Serialize payload failed: {}", e)))?;
        Ok(Self::new(event_type, payload))
    }

    pub fn with_aggregate_id(mut self, aggregate_id: impl Into<String>) -> Self {
        self.aggregate_id = Some(aggregate_id.into());
        self
    }

    pub fn with_partition_key(mut self, partition_key: impl Into<String>) -> Self {
        self.partition_key = Some(partition_key.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.event_type.trim().is_empty() {
            return Err(PurchaseError::SerializationFailure(
                "eventType must not be blank".to_string(),
            ));
        }
        if self.payload.is_empty() {
            return Err(PurchaseError::SerializationFailure(
                "payload must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEntry {
    pub id: String,
    pub aggregate_id: Option<String>,
    pub partition_key: Option<String>,
    pub event_type: String,
    pub payload: String,
    pub state: OutboxState,
    pub attempts: u32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OutboxEntry {
    pub fn from_new(new: NewOutboxEntry, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            aggregate_id: new.aggregate_id,
            partition_key: new.partition_key,
            event_type: new.event_type,
            payload: new.payload,
            state: OutboxState::Pending,
            attempts: 0,
            next_attempt_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state == OutboxState::Pending
    }

    /// Pending and not gated by a future retry time.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_pending() && self.next_attempt_at.map_or(true, |at| at <= now)
    }

    pub fn sort_key(&self) -> String {
        crate::outbox_sort_key(self.created_at, &self.id)
    }

    /// Aggregate id first, then the envelope's partition key, else a random key.
    pub fn routing_key(&self) -> String {
        non_blank(&self.aggregate_id)
            .or_else(|| non_blank(&self.partition_key))
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string())
    }

    /// Moves a pending entry into a terminal state. Returns false when the
    /// entry already left PENDING, in which case nothing changes.
    pub fn finish(&mut self, state: OutboxState, at: DateTime<Utc>) -> bool {
        if !self.is_pending() || !state.is_terminal() {
            return false;
        }
        self.state = state;
        self.next_attempt_at = None;
        self.updated_at = at;
        true
    }

    /// Counts one more failed delivery and gates the next attempt.
    pub fn schedule_retry(
        &mut self,
        at: DateTime<Utc>,
        next_attempt: &dyn Fn(u32) -> DateTime<Utc>,
    ) -> bool {
        if !self.is_pending() {
            return false;
        }
        self.attempts += 1;
        self.next_attempt_at = Some(next_attempt(self.attempts));
        self.updated_at = at;
        true
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}
