use crate::{PurchaseError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaConfig {
    pub bootstrap_servers: String,
    pub security_protocol: Option<String>,
    pub sasl_mechanism: Option<String>,
    pub sasl_username: Option<String>,
    pub sasl_password: Option<String>,
    pub ssl_ca_location: Option<String>,
    pub additional_properties: HashMap<String, String>,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: "localhost:29092,localhost:39092,localhost:49092".to_string(),
            security_protocol: None,
            sasl_mechanism: None,
            sasl_username: None,
            sasl_password: None,
            ssl_ca_location: None,
            additional_properties: HashMap::new(),
        }
    }
}

/// Upper bound for `outbox.max.backoff.secs`. Retry times are computed as
/// timestamp arithmetic and must stay far from chrono's range limits.
pub const MAX_BACKOFF_SECS: u64 = 86_400;

/// Relay cadence and retry policy for the outbox table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxConfig {
    pub poll_interval_ms: u64,
    pub page_size: usize,
    pub max_attempts: u32,
    pub max_backoff_secs: u64,
    pub topic: String,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            page_size: 100,
            max_attempts: 10,
            max_backoff_secs: 60,
            topic: crate::Topics::TICKET_CREATED.to_string(),
        }
    }
}

impl OutboxConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }
}

/// How a purchase makes its sale event durable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Stage the event in the outbox table; the relay publishes it later.
    #[default]
    Outbox,
    /// Publish immediately and dead-letter on failure.
    Direct,
}

impl FromStr for DeliveryMode {
    type Err = PurchaseError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "outbox" => Ok(Self::Outbox),
            "direct" => Ok(Self::Direct),
            other => Err(PurchaseError::InvalidArgument(format!(
                "Invalid delivery mode: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Outbox => write!(f, "outbox"),
            Self::Direct => write!(f, "direct"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseConfig {
    pub delivery_mode: DeliveryMode,
    pub dead_letter_topic: Option<String>,
    pub release_max_attempts: u32,
}

impl Default for PurchaseConfig {
    fn default() -> Self {
        Self {
            delivery_mode: DeliveryMode::Outbox,
            dead_letter_topic: None,
            release_max_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VenueSettings {
    pub zone_count: u32,
    pub row_count: u32,
    pub col_count: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VenueConfig {
    pub venues: HashMap<String, VenueSettings>,
    /// Standard layout forced onto `Venue1` when present.
    pub default_layout: Option<VenueSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub application_id: String,
    pub state_dir: String,
    pub kafka: KafkaConfig,
    pub outbox: OutboxConfig,
    pub purchase: PurchaseConfig,
    pub venues: VenueConfig,
}

impl ServiceConfig {
    pub fn new(application_id: &str) -> Self {
        Self {
            application_id: application_id.to_string(),
            state_dir: "/tmp/ticket-outbox".to_string(),
            kafka: KafkaConfig::default(),
            outbox: OutboxConfig::default(),
            purchase: PurchaseConfig::default(),
            venues: VenueConfig::default(),
        }
    }

    /// Rejects settings the relay and the saga cannot run with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| -> Result<()> { Err(PurchaseError::InvalidArgument(msg.to_string())) };

        if self.outbox.poll_interval_ms == 0 {
            return invalid("outbox.poll.interval.ms must be at least 1");
        }
        if self.outbox.page_size == 0 {
            return invalid("outbox.page.size must be at least 1");
        }
        if self.outbox.max_attempts == 0 {
            return invalid("outbox.max.attempts must be at least 1");
        }
        if self.outbox.max_backoff_secs > MAX_BACKOFF_SECS {
            return Err(PurchaseError::InvalidArgument(format!(
                "outbox.max.backoff.secs must not exceed {}",
                MAX_BACKOFF_SECS
            )));
        }
        if self.purchase.release_max_attempts == 0 {
            return invalid("purchase.release.max.attempts must be at least 1");
        }
        Ok(())
    }

    pub fn to_kafka_config(&self) -> rdkafka::ClientConfig {
        let mut config = rdkafka::ClientConfig::new();

        config.set("bootstrap.servers", &self.kafka.bootstrap_servers);
        config.set("client.id", &self.application_id);
        config.set("acks", "all");

        if let Some(security_protocol) = &self.kafka.security_protocol {
            config.set("security.protocol", security_protocol);
        }

        if let Some(sasl_mechanism) = &self.kafka.sasl_mechanism {
            config.set("sasl.mechanism", sasl_mechanism);
        }

        if let Some(sasl_username) = &self.kafka.sasl_username {
            config.set("sasl.username", sasl_username);
        }

        if let Some(sasl_password) = &self.kafka.sasl_password {
            config.set("sasl.password", sasl_password);
        }

        if let Some(ssl_ca_location) = &self.kafka.ssl_ca_location {
            config.set("ssl.ca.location", ssl_ca_location);
        }

        // Add additional properties
        for (key, value) in &self.kafka.additional_properties {
            config.set(key, value);
        }

        config
    }
}
