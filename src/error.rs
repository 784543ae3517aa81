use crate::SeatKey;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PurchaseError {
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("RocksDB error: {0}")]
    RocksDB(#[from] rocksdb::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("Seat already occupied: {0}")]
    SeatConflict(SeatKey),

    #[error("Invalid seat: {0}")]
    InvalidSeat(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Serialization failure: {0}")]
    SerializationFailure(String),

    #[error("Publish rejected: {0}")]
    PublishRejected(String),

    #[error("Failed to create ticket {ticket_id}: {source}")]
    PurchaseFailed {
        ticket_id: String,
        #[source]
        source: Box<PurchaseError>,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl PurchaseError {
    /// Conflicts are a business outcome, everything else is a failed purchase.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::SeatConflict(_))
    }

    pub fn is_store_fault(&self) -> bool {
        matches!(self, Self::RocksDB(_) | Self::StoreUnavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, PurchaseError>;
