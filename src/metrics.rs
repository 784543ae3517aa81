use prometheus::{
    Counter, Histogram, Gauge, Registry, Opts, HistogramOpts,
    register_counter_with_registry, register_histogram_with_registry,
    register_gauge_with_registry, Encoder, TextEncoder,
};
use std::sync::Arc;
use crate::{PurchaseError, Result};

/// Metrics collector for purchases and outbox delivery
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,

    // Purchase metrics
    pub purchases_attempted: Counter,
    pub purchases_succeeded: Counter,
    pub seat_conflicts: Counter,
    pub purchases_failed: Counter,
    pub compensations: Counter,
    pub compensation_failures: Counter,

    // Outbox metrics
    pub outbox_appended: Counter,
    pub outbox_sent: Counter,
    pub outbox_lost_races: Counter,
    pub outbox_retries: Counter,
    pub outbox_dead: Counter,
    pub outbox_pending: Gauge,
    pub publish_duration: Histogram,

    // Dead letter metrics
    pub dead_letters: Counter,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());

        let purchases_attempted = register_counter_with_registry!(
            Opts::new("purchases_attempted_total", "Total number of purchase attempts"),
            registry
        )?;

        let purchases_succeeded = register_counter_with_registry!(
            Opts::new("purchases_succeeded_total", "Total number of tickets sold"),
            registry
        )?;

        let seat_conflicts = register_counter_with_registry!(
            Opts::new("seat_conflicts_total", "Purchases rejected because the seat was taken"),
            registry
        )?;

        let purchases_failed = register_counter_with_registry!(
            Opts::new("purchases_failed_total", "Purchases failed after the seat was occupied"),
            registry
        )?;

        let compensations = register_counter_with_registry!(
            Opts::new("seat_compensations_total", "Seats released to undo a failed purchase"),
            registry
        )?;

        let compensation_failures = register_counter_with_registry!(
            Opts::new("seat_compensation_failures_total", "Seat releases that failed (leaked seats)"),
            registry
        )?;

        let outbox_appended = register_counter_with_registry!(
            Opts::new("outbox_appended_total", "Events staged in the outbox"),
            registry
        )?;

        let outbox_sent = register_counter_with_registry!(
            Opts::new("outbox_sent_total", "Outbox entries published and marked sent"),
            registry
        )?;

        let outbox_lost_races = register_counter_with_registry!(
            Opts::new("outbox_lost_races_total", "Entries already marked sent by another worker"),
            registry
        )?;

        let outbox_retries = register_counter_with_registry!(
            Opts::new("outbox_retries_total", "Failed publishes scheduled for retry"),
            registry
        )?;

        let outbox_dead = register_counter_with_registry!(
            Opts::new("outbox_dead_total", "Entries that exhausted their attempts"),
            registry
        )?;

        let outbox_pending = register_gauge_with_registry!(
            Opts::new("outbox_pending", "Outbox entries still pending"),
            registry
        )?;

        let publish_duration = register_histogram_with_registry!(
            HistogramOpts::new("broker_publish_duration_seconds", "Time spent publishing to the broker")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            registry
        )?;

        let dead_letters = register_counter_with_registry!(
            Opts::new("dead_letters_total", "Dead letter records emitted"),
            registry
        )?;

        Ok(Self {
            registry,
            purchases_attempted,
            purchases_succeeded,
            seat_conflicts,
            purchases_failed,
            compensations,
            compensation_failures,
            outbox_appended,
            outbox_sent,
            outbox_lost_races,
            outbox_retries,
            outbox_dead,
            outbox_pending,
            publish_duration,
            dead_letters,
        })
    }

    /// Export metrics in Prometheus format
    pub fn export(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| PurchaseError::InvalidArgument(format!("Metrics are not UTF-8: {}", e)))
    }

    pub fn record_publish(&self, duration: std::time::Duration) {
        self.publish_duration.observe(duration.as_secs_f64());
    }

    pub fn update_pending(&self, count: usize) {
        self.outbox_pending.set(count as f64);
    }
}
