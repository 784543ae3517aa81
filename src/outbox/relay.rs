use super::OutboxStore;
use crate::{BrokerPublisher, Clock, Metrics, OutboxBackoff, OutboxConfig, OutboxEntry, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Minimum relay clock time between two backlog counts for the pending gauge.
const PENDING_GAUGE_REFRESH_SECS: i64 = 15;

/// Counters for one pass over the backlog.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub processed: usize,
    pub sent: usize,
    pub lost_races: usize,
    pub retried: usize,
    pub dead: usize,
    pub skipped: usize,
}

impl TickReport {
    pub fn failed(&self) -> usize {
        self.retried + self.dead
    }
}

/// Background worker draining the outbox into the broker.
///
/// Failures never leave the relay; they become retry state on the entry.
/// Several relays may drain the same store: a publish can then happen twice,
/// but only one worker flips the row to SENT.
pub struct OutboxRelay {
    worker_id: String,
    store: Arc<dyn OutboxStore>,
    publisher: Arc<dyn BrokerPublisher>,
    clock: Arc<dyn Clock>,
    config: OutboxConfig,
    backoff: OutboxBackoff,
    metrics: Option<Metrics>,
    gauge_refreshed_at: Mutex<Option<DateTime<Utc>>>,
}

impl OutboxRelay {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        publisher: Arc<dyn BrokerPublisher>,
        clock: Arc<dyn Clock>,
        config: OutboxConfig,
    ) -> Self {
        let backoff = OutboxBackoff::new(config.max_backoff());
        Self {
            worker_id: "relay-0".to_string(),
            store,
            publisher,
            clock,
            config,
            backoff,
            metrics: None,
            gauge_refreshed_at: Mutex::new(None),
        }
    }

    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// One pass over every page of due entries.
    pub async fn tick(&self) -> TickReport {
        let mut report = TickReport::default();
        let now = self.clock.now();

        for page in self.store.query_pending(self.config.page_size, now) {
            let page = match page {
                Ok(page) => page,
                Err(e) => {
                    error!(worker = %self.worker_id, "Failed to query pending outbox entries: {}", e);
                    break;
                }
            };

            for entry in &page {
                report.processed += 1;
                if let Err(e) = self.process_entry(entry, &mut report).await {
                    error!(
                        worker = %self.worker_id,
                        outbox_id = %entry.id,
                        "Outbox entry left pending after store error: {}", e
                    );
                }
            }
        }

        if report.processed > 0 {
            info!(
                worker = %self.worker_id,
                processed = report.processed,
                success = report.sent,
                failed = report.failed(),
                skipped = report.skipped,
                "Outbox flush completed"
            );
        }

        if let Some(metrics) = &self.metrics {
            self.refresh_pending_gauge(metrics);
        }

        report
    }

    /// Counting walks the whole pending index, so it runs on its own slower
    /// cadence instead of once per tick.
    fn refresh_pending_gauge(&self, metrics: &Metrics) {
        let now = self.clock.now();
        {
            let mut refreshed_at = self.gauge_refreshed_at.lock();
            let due = refreshed_at.map_or(true, |at| {
                now - at >= chrono::Duration::seconds(PENDING_GAUGE_REFRESH_SECS)
            });
            if !due {
                return;
            }
            *refreshed_at = Some(now);
        }

        match self.store.pending_count() {
            Ok(count) => metrics.update_pending(count),
            Err(e) => debug!("Could not count pending outbox entries: {}", e),
        }
    }

    async fn process_entry(&self, entry: &OutboxEntry, report: &mut TickReport) -> Result<()> {
        let now = self.clock.now();

        if let Some(next_attempt_at) = entry.next_attempt_at.filter(|at| *at > now) {
            report.skipped += 1;
            debug!(
                outbox_id = %entry.id,
                next_attempt_at = %next_attempt_at,
                "Skipping event due to next attempt time"
            );
            return Ok(());
        }

        if entry.attempts >= self.config.max_attempts {
            self.bury(entry, entry.attempts, report)?;
            return Ok(());
        }

        let routing_key = entry.routing_key();
        info!(
            worker = %self.worker_id,
            outbox_id = %entry.id,
            event_type = %entry.event_type,
            partition_key = %routing_key,
            attempts = entry.attempts,
            "Publishing outbox event"
        );

        let started = Instant::now();
        let outcome = self.publisher.publish(entry.payload.as_bytes(), &routing_key).await;
        if let Some(metrics) = &self.metrics {
            metrics.record_publish(started.elapsed());
        }

        let failure = match outcome {
            Ok(true) => None,
            Ok(false) => Some("broker returned a negative acknowledgement".to_string()),
            Err(e) => Some(e.to_string()),
        };

        match failure {
            None => {
                if self.store.mark_sent(&entry.id, self.clock.now())? {
                    report.sent += 1;
                    if let Some(metrics) = &self.metrics {
                        metrics.outbox_sent.inc();
                    }
                    info!(outbox_id = %entry.id, "Event sent successfully");
                } else {
                    report.lost_races += 1;
                    if let Some(metrics) = &self.metrics {
                        metrics.outbox_lost_races.inc();
                    }
                    info!(outbox_id = %entry.id, "Already marked by another worker");
                }
            }
            Some(reason) => {
                let failures = entry.attempts + 1;
                if failures >= self.config.max_attempts {
                    warn!(outbox_id = %entry.id, attempts = failures, err = %reason, "Publish failed");
                    self.bury(entry, failures, report)?;
                    return Ok(());
                }

                let failed_at = self.clock.now();
                let backoff = self.backoff;
                let scheduled = self.store.record_retry(&entry.id, failed_at, &|attempts| {
                    failed_at + backoff.chrono_delay(attempts)
                })?;

                if scheduled {
                    report.retried += 1;
                    if let Some(metrics) = &self.metrics {
                        metrics.outbox_retries.inc();
                    }
                    warn!(
                        outbox_id = %entry.id,
                        attempts = failures,
                        retry_in = ?backoff.delay(failures),
                        err = %reason,
                        "Publish failed, retry scheduled"
                    );
                } else {
                    report.lost_races += 1;
                    debug!(outbox_id = %entry.id, "Entry left pending before retry could be recorded");
                }
            }
        }

        Ok(())
    }

    fn bury(&self, entry: &OutboxEntry, attempts: u32, report: &mut TickReport) -> Result<()> {
        if self.store.mark_dead(&entry.id, self.clock.now())? {
            report.dead += 1;
            if let Some(metrics) = &self.metrics {
                metrics.outbox_dead.inc();
            }
            error!(
                outbox_id = %entry.id,
                attempts,
                event_type = %entry.event_type,
                aggregate_id = ?entry.aggregate_id,
                "Event marked DEAD after max attempts, operator action required"
            );
        } else {
            report.lost_races += 1;
        }
        Ok(())
    }

    /// Ticks on the configured period until the shutdown signal fires.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        let period = self.config.poll_interval().max(Duration::from_millis(1));
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            worker = %self.worker_id,
            period = ?period,
            "Outbox relay is running..."
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!(worker = %self.worker_id, "Outbox relay received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }

        info!(worker = %self.worker_id, "Outbox relay stopped");
    }

    pub fn spawn(self: Arc<Self>, shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }
}
