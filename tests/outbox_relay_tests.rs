mod common;

use chrono::Duration;
use common::{BrokerOutcome, FlakyOutboxStore, ScriptedBroker};
use std::sync::Arc;
use tempfile::tempdir;
use ticket_outbox::*;
use tokio::sync::broadcast;

struct Harness {
    clock: ManualClock,
    store: Arc<InMemoryOutboxStore>,
    broker: Arc<ScriptedBroker>,
}

impl Harness {
    fn new(outcome: BrokerOutcome) -> Self {
        Self::with_broker(ScriptedBroker::new(outcome))
    }

    fn with_broker(broker: ScriptedBroker) -> Self {
        let clock = common::manual_clock();
        let store = Arc::new(InMemoryOutboxStore::with_clock(Arc::new(clock.clone())));
        Self {
            clock,
            store,
            broker: Arc::new(broker),
        }
    }

    fn relay(&self, max_attempts: u32) -> OutboxRelay {
        OutboxRelay::new(
            self.store.clone(),
            self.broker.clone(),
            Arc::new(self.clock.clone()),
            common::outbox_config(max_attempts),
        )
    }

    fn append(&self, aggregate_id: Option<&str>, partition_key: Option<&str>) -> String {
        let mut entry = NewOutboxEntry::new(EventTypes::TICKET_CREATED, "{\"ticketId\":\"t-1\"}");
        if let Some(aggregate_id) = aggregate_id {
            entry = entry.with_aggregate_id(aggregate_id);
        }
        if let Some(partition_key) = partition_key {
            entry = entry.with_partition_key(partition_key);
        }
        self.store.append(entry).unwrap()
    }

    fn entry(&self, id: &str) -> OutboxEntry {
        self.store.get(id).unwrap().unwrap()
    }
}

#[test]
fn test_backoff_schedule() {
    let backoff = OutboxBackoff::default();
    let delays: Vec<u64> = (1..=10).map(|n| backoff.delay(n).as_secs()).collect();
    assert_eq!(delays, vec![2, 4, 8, 16, 32, 60, 60, 60, 60, 60]);

    assert_eq!(backoff.delay(u32::MAX).as_secs(), 60);
    assert_eq!(backoff.chrono_delay(3), Duration::seconds(8));
}

#[tokio::test]
async fn test_successful_publish_marks_sent() {
    let harness = Harness::new(BrokerOutcome::Ack);
    let id = harness.append(Some("t-1"), Some("V1"));

    let report = harness.relay(10).tick().await;

    assert_eq!(report.processed, 1);
    assert_eq!(report.sent, 1);
    assert_eq!(harness.entry(&id).state, OutboxState::Sent);
    assert_eq!(harness.broker.calls(), 1);

    // nothing left to do
    let report = harness.relay(10).tick().await;
    assert_eq!(report, TickReport::default());
    assert_eq!(harness.broker.calls(), 1);
}

#[tokio::test]
async fn test_failed_publish_schedules_retry() {
    let harness = Harness::new(BrokerOutcome::Nack);
    let id = harness.append(Some("t-1"), None);
    let relay = harness.relay(10);

    let report = relay.tick().await;
    assert_eq!(report.retried, 1);

    let entry = harness.entry(&id);
    assert_eq!(entry.state, OutboxState::Pending);
    assert_eq!(entry.attempts, 1);
    assert_eq!(
        entry.next_attempt_at,
        Some(common::start_time() + Duration::seconds(2))
    );

    // gated until the retry time
    let report = relay.tick().await;
    assert_eq!(report.processed, 0);
    assert_eq!(harness.broker.calls(), 1);

    harness.clock.advance(Duration::seconds(2));
    harness.broker.set_outcome(BrokerOutcome::Ack);
    let report = relay.tick().await;
    assert_eq!(report.sent, 1);
    assert_eq!(harness.entry(&id).state, OutboxState::Sent);
    assert_eq!(harness.entry(&id).attempts, 1);
}

#[tokio::test]
async fn test_publish_error_is_treated_like_nack() {
    let harness = Harness::new(BrokerOutcome::Error);
    let id = harness.append(Some("t-1"), None);

    let report = harness.relay(10).tick().await;

    assert_eq!(report.retried, 1);
    assert_eq!(harness.entry(&id).attempts, 1);
}

#[tokio::test]
async fn test_last_attempt_failure_goes_dead() {
    let harness = Harness::new(BrokerOutcome::Nack);
    let id = harness.append(Some("t-1"), None);
    let now = harness.clock.now();
    for _ in 0..9 {
        harness.store.record_retry(&id, now, &|_| now).unwrap();
    }
    assert_eq!(harness.entry(&id).attempts, 9);

    let report = harness.relay(10).tick().await;

    assert_eq!(report.dead, 1);
    assert_eq!(report.retried, 0);
    let entry = harness.entry(&id);
    assert_eq!(entry.state, OutboxState::Dead);
    assert_eq!(entry.attempts, 9);
    assert_eq!(harness.broker.calls(), 1);
}

#[tokio::test]
async fn test_exhausted_entry_goes_dead_without_publishing() {
    let harness = Harness::new(BrokerOutcome::Ack);
    let id = harness.append(Some("t-1"), None);
    let now = harness.clock.now();
    for _ in 0..3 {
        harness.store.record_retry(&id, now, &|_| now).unwrap();
    }

    let report = harness.relay(3).tick().await;

    assert_eq!(report.dead, 1);
    assert_eq!(harness.broker.calls(), 0);
    assert_eq!(harness.entry(&id).state, OutboxState::Dead);
}

#[tokio::test]
async fn test_repeated_failures_end_dead_and_stay_out() {
    let harness = Harness::new(BrokerOutcome::Nack);
    let id = harness.append(Some("t-1"), None);
    let relay = harness.relay(10);

    for _ in 0..10 {
        relay.tick().await;
        harness.clock.advance(Duration::seconds(61));
    }

    let entry = harness.entry(&id);
    assert_eq!(entry.state, OutboxState::Dead);
    assert_eq!(entry.attempts, 9);
    assert_eq!(harness.broker.calls(), 10);

    for _ in 0..3 {
        let report = relay.tick().await;
        assert_eq!(report.processed, 0);
        harness.clock.advance(Duration::seconds(61));
    }
    assert_eq!(harness.broker.calls(), 10);
}

#[tokio::test]
async fn test_two_relays_mark_sent_once() {
    let harness = Harness::with_broker(ScriptedBroker::new(BrokerOutcome::Ack).with_barrier(2));
    let id = harness.append(Some("t-1"), None);
    let first = harness.relay(10).with_worker_id("relay-a");
    let second = harness.relay(10).with_worker_id("relay-b");

    let (a, b) = tokio::join!(first.tick(), second.tick());

    // both saw the entry and published it
    assert_eq!(harness.broker.calls(), 2);
    assert_eq!(a.sent + b.sent, 1);
    assert_eq!(a.lost_races + b.lost_races, 1);
    assert_eq!(harness.entry(&id).state, OutboxState::Sent);
}

#[tokio::test]
async fn test_routing_key_preference() {
    let harness = Harness::new(BrokerOutcome::Ack);
    harness.append(Some("ticket-1"), Some("V1"));
    harness.clock.advance(Duration::seconds(1));
    harness.append(None, Some("V2"));
    harness.clock.advance(Duration::seconds(1));
    harness.append(None, None);

    harness.relay(10).tick().await;

    let keys: Vec<String> = harness
        .broker
        .published()
        .into_iter()
        .map(|(key, _)| key)
        .collect();
    assert_eq!(keys.len(), 3);
    assert_eq!(keys[0], "ticket-1");
    assert_eq!(keys[1], "V2");
    assert!(!keys[2].is_empty());
}

#[tokio::test]
async fn test_tick_drains_every_page() {
    let harness = Harness::new(BrokerOutcome::Ack);
    for n in 0..5 {
        harness.append(Some(&format!("t-{}", n)), None);
        harness.clock.advance(Duration::seconds(1));
    }

    // page size is 2
    let report = harness.relay(10).tick().await;

    assert_eq!(report.processed, 5);
    assert_eq!(report.sent, 5);
    assert_eq!(harness.store.pending_count().unwrap(), 0);

    let payload_keys: Vec<String> = harness
        .broker
        .published()
        .into_iter()
        .map(|(key, _)| key)
        .collect();
    assert_eq!(payload_keys, vec!["t-0", "t-1", "t-2", "t-3", "t-4"]);
}

#[tokio::test]
async fn test_relay_updates_metrics() {
    let harness = Harness::new(BrokerOutcome::Ack);
    harness.append(Some("t-1"), None);
    let metrics = Metrics::new().unwrap();

    harness.relay(10).with_metrics(metrics.clone()).tick().await;

    assert_eq!(metrics.outbox_sent.get(), 1.0);
    assert_eq!(metrics.outbox_pending.get(), 0.0);
    assert!(metrics.export().unwrap().contains("outbox_sent_total 1"));
}

#[tokio::test]
async fn test_relay_over_rocksdb() {
    let temp_dir = tempdir().unwrap();
    let clock = common::manual_clock();
    let rocks = Arc::new(RocksDBStore::new(temp_dir.path().join("outbox")).unwrap());
    let store = Arc::new(RocksDbOutboxStore::with_clock(rocks, Arc::new(clock.clone())));
    let broker = Arc::new(ScriptedBroker::new(BrokerOutcome::Nack));
    let relay = OutboxRelay::new(
        store.clone(),
        broker.clone(),
        Arc::new(clock.clone()),
        common::outbox_config(10),
    );

    let id = store
        .append(NewOutboxEntry::new(EventTypes::TICKET_CREATED, "{}").with_partition_key("V1"))
        .unwrap();

    assert_eq!(relay.tick().await.retried, 1);
    clock.advance(Duration::seconds(2));
    broker.set_outcome(BrokerOutcome::Ack);
    assert_eq!(relay.tick().await.sent, 1);

    let entry = store.get(&id).unwrap().unwrap();
    assert_eq!(entry.state, OutboxState::Sent);
    assert_eq!(entry.attempts, 1);
    assert_eq!(store.pending_count().unwrap(), 0);
    assert_eq!(broker.published()[0].0, "V1");
}

#[tokio::test]
async fn test_run_stops_on_shutdown() {
    let harness = Harness::new(BrokerOutcome::Ack);
    let id = harness.append(Some("t-1"), None);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let handle = Arc::new(harness.relay(10)).spawn(shutdown_rx);

    // the first interval tick fires immediately
    for _ in 0..100 {
        if harness.entry(&id).state == OutboxState::Sent {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(harness.entry(&id).state, OutboxState::Sent);

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(std::time::Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_two_relays_mark_sent_once_over_rocksdb() {
    let temp_dir = tempdir().unwrap();
    let clock = common::manual_clock();
    let rocks = Arc::new(RocksDBStore::new(temp_dir.path().join("outbox")).unwrap());
    let store = Arc::new(RocksDbOutboxStore::with_clock(rocks, Arc::new(clock.clone())));
    let broker = Arc::new(ScriptedBroker::new(BrokerOutcome::Ack).with_barrier(2));
    let relay = |worker: &str| {
        OutboxRelay::new(
            store.clone(),
            broker.clone(),
            Arc::new(clock.clone()),
            common::outbox_config(10),
        )
        .with_worker_id(worker)
    };
    let first = relay("relay-a");
    let second = relay("relay-b");

    let id = store
        .append(NewOutboxEntry::new(EventTypes::TICKET_CREATED, "{}").with_aggregate_id("t-1"))
        .unwrap();

    let (a, b) = tokio::join!(first.tick(), second.tick());

    assert_eq!(broker.calls(), 2);
    assert_eq!(a.sent + b.sent, 1);
    assert_eq!(a.lost_races + b.lost_races, 1);

    let entry = store.get(&id).unwrap().unwrap();
    assert_eq!(entry.state, OutboxState::Sent);
    assert_eq!(entry.attempts, 0);

    // the pending index key went away with the transition
    assert_eq!(store.pending_count().unwrap(), 0);
    let page = store.pending_page(None, 10, clock.now()).unwrap();
    assert!(page.entries.is_empty());
    assert_eq!(first.tick().await, TickReport::default());
}

#[tokio::test]
async fn test_store_error_does_not_stop_the_tick() {
    let clock = common::manual_clock();
    let store = Arc::new(FlakyOutboxStore::new(InMemoryOutboxStore::with_clock(Arc::new(
        clock.clone(),
    ))));
    let broker = Arc::new(ScriptedBroker::new(BrokerOutcome::Ack));
    let relay = OutboxRelay::new(
        store.clone(),
        broker.clone(),
        Arc::new(clock.clone()),
        common::outbox_config(10),
    );

    let mut ids = Vec::new();
    for n in 0..3 {
        let entry = NewOutboxEntry::new(EventTypes::TICKET_CREATED, "{}")
            .with_aggregate_id(format!("t-{}", n));
        ids.push(store.append(entry).unwrap());
        clock.advance(Duration::seconds(1));
    }
    store.break_entry(&ids[0]);

    let report = relay.tick().await;

    assert_eq!(report.processed, 3);
    assert_eq!(report.sent, 2);
    assert_eq!(broker.calls(), 3);
    assert_eq!(store.get(&ids[0]).unwrap().unwrap().state, OutboxState::Pending);
    assert_eq!(store.get(&ids[1]).unwrap().unwrap().state, OutboxState::Sent);
    assert_eq!(store.get(&ids[2]).unwrap().unwrap().state, OutboxState::Sent);

    // the failed transition left the entry due, it is picked up again
    let report = relay.tick().await;
    assert_eq!(report.processed, 1);
    assert_eq!(report.sent, 0);
}

#[tokio::test]
async fn test_retry_store_error_does_not_stop_the_tick() {
    let clock = common::manual_clock();
    let store = Arc::new(FlakyOutboxStore::new(InMemoryOutboxStore::with_clock(Arc::new(
        clock.clone(),
    ))));
    let broker = Arc::new(ScriptedBroker::new(BrokerOutcome::Nack));
    let relay = OutboxRelay::new(
        store.clone(),
        broker.clone(),
        Arc::new(clock.clone()),
        common::outbox_config(10),
    );

    let broken = store
        .append(NewOutboxEntry::new(EventTypes::TICKET_CREATED, "{}"))
        .unwrap();
    clock.advance(Duration::seconds(1));
    let healthy = store
        .append(NewOutboxEntry::new(EventTypes::TICKET_CREATED, "{}"))
        .unwrap();
    store.break_entry(&broken);

    let report = relay.tick().await;

    assert_eq!(report.processed, 2);
    assert_eq!(report.retried, 1);
    assert_eq!(store.get(&broken).unwrap().unwrap().attempts, 0);
    assert_eq!(store.get(&healthy).unwrap().unwrap().attempts, 1);
}

#[tokio::test]
async fn test_pending_gauge_refresh_is_throttled() {
    let harness = Harness::new(BrokerOutcome::Nack);
    let metrics = Metrics::new().unwrap();
    let relay = harness.relay(10).with_metrics(metrics.clone());

    harness.append(Some("t-1"), None);
    relay.tick().await;
    assert_eq!(metrics.outbox_pending.get(), 1.0);

    harness.clock.advance(Duration::seconds(1));
    harness.append(Some("t-2"), None);
    relay.tick().await;
    assert_eq!(metrics.outbox_pending.get(), 1.0);

    harness.clock.advance(Duration::seconds(15));
    relay.tick().await;
    assert_eq!(metrics.outbox_pending.get(), 2.0);
}

#[tokio::test]
async fn test_zero_poll_interval_keeps_relay_alive() {
    let harness = Harness::new(BrokerOutcome::Ack);
    let id = harness.append(Some("t-1"), None);
    let config = OutboxConfig {
        poll_interval_ms: 0,
        ..common::outbox_config(10)
    };
    let relay = OutboxRelay::new(
        harness.store.clone(),
        harness.broker.clone(),
        Arc::new(harness.clock.clone()),
        config,
    );
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let handle = Arc::new(relay).spawn(shutdown_rx);
    for _ in 0..100 {
        if harness.entry(&id).state == OutboxState::Sent {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    shutdown_tx.send(()).unwrap();

    let joined = tokio::time::timeout(std::time::Duration::from_secs(5), handle)
        .await
        .unwrap();
    assert!(joined.is_ok());
    assert_eq!(harness.entry(&id).state, OutboxState::Sent);
}

#[tokio::test]
async fn test_shutdown_lets_running_tick_finish() {
    let harness = Harness::with_broker(ScriptedBroker::new(BrokerOutcome::Ack).with_barrier(2));
    let id = harness.append(Some("t-1"), None);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let handle = Arc::new(harness.relay(10)).spawn(shutdown_rx);

    // wait until the publish is in flight and parked on the barrier
    for _ in 0..100 {
        if harness.broker.calls() == 1 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(harness.broker.calls(), 1);

    shutdown_tx.send(()).unwrap();
    harness.broker.join_barrier().await;

    tokio::time::timeout(std::time::Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(harness.entry(&id).state, OutboxState::Sent);
    assert_eq!(harness.broker.calls(), 1);
}
