use std::sync::Arc;
use ticket_outbox::{
    BrokerPublisher, Clock, DeadLetterHandler, DeadLetterSink, DeliveryMode, DeliveryStrategy,
    KafkaBrokerPublisher, KafkaDeadLetterSink, KafkaProducer, KafkaProducerShutdown,
    LogDeadLetterSink, Metrics, OutboxBacklogShutdown, OutboxEntry, OutboxRelay, OutboxStore,
    PurchaseSaga, Result, RetryConfig, RocksDBStore, RocksDbOutboxStore, RocksDbSeatLock, SeatKey,
    SeatLock, ServiceConfig, ShutdownCoordinator, SystemClock, TicketEventListener, TicketReceipt,
    VenueRegistry,
};
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Clone)]
pub struct PurchaseService {
    saga: Arc<PurchaseSaga>,
    outbox: Arc<dyn OutboxStore>,
    metrics: Metrics,
    delivery_mode: DeliveryMode,
}

impl PurchaseService {
    /// Opens the state store, wires the saga for the configured delivery
    /// mode and starts `relay_workers` outbox relays.
    pub async fn new(
        config: ServiceConfig,
        relay_workers: usize,
        coordinator: &ShutdownCoordinator,
    ) -> Result<(Self, Vec<JoinHandle<()>>)> {
        info!("Opening state store at {}", config.state_dir);
        let store = Arc::new(RocksDBStore::new(&config.state_dir)?);
        let seat_lock: Arc<dyn SeatLock> = Arc::new(RocksDbSeatLock::new(store.clone()));
        let outbox: Arc<dyn OutboxStore> = Arc::new(RocksDbOutboxStore::new(store));
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let metrics = Metrics::new()?;

        let producer = KafkaProducer::new(config.to_kafka_config())?;
        let publisher: Arc<dyn BrokerPublisher> =
            Arc::new(KafkaBrokerPublisher::new(producer.clone(), config.outbox.topic.clone()));

        let venues = Arc::new(VenueRegistry::from_config(&config.venues));

        let delivery = match config.purchase.delivery_mode {
            DeliveryMode::Outbox => DeliveryStrategy::Outbox(outbox.clone()),
            DeliveryMode::Direct => {
                let sink: Arc<dyn DeadLetterSink> = match &config.purchase.dead_letter_topic {
                    Some(topic) => Arc::new(KafkaDeadLetterSink::new(producer.clone(), topic.clone())),
                    None => Arc::new(LogDeadLetterSink),
                };
                let dead_letters = DeadLetterHandler::new(seat_lock.clone(), sink, clock.clone())
                    .with_metrics(metrics.clone());
                DeliveryStrategy::Direct(TicketEventListener::new(
                    publisher.clone(),
                    Arc::new(dead_letters),
                ))
            }
        };
        info!("Purchases deliver through the {} strategy", delivery.name());

        let saga = PurchaseSaga::new(seat_lock, venues, delivery, clock.clone())
            .with_release_retry(RetryConfig::seat_release(config.purchase.release_max_attempts))
            .with_metrics(metrics.clone());

        let mut relays = Vec::new();
        if config.purchase.delivery_mode == DeliveryMode::Outbox {
            if relay_workers == 0 {
                warn!("Outbox relay disabled, pending entries will not be published by this process");
            }
            for worker in 0..relay_workers {
                let relay = OutboxRelay::new(
                    outbox.clone(),
                    publisher.clone(),
                    clock.clone(),
                    config.outbox.clone(),
                )
                .with_worker_id(format!("relay-{}", worker))
                .with_metrics(metrics.clone());
                relays.push(Arc::new(relay).spawn(coordinator.subscribe()));
            }
            info!("Started {} outbox relay workers", relays.len());
        }

        coordinator
            .register_component(Box::new(KafkaProducerShutdown::new(producer)))
            .await;
        coordinator
            .register_component(Box::new(OutboxBacklogShutdown::new(outbox.clone())))
            .await;

        let service = Self {
            saga: Arc::new(saga),
            outbox,
            metrics,
            delivery_mode: config.purchase.delivery_mode,
        };
        Ok((service, relays))
    }

    pub async fn purchase(&self, seat: SeatKey) -> Result<TicketReceipt> {
        self.saga.purchase(seat).await
    }

    pub fn outbox_entry(&self, id: &str) -> Result<Option<OutboxEntry>> {
        self.outbox.get(id)
    }

    pub fn pending_outbox(&self) -> Result<usize> {
        self.outbox.pending_count()
    }

    pub fn delivery_mode(&self) -> DeliveryMode {
        self.delivery_mode
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}
