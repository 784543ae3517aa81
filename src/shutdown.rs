use crate::{KafkaProducer, OutboxStore, PurchaseError, Result};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::time::Duration;
use tracing::{error, info, warn};

/// Graceful shutdown coordinator
#[derive(Clone)]
pub struct ShutdownCoordinator {
    shutdown_tx: broadcast::Sender<()>,
    components: Arc<Mutex<Vec<Box<dyn ShutdownComponent + Send + Sync>>>>,
    shutdown_timeout: Duration,
}

/// Trait for components that need graceful shutdown
#[async_trait::async_trait]
pub trait ShutdownComponent {
    async fn shutdown(&self) -> Result<()>;
    fn name(&self) -> &str;
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl ShutdownCoordinator {
    pub fn new(shutdown_timeout: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            shutdown_tx,
            components: Arc::new(Mutex::new(Vec::new())),
            shutdown_timeout,
        }
    }

    /// Register a component for graceful shutdown
    pub async fn register_component(&self, component: Box<dyn ShutdownComponent + Send + Sync>) {
        let mut components = self.components.lock().await;
        info!("Registering component '{}' for graceful shutdown", component.name());
        components.push(component);
    }

    /// Get a shutdown signal receiver
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Tell every subscriber to stop. Components are not touched.
    pub fn trigger(&self) {
        if self.shutdown_tx.send(()).is_err() {
            warn!("Shutdown signal sent with no subscribers");
        }
    }

    /// Signal subscribers, then shut down registered components in parallel.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Initiating graceful shutdown...");
        self.trigger();

        let mut components = self.components.lock().await;
        let mut shutdown_tasks = Vec::new();

        for component in components.drain(..) {
            shutdown_tasks.push(tokio::spawn(async move {
                let component_name = component.name().to_string();
                info!("Shutting down component '{}'", component_name);
                match component.shutdown().await {
                    Ok(()) => info!("Component '{}' shutdown successfully", component_name),
                    Err(e) => error!("Component '{}' shutdown failed: {}", component_name, e),
                }
            }));
        }
        drop(components);

        let shutdown_future = async {
            for task in shutdown_tasks {
                if let Err(e) = task.await {
                    error!("Shutdown task failed: {}", e);
                }
            }
        };

        match tokio::time::timeout(self.shutdown_timeout, shutdown_future).await {
            Ok(()) => {
                info!("All components shutdown successfully");
                Ok(())
            }
            Err(_) => {
                error!("Shutdown timeout exceeded, forcing exit");
                Err(PurchaseError::InvalidArgument(
                    "Shutdown timeout exceeded".to_string(),
                ))
            }
        }
    }
}

/// Kafka producer shutdown component
pub struct KafkaProducerShutdown {
    producer: KafkaProducer,
}

impl KafkaProducerShutdown {
    pub fn new(producer: KafkaProducer) -> Self {
        Self { producer }
    }
}

#[async_trait::async_trait]
impl ShutdownComponent for KafkaProducerShutdown {
    async fn shutdown(&self) -> Result<()> {
        info!("Flushing Kafka producer...");
        self.producer.flush(Duration::from_secs(10)).await?;
        info!("Kafka producer flushed successfully");
        Ok(())
    }

    fn name(&self) -> &str {
        "kafka-producer"
    }
}

/// Reports what is left in the outbox. Pending entries survive the restart
/// and are picked up by the next relay.
pub struct OutboxBacklogShutdown {
    store: Arc<dyn OutboxStore>,
}

impl OutboxBacklogShutdown {
    pub fn new(store: Arc<dyn OutboxStore>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl ShutdownComponent for OutboxBacklogShutdown {
    async fn shutdown(&self) -> Result<()> {
        let pending = self.store.pending_count()?;
        if pending > 0 {
            warn!(pending, "Stopping with undelivered outbox entries");
        } else {
            info!("Outbox drained");
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "outbox-backlog"
    }
}

/// Waits for SIGTERM or Ctrl+C, then fires the shutdown signal.
pub fn setup_signal_handlers(coordinator: ShutdownCoordinator) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(sigterm) => sigterm,
                Err(e) => {
                    error!("Failed to setup SIGTERM handler: {}", e);
                    return;
                }
            };

            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, initiating graceful shutdown");
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
                }
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
                return;
            }
            info!("Received Ctrl+C, initiating graceful shutdown");
        }

        coordinator.trigger();
    });
}

/// Utility for running services with graceful shutdown
pub async fn run_with_graceful_shutdown<F, Fut>(
    service_name: &str,
    service_future: F,
    shutdown_coordinator: ShutdownCoordinator,
) -> Result<()>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<()>>,
{
    info!("Starting service '{}'", service_name);

    let mut shutdown_rx = shutdown_coordinator.subscribe();
    setup_signal_handlers(shutdown_coordinator.clone());

    let service_result = tokio::select! {
        result = service_future() => {
            info!("Service '{}' completed", service_name);
            result
        }
        _ = shutdown_rx.recv() => {
            info!("Service '{}' received shutdown signal", service_name);
            Ok(())
        }
    };

    if let Err(e) = shutdown_coordinator.shutdown().await {
        error!("Failed to shutdown service '{}': {}", service_name, e);
        return Err(e);
    }

    service_result
}
