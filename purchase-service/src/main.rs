use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::PathBuf};
use ticket_outbox::{
    apply_env_overrides, merge_properties_file, parse_properties_file, run_with_graceful_shutdown,
    OutboxEntry, PurchaseError, SeatKey, ServiceConfig, ShutdownCoordinator, TicketReceipt,
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

mod service;

use service::PurchaseService;

const APPLICATION_ID: &str = "purchase-service";

#[derive(Parser, Debug)]
#[command(name = "purchase-service")]
#[command(about = "Seat purchase API with transactional outbox delivery")]
struct Args {
    /// Port to listen on
    #[arg(short = 'p', long = "port", default_value = "8080")]
    port: u16,

    /// Config file path
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Second properties file layered over the first
    #[arg(long = "extra-config")]
    extra_config: Option<PathBuf>,

    /// RocksDB state directory, overrides `state.dir`
    #[arg(long = "state-dir")]
    state_dir: Option<String>,

    /// Outbox relay workers in this process (0 disables the relay)
    #[arg(long = "relay-workers", default_value = "1")]
    relay_workers: usize,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PurchaseRequest {
    event_id: String,
    venue_id: String,
    zone_id: u32,
    row: String,
    column: String,
}

impl From<PurchaseRequest> for SeatKey {
    fn from(request: PurchaseRequest) -> Self {
        SeatKey::new(
            request.event_id,
            request.venue_id,
            request.zone_id,
            request.row,
            request.column,
        )
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HealthStatus {
    status: String,
    delivery_mode: String,
    pending_outbox: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    info!("Starting Purchase Service on port {}", args.port);

    let config = load_config(&args)?;
    let coordinator = ShutdownCoordinator::default();
    let (purchase_service, relays) =
        PurchaseService::new(config, args.relay_workers, &coordinator).await?;

    let app = Router::new()
        .route("/tickets", post(purchase_ticket))
        .route("/outbox/:id", get(get_outbox_entry))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(purchase_service);

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    info!("Purchase Service listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let mut server_shutdown = coordinator.subscribe();
    run_with_graceful_shutdown(
        APPLICATION_ID,
        || async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = server_shutdown.recv().await;
                })
                .await?;
            Ok::<(), PurchaseError>(())
        },
        coordinator,
    )
    .await?;

    for relay in relays {
        if let Err(e) = relay.await {
            error!("Outbox relay task failed: {}", e);
        }
    }

    info!("Purchase Service stopped");
    Ok(())
}

fn load_config(args: &Args) -> anyhow::Result<ServiceConfig> {
    let mut config = match &args.config {
        Some(path) => {
            info!("Config file: {:?}", path);
            parse_properties_file(path, APPLICATION_ID)?
        }
        None => ServiceConfig::new(APPLICATION_ID),
    };

    if let Some(extra) = &args.extra_config {
        info!("Loading extra config from: {:?}", extra);
        config = merge_properties_file(config, extra)?;
    }

    config = apply_env_overrides(config)?;

    if let Some(state_dir) = &args.state_dir {
        config.state_dir = state_dir.clone();
    }

    Ok(config)
}

fn status_for(e: &PurchaseError) -> StatusCode {
    match e {
        PurchaseError::SeatConflict(_) => StatusCode::CONFLICT,
        PurchaseError::InvalidSeat(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn purchase_ticket(
    State(service): State<PurchaseService>,
    Json(request): Json<PurchaseRequest>,
) -> (StatusCode, Json<ApiResponse<TicketReceipt>>) {
    match service.purchase(request.into()).await {
        Ok(receipt) => (StatusCode::CREATED, Json(ApiResponse::success(receipt))),
        Err(e) => {
            let status = status_for(&e);
            if status.is_server_error() {
                error!("Error purchasing ticket: {}", e);
                (status, Json(ApiResponse::error("Ticket purchase failed".to_string())))
            } else {
                (status, Json(ApiResponse::error(e.to_string())))
            }
        }
    }
}

async fn get_outbox_entry(
    State(service): State<PurchaseService>,
    Path(id): Path<String>,
) -> (StatusCode, Json<ApiResponse<OutboxEntry>>) {
    match service.outbox_entry(&id) {
        Ok(Some(entry)) => (StatusCode::OK, Json(ApiResponse::success(entry))),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error("Outbox entry not found".to_string())),
        ),
        Err(e) => {
            error!("Error reading outbox entry {}: {}", id, e);
            (StatusCode::INTERNAL_SERVER_ERROR, Json(ApiResponse::error(e.to_string())))
        }
    }
}

async fn health_check(State(service): State<PurchaseService>) -> Json<ApiResponse<HealthStatus>> {
    let pending_outbox = match service.pending_outbox() {
        Ok(count) => Some(count),
        Err(e) => {
            error!("Could not count pending outbox entries: {}", e);
            None
        }
    };

    Json(ApiResponse::success(HealthStatus {
        status: "OK".to_string(),
        delivery_mode: service.delivery_mode().to_string(),
        pending_outbox,
    }))
}

async fn metrics(State(service): State<PurchaseService>) -> Response {
    match service.metrics().export() {
        Ok(body) => ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body).into_response(),
        Err(e) => {
            error!("Error exporting metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
