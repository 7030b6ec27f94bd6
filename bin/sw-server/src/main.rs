//! SendWave server.
//!
//! Wires config, stores, and the dispatch engine behind the operator HTTP
//! API, runs the scheduler alongside the server, and shuts both down
//! gracefully so no message is left mid-send.
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `SENDWAVE_CONFIG` | - | Path to a TOML config file |
//! | `SENDWAVE_HTTP_PORT` | `8080` | HTTP API port |
//! | `SENDWAVE_STORE_DRIVER` | `sqlite` | `sqlite` or `memory` |
//! | `SENDWAVE_STORE_URL` | `sqlite://sendwave.db?mode=rwc` | sqlx connection URL |
//! | `SENDWAVE_CUSTOMERS_PATH` | - | JSON file with the customer list |
//! | `SENDWAVE_TEMPLATES_PATH` | - | JSON file with message templates |
//! | `RUST_LOG` | `info` | Log level |
//! | `LOG_FORMAT` | `text` | `json` for structured output |

mod api;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::{net::TcpListener, signal};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use sw_common::{Customer, Template};
use sw_config::{AppConfig, ConfigLoader};
use sw_engine::{
    BatchMonitor, BatchPlanner, DispatchScheduler, LoggingGateway, RescheduleController,
    SchedulerConfig,
};
use sw_store::{
    CampaignStore, MemoryCampaignStore, MemoryCustomerStore, MemoryTemplateStore,
    SqliteCampaignStore,
};

use api::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    sw_common::logging::init_logging("sw-server");

    info!("Starting SendWave server");

    let config = ConfigLoader::new().load()?;

    let store = build_campaign_store(&config).await?;
    let customers = Arc::new(MemoryCustomerStore::new(load_customers(&config)?));
    let templates = Arc::new(MemoryTemplateStore::new(load_templates(&config)?));

    let planner = BatchPlanner::new(
        customers.clone(),
        templates.clone(),
        store.clone(),
        config.engine.per_send_seconds,
    );
    let scheduler = Arc::new(DispatchScheduler::new(
        store.clone(),
        Arc::new(LoggingGateway),
        SchedulerConfig {
            max_attempts: config.engine.max_attempts,
            worker_slots: config.engine.worker_slots,
            poll_interval: Duration::from_millis(config.engine.poll_interval_ms),
            rate_limit_per_minute: config.engine.rate_limit_per_minute,
        },
    ));
    let monitor = BatchMonitor::new(store.clone(), customers.clone(), templates.clone());
    let reschedule = RescheduleController::new(store);

    let scheduler_task = tokio::spawn(scheduler.clone().run());

    let state = Arc::new(AppState {
        planner,
        scheduler: scheduler.clone(),
        monitor,
        reschedule,
        templates,
        per_send_seconds: config.engine.per_send_seconds,
    });

    let app = api::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let addr = format!("{}:{}", config.http.host, config.http.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("API server listening on http://{addr}");
    info!("Press Ctrl+C to shutdown");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutdown signal received, parking in-flight batches");
    scheduler.shutdown();
    scheduler.wait_for_workers().await;
    scheduler_task.abort();

    info!("SendWave server shutdown complete");
    Ok(())
}

async fn build_campaign_store(config: &AppConfig) -> Result<Arc<dyn CampaignStore>> {
    match config.store.driver.as_str() {
        "memory" => {
            warn!("Using in-memory store; batches will not survive a restart");
            Ok(Arc::new(MemoryCampaignStore::new()))
        }
        _ => {
            info!(url = %config.store.url, "Connecting to SQLite store");
            let pool = sqlx::sqlite::SqlitePoolOptions::new()
                .max_connections(5)
                .connect(&config.store.url)
                .await
                .context("failed to open sqlite store")?;
            let store = SqliteCampaignStore::new(pool);
            store.init_schema().await?;
            Ok(Arc::new(store))
        }
    }
}

fn load_customers(config: &AppConfig) -> Result<Vec<Customer>> {
    let Some(path) = &config.data.customers_path else {
        warn!("No customers_path configured; starting with an empty customer list");
        return Ok(Vec::new());
    };
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read customers file {path}"))?;
    let customers: Vec<Customer> =
        serde_json::from_str(&content).with_context(|| format!("invalid customers JSON in {path}"))?;
    info!(count = customers.len(), path = %path, "Loaded customers");
    Ok(customers)
}

fn load_templates(config: &AppConfig) -> Result<Vec<Template>> {
    let Some(path) = &config.data.templates_path else {
        warn!("No templates_path configured; starting with no templates");
        return Ok(Vec::new());
    };
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read templates file {path}"))?;
    let templates: Vec<Template> =
        serde_json::from_str(&content).with_context(|| format!("invalid templates JSON in {path}"))?;
    info!(count = templates.len(), path = %path, "Loaded templates");
    Ok(templates)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
