//! Historian Server
//!
//! Run with: cargo run
//!
//! Environment variables:
//! - HISTORIAN_HOST: Bind address (default: 0.0.0.0)
//! - HISTORIAN_PORT: Port number (default: 8087)
//! - HISTORIAN_TABLE_PREFIX: Prefix for generated tables (default: history)
//! - HISTORIAN_BATCH_SIZE: Queue length that triggers a flush (default: 200)
//! - HISTORIAN_FLUSH_SECS: Periodic flush interval (default: 10)
//! - RUST_LOG: Log level (default: info)

use historian::api::{run_server, ServerConfig};
use historian::pipeline::{Historian, HistorianConfig};
use historian::store::MemoryStore;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "historian=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let host = std::env::var("HISTORIAN_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = std::env::var("HISTORIAN_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8087);
    let table_prefix =
        std::env::var("HISTORIAN_TABLE_PREFIX").unwrap_or_else(|_| "history".to_string());
    let batch_size: usize = std::env::var("HISTORIAN_BATCH_SIZE")
        .ok()
        .and_then(|b| b.parse().ok())
        .unwrap_or(200);
    let flush_secs: u64 = std::env::var("HISTORIAN_FLUSH_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(10);

    let pipeline_config = HistorianConfig {
        table_prefix,
        batch_size,
        flush_interval: Duration::from_secs(flush_secs),
        ..Default::default()
    };

    tracing::info!("Historian configuration:");
    tracing::info!("  Host: {}:{}", host, port);
    tracing::info!("  Table prefix: {}", pipeline_config.table_prefix);
    tracing::info!("  Batch size: {}", pipeline_config.batch_size);
    tracing::info!("  Flush interval: {:?}", pipeline_config.flush_interval);

    let store = Arc::new(MemoryStore::new());
    let historian = Historian::start(store, pipeline_config).await?;

    run_server(historian, ServerConfig { host, port }).await
}
