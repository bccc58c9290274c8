use dotenvy::dotenv;
use std::sync::Arc;
use tracing::info;

mod app;
mod common;
mod config;
mod docs;
mod infrastructure;
mod modules;
mod routes;
mod state;
mod workers;

use config::settings::AppConfig;
use infrastructure::queue::RabbitMqService;
use infrastructure::storage::StorageService;
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    info!("Starting server...");

    let config = AppConfig::new()?;

    let storage = StorageService::new(
        &config.minio_url,
        &config.minio_bucket,
        &config.minio_access_key,
        &config.minio_secret_key,
    )
    .await;
    storage.ensure_bucket().await?;

    let queue = RabbitMqService::new(&config.rabbitmq_url).await?;

    let state = AppState::new(config, Arc::new(storage), queue);

    tokio::spawn(workers::transcoder::start_transcoder_worker(state.clone()));

    let addr = format!("0.0.0.0:{}", state.config.server_port);
    let app = app::create_app(state).await;

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server running on http://{addr}");

    axum::serve(listener, app).await?;
    Ok(())
}
