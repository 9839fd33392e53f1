mod error;
mod api;
mod config;
mod payments;
mod providers;
mod workers;
mod server;
mod bootstrap;

use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// Initialize logging and tracing
fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,tower_http=debug,payments_backend=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    dotenv::dotenv().ok();

    // Initialize tracing
    init_tracing();

    info!("🚀 Starting Payments Backend");

    let config = config::Config::from_env()?;

    let app_state = bootstrap::initialize_app_state(&config).await?;

    // Background loops stop once the flag flips to true
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let workers = bootstrap::start_workers(&config, &app_state, shutdown_rx);

    // Create HTTP server
    let app = server::create_app(app_state.state.clone()).await;

    let shutdown = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        info!("🛑 Shutdown signal received");
        let _ = shutdown_tx.send(true);
    };

    // Run the Server
    server::run_server(app, &config.bind_address, shutdown).await?;

    for worker in workers {
        if let Err(e) = worker.await {
            warn!("Worker exited abnormally: {}", e);
        }
    }

    info!("👋 Server stopped");
    Ok(())
}
