use axum::{
    routing::{get, post},
    Router,
};
use std::future::Future;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::api::handler::{
    create_intent, get_transaction, health_check, list_order_transactions, stellar_webhook,
    submit_payment, AppState,
};

pub async fn create_app(state: AppState) -> Router {
    info!("⚙️ Setting up HTTP routes...");

    let app = Router::new()
        // Public health check endpoint
        .route("/health", get(health_check))
        .nest(
            "/api/v1",
            Router::new()
                // Provider push notifications
                .route("/payments/webhooks/stellar", post(stellar_webhook))
                // Payment flow
                .route("/payments/intents", post(create_intent))
                .route("/payments/submit", post(submit_payment))
                // Lookups
                .route("/payments/transactions/:tx_hash", get(get_transaction))
                .route("/payments/orders/:order_id/transactions", get(list_order_transactions)),
        )
        .layer(CompressionLayer::new())
        .layer(CorsLayer::very_permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("✓ HTTP routes configured");
    app
}

/// Serve until `shutdown` resolves, then drain in-flight requests
pub async fn run_server<F>(app: Router, bind_address: &str, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!("🌐 Server listening on: {}", bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}
