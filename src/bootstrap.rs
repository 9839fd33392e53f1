use sqlx::{postgres::PgPoolOptions, PgPool};
use std::{sync::Arc, time::Duration};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{info, warn};

use crate::{
    api::handler::AppState,
    config::Config,
    error::AppResult,
    payments::{
        InMemoryStatusStore, PaymentEvents, PaymentTransactions, PgStatusStore, StatusStore,
        StreamCursors,
    },
    providers::registry,
    workers::{spawn_periodic, EventProcessor, PaymentListener, TransactionReconciler},
};

/// Wired application: HTTP state plus the store the workers share
pub struct Application {
    pub state: AppState,
    pub store: Arc<dyn StatusStore>,
}

pub async fn initialize_app_state(config: &Config) -> AppResult<Application> {
    info!("Initializing application components ...");

    // Provider first: an unsupported selection must stop startup before anything else
    let provider = registry::resolve(config)?;

    let store: Arc<dyn StatusStore> = match &config.database_url {
        Some(database_url) => Arc::new(PgStatusStore::new(initialize_database(database_url).await?)),
        None => {
            warn!("⚠️  DATABASE_URL not set - using in-memory payment store, nothing is persisted");
            Arc::new(InMemoryStatusStore::new())
        }
    };

    let state = AppState {
        provider,
        events: Arc::new(PaymentEvents::new(store.clone())),
        transactions: Arc::new(PaymentTransactions::new(store.clone())),
    };

    info!("✅ Payment services initialized");
    Ok(Application { state, store })
}

/// Spawn the background loops the active provider supports
pub fn start_workers(
    config: &Config,
    app: &Application,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let provider = &app.state.provider;
    let mut handles = Vec::new();

    if !provider.supports_background_sync() {
        warn!(
            "⚠️  {} provider has no ledger verification - payment workers disabled",
            provider.kind
        );
        return handles;
    }

    match &provider.stream {
        Some(stream) => {
            let listener = Arc::new(PaymentListener::new(
                stream.clone(),
                app.state.events.clone(),
                Arc::new(StreamCursors::new(app.store.clone())),
                config.stellar.payments_start_cursor.clone(),
                config.listener,
            ));
            handles.push(spawn_periodic(listener, config.listener.interval(), shutdown.clone()));
        }
        None => warn!("⚠️  STELLAR_DESTINATION_ADDRESS not set - payment listener disabled"),
    }

    let processor = Arc::new(EventProcessor::new(
        provider.provider.clone(),
        app.state.events.clone(),
        app.state.transactions.clone(),
        config.processor,
    ));
    handles.push(spawn_periodic(processor, config.processor.interval(), shutdown.clone()));

    let reconciler = Arc::new(TransactionReconciler::new(
        provider.provider.clone(),
        app.state.transactions.clone(),
        config.reconciliation,
    ));
    handles.push(spawn_periodic(reconciler, config.reconciliation.interval(), shutdown));

    info!("✅ {} payment workers started", handles.len());
    handles
}

async fn initialize_database(database_url: &str) -> AppResult<PgPool> {
    info!("📊 Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await?;

    info!("✓ Database pool configured: 20 max connections");

    // Run migrations
    info!("🔄 Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;

    info!("✓ Database initialized");
    Ok(pool)
}
