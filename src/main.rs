use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crm_relay::config::ServiceConfig;
use crm_relay::dedup::DedupFilter;
use crm_relay::direct::DirectProcessor;
use crm_relay::outbound::{HttpSetupTrigger, NullSetupTrigger, SetupTrigger};
use crm_relay::processors::Dispatcher;
use crm_relay::server::{self, AppState};
use crm_relay::store::MemoryStore;
use crm_relay::worker::BatchProcessor;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServiceConfig::from_env()?;
    let verifier = Arc::new(config.verifier()?);

    let store = Arc::new(
        MemoryStore::new()
            .with_queue_policy(config.queue_policy)
            .with_dedup_policy(config.dedup_policy),
    );

    let trigger: Arc<dyn SetupTrigger> = match &config.setup_trigger_url {
        Some(url) => Arc::new(HttpSetupTrigger::new(
            url.clone(),
            config.setup_trigger_token.clone(),
        )),
        None => Arc::new(NullSetupTrigger),
    };
    let dispatcher = Arc::new(Dispatcher::new(store.clone(), trigger));

    let state = AppState {
        verifier,
        queue_store: store.clone(),
        dedup: DedupFilter::new(store.clone()),
        metrics: store.clone(),
        discovery: store.clone(),
        direct: Arc::new(DirectProcessor::new(
            dispatcher.clone(),
            store.clone(),
            store.clone(),
            config.direct_depth_threshold,
        )),
        worker: Arc::new(BatchProcessor::new(
            store.clone(),
            store.clone(),
            dispatcher,
            config.worker,
        )),
    };

    let app = server::router(state);
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!(addr = %config.bind_addr, "listening");

    let token = CancellationToken::new();
    let shutdown = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            shutdown.cancel();
        }
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await?;
    Ok(())
}
