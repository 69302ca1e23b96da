use std::sync::Arc;

use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use transfer_relay::{
    api::{self, AppState},
    config,
    db::{SqliteStore, TransferWriter},
    parser::{TransferDecoder, TransferSchema},
    pipeline::Pipeline,
    publisher::{BatchPublisher, MessageQueue},
    pubsub::PubSubQueue,
};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with_target(false)
        .init();

    info!("Transfer relay starting...");

    let cfg = config::load()?;

    let schema = Arc::new(TransferSchema::erc20()?);
    let decoder = TransferDecoder::new(schema);

    let writer = if cfg.enable_store {
        let store = Arc::new(SqliteStore::open(&cfg.db_path)?);
        info!("Persisting transfers to {} ({})", cfg.db_path, cfg.collection);
        Some(TransferWriter::new(store, cfg.collection.clone()))
    } else {
        info!("Document store is disabled");
        None
    };

    let queue = match (&cfg.pubsub_topic, cfg.enable_pubsub) {
        (Some(topic), true) => Some(Arc::new(
            PubSubQueue::connect(cfg.project_id.clone(), topic).await?,
        )),
        _ => {
            info!("Pub/Sub publishing is disabled");
            None
        }
    };
    let publisher = queue
        .clone()
        .map(|q| BatchPublisher::new(q as Arc<dyn MessageQueue>));

    let pipeline = Pipeline::new(decoder, publisher, writer);
    let state = AppState::new(&cfg.signing_key, pipeline, cfg.request_timeout)
        .with_body_limit(cfg.max_body_bytes);

    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {:?}", e);
        }
        info!("Shutdown signal received, stopping...");
    };

    let result = api::serve(&cfg, state, shutdown).await;

    if let Some(queue) = queue {
        queue.shutdown().await;
    }

    match &result {
        Ok(()) => info!("Transfer relay stopped."),
        Err(e) => error!("API error: {:?}", e),
    }
    result
}
