use dotenvy::dotenv;
use eyre::{eyre, Result};
use std::{env, time::Duration};
use tracing::info;

use crate::api::DEFAULT_BODY_LIMIT;
use crate::db::TRANSFER_COLLECTION;

#[derive(Clone)]
pub struct Config {
    pub signing_key: String,
    pub bind_addr: String,
    pub port: u16,
    pub db_path: String,
    pub collection: String,
    pub enable_store: bool,
    pub enable_pubsub: bool,
    pub pubsub_topic: Option<String>,
    pub project_id: Option<String>,
    pub request_timeout: Duration,
    pub max_body_bytes: usize,
}

// the signing key stays out of logs
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("bind_addr", &self.bind_addr)
            .field("port", &self.port)
            .field("db_path", &self.db_path)
            .field("collection", &self.collection)
            .field("enable_store", &self.enable_store)
            .field("enable_pubsub", &self.enable_pubsub)
            .field("pubsub_topic", &self.pubsub_topic)
            .field("project_id", &self.project_id)
            .field("request_timeout", &self.request_timeout)
            .field("max_body_bytes", &self.max_body_bytes)
            .finish_non_exhaustive()
    }
}

pub fn load() -> Result<Config> {
    dotenv().ok(); // .env is optional

    let cfg = from_lookup(|key| env::var(key).ok())?;
    info!("Loaded config: {:?}", cfg);
    Ok(cfg)
}

/// Build the config from any variable source.
pub fn from_lookup<F>(lookup: F) -> Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    let signing_key = non_empty("ALCHEMY_SIGNING_KEY")
        .ok_or_else(|| eyre!("ALCHEMY_SIGNING_KEY environment variable is not set"))?;

    let port = match non_empty("PORT") {
        Some(p) => p.parse().map_err(|_| eyre!("PORT must be a valid port, got {p:?}"))?,
        None => 8080,
    };

    let request_timeout = match non_empty("REQUEST_TIMEOUT_SECS") {
        Some(s) => Duration::from_secs(
            s.parse()
                .map_err(|_| eyre!("REQUEST_TIMEOUT_SECS must be whole seconds, got {s:?}"))?,
        ),
        None => Duration::from_secs(30),
    };

    let max_body_bytes = match non_empty("MAX_BODY_BYTES") {
        Some(s) => s
            .parse()
            .map_err(|_| eyre!("MAX_BODY_BYTES must be a byte count, got {s:?}"))?,
        None => DEFAULT_BODY_LIMIT,
    };

    let enable_store = flag(non_empty("ENABLE_STORE").or_else(|| non_empty("ENABLE_FIRESTORE")));
    let enable_pubsub = flag(non_empty("ENABLE_PUBSUB"));

    let pubsub_topic = non_empty("ALCHEMY_PUBSUB_TOPIC");
    if enable_pubsub && pubsub_topic.is_none() {
        return Err(eyre!("ALCHEMY_PUBSUB_TOPIC environment variable is not set"));
    }

    Ok(Config {
        signing_key,
        bind_addr: non_empty("BIND_ADDR").unwrap_or_else(|| "0.0.0.0".to_string()),
        port,
        db_path: non_empty("DATABASE_URL").unwrap_or_else(|| "transfers.db".to_string()),
        collection: non_empty("STORE_COLLECTION")
            .unwrap_or_else(|| TRANSFER_COLLECTION.to_string()),
        enable_store,
        enable_pubsub,
        pubsub_topic,
        project_id: non_empty("GCP_PROJECT").or_else(|| non_empty("GOOGLE_CLOUD_PROJECT")),
        request_timeout,
        max_body_bytes,
    })
}

fn flag(value: Option<String>) -> bool {
    value.is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
}
