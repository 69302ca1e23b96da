use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};
use thiserror::Error;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};

use crate::cancel::Cancel;
use crate::config::Config;
use crate::error::SinkError;
use crate::models::Notification;
use crate::pipeline::Pipeline;
use crate::signature::{verify_signature, SIGNATURE_HEADER};

/// Largest notification body accepted. Busy blocks run to several megabytes.
pub const DEFAULT_BODY_LIMIT: usize = 64 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    signing_key: Arc<[u8]>,
    pipeline: Arc<Pipeline>,
    request_timeout: Duration,
    body_limit: usize,
}

impl AppState {
    pub fn new(signing_key: &str, pipeline: Pipeline, request_timeout: Duration) -> Self {
        Self {
            signing_key: Arc::from(signing_key.as_bytes()),
            pipeline: Arc::new(pipeline),
            request_timeout,
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }

    pub fn with_body_limit(mut self, bytes: usize) -> Self {
        self.body_limit = bytes;
        self
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("signature validation failed")]
    Unauthorized,
    #[error("invalid webhook event format: {0}")]
    BadRequest(String),
    #[error(transparent)]
    Sink(#[from] SinkError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Unauthorized => (StatusCode::FORBIDDEN, "Unauthorized"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "Invalid webhook event format"),
            ApiError::Sink(SinkError::Publish(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Failed to publish transfers")
            }
            ApiError::Sink(SinkError::Persistence { .. }) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Failed to persist transfers")
            }
            ApiError::Sink(SinkError::Cancelled) => {
                (StatusCode::GATEWAY_TIMEOUT, "Request deadline exceeded")
            }
        };

        match status {
            s if s.is_server_error() => error!("{}", self),
            _ => warn!("{}", self),
        }
        (status, message).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // replaces axum's 2 MB default for the `Bytes` extractor
    let body_limit = DefaultBodyLimit::max(state.body_limit);

    Router::new()
        .route("/", get(|| async { "Transfer relay running" }).post(receive_webhook))
        .route("/webhook", post(receive_webhook))
        .layer(body_limit)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

pub async fn serve(
    cfg: &Config,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> eyre::Result<()> {
    let ip = cfg.bind_addr.parse()?;
    let addr = SocketAddr::new(ip, cfg.port);
    info!("API listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state).into_make_service())
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

async fn receive_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !verify_signature(&body, signature, &state.signing_key) {
        return Err(ApiError::Unauthorized);
    }

    let notification: Notification =
        serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let cancel = Cancel::never().with_timeout(state.request_timeout);
    let outcome = state.pipeline.process(&notification, &cancel).await?;

    info!(
        webhook_id = %notification.webhook_id,
        event_id = %notification.id,
        extracted = outcome.extracted,
        published = outcome.message_id.is_some(),
        persisted = outcome.persisted.map(|s| s.documents).unwrap_or(0),
        "webhook handled"
    );
    Ok(StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{SqliteStore, TransferWriter, TRANSFER_COLLECTION};
    use crate::parser::{TransferDecoder, TransferSchema};
    use crate::signature::sign;
    use crate::test_support::transfer_log;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::json;
    use tower::ServiceExt;

    const KEY: &str = "whsec_test";
    const ALICE: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";
    const BOB: &str = "0xfB6916095ca1df60bB79Ce92cE3Ea74c37c5d359";

    fn app(store: Arc<SqliteStore>) -> Router {
        let decoder = TransferDecoder::new(Arc::new(TransferSchema::erc20().unwrap()));
        let writer = TransferWriter::new(store, TRANSFER_COLLECTION);
        let pipeline = Pipeline::new(decoder, None, Some(writer));
        router(AppState::new(KEY, pipeline, Duration::from_secs(30)))
    }

    fn webhook_body() -> Vec<u8> {
        let logs = vec![
            transfer_log(0, "0xaaa", ALICE, BOB, 5),
            transfer_log(1, "0xaaa", BOB, ALICE, 6),
        ];
        body_with_logs(logs)
    }

    fn body_with_logs(logs: Vec<serde_json::Value>) -> Vec<u8> {
        let raw = json!({
            "webhookId": "wh_test",
            "id": "whevt_test",
            "createdAt": "2024-06-01T08:00:00.000Z",
            "type": "GRAPHQL",
            "event": {
                "sequenceNumber": "1",
                "network": "ETH_MAINNET",
                "data": { "block": {
                    "hash": "0xblock", "number": 1, "timestamp": 2,
                    "logs": logs
                }}
            }
        });
        serde_json::to_vec(&raw).unwrap()
    }

    fn post(path: &str, body: Vec<u8>, signature: Option<String>) -> Request<Body> {
        let mut req = Request::post(path).header("content-type", "application/json");
        if let Some(sig) = signature {
            req = req.header(SIGNATURE_HEADER, sig);
        }
        req.body(Body::from(body)).unwrap()
    }

    #[tokio::test]
    async fn signed_webhook_is_persisted() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let body = webhook_body();
        let sig = sign(&body, KEY.as_bytes());

        let res = app(store.clone())
            .oneshot(post("/webhook", body, Some(sig)))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(store.count(TRANSFER_COLLECTION).unwrap(), 2);
        assert!(store.get(TRANSFER_COLLECTION, "0xaaa-1").unwrap().is_some());
    }

    #[tokio::test]
    async fn root_path_accepts_webhooks_too() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let body = webhook_body();
        let sig = sign(&body, KEY.as_bytes());

        let res = app(store.clone()).oneshot(post("/", body, Some(sig))).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(store.count(TRANSFER_COLLECTION).unwrap(), 2);
    }

    #[tokio::test]
    async fn notification_over_two_megabytes_is_accepted() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let logs = (0..5000).map(|i| transfer_log(i, "0xbig", ALICE, BOB, 1)).collect();
        let body = body_with_logs(logs);
        assert!(body.len() > 2 * 1024 * 1024, "body is {} bytes", body.len());
        let sig = sign(&body, KEY.as_bytes());

        let res = app(store.clone())
            .oneshot(post("/webhook", body, Some(sig)))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(store.count(TRANSFER_COLLECTION).unwrap(), 5000);
    }

    #[tokio::test]
    async fn body_over_configured_limit_is_rejected() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let decoder = TransferDecoder::new(Arc::new(TransferSchema::erc20().unwrap()));
        let writer = TransferWriter::new(store.clone(), TRANSFER_COLLECTION);
        let pipeline = Pipeline::new(decoder, None, Some(writer));
        let app = router(
            AppState::new(KEY, pipeline, Duration::from_secs(5)).with_body_limit(512),
        );

        let body = webhook_body();
        assert!(body.len() > 512);
        let sig = sign(&body, KEY.as_bytes());
        let res = app.oneshot(post("/webhook", body, Some(sig))).await.unwrap();
        assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(store.count(TRANSFER_COLLECTION).unwrap(), 0);
    }

    #[tokio::test]
    async fn bad_signature_is_forbidden() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let body = webhook_body();
        let sig = sign(&body, b"wrong key");

        let res = app(store.clone())
            .oneshot(post("/webhook", body.clone(), Some(sig)))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::FORBIDDEN);

        let res = app(store.clone()).oneshot(post("/webhook", body, None)).await.unwrap();
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
        assert_eq!(store.count(TRANSFER_COLLECTION).unwrap(), 0);
    }

    #[tokio::test]
    async fn unparseable_body_is_bad_request() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let body = b"{\"webhookId\": 5}".to_vec();
        let sig = sign(&body, KEY.as_bytes());

        let res = app(store).oneshot(post("/webhook", body, Some(sig))).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn liveness() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let res = app(store)
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(res.into_body(), 1024).await.unwrap();
        assert_eq!(&bytes[..], b"Transfer relay running");
    }

    #[test]
    fn sink_errors_map_to_retryable_statuses() {
        let cancelled = ApiError::from(SinkError::Cancelled).into_response();
        assert_eq!(cancelled.status(), StatusCode::GATEWAY_TIMEOUT);

        let publish = ApiError::from(SinkError::Publish(crate::error::QueueError::Transport(
            "down".to_string(),
        )))
        .into_response();
        assert_eq!(publish.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
