//! HTTP ingestion gateway.
//!
//! Exposes the pipeline over HTTP with `axum`:
//!
//! | Method | Path | Response |
//! |---|---|---|
//! | `GET` | `/api/v1/` | `{"message":"ok"}` |
//! | `POST` | `/api/v1/event` | decode → `emit_event` → `{"message":"ok"}` |
//! | `GET` | `/api/v1/status` | lifecycle state, uptime, loaded plugins, ingress queue |
//!
//! Event bodies are decoded at this boundary: sample data is base64-decoded
//! and its SHA-256 recomputed. A malformed or empty body is answered with
//! `400` and never reaches the pipeline.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use sinkhole_core::config::{ApiConfig, OverflowPolicy};
use sinkhole_core::error::{DecodeError, LifecycleError};
use sinkhole_core::lifecycle::{LifecycleState, PluginManager};
use sinkhole_core::registry::PluginSummary;
use sinkhole_core::wire::decode_event;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct GatewayState {
    manager: Arc<PluginManager>,
}

/// JSON body of every non-status response.
#[derive(Debug, Serialize)]
pub struct ApiMessage {
    pub message: String,
}

impl ApiMessage {
    fn ok() -> Self {
        Self {
            message: "ok".to_owned(),
        }
    }
}

/// Ingress queue snapshot reported by `/api/v1/status`.
#[derive(Debug, Serialize)]
pub struct IngressStatus {
    pub depth: usize,
    pub capacity: usize,
    pub policy: OverflowPolicy,
    pub dropped: u64,
    pub rejected: u64,
}

/// Body of `GET /api/v1/status`.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub state: LifecycleState,
    /// Seconds since the pipeline started, `null` before it has.
    pub uptime_secs: Option<u64>,
    pub plugins: Vec<PluginSummary>,
    pub ingress: IngressStatus,
}

/// Errors a handler can answer with.
#[derive(Debug)]
pub enum GatewayError {
    /// The request body is not a valid event.
    Decode(DecodeError),
    /// The pipeline is not accepting events.
    Unavailable(LifecycleError),
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Decode(e) => (StatusCode::BAD_REQUEST, e.to_string()),
            Self::Unavailable(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
        };
        (status, Json(ApiMessage { message })).into_response()
    }
}

/// Path that accepts submitted events.
pub const EVENT_PATH: &str = "/api/v1/event";

/// Build the gateway router around a running plugin manager.
pub fn router(manager: Arc<PluginManager>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/api/v1/", get(index))
        .route(EVENT_PATH, post(submit_event))
        .route("/api/v1/status", get(status))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(GatewayState { manager })
}

async fn index() -> Json<ApiMessage> {
    Json(ApiMessage::ok())
}

async fn submit_event(
    State(state): State<GatewayState>,
    body: Bytes,
) -> Result<Json<ApiMessage>, GatewayError> {
    let event = decode_event(&body).map_err(|e| {
        tracing::warn!(error = %e, bytes = body.len(), "rejected event at gateway");
        GatewayError::Decode(e)
    })?;

    tracing::debug!(
        event_type = %event.event_type,
        source = %event.source,
        samples = event.samples.len(),
        "event accepted at gateway"
    );

    let outcome = state
        .manager
        .emit_event(event)
        .await
        .map_err(GatewayError::Unavailable)?;
    tracing::debug!(outcome = ?outcome, "gateway event dispatched");

    Ok(Json(ApiMessage::ok()))
}

async fn status(State(state): State<GatewayState>) -> Json<StatusResponse> {
    let ingress = state.manager.ingress();
    Json(StatusResponse {
        state: state.manager.state(),
        uptime_secs: state.manager.uptime().map(|uptime| uptime.as_secs()),
        plugins: state.manager.plugins(),
        ingress: IngressStatus {
            depth: ingress.len(),
            capacity: ingress.capacity(),
            policy: ingress.policy(),
            dropped: ingress.dropped_count(),
            rejected: ingress.rejected_count(),
        },
    })
}

/// Bind the gateway listener and serve until `shutdown` resolves.
///
/// Binding happens before this returns so address errors surface at
/// startup. Returns the bound address and the server task.
///
/// # Errors
///
/// - `listen_addr` is not a socket address
/// - The socket cannot be bound
pub async fn spawn_gateway<F>(
    config: &ApiConfig,
    manager: Arc<PluginManager>,
    shutdown: F,
) -> Result<(SocketAddr, JoinHandle<Result<()>>)>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr: SocketAddr = config
        .listen_addr
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid api listen address '{}': {}", config.listen_addr, e))?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind api gateway on {}: {}", addr, e))?;
    let local_addr = listener.local_addr()?;

    if local_addr.ip().is_unspecified() {
        tracing::warn!(
            listen_addr = %local_addr,
            "api gateway is exposed on all interfaces without authentication"
        );
    }

    let app = router(manager, config.max_body_bytes);
    let task = tokio::spawn(async move {
        tracing::info!(listen_addr = %local_addr, "api gateway listening");
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| anyhow::anyhow!("api gateway failed: {}", e))?;
        tracing::info!("api gateway stopped");
        Ok(())
    });

    Ok((local_addr, task))
}
