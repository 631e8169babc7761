//! Axum router and all HTTP handlers for esub-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers.  All handlers are `pub(crate)` so the scenario tests in
//! `tests/` can compose the router directly.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use esub_core::RepairReason;
use esub_schemas::Notification;
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info};

use crate::{
    api_types::{AcceptedResponse, DegradedResponse, HealthResponse, StatusResponse},
    state::{uptime_secs, AppState},
};

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/status", get(status_handler))
        .route("/v1/reconcile", post(reconcile))
        .route("/v1/notifications", post(notifications))
        .route("/v1/widgets", get(widgets))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service.to_string(),
            version: st.build.version.to_string(),
        }),
    )
}

// ---------------------------------------------------------------------------
// GET /v1/status
// ---------------------------------------------------------------------------

pub(crate) async fn status_handler(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let manager = st.manager.status().await;
    (
        StatusCode::OK,
        Json(StatusResponse {
            daemon_uptime_secs: uptime_secs(),
            config_hash: st.config_hash.clone(),
            observers: st.fanout.observer_count(),
            manager,
        }),
    )
}

// ---------------------------------------------------------------------------
// POST /v1/reconcile
// ---------------------------------------------------------------------------

/// Queue a manual repair pass. The pass runs on the repair worker; this
/// returns as soon as the trigger is queued.
pub(crate) async fn reconcile(State(st): State<Arc<AppState>>) -> Response {
    if !st.manager.request_repair(RepairReason::Manual) {
        return degraded(&st).await;
    }
    info!("manual repair requested");
    (
        StatusCode::ACCEPTED,
        Json(AcceptedResponse {
            accepted: true,
            kind: "reconcile".to_string(),
        }),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// POST /v1/notifications
// ---------------------------------------------------------------------------

/// Ingress for push transports delivering notifications over HTTP.
pub(crate) async fn notifications(
    State(st): State<Arc<AppState>>,
    Json(notification): Json<Notification>,
) -> Response {
    if st.manager.is_degraded() {
        return degraded(&st).await;
    }
    let kind = match &notification {
        Notification::Event { .. } => "event",
        Notification::Revocation { .. } => "revocation",
        Notification::ConnectionLost { .. } => "connection_lost",
    };
    debug!(kind, "notification received over http");
    st.manager.handle_notification(notification);
    (
        StatusCode::ACCEPTED,
        Json(AcceptedResponse {
            accepted: true,
            kind: kind.to_string(),
        }),
    )
        .into_response()
}

async fn degraded(st: &AppState) -> Response {
    let reason = st.manager.status().await.degraded_reason;
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(DegradedResponse {
            error: "MANAGER_DEGRADED: subscription service failed to initialize; re-authorize and restart"
                .to_string(),
            reason,
        }),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// GET /v1/widgets (websocket)
// ---------------------------------------------------------------------------

pub(crate) async fn widgets(
    State(st): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| widget_session(st, socket))
}

/// Forward fan-out lines to one overlay until either side goes away.
async fn widget_session(st: Arc<AppState>, socket: WebSocket) {
    let (id, mut lines) = st.fanout.open();
    let (mut tx, mut rx) = socket.split();

    loop {
        tokio::select! {
            line = lines.recv() => {
                let Some(line) = line else { break };
                if tx.send(Message::Text(line)).await.is_err() {
                    break;
                }
            }
            incoming = rx.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    st.fanout.close(id);
}
