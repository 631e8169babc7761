//! Request and response types for all esub-daemon HTTP endpoints.
//!
//! These types are `Serialize + Deserialize` so they can be JSON-encoded
//! by Axum and decoded by tests.  No business logic lives here.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// /v1/health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: String,
    pub version: String,
}

// ---------------------------------------------------------------------------
// /v1/status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub daemon_uptime_secs: u64,
    pub config_hash: Option<String>,
    /// Open overlay websocket observers.
    pub observers: usize,
    pub manager: esub_core::ManagerStatus,
}

// ---------------------------------------------------------------------------
// /v1/reconcile  /v1/notifications
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptedResponse {
    pub accepted: bool,
    /// "reconcile" | "event" | "revocation" | "connection_lost"
    pub kind: String,
}

/// Body returned when the manager came up degraded and cannot act.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DegradedResponse {
    pub error: String,
    pub reason: Option<String>,
}
