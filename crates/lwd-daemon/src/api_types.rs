//! Request and response types for the lwd-daemon HTTP endpoints.
//!
//! These types are `Serialize + Deserialize` so they can be JSON-encoded
//! by Axum and decoded by tests. No business logic lives here.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use lwd_runtime::RuntimeStatus;
use lwd_schemas::Grams;

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
    pub config_hash: String,
    #[serde(flatten)]
    pub runtime: RuntimeStatus,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Body for every non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    /// Stable machine-readable tag, e.g. "invalid_transition".
    pub code: String,
}

// ---------------------------------------------------------------------------
// Sessions and captures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteRequest {
    pub total_bags: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureBody {
    #[serde(alias = "tagId")]
    pub tag_id: String,
    #[serde(default, alias = "sessionId")]
    pub session_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemovedResponse {
    pub id: Uuid,
    pub removed: bool,
}

// ---------------------------------------------------------------------------
// /v1/tare
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TareQuery {
    /// Operating day; defaults to today in the site timezone.
    pub day: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TareBody {
    pub tare_weight: Grams,
    #[serde(default)]
    pub day: Option<NaiveDate>,
}

// ---------------------------------------------------------------------------
// /v1/channels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectResponse {
    pub channel: String,
    pub state: String,
    pub generation: u64,
}
