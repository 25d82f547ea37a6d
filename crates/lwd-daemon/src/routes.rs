//! Axum router and all HTTP handlers for lwd-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. Scenario tests in `tests/` compose the bare router.

use std::{convert::Infallible, sync::Arc};

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::{info, warn};
use uuid::Uuid;

use lwd_bus::Envelope;
use lwd_config::{ConfigError, ControllerChannelPatch, ScaleChannelPatch, SyncPatch, TolerancePatch};
use lwd_runtime::RuntimeError;
use lwd_schemas::{NewSession, WeightSource};
use lwd_session::{CaptureRequest, SessionError};

use crate::{
    api_types::{
        CaptureBody, CompleteRequest, ErrorResponse, HealthResponse, ReconnectResponse,
        RemovedResponse, StatusResponse, TareBody, TareQuery,
    },
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
        .route("/v1/stream", get(stream))
        .route("/v1/weight/check", get(weight_check))
        .route("/v1/sessions", get(list_sessions).post(create_session))
        .route("/v1/sessions/:id", get(get_session).delete(remove_session))
        .route("/v1/sessions/:id/activate", post(activate_session))
        .route("/v1/sessions/:id/complete", post(complete_session))
        .route("/v1/sessions/:id/captures", get(session_captures))
        .route("/v1/captures", post(record_capture))
        .route("/v1/tare", get(get_tare).put(put_tare))
        .route("/v1/config", get(config_snapshot))
        .route(
            "/v1/config/:category",
            get(config_get).patch(config_patch),
        )
        .route("/v1/channels/:channel/reconnect", post(reconnect_channel))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

pub(crate) struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            warn!(code = self.code, error = %self.message, "request failed");
        }
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
                code: self.code.to_string(),
            }),
        )
            .into_response()
    }
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        let (status, code) = match &e {
            SessionError::InvalidTransition { .. } => (StatusCode::CONFLICT, "invalid_transition"),
            SessionError::InvalidCapture(_) => (StatusCode::UNPROCESSABLE_ENTITY, "invalid_capture"),
            SessionError::CaptureBlocked(_) => (StatusCode::UNPROCESSABLE_ENTITY, "capture_blocked"),
            SessionError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            SessionError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            SessionError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "store_error"),
        };
        ApiError::new(status, code, e.to_string())
    }
}

impl From<ConfigError> for ApiError {
    fn from(e: ConfigError) -> Self {
        ApiError::new(StatusCode::BAD_REQUEST, "invalid_config", e.to_string())
    }
}

impl From<RuntimeError> for ApiError {
    fn from(e: RuntimeError) -> Self {
        match e {
            RuntimeError::Config(e) => e.into(),
            RuntimeError::Session(e) => e.into(),
        }
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ---------------------------------------------------------------------------
// GET /v1/health  /v1/status  /v1/weight/check
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service.clone(),
            version: st.build.version.clone(),
        }),
    )
}

pub(crate) async fn status_handler(
    State(st): State<Arc<AppState>>,
) -> ApiResult<Json<StatusResponse>> {
    let runtime = st.runtime.status().await?;
    Ok(Json(StatusResponse {
        daemon_uptime_secs: uptime_secs(),
        config_hash: st.config_hash.clone(),
        runtime,
    }))
}

pub(crate) async fn weight_check(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    Json(st.runtime.check())
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

pub(crate) async fn list_sessions(State(st): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    Ok(Json(st.runtime.sessions().list_sessions().await?))
}

pub(crate) async fn create_session(
    State(st): State<Arc<AppState>>,
    Json(body): Json<NewSession>,
) -> ApiResult<impl IntoResponse> {
    let session = st.runtime.sessions().create_session(body).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

pub(crate) async fn get_session(
    State(st): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(st.runtime.sessions().get_session(id).await?))
}

pub(crate) async fn activate_session(
    State(st): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(st.runtime.sessions().activate(id).await?))
}

pub(crate) async fn complete_session(
    State(st): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<CompleteRequest>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(st.runtime.sessions().complete(id, body.total_bags).await?))
}

pub(crate) async fn remove_session(
    State(st): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    st.runtime.sessions().remove(id).await?;
    Ok(Json(RemovedResponse { id, removed: true }))
}

pub(crate) async fn session_captures(
    State(st): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let sessions = st.runtime.sessions();
    let captures = sessions.list_captures(id).await?;
    // Retained captures of a removed session stay listable.
    if captures.is_empty() {
        sessions.get_session(id).await?;
    }
    Ok(Json(captures))
}

// ---------------------------------------------------------------------------
// POST /v1/captures
// ---------------------------------------------------------------------------

pub(crate) async fn record_capture(
    State(st): State<Arc<AppState>>,
    Json(body): Json<CaptureBody>,
) -> ApiResult<impl IntoResponse> {
    let record = st
        .runtime
        .sessions()
        .record_capture(CaptureRequest {
            tag_id: body.tag_id,
            session_id: body.session_id,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

// ---------------------------------------------------------------------------
// /v1/tare
// ---------------------------------------------------------------------------

pub(crate) async fn get_tare(
    State(st): State<Arc<AppState>>,
    Query(q): Query<TareQuery>,
) -> ApiResult<impl IntoResponse> {
    let sessions = st.runtime.sessions();
    let day = q.day.unwrap_or_else(|| sessions.today());
    match sessions.tare_for(day).await? {
        Some(entry) => Ok(Json(entry)),
        None => Err(ApiError::new(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("no tare set for {day}"),
        )),
    }
}

pub(crate) async fn put_tare(
    State(st): State<Arc<AppState>>,
    Json(body): Json<TareBody>,
) -> ApiResult<impl IntoResponse> {
    let sessions = st.runtime.sessions();
    let day = body.day.unwrap_or_else(|| sessions.today());
    Ok(Json(sessions.set_tare(day, body.tare_weight).await?))
}

// ---------------------------------------------------------------------------
// /v1/config
// ---------------------------------------------------------------------------

pub(crate) async fn config_snapshot(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    Json(st.runtime.config().snapshot())
}

fn json_of<T: Serialize>(value: &T) -> ApiResult<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| {
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "encode_error", e.to_string())
    })
}

fn patch_from<P: DeserializeOwned>(body: serde_json::Value) -> ApiResult<P> {
    serde_json::from_value(body)
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, "invalid_config", e.to_string()))
}

fn unknown_category(category: &str) -> ApiError {
    ApiError::new(
        StatusCode::NOT_FOUND,
        "not_found",
        format!("unknown config category {category:?}"),
    )
}

pub(crate) async fn config_get(
    State(st): State<Arc<AppState>>,
    Path(category): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let cfg = st.runtime.config();
    let value = match category.as_str() {
        "controller" => json_of(&*cfg.controller())?,
        "scale" => json_of(&*cfg.scale())?,
        "sync" => json_of(&*cfg.sync())?,
        "tolerance" => json_of(&*cfg.tolerance())?,
        other => return Err(unknown_category(other)),
    };
    Ok(Json(value))
}

/// Field-wise merge. Transport categories return after the channel has
/// reconnected.
pub(crate) async fn config_patch(
    State(st): State<Arc<AppState>>,
    Path(category): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> ApiResult<Json<serde_json::Value>> {
    let cfg = st.runtime.config();
    let value = match category.as_str() {
        "controller" => {
            let patch: ControllerChannelPatch = patch_from(body)?;
            json_of(&*cfg.update_controller(&patch).await?)?
        }
        "scale" => {
            let patch: ScaleChannelPatch = patch_from(body)?;
            json_of(&*cfg.update_scale(&patch).await?)?
        }
        "sync" => {
            let patch: SyncPatch = patch_from(body)?;
            json_of(&*cfg.update_sync(&patch).await?)?
        }
        "tolerance" => {
            let patch: TolerancePatch = patch_from(body)?;
            json_of(&*cfg.update_tolerance(&patch).await?)?
        }
        other => return Err(unknown_category(other)),
    };
    info!(%category, "config/patch");
    Ok(Json(value))
}

// ---------------------------------------------------------------------------
// POST /v1/channels/:channel/reconnect
// ---------------------------------------------------------------------------

pub(crate) async fn reconnect_channel(
    State(st): State<Arc<AppState>>,
    Path(channel): Path<String>,
) -> ApiResult<Json<ReconnectResponse>> {
    let source = match channel.as_str() {
        "controller" => WeightSource::Controller,
        "scale" => WeightSource::Scale,
        other => {
            return Err(ApiError::new(
                StatusCode::NOT_FOUND,
                "not_found",
                format!("unknown channel {other:?}"),
            ))
        }
    };
    let cfg = st.runtime.config();
    let state = cfg.reconnect(source).await;
    info!(%channel, %state, "channel/reconnect");
    Ok(Json(ReconnectResponse {
        channel,
        state: state.to_string(),
        generation: cfg.channel_generation(source),
    }))
}

// ---------------------------------------------------------------------------
// GET /v1/stream  (SSE)
// ---------------------------------------------------------------------------

pub(crate) async fn stream(State(st): State<Arc<AppState>>) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    headers.insert("Connection", HeaderValue::from_static("keep-alive"));

    let rx = st.runtime.bus().subscribe();
    let events = broadcast_to_sse(rx);

    (headers, Sse::new(events).keep_alive(KeepAlive::new())).into_response()
}

fn broadcast_to_sse(
    rx: tokio::sync::broadcast::Receiver<Envelope>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx).filter_map(|msg| async move {
        match msg {
            Ok(env) => {
                let data = serde_json::to_string(&env).ok()?;
                Some(Ok(Event::default().event(env.event.kind()).data(data)))
            }
            Err(BroadcastStreamRecvError::Lagged(n)) => {
                warn!(skipped = n, "sse subscriber lagged; events dropped");
                None
            }
        }
    })
}
