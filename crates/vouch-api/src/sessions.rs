//! Handlers for `/sessions` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/sessions` | Body: [`CreateBody`]; 201 + `{sessionId, status, expiresAt, expectedSteps, sessionUrl?}` |
//! | `GET`  | `/sessions/:id` | Owner, or a third party with `consentToken` and optional `purpose` |
//! | `POST` | `/sessions/:id/steps` | Body: `{"step":"...","status":"...","payload":{}}` |
//! | `POST` | `/sessions/:id/complete` | Body: [`Completion`] for the session's kind |
//! | `POST` | `/sessions/:id/fail` | Body: `{"reason":"..."}` |
//! | `POST` | `/sessions/:id/cancel` | Body: `{"reason":"..."}`, reason optional |
//! | `GET`  | `/sessions/stats` | Optional `timeframe` |

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
  response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;
use vouch_core::{
  audit::NotificationTarget,
  consent::ConsentToken,
  session::{Completion, NewSession, SessionKind, SessionView, SignatureDocument, StepStatus},
  store::{GrantStore, SessionStore},
};
use vouch_engine::stats::SessionStats;

use crate::{
  ApiJson, ApiQuery, AppState, Caller, StatsParams, error::ApiError, ttl_from_seconds,
};

// ─── Create ──────────────────────────────────────────────────────────────────

fn default_ttl_seconds() -> i64 { 3600 }

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBody {
  pub subject_id:  String,
  pub kind:        SessionKind,
  #[serde(default = "default_ttl_seconds")]
  pub ttl_seconds: i64,
  #[serde(default)]
  pub metadata:    serde_json::Value,
  pub notify:      Option<NotificationTarget>,
  /// Signature sessions only.
  #[serde(default)]
  pub documents:   Vec<SignatureDocument>,
}

/// `POST /sessions` → 201 + `{sessionId, status, expiresAt, expectedSteps, sessionUrl?}`
pub async fn create<S>(
  State(state): State<AppState<S>>,
  caller: Caller,
  ApiJson(body): ApiJson<CreateBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: GrantStore + SessionStore,
{
  let mut input = NewSession::new(
    caller.0,
    body.subject_id,
    body.kind,
    ttl_from_seconds(body.ttl_seconds)?,
  );
  input.metadata = body.metadata;
  input.notify = body.notify;
  input.documents = body.documents;

  let created = state.engine.sessions.create(input).await?;
  Ok((StatusCode::CREATED, Json(created)))
}

// ─── Status ──────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusParams {
  pub consent_token: Option<String>,
  pub purpose:       Option<String>,
}

/// `GET /sessions/:id[?consentToken=…][&purpose=…]`
///
/// The owner needs no token; anyone else must present a consent token for
/// the session's subject and data category.
pub async fn status<S>(
  State(state): State<AppState<S>>,
  caller: Caller,
  Path(id): Path<Uuid>,
  ApiQuery(params): ApiQuery<StatusParams>,
) -> Result<Json<SessionView>, ApiError>
where
  S: GrantStore + SessionStore,
{
  let token = params.consent_token.map(ConsentToken::new);
  let view = state
    .engine
    .gated_view(id, caller.as_str(), token.as_ref(), params.purpose.as_deref())
    .await?;
  Ok(Json(view))
}

// ─── Transitions ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct StepBody {
  pub step:    String,
  pub status:  StepStatus,
  #[serde(default)]
  pub payload: serde_json::Value,
}

/// `POST /sessions/:id/steps` → `{accepted: true, progress}`
pub async fn step<S>(
  State(state): State<AppState<S>>,
  caller: Caller,
  Path(id): Path<Uuid>,
  ApiJson(body): ApiJson<StepBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: GrantStore + SessionStore,
{
  let session = state
    .engine
    .sessions
    .record_step(id, caller.as_str(), body.step, body.status, body.payload)
    .await?;
  Ok(Json(json!({
    "accepted": true,
    "status": session.status,
    "progress": session.progress(),
  })))
}

/// `POST /sessions/:id/complete`; body is a [`Completion`] matching the kind.
pub async fn complete<S>(
  State(state): State<AppState<S>>,
  caller: Caller,
  Path(id): Path<Uuid>,
  ApiJson(completion): ApiJson<Completion>,
) -> Result<Json<SessionView>, ApiError>
where
  S: GrantStore + SessionStore,
{
  let session = state.engine.sessions.complete(id, caller.as_str(), completion).await?;
  Ok(Json(SessionView::new(&session, true)))
}

#[derive(Debug, Deserialize)]
pub struct FailBody {
  pub reason: String,
}

/// `POST /sessions/:id/fail`
pub async fn fail<S>(
  State(state): State<AppState<S>>,
  caller: Caller,
  Path(id): Path<Uuid>,
  ApiJson(body): ApiJson<FailBody>,
) -> Result<Json<SessionView>, ApiError>
where
  S: GrantStore + SessionStore,
{
  let session = state.engine.sessions.fail(id, caller.as_str(), body.reason).await?;
  Ok(Json(SessionView::new(&session, true)))
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelBody {
  pub reason: Option<String>,
}

/// `POST /sessions/:id/cancel`
pub async fn cancel<S>(
  State(state): State<AppState<S>>,
  caller: Caller,
  Path(id): Path<Uuid>,
  ApiJson(body): ApiJson<CancelBody>,
) -> Result<Json<SessionView>, ApiError>
where
  S: GrantStore + SessionStore,
{
  let session = state.engine.sessions.cancel(id, caller.as_str(), body.reason).await?;
  Ok(Json(SessionView::new(&session, true)))
}

// ─── Stats ───────────────────────────────────────────────────────────────────

/// `GET /sessions/stats[?timeframe=30d]`
pub async fn stats<S>(
  State(state): State<AppState<S>>,
  caller: Caller,
  ApiQuery(params): ApiQuery<StatsParams>,
) -> Result<Json<SessionStats>, ApiError>
where
  S: GrantStore + SessionStore,
{
  Ok(Json(state.engine.session_stats(caller.as_str(), params.timeframe()).await?))
}
