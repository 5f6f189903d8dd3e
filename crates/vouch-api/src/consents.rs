//! Handlers for `/consents` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/consents` | Body: [`CreateBody`]; 201 + `{grantId, status, expiresAt, token}` |
//! | `GET`  | `/consents` | Caller's grants; optional `status`, `limit`, `offset` |
//! | `GET`  | `/consents/:id` | 404 if missing, 403 if not the caller's |
//! | `POST` | `/consents/:id/approve` | Body: [`ApprovalDecision`] |
//! | `POST` | `/consents/:id/revoke` | Body: `{"reason":"..."}` |
//! | `GET`  | `/consents/validate` | `token`, optional `purpose`, `categories=a,b` |
//! | `GET`  | `/consents/stats` | Optional `timeframe` |

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
  response::IntoResponse,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;
use vouch_core::{
  Error,
  consent::{ApprovalDecision, ConsentGrant, ConsentToken, GrantStatus, NewGrant},
  store::{GrantStore, SessionStore},
};
use vouch_engine::stats::ConsentStats;

use crate::{
  ApiJson, ApiQuery, AppState, Caller, StatsParams, error::ApiError, ttl_from_seconds,
};

// ─── Create ──────────────────────────────────────────────────────────────────

fn default_ttl_seconds() -> i64 { Duration::days(90).num_seconds() }

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBody {
  pub subject_id:  String,
  pub categories:  Vec<String>,
  pub purpose:     String,
  /// Defaults to 90 days.
  #[serde(default = "default_ttl_seconds")]
  pub ttl_seconds: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedGrant {
  pub grant_id:   Uuid,
  pub status:     GrantStatus,
  pub expires_at: DateTime<Utc>,
  pub token:      ConsentToken,
}

/// `POST /consents`
pub async fn create<S>(
  State(state): State<AppState<S>>,
  caller: Caller,
  ApiJson(body): ApiJson<CreateBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: GrantStore + SessionStore,
{
  let grant = state
    .engine
    .consents
    .create_grant(NewGrant {
      requester:  caller.0,
      subject_id: body.subject_id,
      categories: body.categories,
      purpose:    body.purpose,
      ttl:        ttl_from_seconds(body.ttl_seconds)?,
    })
    .await?;

  Ok((StatusCode::CREATED, Json(CreatedGrant {
    grant_id:   grant.grant_id,
    status:     grant.status,
    expires_at: grant.expires_at,
    token:      grant.token(),
  })))
}

// ─── Read ────────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
  pub status: Option<GrantStatus>,
  pub limit:  Option<usize>,
  pub offset: Option<usize>,
}

/// `GET /consents[?status=…][&limit=…][&offset=…]`
pub async fn list<S>(
  State(state): State<AppState<S>>,
  caller: Caller,
  ApiQuery(params): ApiQuery<ListParams>,
) -> Result<Json<Vec<ConsentGrant>>, ApiError>
where
  S: GrantStore + SessionStore,
{
  let grants = state
    .engine
    .consents
    .list(caller.as_str(), params.status, params.limit, params.offset)
    .await?;
  Ok(Json(grants))
}

/// `GET /consents/:id`
pub async fn get_one<S>(
  State(state): State<AppState<S>>,
  caller: Caller,
  Path(id): Path<Uuid>,
) -> Result<Json<ConsentGrant>, ApiError>
where
  S: GrantStore + SessionStore,
{
  Ok(Json(state.engine.consents.get(id, caller.as_str()).await?))
}

// ─── Decisions ───────────────────────────────────────────────────────────────

/// `POST /consents/:id/approve`. An empty object approves every requested
/// category; `{"approved": false}` rejects.
pub async fn approve<S>(
  State(state): State<AppState<S>>,
  caller: Caller,
  Path(id): Path<Uuid>,
  ApiJson(decision): ApiJson<ApprovalDecision>,
) -> Result<Json<ConsentGrant>, ApiError>
where
  S: GrantStore + SessionStore,
{
  let grant = state.engine.consents.approve(id, caller.as_str(), &decision).await?;
  Ok(Json(grant))
}

#[derive(Debug, Default, Deserialize)]
pub struct RevokeBody {
  pub reason: Option<String>,
}

/// `POST /consents/:id/revoke`
pub async fn revoke<S>(
  State(state): State<AppState<S>>,
  caller: Caller,
  Path(id): Path<Uuid>,
  ApiJson(body): ApiJson<RevokeBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: GrantStore + SessionStore,
{
  let grant = state.engine.consents.revoke(id, caller.as_str(), body.reason).await?;
  Ok(Json(json!({
    "grantId": grant.grant_id,
    "status": grant.status,
    "revokedAt": grant.revoked_at,
  })))
}

// ─── Validate ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ValidateParams {
  pub token:      String,
  pub purpose:    Option<String>,
  /// Comma-separated.
  #[serde(default)]
  pub categories: String,
}

/// `GET /consents/validate?token=…[&purpose=…][&categories=a,b]`
///
/// Validation failures are a normal answer here: `200 {"valid": false, …}`.
/// A grant requested by another institution reports `ACCESS_DENIED`.
pub async fn validate<S>(
  State(state): State<AppState<S>>,
  caller: Caller,
  ApiQuery(params): ApiQuery<ValidateParams>,
) -> Result<impl IntoResponse, ApiError>
where
  S: GrantStore + SessionStore,
{
  let required: Vec<String> = params
    .categories
    .split(',')
    .map(str::trim)
    .filter(|c| !c.is_empty())
    .map(str::to_owned)
    .collect();
  let token = ConsentToken::new(params.token);

  let outcome = state
    .engine
    .consents
    .validate(&token, params.purpose.as_deref(), &required)
    .await
    .and_then(|consent| {
      if consent.grant.requester == caller.0 {
        Ok(consent)
      } else {
        Err(Error::AccessDenied { entity: "consent", id: consent.grant.grant_id })
      }
    });

  match outcome {
    Ok(consent) => Ok(Json(json!({
      "valid": true,
      "grantId": consent.grant.grant_id,
      "subjectId": consent.grant.subject_id,
      "allowedCategories": consent.allowed_categories,
      "expiresAt": consent.grant.expires_at,
    }))),
    Err(e) if e.is_validation_outcome() || matches!(e, Error::AccessDenied { .. }) => {
      let mut body = json!({ "valid": false, "error": e.code(), "message": e.to_string() });
      if let Error::InsufficientScope { missing } = &e {
        body["missingCategories"] = json!(missing);
      }
      Ok(Json(body))
    }
    Err(e) => Err(e.into()),
  }
}

// ─── Stats ───────────────────────────────────────────────────────────────────

/// `GET /consents/stats[?timeframe=30d]`
pub async fn stats<S>(
  State(state): State<AppState<S>>,
  caller: Caller,
  ApiQuery(params): ApiQuery<StatsParams>,
) -> Result<Json<ConsentStats>, ApiError>
where
  S: GrantStore + SessionStore,
{
  Ok(Json(state.engine.consent_stats(caller.as_str(), params.timeframe()).await?))
}
