//! Handlers for `/checks` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/checks` | Body: [`RunBody`]; runs inside a checks session |
//! | `GET`  | `/checks/:run_id` | Stored run; 409 while it has no result |
//! | `GET`  | `/checks/stats` | Optional `timeframe` |

use axum::{
  Json,
  extract::{Path, State},
};
use serde::Deserialize;
use uuid::Uuid;
use vouch_core::{
  audit::NotificationTarget,
  check::{AggregatedRisk, CheckKind, RiskProfile, ScreeningSubject},
  store::{GrantStore, SessionStore},
};
use vouch_engine::stats::CheckStats;

use crate::{ApiJson, ApiQuery, AppState, Caller, StatsParams, error::ApiError};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunBody {
  pub subject:      ScreeningSubject,
  /// Empty means the default set.
  #[serde(default)]
  pub checks:       Vec<CheckKind>,
  #[serde(default)]
  pub risk_profile: RiskProfile,
  /// Run inside this existing checks session instead of a fresh one.
  pub session_id:   Option<Uuid>,
  pub notify:       Option<NotificationTarget>,
}

/// `POST /checks`
pub async fn run<S>(
  State(state): State<AppState<S>>,
  caller: Caller,
  ApiJson(body): ApiJson<RunBody>,
) -> Result<Json<AggregatedRisk>, ApiError>
where
  S: GrantStore + SessionStore,
{
  let kinds = if body.checks.is_empty() { CheckKind::default_set() } else { body.checks };
  let checks = &state.engine.checks;

  let run = match body.session_id {
    Some(session_id) => {
      checks
        .run_for_session(session_id, caller.as_str(), &body.subject, &kinds, body.risk_profile)
        .await?
    }
    None => {
      checks
        .run_standalone(caller.as_str(), &body.subject, &kinds, body.risk_profile, body.notify)
        .await?
    }
  };
  Ok(Json(run))
}

/// `GET /checks/:run_id`
pub async fn get_one<S>(
  State(state): State<AppState<S>>,
  caller: Caller,
  Path(run_id): Path<Uuid>,
) -> Result<Json<AggregatedRisk>, ApiError>
where
  S: GrantStore + SessionStore,
{
  Ok(Json(state.engine.checks.get_run(run_id, caller.as_str()).await?))
}

/// `GET /checks/stats[?timeframe=30d]`
pub async fn stats<S>(
  State(state): State<AppState<S>>,
  caller: Caller,
  ApiQuery(params): ApiQuery<StatsParams>,
) -> Result<Json<CheckStats>, ApiError>
where
  S: GrantStore + SessionStore,
{
  Ok(Json(state.engine.check_stats(caller.as_str(), params.timeframe()).await?))
}
