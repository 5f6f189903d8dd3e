//! JSON REST API for Vouch.
//!
//! Exposes an axum [`Router`] over a shared [`Engine`]. Every route requires
//! HTTP Basic auth; the authenticated institution is the owner scope for all
//! reads and writes. Liveness, tracing and TLS are the binary's concern.
//!
//! # Mounting
//!
//! ```rust,ignore
//! let app = Router::new().merge(vouch_api::api_router(state));
//! ```

pub mod auth;
pub mod checks;
pub mod consents;
pub mod error;
pub mod sessions;

use std::sync::Arc;

use axum::{
  Router,
  extract::{FromRequest, FromRequestParts, Json, Query},
  routing::{get, post},
};
use serde::Deserialize;
use vouch_core::store::{GrantStore, SessionStore};
use vouch_engine::{Engine, stats::Timeframe};

pub use auth::{Caller, Institution};
pub use error::ApiError;

// ─── Application state ───────────────────────────────────────────────────────

/// Shared state threaded through all handlers.
pub struct AppState<S> {
  pub engine:       Arc<Engine<S>>,
  pub institutions: Arc<Vec<Institution>>,
}

impl<S> Clone for AppState<S> {
  fn clone(&self) -> Self {
    Self { engine: self.engine.clone(), institutions: self.institutions.clone() }
  }
}

impl<S> AppState<S> {
  pub fn new(engine: Engine<S>, institutions: Vec<Institution>) -> Self {
    Self { engine: Arc::new(engine), institutions: Arc::new(institutions) }
  }
}

// ─── Extractors ──────────────────────────────────────────────────────────────

/// [`Json`] whose rejection renders as an [`ApiError`] body.
#[derive(FromRequest)]
#[from_request(via(Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

/// [`Query`] whose rejection renders as an [`ApiError`] body.
#[derive(FromRequestParts)]
#[from_request(via(Query), rejection(ApiError))]
pub struct ApiQuery<T>(pub T);

/// `?timeframe=<n>m|h|d`, shared by the stats endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct StatsParams {
  pub timeframe: Option<String>,
}

impl StatsParams {
  pub fn timeframe(&self) -> Timeframe {
    self.timeframe.as_deref().map(Timeframe::parse).unwrap_or_default()
  }
}

/// `ttlSeconds` from a request body. Values chrono cannot represent are a
/// validation failure, not a panic.
pub(crate) fn ttl_from_seconds(secs: i64) -> Result<chrono::Duration, ApiError> {
  chrono::Duration::try_seconds(secs)
    .ok_or_else(|| vouch_core::Error::ValidationFailed("ttlSeconds is out of range".into()).into())
}

// ─── Router ──────────────────────────────────────────────────────────────────

/// Build the API router for `state`.
///
/// Static segments (`/consents/validate`, `/consents/stats`, …) take
/// precedence over the `{id}` captures next to them.
pub fn api_router<S>(state: AppState<S>) -> Router<()>
where
  S: GrantStore + SessionStore + 'static,
{
  Router::new()
    // Consents
    .route("/consents",               get(consents::list::<S>).post(consents::create::<S>))
    .route("/consents/validate",      get(consents::validate::<S>))
    .route("/consents/stats",         get(consents::stats::<S>))
    .route("/consents/{id}",          get(consents::get_one::<S>))
    .route("/consents/{id}/approve",  post(consents::approve::<S>))
    .route("/consents/{id}/revoke",   post(consents::revoke::<S>))
    // Checks
    .route("/checks",                 post(checks::run::<S>))
    .route("/checks/stats",           get(checks::stats::<S>))
    .route("/checks/{run_id}",        get(checks::get_one::<S>))
    // Sessions
    .route("/sessions",               post(sessions::create::<S>))
    .route("/sessions/stats",         get(sessions::stats::<S>))
    .route("/sessions/{id}",          get(sessions::status::<S>))
    .route("/sessions/{id}/steps",    post(sessions::step::<S>))
    .route("/sessions/{id}/complete", post(sessions::complete::<S>))
    .route("/sessions/{id}/fail",     post(sessions::fail::<S>))
    .route("/sessions/{id}/cancel",   post(sessions::cancel::<S>))
    .with_state(state)
}

#[cfg(test)]
mod tests;
