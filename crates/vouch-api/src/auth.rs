//! HTTP Basic authentication of institutions.
//!
//! Each configured [`Institution`] has a username and an argon2 PHC hash.
//! A request that authenticates becomes a [`Caller`] carrying the
//! institution id; every owner check in the engine is made against it.

use argon2::{Argon2, PasswordHash, PasswordVerifier};
use axum::{
  extract::FromRequestParts,
  http::{HeaderMap, request::Parts},
};
use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use serde::Deserialize;
use tracing::debug;
use vouch_core::store::{GrantStore, SessionStore};

use crate::{AppState, error::ApiError};

/// An institution allowed to call the API.
#[derive(Debug, Clone, Deserialize)]
pub struct Institution {
  pub id:            String,
  pub username:      String,
  /// PHC string produced by argon2, e.g. `$argon2id$v=19$…`
  pub password_hash: String,
}

/// The authenticated institution id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller(pub String);

impl Caller {
  pub fn as_str(&self) -> &str { &self.0 }
}

/// Resolve the `Authorization` header to an institution id.
pub fn verify_auth(headers: &HeaderMap, institutions: &[Institution]) -> Result<String, ApiError> {
  let header_val = headers
    .get(axum::http::header::AUTHORIZATION)
    .and_then(|v| v.to_str().ok())
    .ok_or(ApiError::Unauthorized)?;

  let encoded = header_val
    .strip_prefix("Basic ")
    .ok_or(ApiError::Unauthorized)?;

  let decoded = B64.decode(encoded).map_err(|_| ApiError::Unauthorized)?;
  let creds   = std::str::from_utf8(&decoded).map_err(|_| ApiError::Unauthorized)?;

  let (username, password) = creds.split_once(':').ok_or(ApiError::Unauthorized)?;

  let institution = institutions
    .iter()
    .find(|i| i.username == username)
    .ok_or(ApiError::Unauthorized)?;

  let parsed_hash = PasswordHash::new(&institution.password_hash)
    .map_err(|_| ApiError::Unauthorized)?;

  Argon2::default()
    .verify_password(password.as_bytes(), &parsed_hash)
    .map_err(|_| {
      debug!(username, "password rejected");
      ApiError::Unauthorized
    })?;

  Ok(institution.id.clone())
}

impl<S> FromRequestParts<AppState<S>> for Caller
where
  S: GrantStore + SessionStore + 'static,
{
  type Rejection = ApiError;

  async fn from_request_parts(
    parts: &mut Parts,
    state: &AppState<S>,
  ) -> Result<Self, Self::Rejection> {
    verify_auth(&parts.headers, &state.institutions).map(Caller)
  }
}
