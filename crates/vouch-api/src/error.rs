//! API error type and [`axum::response::IntoResponse`] implementation.
//!
//! Every error body has the shape `{"error": <code>, "message": <text>}`,
//! where `code` is the stable machine-readable code from
//! [`vouch_core::Error::code`].

use axum::{
  Json,
  extract::rejection::{JsonRejection, QueryRejection},
  http::{StatusCode, header},
  response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// An error returned by an API handler.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error(transparent)]
  Core(#[from] vouch_core::Error),

  #[error("authentication required")]
  Unauthorized,

  #[error("bad request: {0}")]
  BadRequest(String),
}

impl From<JsonRejection> for ApiError {
  fn from(rejection: JsonRejection) -> Self { Self::BadRequest(rejection.body_text()) }
}

impl From<QueryRejection> for ApiError {
  fn from(rejection: QueryRejection) -> Self { Self::BadRequest(rejection.body_text()) }
}

/// HTTP status for a core error.
pub fn status_for(e: &vouch_core::Error) -> StatusCode {
  use vouch_core::Error as E;
  match e {
    E::GrantNotFound(_) | E::SessionNotFound(_) => StatusCode::NOT_FOUND,
    E::InvalidTransition { .. }
    | E::InvalidSessionState(_)
    | E::ConcurrentModification { .. } => StatusCode::CONFLICT,
    E::Expired { .. } => StatusCode::GONE,
    E::InvalidStatus(_)
    | E::PurposeMismatch { .. }
    | E::InsufficientScope { .. }
    | E::AccessDenied { .. } => StatusCode::FORBIDDEN,
    E::ValidationFailed(_) => StatusCode::BAD_REQUEST,
    E::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
    E::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    match self {
      ApiError::Core(e) => {
        let status = status_for(&e);
        if status.is_server_error() {
          error!(code = e.code(), error = %e, "request failed");
        }
        let mut body = json!({ "error": e.code(), "message": e.to_string() });
        if let vouch_core::Error::InsufficientScope { missing } = &e {
          body["missingCategories"] = json!(missing);
        }
        (status, Json(body)).into_response()
      }
      ApiError::Unauthorized => (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, r#"Basic realm="vouch""#)],
        Json(json!({ "error": "UNAUTHORIZED", "message": "authentication required" })),
      )
        .into_response(),
      ApiError::BadRequest(m) => (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": "VALIDATION_FAILED", "message": m })),
      )
        .into_response(),
    }
  }
}
