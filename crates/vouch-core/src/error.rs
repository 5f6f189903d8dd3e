//! Error types for `vouch-core`.
//!
//! Every variant maps to a stable machine-readable code (see [`Error::code`])
//! so integrating systems can branch on failures without parsing messages.

use thiserror::Error;
use uuid::Uuid;

use crate::{consent::GrantStatus, session::SessionStatus};

#[derive(Debug, Error)]
pub enum Error {
  #[error("consent grant not found: {0}")]
  GrantNotFound(Uuid),

  #[error("session not found: {0}")]
  SessionNotFound(Uuid),

  #[error("cannot {action} {entity} in status {from}")]
  InvalidTransition {
    entity: &'static str,
    action: &'static str,
    from:   String,
  },

  #[error("operation not allowed while session is {0}")]
  InvalidSessionState(SessionStatus),

  #[error("{entity} {id} has expired")]
  Expired { entity: &'static str, id: Uuid },

  #[error("consent is {0}, not approved")]
  InvalidStatus(GrantStatus),

  #[error("purpose mismatch: required {required:?}, granted {granted:?}")]
  PurposeMismatch { required: String, granted: String },

  #[error("missing categories: {}", missing.join(", "))]
  InsufficientScope { missing: Vec<String> },

  #[error("validation failed: {0}")]
  ValidationFailed(String),

  #[error("access denied to {entity} {id}")]
  AccessDenied { entity: &'static str, id: Uuid },

  #[error("{entity} {id} was modified concurrently")]
  ConcurrentModification { entity: &'static str, id: Uuid },

  #[error("downstream unavailable: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Error {
  /// Wrap a backend error as [`Error::Store`].
  pub fn store<E>(e: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Store(Box::new(e))
  }

  /// Stable code reported to API clients.
  pub fn code(&self) -> &'static str {
    match self {
      Self::GrantNotFound(_) | Self::SessionNotFound(_) => "NOT_FOUND",
      Self::InvalidTransition { .. } => "INVALID_TRANSITION",
      Self::InvalidSessionState(_) => "INVALID_SESSION_STATE",
      Self::Expired { .. } => "EXPIRED",
      Self::InvalidStatus(_) => "INVALID_STATUS",
      Self::PurposeMismatch { .. } => "PURPOSE_MISMATCH",
      Self::InsufficientScope { .. } => "INSUFFICIENT_SCOPE",
      Self::ValidationFailed(_) => "VALIDATION_FAILED",
      Self::AccessDenied { .. } => "ACCESS_DENIED",
      Self::ConcurrentModification { .. } => "CONCURRENT_MODIFICATION",
      Self::Store(_) => "DOWNSTREAM_UNAVAILABLE",
      Self::Serialization(_) => "INTERNAL",
    }
  }

  /// `true` for errors produced by consent validation rather than by
  /// infrastructure. These are reported as `valid: false`, not as failures.
  pub fn is_validation_outcome(&self) -> bool {
    matches!(
      self,
      Self::GrantNotFound(_)
        | Self::Expired { .. }
        | Self::InvalidStatus(_)
        | Self::PurposeMismatch { .. }
        | Self::InsufficientScope { .. }
    )
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn codes_are_stable() {
    let id = Uuid::nil();
    assert_eq!(Error::GrantNotFound(id).code(), "NOT_FOUND");
    assert_eq!(Error::SessionNotFound(id).code(), "NOT_FOUND");
    assert_eq!(
      Error::Expired { entity: "session", id }.code(),
      "EXPIRED"
    );
    assert_eq!(
      Error::InsufficientScope { missing: vec!["kyc".into()] }.code(),
      "INSUFFICIENT_SCOPE"
    );
    assert_eq!(
      Error::InvalidSessionState(SessionStatus::Completed).code(),
      "INVALID_SESSION_STATE"
    );
  }

  #[test]
  fn insufficient_scope_lists_missing() {
    let e = Error::InsufficientScope {
      missing: vec!["kyc".into(), "address".into()],
    };
    assert_eq!(e.to_string(), "missing categories: kyc, address");
    assert!(e.is_validation_outcome());
  }
}
