//! Audit events, notifications and the sinks that receive them.
//!
//! Both sinks are fire-and-forget from the engine's point of view: an error
//! returned here is logged by the caller and never undoes a state change.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::session::{SessionResult, SessionStatus, VerificationSession};

// ─── Audit ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
  ConsentCreated,
  ConsentApproved,
  ConsentRejected,
  ConsentRevoked,
  ConsentExpired,
  SessionCreated,
  SessionCompleted,
  SessionFailed,
  SessionCancelled,
  SessionExpired,
}

impl AuditAction {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::ConsentCreated => "consent_created",
      Self::ConsentApproved => "consent_approved",
      Self::ConsentRejected => "consent_rejected",
      Self::ConsentRevoked => "consent_revoked",
      Self::ConsentExpired => "consent_expired",
      Self::SessionCreated => "session_created",
      Self::SessionCompleted => "session_completed",
      Self::SessionFailed => "session_failed",
      Self::SessionCancelled => "session_cancelled",
      Self::SessionExpired => "session_expired",
    }
  }
}

impl fmt::Display for AuditAction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// One structured audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
  pub event_id:    Uuid,
  pub action:      AuditAction,
  /// `"consent"` or `"session"`.
  pub entity:      String,
  pub entity_id:   Uuid,
  /// Institution on whose behalf the change happened.
  pub actor:       String,
  pub subject_id:  String,
  pub occurred_at: DateTime<Utc>,
  #[serde(default)]
  pub details:     serde_json::Value,
}

impl AuditEvent {
  pub fn new(
    action: AuditAction,
    entity: &str,
    entity_id: Uuid,
    actor: &str,
    subject_id: &str,
    occurred_at: DateTime<Utc>,
  ) -> Self {
    Self {
      event_id: Uuid::new_v4(),
      action,
      entity: entity.to_owned(),
      entity_id,
      actor: actor.to_owned(),
      subject_id: subject_id.to_owned(),
      occurred_at,
      details: serde_json::Value::Null,
    }
  }

  pub fn with_details(mut self, details: serde_json::Value) -> Self {
    self.details = details;
    self
  }
}

// ─── Notifications ───────────────────────────────────────────────────────────

/// Where a session's terminal outcome is announced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationTarget {
  Webhook { url: String },
  Email { address: String },
}

/// Payload sent to a session's [`NotificationTarget`] when it completes or
/// fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
  pub event:          String,
  pub session_id:     Uuid,
  pub subject_id:     String,
  pub kind:           String,
  pub status:         SessionStatus,
  pub occurred_at:    DateTime<Utc>,
  pub result:         Option<SessionResult>,
  pub failure_reason: Option<String>,
}

impl Notification {
  pub fn for_session(session: &VerificationSession, occurred_at: DateTime<Utc>) -> Self {
    Self {
      event: format!("session_{}", session.status),
      session_id: session.session_id,
      subject_id: session.subject_id.clone(),
      kind: session.kind.label().to_owned(),
      status: session.status,
      occurred_at,
      result: session.result.clone(),
      failure_reason: session.failure_reason.clone(),
    }
  }
}

// ─── Sinks ───────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
  #[error("transport error: {0}")]
  Transport(String),

  #[error("receiver answered with status {0}")]
  Rejected(u16),

  #[error("delivery timed out")]
  Timeout,

  #[error("storage error: {0}")]
  Storage(String),
}

#[async_trait]
pub trait AuditSink: Send + Sync {
  async fn record(&self, event: AuditEvent) -> Result<(), SinkError>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
  async fn notify(
    &self,
    target: &NotificationTarget,
    notification: &Notification,
  ) -> Result<(), SinkError>;
}
