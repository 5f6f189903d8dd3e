//! Audit and notification sinks that need no external system, plus the
//! helpers the engine uses to dispatch to any sink without propagating
//! failure.

use std::sync::Mutex;

use async_trait::async_trait;
use tracing::{info, warn};
use vouch_core::audit::{
  AuditEvent, AuditSink, Notification, NotificationTarget, Notifier, SinkError,
};

/// Record an audit event; failures are logged and swallowed.
pub(crate) async fn emit(sink: &dyn AuditSink, event: AuditEvent) {
  let action = event.action;
  let entity_id = event.entity_id;
  if let Err(e) = sink.record(event).await {
    warn!(%action, %entity_id, error = %e, "audit sink rejected event");
  }
}

/// Deliver a notification; failures are logged and swallowed.
pub(crate) async fn deliver(
  notifier: &dyn Notifier,
  target: &NotificationTarget,
  notification: &Notification,
) {
  if let Err(e) = notifier.notify(target, notification).await {
    warn!(
      session_id = %notification.session_id,
      event = %notification.event,
      error = %e,
      "notification delivery failed",
    );
  }
}

// ─── Tracing-backed sinks ────────────────────────────────────────────────────

/// Writes audit events as structured records on the `vouch::audit` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
  async fn record(&self, event: AuditEvent) -> Result<(), SinkError> {
    info!(
      target: "vouch::audit",
      event_id = %event.event_id,
      action = %event.action,
      entity = %event.entity,
      entity_id = %event.entity_id,
      actor = %event.actor,
      subject_id = %event.subject_id,
      details = %event.details,
    );
    Ok(())
  }
}

/// Logs notifications instead of delivering them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
  async fn notify(
    &self,
    target: &NotificationTarget,
    notification: &Notification,
  ) -> Result<(), SinkError> {
    info!(
      target: "vouch::notify",
      ?target,
      session_id = %notification.session_id,
      event = %notification.event,
      "notification",
    );
    Ok(())
  }
}

// ─── Recording sinks ─────────────────────────────────────────────────────────

/// Keeps every audit event in memory. Can be told to fail every call.
#[derive(Debug, Default)]
pub struct RecordingAuditSink {
  events:  Mutex<Vec<AuditEvent>>,
  failing: bool,
}

impl RecordingAuditSink {
  pub fn failing() -> Self { Self { events: Mutex::default(), failing: true } }

  pub fn events(&self) -> Vec<AuditEvent> {
    self.events.lock().map(|e| e.clone()).unwrap_or_default()
  }
}

#[async_trait]
impl AuditSink for RecordingAuditSink {
  async fn record(&self, event: AuditEvent) -> Result<(), SinkError> {
    if self.failing {
      return Err(SinkError::Storage("audit store offline".into()));
    }
    if let Ok(mut events) = self.events.lock() {
      events.push(event);
    }
    Ok(())
  }
}

/// Keeps every delivered notification in memory. Can be told to fail.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
  sent:    Mutex<Vec<(NotificationTarget, Notification)>>,
  failing: bool,
}

impl RecordingNotifier {
  pub fn failing() -> Self { Self { sent: Mutex::default(), failing: true } }

  pub fn sent(&self) -> Vec<(NotificationTarget, Notification)> {
    self.sent.lock().map(|s| s.clone()).unwrap_or_default()
  }
}

#[async_trait]
impl Notifier for RecordingNotifier {
  async fn notify(
    &self,
    target: &NotificationTarget,
    notification: &Notification,
  ) -> Result<(), SinkError> {
    if self.failing {
      return Err(SinkError::Rejected(502));
    }
    if let Ok(mut sent) = self.sent.lock() {
      sent.push((target.clone(), notification.clone()));
    }
    Ok(())
  }
}
