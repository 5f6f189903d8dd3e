//! The session lifecycle manager.
//!
//! Every mutation of a session runs under that session's own async mutex,
//! taken from a keyed map; unrelated sessions never contend. Inside the lock
//! the session is re-read, lazily expired, transitioned and written back with
//! compare-and-swap. Audit and notification happen after the lock is
//! released and cannot undo a persisted transition.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;
use vouch_core::{
  Error, Result,
  audit::{AuditAction, AuditEvent, AuditSink, Notification, Notifier},
  clock::Clock,
  session::{
    Completion, NewSession, SessionKind, SessionStatus, SessionView, StepStatus,
    VerificationSession,
  },
  store::{SessionQuery, SessionStore},
};

use crate::{
  completion,
  config::EngineConfig,
  sinks::{deliver, emit},
};

/// What `create` hands back to the caller.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedSession {
  pub session_id:     Uuid,
  pub status:         SessionStatus,
  pub expires_at:     DateTime<Utc>,
  pub expected_steps: Vec<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub session_url:    Option<String>,
}

pub struct SessionManager<S> {
  store:    Arc<S>,
  clock:    Arc<dyn Clock>,
  audit:    Arc<dyn AuditSink>,
  notifier: Arc<dyn Notifier>,
  config:   Arc<EngineConfig>,
  locks:    DashMap<Uuid, Arc<Mutex<()>>>,
}

impl<S: SessionStore> SessionManager<S> {
  pub fn new(
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    audit: Arc<dyn AuditSink>,
    notifier: Arc<dyn Notifier>,
    config: Arc<EngineConfig>,
  ) -> Self {
    Self { store, clock, audit, notifier, config, locks: DashMap::new() }
  }

  pub async fn create(&self, input: NewSession) -> Result<CreatedSession> {
    if input.ttl > self.config.max_session_ttl() {
      return Err(Error::ValidationFailed(format!(
        "ttl exceeds the maximum of {} seconds",
        self.config.max_session_ttl_secs
      )));
    }
    let now = self.clock.now();
    let session = VerificationSession::new(input, now)?;
    self.store.put_session(session.clone()).await.map_err(Error::store)?;

    info!(
      session_id = %session.session_id,
      kind = session.kind.label(),
      owner = %session.owner,
      "session created",
    );
    self
      .record(AuditAction::SessionCreated, &session, now, serde_json::json!({
        "kind": session.kind,
        "expiresAt": session.expires_at,
      }))
      .await;

    Ok(CreatedSession {
      session_id:     session.session_id,
      status:         session.status,
      expires_at:     session.expires_at,
      expected_steps: session.kind.expected_steps().iter().map(|s| s.to_string()).collect(),
      session_url:    self.session_url(&session),
    })
  }

  pub async fn record_step(
    &self,
    session_id: Uuid,
    caller: &str,
    step: String,
    status: StepStatus,
    payload: serde_json::Value,
  ) -> Result<VerificationSession> {
    self
      .transition(session_id, caller, |s, now| s.record_step(step, status, payload, now))
      .await
  }

  pub async fn complete(
    &self,
    session_id: Uuid,
    caller: &str,
    completion: Completion,
  ) -> Result<VerificationSession> {
    let session = self
      .transition(session_id, caller, |s, now| {
        s.check_transition("complete", now)?;
        let result = completion::process(s, completion, now)?;
        s.complete(result, now)
      })
      .await?;

    info!(%session_id, kind = session.kind.label(), "session completed");
    self.announce(AuditAction::SessionCompleted, &session).await;
    Ok(session)
  }

  pub async fn fail(
    &self,
    session_id: Uuid,
    caller: &str,
    reason: String,
  ) -> Result<VerificationSession> {
    let session = self
      .transition(session_id, caller, |s, now| s.fail(reason, now))
      .await?;

    info!(%session_id, reason = ?session.failure_reason, "session failed");
    self.announce(AuditAction::SessionFailed, &session).await;
    Ok(session)
  }

  /// Cancel a live session. Audited, but no notification is sent.
  pub async fn cancel(
    &self,
    session_id: Uuid,
    caller: &str,
    reason: Option<String>,
  ) -> Result<VerificationSession> {
    let session = self
      .transition(session_id, caller, |s, now| s.cancel(reason, now))
      .await?;

    info!(%session_id, "session cancelled");
    let now = self.clock.now();
    self
      .record(AuditAction::SessionCancelled, &session, now, serde_json::json!({
        "reason": session.failure_reason,
      }))
      .await;
    Ok(session)
  }

  /// Owner view, with lazy expiry applied and persisted.
  pub async fn get_status(&self, session_id: Uuid, caller: &str) -> Result<SessionView> {
    let session = self.fetch(session_id, Some(caller)).await?;
    Ok(SessionView::new(&session, true))
  }

  /// The session with lazy expiry applied. `caller = None` skips the owner
  /// check; only consent-gated reads use that.
  pub(crate) async fn fetch(
    &self,
    session_id: Uuid,
    caller: Option<&str>,
  ) -> Result<VerificationSession> {
    let session = self.load(session_id, caller).await?;
    if session.status.is_terminal() || !session.is_past_deadline(self.clock.now()) {
      return Ok(session);
    }
    // Past its deadline: take the lock and let `transition` persist expiry.
    match self.transition_as(session_id, caller, |_, _| Ok(())).await {
      Ok(s) => Ok(s),
      Err(Error::Expired { .. }) => self.load(session_id, caller).await,
      Err(e) => Err(e),
    }
  }

  pub(crate) async fn list_since(
    &self,
    caller: &str,
    since: DateTime<Utc>,
  ) -> Result<Vec<VerificationSession>> {
    let query = SessionQuery {
      owner: Some(caller.to_owned()),
      created_after: Some(since),
      ..SessionQuery::default()
    };
    let now = self.clock.now();
    let mut sessions = self.store.list_sessions(&query).await.map_err(Error::store)?;
    for s in &mut sessions {
      s.expire_if_due(now);
    }
    Ok(sessions)
  }

  pub(crate) fn now(&self) -> DateTime<Utc> { self.clock.now() }

  pub(crate) fn ttl_for_checks(&self) -> chrono::Duration { self.config.checks_session_ttl() }

  // ─── Internals ─────────────────────────────────────────────────────────

  fn session_url(&self, session: &VerificationSession) -> Option<String> {
    let (base, segment) = match session.kind {
      SessionKind::Identification { method } => {
        (&self.config.identification_base_url, method.url_segment())
      }
      SessionKind::Signature { method } => (&self.config.signature_base_url, method.as_str()),
      SessionKind::Checks => return None,
    };
    Some(format!("{}/{segment}/{}", base.trim_end_matches('/'), session.session_id))
  }

  async fn load(&self, session_id: Uuid, caller: Option<&str>) -> Result<VerificationSession> {
    let session = self
      .store
      .get_session(session_id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::SessionNotFound(session_id))?;
    if let Some(caller) = caller
      && session.owner != caller
    {
      return Err(Error::AccessDenied { entity: "session", id: session_id });
    }
    Ok(session)
  }

  async fn transition<F>(
    &self,
    session_id: Uuid,
    caller: &str,
    f: F,
  ) -> Result<VerificationSession>
  where
    F: FnOnce(&mut VerificationSession, DateTime<Utc>) -> Result<()>,
  {
    self.transition_as(session_id, Some(caller), f).await
  }

  /// Locked read-modify-write. Lazy expiry is persisted even when `f`
  /// rejects the mutation; a rejected mutation is otherwise not written.
  async fn transition_as<F>(
    &self,
    session_id: Uuid,
    caller: Option<&str>,
    f: F,
  ) -> Result<VerificationSession>
  where
    F: FnOnce(&mut VerificationSession, DateTime<Utc>) -> Result<()>,
  {
    let lock = self.locks.entry(session_id).or_default().clone();
    let guard = lock.lock().await;

    let mut session = match self.load(session_id, caller).await {
      Ok(s) => s,
      Err(e) => {
        drop(guard);
        if matches!(e, Error::SessionNotFound(_)) {
          self.locks.remove(&session_id);
        }
        return Err(e);
      }
    };
    let now = self.clock.now();
    let expected = session.version;
    let expired_now = session.expire_if_due(now);

    let outcome = if expired_now {
      // An expired session accepts nothing; `f` still decides the error.
      f(&mut session, now).and(Err(Error::Expired { entity: "session", id: session_id }))
    } else {
      f(&mut session, now)
    };

    if outcome.is_ok() || expired_now {
      session.version = expected + 1;
      let swapped = self
        .store
        .compare_and_swap_session(expected, session.clone())
        .await
        .map_err(Error::store)?;
      if !swapped {
        return Err(Error::ConcurrentModification { entity: "session", id: session_id });
      }
    }
    drop(guard);

    if session.status.is_terminal() {
      self.locks.remove(&session_id);
    }
    if expired_now {
      info!(%session_id, "session expired");
      self
        .record(AuditAction::SessionExpired, &session, now, serde_json::Value::Null)
        .await;
    }

    outcome.map(|()| session)
  }

  /// Audit plus best-effort notification for a completed or failed session.
  async fn announce(&self, action: AuditAction, session: &VerificationSession) {
    let now = self.clock.now();
    let details = serde_json::json!({
      "kind": session.kind,
      "failureReason": session.failure_reason,
    });
    self.record(action, session, now, details).await;

    if let Some(target) = &session.notify {
      let notification = Notification::for_session(session, now);
      deliver(self.notifier.as_ref(), target, &notification).await;
    }
  }

  async fn record(
    &self,
    action: AuditAction,
    session: &VerificationSession,
    now: DateTime<Utc>,
    details: serde_json::Value,
  ) {
    let event = AuditEvent::new(
      action,
      "session",
      session.session_id,
      &session.owner,
      &session.subject_id,
      now,
    )
    .with_details(details);
    emit(self.audit.as_ref(), event).await;
  }
}
