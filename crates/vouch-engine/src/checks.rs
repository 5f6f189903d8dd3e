//! Running checks inside a checks session.
//!
//! A run is always bound to a session so its result has an owner, an expiry
//! and an audit trail; the run id is the session id.

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;
use vouch_core::{
  Error, Result,
  audit::NotificationTarget,
  check::{AggregatedRisk, CheckKind, RiskProfile, ScreeningSubject},
  session::{Completion, NewSession, SessionKind, SessionResult, StepStatus},
  store::SessionStore,
};

use crate::{aggregator::RiskAggregator, session::SessionManager};

pub struct CheckRunner<S> {
  sessions:   Arc<SessionManager<S>>,
  aggregator: RiskAggregator,
}

impl<S: SessionStore> CheckRunner<S> {
  pub fn new(sessions: Arc<SessionManager<S>>, aggregator: RiskAggregator) -> Self {
    Self { sessions, aggregator }
  }

  /// Run checks for an existing checks session and complete it with the
  /// aggregated result.
  pub async fn run_for_session(
    &self,
    session_id: Uuid,
    caller: &str,
    subject: &ScreeningSubject,
    kinds: &[CheckKind],
    profile: RiskProfile,
  ) -> Result<AggregatedRisk> {
    let session = self.sessions.fetch(session_id, Some(caller)).await?;
    if session.kind != SessionKind::Checks {
      return Err(Error::ValidationFailed(format!(
        "checks cannot run on a {} session",
        session.kind.label()
      )));
    }
    if session.subject_id != subject.subject_id {
      return Err(Error::ValidationFailed("subject does not match the session".into()));
    }
    session.check_transition("run checks on", self.sessions.now())?;

    let kinds = if kinds.is_empty() { CheckKind::default_set() } else { kinds.to_vec() };
    let requested: Vec<String> = kinds.iter().map(ToString::to_string).collect();
    self
      .sessions
      .record_step(
        session_id,
        caller,
        "screening".into(),
        StepStatus::Processing,
        serde_json::json!({ "checks": requested, "profile": profile }),
      )
      .await?;

    let run = self.aggregator.run_checks(session_id, subject, &kinds, profile).await;
    let failed = run.per_check.iter().filter(|o| o.is_failed()).count();
    info!(
      %session_id,
      overall = %run.overall_risk,
      checks = run.per_check.len(),
      failed,
      duration_ms = run.duration_ms,
      "checks finished",
    );

    self
      .sessions
      .record_step(
        session_id,
        caller,
        "screening".into(),
        StepStatus::Completed,
        serde_json::json!({ "checks": run.per_check.len(), "failed": failed }),
      )
      .await?;
    self
      .sessions
      .record_step(
        session_id,
        caller,
        "risk_assessment".into(),
        StepStatus::Completed,
        serde_json::json!({ "overallRisk": run.overall_risk }),
      )
      .await?;
    self
      .sessions
      .complete(session_id, caller, Completion::Checks(run.clone()))
      .await?;
    Ok(run)
  }

  /// Create a checks session for `subject`, run, and complete it.
  pub async fn run_standalone(
    &self,
    caller: &str,
    subject: &ScreeningSubject,
    kinds: &[CheckKind],
    profile: RiskProfile,
    notify: Option<NotificationTarget>,
  ) -> Result<AggregatedRisk> {
    let mut input = NewSession::new(
      caller,
      subject.subject_id.clone(),
      SessionKind::Checks,
      self.sessions.ttl_for_checks(),
    );
    input.notify = notify;
    input.metadata = serde_json::json!({ "standalone": true });
    let created = self.sessions.create(input).await?;
    self
      .run_for_session(created.session_id, caller, subject, kinds, profile)
      .await
  }

  /// The stored result of a completed run.
  pub async fn get_run(&self, run_id: Uuid, caller: &str) -> Result<AggregatedRisk> {
    let session = self.sessions.fetch(run_id, Some(caller)).await?;
    match session.result {
      Some(SessionResult::Checks(run)) => Ok(run),
      _ if session.kind != SessionKind::Checks => Err(Error::SessionNotFound(run_id)),
      _ => Err(Error::InvalidSessionState(session.status)),
    }
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use vouch_core::{
    audit::AuditAction,
    check::OverallRisk,
    clock::{Clock, ManualClock},
    session::{IdentificationMethod, SessionStatus},
  };

  use super::*;
  use crate::{
    aggregator::ScreenerRegistry,
    config::EngineConfig,
    memory::MemoryStore,
    sinks::{RecordingAuditSink, RecordingNotifier},
  };

  struct Fixture {
    runner:   CheckRunner<MemoryStore>,
    sessions: Arc<SessionManager<MemoryStore>>,
    audit:    Arc<RecordingAuditSink>,
  }

  fn fixture() -> Fixture {
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::default());
    let audit = Arc::new(RecordingAuditSink::default());
    let sessions = Arc::new(SessionManager::new(
      Arc::new(MemoryStore::new()),
      clock.clone(),
      audit.clone(),
      Arc::new(RecordingNotifier::default()),
      Arc::new(EngineConfig::default()),
    ));
    let aggregator = RiskAggregator::new(
      Arc::new(ScreenerRegistry::with_stubs(clock.clone(), Duration::ZERO)),
      clock,
      Duration::from_secs(1),
    );
    Fixture { runner: CheckRunner::new(sessions.clone(), aggregator), sessions, audit }
  }

  #[tokio::test]
  async fn standalone_run_is_stored_under_its_session() {
    let fx = fixture();
    let subject = ScreeningSubject::new("cust-7");
    let run = fx
      .runner
      .run_standalone("bank-a", &subject, &[], RiskProfile::Standard, None)
      .await
      .unwrap();
    assert_eq!(run.per_check.len(), 4);

    let view = fx.sessions.get_status(run.run_id, "bank-a").await.unwrap();
    assert_eq!(view.status, SessionStatus::Completed);
    assert_eq!(view.steps.len(), 3);
    let expected: Vec<String> =
      CheckKind::default_set().iter().map(ToString::to_string).collect();
    assert_eq!(view.steps[0].payload["checks"], serde_json::json!(expected));

    let stored = fx.runner.get_run(run.run_id, "bank-a").await.unwrap();
    assert_eq!(stored, run);

    let completed = fx
      .audit
      .events()
      .iter()
      .filter(|e| e.action == AuditAction::SessionCompleted)
      .count();
    assert_eq!(completed, 1);
  }

  #[tokio::test]
  async fn unknown_kinds_fail_safe() {
    let fx = fixture();
    let run = fx
      .runner
      .run_standalone(
        "bank-a",
        &ScreeningSubject::new("cust-7"),
        &[CheckKind::Other("crypto_wallet".into())],
        RiskProfile::Standard,
        None,
      )
      .await
      .unwrap();
    assert!(run.per_check[0].is_failed());
    assert_eq!(run.overall_risk, OverallRisk::Medium);
  }

  #[tokio::test]
  async fn refuses_non_checks_sessions_and_foreign_subjects() {
    let fx = fixture();
    let kind = SessionKind::Identification { method: IdentificationMethod::VideoIdentification };
    let id = fx
      .sessions
      .create(NewSession::new("bank-a", "cust-7", kind, chrono::Duration::minutes(30)))
      .await
      .unwrap()
      .session_id;
    let subject = ScreeningSubject::new("cust-7");
    assert!(matches!(
      fx.runner.run_for_session(id, "bank-a", &subject, &[], RiskProfile::Standard).await,
      Err(Error::ValidationFailed(_))
    ));
    assert!(matches!(fx.runner.get_run(id, "bank-a").await, Err(Error::SessionNotFound(_))));

    let checks = fx
      .sessions
      .create(NewSession::new("bank-a", "cust-7", SessionKind::Checks, chrono::Duration::minutes(30)))
      .await
      .unwrap()
      .session_id;
    assert!(matches!(
      fx.runner
        .run_for_session(checks, "bank-a", &ScreeningSubject::new("cust-8"), &[], RiskProfile::Standard)
        .await,
      Err(Error::ValidationFailed(_))
    ));
    assert!(matches!(
      fx.runner.get_run(checks, "bank-a").await,
      Err(Error::InvalidSessionState(SessionStatus::Initiated))
    ));
  }
}
