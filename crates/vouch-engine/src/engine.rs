//! Wiring: one store, one clock, one set of sinks shared by every component.

use std::sync::Arc;

use uuid::Uuid;
use vouch_core::{
  Error, Result,
  audit::{AuditSink, Notifier},
  clock::Clock,
  consent::ConsentToken,
  session::SessionView,
  store::{GrantStore, SessionStore},
};

use crate::{
  aggregator::{RiskAggregator, ScreenerRegistry},
  checks::CheckRunner,
  config::EngineConfig,
  consent::ConsentLedger,
  session::SessionManager,
};

/// The collaborators an [`Engine`] is built from.
pub struct EngineDeps {
  pub clock:     Arc<dyn Clock>,
  pub audit:     Arc<dyn AuditSink>,
  pub notifier:  Arc<dyn Notifier>,
  pub screeners: ScreenerRegistry,
  pub config:    EngineConfig,
}

pub struct Engine<S> {
  pub consents: ConsentLedger<S>,
  pub sessions: Arc<SessionManager<S>>,
  pub checks:   CheckRunner<S>,
}

impl<S: GrantStore + SessionStore> Engine<S> {
  pub fn new(store: Arc<S>, deps: EngineDeps) -> Self {
    let config = Arc::new(deps.config);
    let consents = ConsentLedger::new(
      store.clone(),
      deps.clock.clone(),
      deps.audit.clone(),
      config.cas_retries,
    );
    let sessions = Arc::new(SessionManager::new(
      store,
      deps.clock.clone(),
      deps.audit,
      deps.notifier,
      config.clone(),
    ));
    let aggregator =
      RiskAggregator::new(Arc::new(deps.screeners), deps.clock, config.check_timeout());
    let checks = CheckRunner::new(sessions.clone(), aggregator);
    Self { consents, sessions, checks }
  }

  /// Session status as seen by `caller`.
  ///
  /// The owner always sees the full view. Anyone else needs a consent token
  /// that validates for `purpose` and for the data category of the session's
  /// kind, was issued by the subject of this session, and was requested by
  /// the caller.
  pub async fn gated_view(
    &self,
    session_id: Uuid,
    caller: &str,
    token: Option<&ConsentToken>,
    purpose: Option<&str>,
  ) -> Result<SessionView> {
    let session = self.sessions.fetch(session_id, None).await?;
    if session.owner == caller {
      return Ok(SessionView::new(&session, true));
    }

    let denied = || Error::AccessDenied { entity: "session", id: session_id };
    let token = token.ok_or_else(denied)?;
    let required = [session.kind.data_category().to_owned()];
    let consent = self.consents.validate(token, purpose, &required).await?;
    if consent.grant.subject_id != session.subject_id || consent.grant.requester != caller {
      return Err(denied());
    }
    Ok(SessionView::new(&session, true))
  }
}
