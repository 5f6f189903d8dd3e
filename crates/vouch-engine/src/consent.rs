//! The consent ledger: grant persistence, lazy expiry, and validation.
//!
//! Reads are lock-free. Mutations re-read the grant, apply the state machine
//! from `vouch_core::consent`, and write back with compare-and-swap; a lost
//! swap re-runs the whole read/guard/apply cycle.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;
use vouch_core::{
  Error, Result,
  audit::{AuditAction, AuditEvent, AuditSink},
  clock::Clock,
  consent::{
    ApprovalDecision, ConsentGrant, ConsentToken, GrantStatus, NewGrant, ValidatedConsent,
  },
  store::{GrantQuery, GrantStore},
};

use crate::sinks::emit;

pub struct ConsentLedger<S> {
  store:       Arc<S>,
  clock:       Arc<dyn Clock>,
  audit:       Arc<dyn AuditSink>,
  cas_retries: u32,
}

impl<S: GrantStore> ConsentLedger<S> {
  pub fn new(
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    audit: Arc<dyn AuditSink>,
    cas_retries: u32,
  ) -> Self {
    Self { store, clock, audit, cas_retries }
  }

  pub async fn create_grant(&self, input: NewGrant) -> Result<ConsentGrant> {
    let now = self.clock.now();
    let grant = ConsentGrant::new(input, now)?;
    self.store.put_grant(grant.clone()).await.map_err(Error::store)?;

    info!(grant_id = %grant.grant_id, requester = %grant.requester, "consent grant created");
    self
      .record(AuditAction::ConsentCreated, &grant, now, serde_json::json!({
        "categories": grant.categories,
        "purpose": grant.purpose,
        "expiresAt": grant.expires_at,
      }))
      .await;
    Ok(grant)
  }

  /// Apply the customer's decision to a pending grant.
  pub async fn approve(
    &self,
    grant_id: Uuid,
    caller: &str,
    decision: &ApprovalDecision,
  ) -> Result<ConsentGrant> {
    let (grant, now) = self
      .mutate(grant_id, caller, |g, now| {
        if g.status == GrantStatus::Expired {
          return Err(Error::Expired { entity: "consent", id: g.grant_id });
        }
        g.apply_decision(decision, now)
      })
      .await?;

    let action = match grant.status {
      GrantStatus::Rejected => AuditAction::ConsentRejected,
      _ => AuditAction::ConsentApproved,
    };
    info!(%grant_id, status = %grant.status, "consent decision recorded");
    self
      .record(action, &grant, now, serde_json::json!({
        "categories": grant.categories,
        "reason": grant.rejection_reason,
      }))
      .await;
    Ok(grant)
  }

  pub async fn revoke(
    &self,
    grant_id: Uuid,
    caller: &str,
    reason: Option<String>,
  ) -> Result<ConsentGrant> {
    let (grant, now) = self
      .mutate(grant_id, caller, |g, now| g.revoke(reason.clone(), now))
      .await?;

    info!(%grant_id, "consent grant revoked");
    self
      .record(AuditAction::ConsentRevoked, &grant, now, serde_json::json!({
        "reason": grant.revocation_reason,
      }))
      .await;
    Ok(grant)
  }

  /// Decide whether `token` authorises `purpose` over `required`. Always
  /// evaluated against the stored grant; nothing is cached.
  pub async fn validate(
    &self,
    token: &ConsentToken,
    purpose: Option<&str>,
    required: &[String],
  ) -> Result<ValidatedConsent> {
    let grant_id = token.grant_id().ok_or(Error::GrantNotFound(Uuid::nil()))?;
    let grant = self
      .store
      .get_grant(grant_id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::GrantNotFound(grant_id))?;

    let now = self.clock.now();
    match grant.check_access(now, purpose, required) {
      Ok(allowed_categories) => Ok(ValidatedConsent { grant, allowed_categories }),
      Err(e) => {
        if matches!(e, Error::Expired { .. }) {
          self.persist_expiry(grant, now).await;
        }
        Err(e)
      }
    }
  }

  /// Owner-scoped read with lazy expiry applied.
  pub async fn get(&self, grant_id: Uuid, caller: &str) -> Result<ConsentGrant> {
    let grant = self.load(grant_id, caller).await?;
    let now = self.clock.now();
    if grant.status.is_terminal() || !grant.is_expired_at(now) {
      return Ok(grant);
    }
    Ok(self.persist_expiry(grant, now).await)
  }

  /// The caller's grants, newest first. `status` matches the effective
  /// status, so grants past their deadline list as `expired`; with a status
  /// filter, paging applies after filtering.
  pub async fn list(
    &self,
    caller: &str,
    status: Option<GrantStatus>,
    limit: Option<usize>,
    offset: Option<usize>,
  ) -> Result<Vec<ConsentGrant>> {
    let mut query = GrantQuery { requester: Some(caller.to_owned()), ..GrantQuery::default() };
    if status.is_none() {
      query.limit = limit;
      query.offset = offset;
    }
    let now = self.clock.now();
    let grants = self.store.list_grants(&query).await.map_err(Error::store)?;
    // Persistence of lazy expiry happens on the next targeted read or
    // mutation.
    let effective = grants.into_iter().map(|mut g| {
      g.expire_if_due(now);
      g
    });
    let Some(status) = status else {
      return Ok(effective.collect());
    };
    Ok(
      effective
        .filter(|g| g.status == status)
        .skip(offset.unwrap_or(0))
        .take(limit.unwrap_or(usize::MAX))
        .collect(),
    )
  }

  pub(crate) async fn list_since(
    &self,
    caller: &str,
    since: DateTime<Utc>,
  ) -> Result<Vec<ConsentGrant>> {
    let query = GrantQuery {
      requester: Some(caller.to_owned()),
      issued_after: Some(since),
      ..GrantQuery::default()
    };
    let now = self.clock.now();
    let mut grants = self.store.list_grants(&query).await.map_err(Error::store)?;
    for g in &mut grants {
      g.expire_if_due(now);
    }
    Ok(grants)
  }

  pub(crate) fn now(&self) -> DateTime<Utc> { self.clock.now() }

  // ─── Internals ─────────────────────────────────────────────────────────

  async fn load(&self, grant_id: Uuid, caller: &str) -> Result<ConsentGrant> {
    let grant = self
      .store
      .get_grant(grant_id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::GrantNotFound(grant_id))?;
    if grant.requester != caller {
      return Err(Error::AccessDenied { entity: "consent", id: grant_id });
    }
    Ok(grant)
  }

  /// Read, expire lazily, apply `f`, swap. Lost swaps retry up to
  /// `cas_retries` times.
  async fn mutate<F>(
    &self,
    grant_id: Uuid,
    caller: &str,
    f: F,
  ) -> Result<(ConsentGrant, DateTime<Utc>)>
  where
    F: Fn(&mut ConsentGrant, DateTime<Utc>) -> Result<()>,
  {
    for attempt in 0..=self.cas_retries {
      let mut grant = self.load(grant_id, caller).await?;
      let now = self.clock.now();
      let expected = grant.version;

      let expired_now = grant.expire_if_due(now);
      if let Err(e) = f(&mut grant, now) {
        if expired_now {
          self.swap_expired(expected, grant, now).await;
        }
        return Err(e);
      }

      grant.version = expected + 1;
      if self
        .store
        .compare_and_swap_grant(expected, grant.clone())
        .await
        .map_err(Error::store)?
      {
        return Ok((grant, now));
      }
      debug!(%grant_id, attempt, "lost compare-and-swap on consent grant");
    }
    Err(Error::ConcurrentModification { entity: "consent", id: grant_id })
  }

  /// Best-effort write of a lazily expired grant. Returns the grant as it
  /// now stands.
  async fn persist_expiry(&self, mut grant: ConsentGrant, now: DateTime<Utc>) -> ConsentGrant {
    let expected = grant.version;
    if grant.expire_if_due(now) {
      return self.swap_expired(expected, grant, now).await;
    }
    grant
  }

  async fn swap_expired(
    &self,
    expected: u64,
    mut grant: ConsentGrant,
    now: DateTime<Utc>,
  ) -> ConsentGrant {
    grant.version = expected + 1;
    match self.store.compare_and_swap_grant(expected, grant.clone()).await {
      Ok(true) => {
        info!(grant_id = %grant.grant_id, "consent grant expired");
        self
          .record(AuditAction::ConsentExpired, &grant, now, serde_json::Value::Null)
          .await;
      }
      // Someone else already moved it on; their write wins.
      Ok(false) => {}
      Err(e) => {
        warn!(grant_id = %grant.grant_id, error = %e, "failed to persist grant expiry");
      }
    }
    grant
  }

  async fn record(
    &self,
    action: AuditAction,
    grant: &ConsentGrant,
    now: DateTime<Utc>,
    details: serde_json::Value,
  ) {
    let event = AuditEvent::new(
      action,
      "consent",
      grant.grant_id,
      &grant.requester,
      &grant.subject_id,
      now,
    )
    .with_details(details);
    emit(self.audit.as_ref(), event).await;
  }
}

#[cfg(test)]
mod tests {
  use chrono::Duration;
  use vouch_core::clock::ManualClock;

  use super::*;
  use crate::{memory::MemoryStore, sinks::RecordingAuditSink};

  struct Fixture {
    ledger: ConsentLedger<MemoryStore>,
    clock:  Arc<ManualClock>,
    audit:  Arc<RecordingAuditSink>,
  }

  fn fixture() -> Fixture {
    let clock = Arc::new(ManualClock::default());
    let audit = Arc::new(RecordingAuditSink::default());
    let ledger =
      ConsentLedger::new(Arc::new(MemoryStore::new()), clock.clone(), audit.clone(), 3);
    Fixture { ledger, clock, audit }
  }

  fn strings(v: &[&str]) -> Vec<String> { v.iter().map(|s| s.to_string()).collect() }

  fn input(categories: &[&str]) -> NewGrant {
    NewGrant {
      requester:  "bank-a".into(),
      subject_id: "cust-1".into(),
      categories: strings(categories),
      purpose:    "account_opening".into(),
      ttl:        Duration::days(30),
    }
  }

  #[tokio::test]
  async fn approve_then_validate() {
    let fx = fixture();
    let grant = fx.ledger.create_grant(input(&["identity", "address"])).await.unwrap();
    fx.ledger
      .approve(grant.grant_id, "bank-a", &ApprovalDecision::default())
      .await
      .unwrap();

    let ok = fx
      .ledger
      .validate(&grant.token(), Some("account_opening"), &strings(&["identity"]))
      .await
      .unwrap();
    assert_eq!(ok.allowed_categories, strings(&["identity"]));

    let actions: Vec<_> = fx.audit.events().iter().map(|e| e.action).collect();
    assert_eq!(actions, vec![AuditAction::ConsentCreated, AuditAction::ConsentApproved]);
  }

  #[tokio::test]
  async fn revocation_takes_effect_immediately() {
    let fx = fixture();
    let grant = fx.ledger.create_grant(input(&["identity"])).await.unwrap();
    fx.ledger
      .approve(grant.grant_id, "bank-a", &ApprovalDecision::default())
      .await
      .unwrap();
    fx.ledger.validate(&grant.token(), None, &[]).await.unwrap();

    fx.ledger
      .revoke(grant.grant_id, "bank-a", Some("customer request".into()))
      .await
      .unwrap();
    let err = fx.ledger.validate(&grant.token(), None, &[]).await.unwrap_err();
    assert!(matches!(err, Error::InvalidStatus(GrantStatus::Revoked)));
  }

  #[tokio::test]
  async fn lazy_expiry_is_persisted_once() {
    let fx = fixture();
    let grant = fx.ledger.create_grant(input(&["identity"])).await.unwrap();
    fx.ledger
      .approve(grant.grant_id, "bank-a", &ApprovalDecision::default())
      .await
      .unwrap();

    fx.clock.advance(Duration::days(31));
    for _ in 0..2 {
      let err = fx.ledger.validate(&grant.token(), None, &[]).await.unwrap_err();
      assert!(matches!(err, Error::Expired { .. }));
    }
    let stored = fx.ledger.get(grant.grant_id, "bank-a").await.unwrap();
    assert_eq!(stored.status, GrantStatus::Expired);

    let expired_events = fx
      .audit
      .events()
      .iter()
      .filter(|e| e.action == AuditAction::ConsentExpired)
      .count();
    assert_eq!(expired_events, 1);

    assert!(matches!(
      fx.ledger.revoke(grant.grant_id, "bank-a", None).await,
      Err(Error::InvalidTransition { .. })
    ));
  }

  #[tokio::test]
  async fn approve_after_deadline_reports_expired() {
    let fx = fixture();
    let grant = fx.ledger.create_grant(input(&["identity"])).await.unwrap();
    fx.clock.advance(Duration::days(30));
    let err = fx
      .ledger
      .approve(grant.grant_id, "bank-a", &ApprovalDecision::default())
      .await
      .unwrap_err();
    assert!(matches!(err, Error::Expired { .. }));
    // And again once the expiry is stored.
    let err = fx
      .ledger
      .approve(grant.grant_id, "bank-a", &ApprovalDecision::default())
      .await
      .unwrap_err();
    assert!(matches!(err, Error::Expired { .. }));
  }

  #[tokio::test]
  async fn other_institutions_cannot_touch_a_grant() {
    let fx = fixture();
    let grant = fx.ledger.create_grant(input(&["identity"])).await.unwrap();
    assert!(matches!(
      fx.ledger.revoke(grant.grant_id, "bank-b", None).await,
      Err(Error::AccessDenied { .. })
    ));
    assert!(matches!(
      fx.ledger.get(grant.grant_id, "bank-b").await,
      Err(Error::AccessDenied { .. })
    ));
  }

  #[tokio::test]
  async fn malformed_and_unknown_tokens_are_not_found() {
    let fx = fixture();
    assert!(matches!(
      fx.ledger.validate(&ConsentToken::new("garbage"), None, &[]).await,
      Err(Error::GrantNotFound(_))
    ));
    assert!(matches!(
      fx.ledger
        .validate(&ConsentToken::for_grant(Uuid::new_v4()), None, &[])
        .await,
      Err(Error::GrantNotFound(_))
    ));
  }

  #[tokio::test]
  async fn list_is_scoped_to_caller() {
    let fx = fixture();
    fx.ledger.create_grant(input(&["identity"])).await.unwrap();
    let mut other = input(&["identity"]);
    other.requester = "bank-b".into();
    fx.ledger.create_grant(other).await.unwrap();

    let mine = fx.ledger.list("bank-a", None, None, None).await.unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].requester, "bank-a");
  }

  #[tokio::test]
  async fn status_filter_sees_lazily_expired_grants() {
    let fx = fixture();
    let mut short = input(&["identity"]);
    short.ttl = Duration::hours(1);
    let lapsed = fx.ledger.create_grant(short).await.unwrap();
    fx.ledger
      .approve(lapsed.grant_id, "bank-a", &ApprovalDecision::default())
      .await
      .unwrap();
    let mut live = Vec::new();
    for _ in 0..3 {
      let g = fx.ledger.create_grant(input(&["identity"])).await.unwrap();
      fx.ledger
        .approve(g.grant_id, "bank-a", &ApprovalDecision::default())
        .await
        .unwrap();
      live.push(g.grant_id);
    }
    fx.clock.advance(Duration::hours(2));

    let expired = fx
      .ledger
      .list("bank-a", Some(GrantStatus::Expired), None, None)
      .await
      .unwrap();
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].grant_id, lapsed.grant_id);

    // Pages are counted after filtering, so none comes back short.
    let first = fx
      .ledger
      .list("bank-a", Some(GrantStatus::Approved), Some(2), None)
      .await
      .unwrap();
    let rest = fx
      .ledger
      .list("bank-a", Some(GrantStatus::Approved), Some(2), Some(2))
      .await
      .unwrap();
    assert_eq!(first.len(), 2);
    assert_eq!(rest.len(), 1);
    assert!(first.iter().chain(&rest).all(|g| live.contains(&g.grant_id)));
  }
}
