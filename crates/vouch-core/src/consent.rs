//! Consent grants: scoped, time-limited authorisations for a requester to
//! access a subject's data categories for a stated purpose.
//!
//! The state machine lives here as plain methods on [`ConsentGrant`]; the
//! ledger in `vouch-engine` wraps them with persistence and audit.

use std::{collections::BTreeSet, fmt, str::FromStr};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

const TOKEN_PREFIX: &str = "consent:";

// ─── Status ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantStatus {
  Pending,
  Approved,
  Rejected,
  Expired,
  Revoked,
}

impl GrantStatus {
  pub const ALL: [GrantStatus; 5] = [
    Self::Pending,
    Self::Approved,
    Self::Rejected,
    Self::Expired,
    Self::Revoked,
  ];

  /// Rejected, expired and revoked grants are never mutated again.
  pub fn is_terminal(self) -> bool {
    matches!(self, Self::Rejected | Self::Expired | Self::Revoked)
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Pending => "pending",
      Self::Approved => "approved",
      Self::Rejected => "rejected",
      Self::Expired => "expired",
      Self::Revoked => "revoked",
    }
  }
}

impl fmt::Display for GrantStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for GrantStatus {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    Self::ALL
      .into_iter()
      .find(|st| st.as_str() == s)
      .ok_or_else(|| Error::ValidationFailed(format!("unknown grant status {s:?}")))
  }
}

// ─── Token ───────────────────────────────────────────────────────────────────

/// Opaque bearer token handed to the requester once a grant exists.
///
/// The wire form is `consent:<grant_id>`; a bare UUID is accepted too.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConsentToken(String);

impl ConsentToken {
  pub fn for_grant(grant_id: Uuid) -> Self {
    Self(format!("{TOKEN_PREFIX}{grant_id}"))
  }

  pub fn new(raw: impl Into<String>) -> Self { Self(raw.into()) }

  pub fn as_str(&self) -> &str { &self.0 }

  /// The grant this token refers to, if it is well-formed.
  pub fn grant_id(&self) -> Option<Uuid> {
    let raw = self.0.trim();
    let id = raw.strip_prefix(TOKEN_PREFIX).unwrap_or(raw);
    Uuid::parse_str(id).ok()
  }
}

impl fmt::Display for ConsentToken {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

// ─── Grant ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentGrant {
  pub grant_id:          Uuid,
  pub subject_id:        String,
  /// Institution that requested (and owns) the grant.
  pub requester:         String,
  pub categories:        BTreeSet<String>,
  pub purpose:           String,
  pub status:            GrantStatus,
  pub issued_at:         DateTime<Utc>,
  pub expires_at:        DateTime<Utc>,
  pub decided_at:        Option<DateTime<Utc>>,
  pub revoked_at:        Option<DateTime<Utc>>,
  pub rejection_reason:  Option<String>,
  pub revocation_reason: Option<String>,
  /// Customer-imposed restrictions merged in at approval time.
  #[serde(default)]
  pub restrictions:      serde_json::Map<String, serde_json::Value>,
  /// Optimistic-concurrency counter; bumped by every stored mutation.
  pub version:           u64,
}

/// Input to `ConsentLedger::create_grant`.
#[derive(Debug, Clone)]
pub struct NewGrant {
  pub requester:  String,
  pub subject_id: String,
  pub categories: Vec<String>,
  pub purpose:    String,
  pub ttl:        Duration,
}

/// The customer's answer to a pending grant.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApprovalDecision {
  pub approved:            bool,
  /// Narrow the grant to these categories; empty keeps all requested ones.
  pub approved_categories: Vec<String>,
  pub restrictions:        serde_json::Map<String, serde_json::Value>,
  pub reason:              Option<String>,
}

impl Default for ApprovalDecision {
  fn default() -> Self {
    Self {
      approved:            true,
      approved_categories: Vec::new(),
      restrictions:        serde_json::Map::new(),
      reason:              None,
    }
  }
}

/// A grant that passed validation, with the categories the caller may read.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatedConsent {
  pub grant:              ConsentGrant,
  pub allowed_categories: Vec<String>,
}

impl ConsentGrant {
  /// Build a pending grant. Rejects empty categories, a blank purpose and a
  /// non-positive ttl.
  pub fn new(input: NewGrant, now: DateTime<Utc>) -> Result<Self> {
    let categories: BTreeSet<String> = input
      .categories
      .iter()
      .map(|c| c.trim().to_owned())
      .collect();
    if categories.is_empty() {
      return Err(Error::ValidationFailed("categories must not be empty".into()));
    }
    if categories.iter().any(String::is_empty) {
      return Err(Error::ValidationFailed("categories must not be blank".into()));
    }
    if input.purpose.trim().is_empty() {
      return Err(Error::ValidationFailed("purpose must not be empty".into()));
    }
    if input.subject_id.trim().is_empty() {
      return Err(Error::ValidationFailed("subject id must not be empty".into()));
    }
    if input.ttl <= Duration::zero() {
      return Err(Error::ValidationFailed("ttl must be positive".into()));
    }
    let expires_at = now
      .checked_add_signed(input.ttl)
      .ok_or_else(|| Error::ValidationFailed("ttl is out of range".into()))?;

    Ok(Self {
      grant_id: Uuid::new_v4(),
      subject_id: input.subject_id,
      requester: input.requester,
      categories,
      purpose: input.purpose,
      status: GrantStatus::Pending,
      issued_at: now,
      expires_at,
      decided_at: None,
      revoked_at: None,
      rejection_reason: None,
      revocation_reason: None,
      restrictions: serde_json::Map::new(),
      version: 0,
    })
  }

  pub fn token(&self) -> ConsentToken { ConsentToken::for_grant(self.grant_id) }

  pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
    now >= self.expires_at
  }

  /// Usable for access gating: approved and not past expiry.
  pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
    self.status == GrantStatus::Approved && !self.is_expired_at(now)
  }

  /// Mark a live grant as expired once its deadline has passed. Returns
  /// whether the status changed.
  pub fn expire_if_due(&mut self, now: DateTime<Utc>) -> bool {
    if !self.status.is_terminal() && self.is_expired_at(now) {
      self.status = GrantStatus::Expired;
      return true;
    }
    false
  }

  pub fn apply_decision(
    &mut self,
    decision: &ApprovalDecision,
    now: DateTime<Utc>,
  ) -> Result<()> {
    if self.status != GrantStatus::Pending {
      return Err(self.invalid("approve"));
    }
    if self.is_expired_at(now) {
      return Err(Error::Expired { entity: "consent", id: self.grant_id });
    }

    if !decision.approved {
      self.status = GrantStatus::Rejected;
      self.rejection_reason = decision.reason.clone();
      self.decided_at = Some(now);
      return Ok(());
    }

    if !decision.approved_categories.is_empty() {
      let selected: BTreeSet<String> = decision
        .approved_categories
        .iter()
        .map(|c| c.trim().to_owned())
        .collect();
      let narrowed: BTreeSet<String> =
        self.categories.intersection(&selected).cloned().collect();
      if narrowed.is_empty() {
        return Err(Error::ValidationFailed(
          "approved categories do not overlap the requested ones".into(),
        ));
      }
      self.categories = narrowed;
    }

    for (k, v) in &decision.restrictions {
      self.restrictions.insert(k.clone(), v.clone());
    }
    self.status = GrantStatus::Approved;
    self.decided_at = Some(now);
    Ok(())
  }

  pub fn revoke(&mut self, reason: Option<String>, now: DateTime<Utc>) -> Result<()> {
    if self.status.is_terminal() {
      return Err(self.invalid("revoke"));
    }
    self.status = GrantStatus::Revoked;
    self.revoked_at = Some(now);
    self.revocation_reason = reason;
    Ok(())
  }

  /// Categories from `required` that this grant does not cover, in request
  /// order and without duplicates.
  pub fn missing_categories(&self, required: &[String]) -> Vec<String> {
    let mut missing: Vec<String> = Vec::new();
    for c in required {
      if !self.categories.contains(c) && !missing.contains(c) {
        missing.push(c.clone());
      }
    }
    missing
  }

  /// Decide whether this grant authorises `purpose` and `required` at `now`.
  /// Does not mutate; the caller persists lazy expiry separately.
  pub fn check_access(
    &self,
    now: DateTime<Utc>,
    purpose: Option<&str>,
    required: &[String],
  ) -> Result<Vec<String>> {
    if self.is_expired_at(now) {
      return Err(Error::Expired { entity: "consent", id: self.grant_id });
    }
    if self.status != GrantStatus::Approved {
      return Err(Error::InvalidStatus(self.status));
    }
    if let Some(p) = purpose.filter(|p| !p.is_empty())
      && p != self.purpose
    {
      return Err(Error::PurposeMismatch {
        required: p.to_owned(),
        granted:  self.purpose.clone(),
      });
    }

    let missing = self.missing_categories(required);
    if !missing.is_empty() {
      return Err(Error::InsufficientScope { missing });
    }

    if required.is_empty() {
      return Ok(self.categories.iter().cloned().collect());
    }
    let mut allowed: Vec<String> = Vec::with_capacity(required.len());
    for c in required {
      if !allowed.contains(c) {
        allowed.push(c.clone());
      }
    }
    Ok(allowed)
  }

  fn invalid(&self, action: &'static str) -> Error {
    Error::InvalidTransition {
      entity: "consent",
      action,
      from: self.status.to_string(),
    }
  }
}
