//! Persistence traits for grants and sessions.
//!
//! Implemented by `vouch-store-sqlite` and the in-memory store in
//! `vouch-engine`. Writes after creation go through `compare_and_swap`, which
//! only succeeds while the stored `version` still equals `expected_version`;
//! the record passed in already carries the bumped version.

use std::future::Future;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
  consent::{ConsentGrant, GrantStatus},
  session::{SessionStatus, VerificationSession},
};

// ─── Query types ─────────────────────────────────────────────────────────────

/// Parameters for [`GrantStore::list_grants`].
#[derive(Debug, Clone, Default)]
pub struct GrantQuery {
  pub requester:    Option<String>,
  pub subject_id:   Option<String>,
  pub status:       Option<GrantStatus>,
  pub issued_after: Option<DateTime<Utc>>,
  pub limit:        Option<usize>,
  pub offset:       Option<usize>,
}

/// Parameters for [`SessionStore::list_sessions`].
#[derive(Debug, Clone, Default)]
pub struct SessionQuery {
  pub owner:         Option<String>,
  pub subject_id:    Option<String>,
  /// Session kind label (`identification`, `signature`, `checks`).
  pub kind:          Option<String>,
  pub status:        Option<SessionStatus>,
  pub created_after: Option<DateTime<Utc>>,
  pub limit:         Option<usize>,
  pub offset:        Option<usize>,
}

// ─── Traits ──────────────────────────────────────────────────────────────────

pub trait GrantStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  fn get_grant(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<ConsentGrant>, Self::Error>> + Send + '_;

  /// Insert a new grant. Fails if the id is taken.
  fn put_grant(
    &self,
    grant: ConsentGrant,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Replace a grant if its stored version is `expected_version`. Returns
  /// `false` when another writer got there first.
  fn compare_and_swap_grant(
    &self,
    expected_version: u64,
    grant: ConsentGrant,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Newest first.
  fn list_grants<'a>(
    &'a self,
    query: &'a GrantQuery,
  ) -> impl Future<Output = Result<Vec<ConsentGrant>, Self::Error>> + Send + 'a;
}

pub trait SessionStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  fn get_session(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<VerificationSession>, Self::Error>> + Send + '_;

  fn put_session(
    &self,
    session: VerificationSession,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn compare_and_swap_session(
    &self,
    expected_version: u64,
    session: VerificationSession,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Newest first.
  fn list_sessions<'a>(
    &'a self,
    query: &'a SessionQuery,
  ) -> impl Future<Output = Result<Vec<VerificationSession>, Self::Error>> + Send + 'a;
}
