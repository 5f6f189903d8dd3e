//! In-memory [`GrantStore`] and [`SessionStore`] backed by `DashMap`.
//!
//! Used by tests and by servers configured with `store_path = ":memory:"`.
//! Nothing survives a restart.

use std::future::Future;

use dashmap::{DashMap, mapref::entry::Entry};
use uuid::Uuid;
use vouch_core::{
  consent::ConsentGrant,
  session::VerificationSession,
  store::{GrantQuery, GrantStore, SessionQuery, SessionStore},
};

#[derive(Debug, thiserror::Error)]
pub enum MemoryStoreError {
  #[error("record {0} already exists")]
  Duplicate(Uuid),
}

#[derive(Debug, Default)]
pub struct MemoryStore {
  grants:   DashMap<Uuid, ConsentGrant>,
  sessions: DashMap<Uuid, VerificationSession>,
}

impl MemoryStore {
  pub fn new() -> Self { Self::default() }
}

fn page<T>(mut items: Vec<T>, offset: Option<usize>, limit: Option<usize>) -> Vec<T> {
  let offset = offset.unwrap_or(0).min(items.len());
  items.drain(..offset);
  if let Some(limit) = limit {
    items.truncate(limit);
  }
  items
}

impl GrantStore for MemoryStore {
  type Error = MemoryStoreError;

  fn get_grant(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<ConsentGrant>, Self::Error>> + Send + '_ {
    async move { Ok(self.grants.get(&id).map(|g| g.clone())) }
  }

  fn put_grant(
    &self,
    grant: ConsentGrant,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_ {
    async move {
      let id = grant.grant_id;
      match self.grants.entry(id) {
        Entry::Occupied(_) => Err(MemoryStoreError::Duplicate(id)),
        Entry::Vacant(slot) => {
          slot.insert(grant);
          Ok(())
        }
      }
    }
  }

  fn compare_and_swap_grant(
    &self,
    expected_version: u64,
    grant: ConsentGrant,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_ {
    async move {
      match self.grants.get_mut(&grant.grant_id) {
        Some(mut current) if current.version == expected_version => {
          *current = grant;
          Ok(true)
        }
        _ => Ok(false),
      }
    }
  }

  fn list_grants<'a>(
    &'a self,
    query: &'a GrantQuery,
  ) -> impl Future<Output = Result<Vec<ConsentGrant>, Self::Error>> + Send + 'a {
    async move {
      let mut grants: Vec<ConsentGrant> = self
        .grants
        .iter()
        .filter(|g| {
          query.requester.as_ref().is_none_or(|r| &g.requester == r)
            && query.subject_id.as_ref().is_none_or(|s| &g.subject_id == s)
            && query.status.is_none_or(|s| g.status == s)
            && query.issued_after.is_none_or(|t| g.issued_at >= t)
        })
        .map(|g| g.clone())
        .collect();
      grants.sort_by(|a, b| b.issued_at.cmp(&a.issued_at));
      Ok(page(grants, query.offset, query.limit))
    }
  }
}

impl SessionStore for MemoryStore {
  type Error = MemoryStoreError;

  fn get_session(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<VerificationSession>, Self::Error>> + Send + '_ {
    async move { Ok(self.sessions.get(&id).map(|s| s.clone())) }
  }

  fn put_session(
    &self,
    session: VerificationSession,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_ {
    async move {
      let id = session.session_id;
      match self.sessions.entry(id) {
        Entry::Occupied(_) => Err(MemoryStoreError::Duplicate(id)),
        Entry::Vacant(slot) => {
          slot.insert(session);
          Ok(())
        }
      }
    }
  }

  fn compare_and_swap_session(
    &self,
    expected_version: u64,
    session: VerificationSession,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_ {
    async move {
      match self.sessions.get_mut(&session.session_id) {
        Some(mut current) if current.version == expected_version => {
          *current = session;
          Ok(true)
        }
        _ => Ok(false),
      }
    }
  }

  fn list_sessions<'a>(
    &'a self,
    query: &'a SessionQuery,
  ) -> impl Future<Output = Result<Vec<VerificationSession>, Self::Error>> + Send + 'a {
    async move {
      let mut sessions: Vec<VerificationSession> = self
        .sessions
        .iter()
        .filter(|s| {
          query.owner.as_ref().is_none_or(|o| &s.owner == o)
            && query.subject_id.as_ref().is_none_or(|id| &s.subject_id == id)
            && query.kind.as_deref().is_none_or(|k| s.kind.label() == k)
            && query.status.is_none_or(|st| s.status == st)
            && query.created_after.is_none_or(|t| s.created_at >= t)
        })
        .map(|s| s.clone())
        .collect();
      sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
      Ok(page(sessions, query.offset, query.limit))
    }
  }
}
