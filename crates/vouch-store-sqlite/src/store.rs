//! [`SqliteStore`]: the SQLite implementation of [`GrantStore`],
//! [`SessionStore`] and [`AuditSink`].

use std::path::Path;

use async_trait::async_trait;
use rusqlite::OptionalExtension as _;
use uuid::Uuid;
use vouch_core::{
  audit::{AuditEvent, AuditSink, SinkError},
  consent::ConsentGrant,
  session::VerificationSession,
  store::{GrantQuery, GrantStore, SessionQuery, SessionStore},
};

use crate::{
  Error, Result,
  encode::{
    Filter, GrantRow, RawAuditEvent, SessionRow, decode_grant, decode_session, encode_uuid,
    encode_version,
  },
  schema::{SCHEMA, SCHEMA_VERSION},
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// Grants, sessions and audit events in a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and apply the schema.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store; useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    let version: i64 = self
      .conn
      .call(|conn| Ok(conn.query_row("PRAGMA user_version", [], |r| r.get(0))?))
      .await?;
    if version > SCHEMA_VERSION {
      return Err(Error::SchemaVersion(version));
    }

    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn select_bodies(
    &self,
    sql: String,
    params: Vec<rusqlite::types::Value>,
  ) -> Result<Vec<String>> {
    let bodies = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(params), |row| row.get(0))?
          .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(rows)
      })
      .await?;
    Ok(bodies)
  }

  async fn select_body(&self, sql: &'static str, id: Uuid) -> Result<Option<String>> {
    let id_str = encode_uuid(id);
    let body = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(sql, rusqlite::params![id_str], |row| row.get(0))
            .optional()?,
        )
      })
      .await?;
    Ok(body)
  }

  /// Every audit event recorded for `entity_id`, oldest first.
  pub async fn audit_trail(&self, entity_id: Uuid) -> Result<Vec<AuditEvent>> {
    let id_str = encode_uuid(entity_id);

    let raws: Vec<RawAuditEvent> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT event_id, action, entity, entity_id, actor, subject_id, occurred_at, details
           FROM audit_log WHERE entity_id = ?1 ORDER BY occurred_at, rowid",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![id_str], |row| {
            Ok(RawAuditEvent {
              event_id:    row.get(0)?,
              action:      row.get(1)?,
              entity:      row.get(2)?,
              entity_id:   row.get(3)?,
              actor:       row.get(4)?,
              subject_id:  row.get(5)?,
              occurred_at: row.get(6)?,
              details:     row.get(7)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawAuditEvent::into_event).collect()
  }

  async fn append_audit(&self, event: &AuditEvent) -> Result<()> {
    let raw = RawAuditEvent::encode(event)?;
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO audit_log (
             event_id, action, entity, entity_id, actor, subject_id, occurred_at, details
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
          rusqlite::params![
            raw.event_id,
            raw.action,
            raw.entity,
            raw.entity_id,
            raw.actor,
            raw.subject_id,
            raw.occurred_at,
            raw.details,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

// ─── GrantStore impl ─────────────────────────────────────────────────────────

impl GrantStore for SqliteStore {
  type Error = Error;

  async fn get_grant(&self, id: Uuid) -> Result<Option<ConsentGrant>> {
    self
      .select_body("SELECT body FROM grants WHERE grant_id = ?1", id)
      .await?
      .as_deref()
      .map(decode_grant)
      .transpose()
  }

  async fn put_grant(&self, grant: ConsentGrant) -> Result<()> {
    let row = GrantRow::encode(&grant)?;
    let inserted = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "INSERT OR IGNORE INTO grants (
             grant_id, requester, subject_id, status, issued_at, version, body
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
          rusqlite::params![
            row.grant_id,
            row.requester,
            row.subject_id,
            row.status,
            row.issued_at,
            row.version,
            row.body,
          ],
        )?)
      })
      .await?;

    if inserted == 0 {
      return Err(Error::Duplicate(grant.grant_id));
    }
    Ok(())
  }

  async fn compare_and_swap_grant(
    &self,
    expected_version: u64,
    grant: ConsentGrant,
  ) -> Result<bool> {
    let row = GrantRow::encode(&grant)?;
    let expected = encode_version(expected_version);
    let updated = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE grants SET status = ?2, version = ?3, body = ?4
           WHERE grant_id = ?1 AND version = ?5",
          rusqlite::params![row.grant_id, row.status, row.version, row.body, expected],
        )?)
      })
      .await?;
    Ok(updated == 1)
  }

  async fn list_grants<'a>(&'a self, query: &'a GrantQuery) -> Result<Vec<ConsentGrant>> {
    let mut filter = Filter::default();
    filter
      .eq("requester", query.requester.clone())
      .eq("subject_id", query.subject_id.clone())
      .eq("status", query.status.map(|s| s.as_str()))
      .since("issued_at", query.issued_after);
    let (sql, params) =
      filter.into_select("grants", "issued_at DESC, rowid DESC", query.limit, query.offset);

    self
      .select_bodies(sql, params)
      .await?
      .iter()
      .map(|body| decode_grant(body))
      .collect()
  }
}

// ─── SessionStore impl ───────────────────────────────────────────────────────

impl SessionStore for SqliteStore {
  type Error = Error;

  async fn get_session(&self, id: Uuid) -> Result<Option<VerificationSession>> {
    self
      .select_body("SELECT body FROM sessions WHERE session_id = ?1", id)
      .await?
      .as_deref()
      .map(decode_session)
      .transpose()
  }

  async fn put_session(&self, session: VerificationSession) -> Result<()> {
    let row = SessionRow::encode(&session)?;
    let inserted = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "INSERT OR IGNORE INTO sessions (
             session_id, owner, subject_id, kind, status, created_at, version, body
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
          rusqlite::params![
            row.session_id,
            row.owner,
            row.subject_id,
            row.kind,
            row.status,
            row.created_at,
            row.version,
            row.body,
          ],
        )?)
      })
      .await?;

    if inserted == 0 {
      return Err(Error::Duplicate(session.session_id));
    }
    Ok(())
  }

  async fn compare_and_swap_session(
    &self,
    expected_version: u64,
    session: VerificationSession,
  ) -> Result<bool> {
    let row = SessionRow::encode(&session)?;
    let expected = encode_version(expected_version);
    let updated = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE sessions SET status = ?2, version = ?3, body = ?4
           WHERE session_id = ?1 AND version = ?5",
          rusqlite::params![row.session_id, row.status, row.version, row.body, expected],
        )?)
      })
      .await?;
    Ok(updated == 1)
  }

  async fn list_sessions<'a>(
    &'a self,
    query: &'a SessionQuery,
  ) -> Result<Vec<VerificationSession>> {
    let mut filter = Filter::default();
    filter
      .eq("owner", query.owner.clone())
      .eq("subject_id", query.subject_id.clone())
      .eq("kind", query.kind.clone())
      .eq("status", query.status.map(|s| s.as_str()))
      .since("created_at", query.created_after);
    let (sql, params) =
      filter.into_select("sessions", "created_at DESC, rowid DESC", query.limit, query.offset);

    self
      .select_bodies(sql, params)
      .await?
      .iter()
      .map(|body| decode_session(body))
      .collect()
  }
}

// ─── AuditSink impl ──────────────────────────────────────────────────────────

#[async_trait]
impl AuditSink for SqliteStore {
  async fn record(&self, event: AuditEvent) -> Result<(), SinkError> {
    self
      .append_audit(&event)
      .await
      .map_err(|e| SinkError::Storage(e.to_string()))
  }
}
