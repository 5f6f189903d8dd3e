//! Conversions between domain records and the column values stored in
//! SQLite.
//!
//! Timestamps are fixed-width RFC 3339 UTC strings (microsecond precision,
//! `Z` suffix) so that text ordering matches time ordering. UUIDs are
//! hyphenated lowercase strings.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Value;
use uuid::Uuid;
use vouch_core::{
  audit::{AuditAction, AuditEvent},
  consent::ConsentGrant,
  session::VerificationSession,
};

use crate::{Error, Result};

// ─── Scalars ─────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

/// Versions are `u64` in the domain; SQLite integers are signed.
pub fn encode_version(v: u64) -> i64 { v as i64 }

// ─── Grant rows ──────────────────────────────────────────────────────────────

/// Column values for one `grants` row, built outside the connection thread.
pub struct GrantRow {
  pub grant_id:   String,
  pub requester:  String,
  pub subject_id: String,
  pub status:     String,
  pub issued_at:  String,
  pub version:    i64,
  pub body:       String,
}

impl GrantRow {
  pub fn encode(grant: &ConsentGrant) -> Result<Self> {
    Ok(Self {
      grant_id:   encode_uuid(grant.grant_id),
      requester:  grant.requester.clone(),
      subject_id: grant.subject_id.clone(),
      status:     grant.status.as_str().to_owned(),
      issued_at:  encode_dt(grant.issued_at),
      version:    encode_version(grant.version),
      body:       serde_json::to_string(grant)?,
    })
  }
}

pub fn decode_grant(body: &str) -> Result<ConsentGrant> { Ok(serde_json::from_str(body)?) }

// ─── Session rows ────────────────────────────────────────────────────────────

pub struct SessionRow {
  pub session_id: String,
  pub owner:      String,
  pub subject_id: String,
  pub kind:       String,
  pub status:     String,
  pub created_at: String,
  pub version:    i64,
  pub body:       String,
}

impl SessionRow {
  pub fn encode(session: &VerificationSession) -> Result<Self> {
    Ok(Self {
      session_id: encode_uuid(session.session_id),
      owner:      session.owner.clone(),
      subject_id: session.subject_id.clone(),
      kind:       session.kind.label().to_owned(),
      status:     session.status.as_str().to_owned(),
      created_at: encode_dt(session.created_at),
      version:    encode_version(session.version),
      body:       serde_json::to_string(session)?,
    })
  }
}

pub fn decode_session(body: &str) -> Result<VerificationSession> {
  Ok(serde_json::from_str(body)?)
}

// ─── Audit rows ──────────────────────────────────────────────────────────────

/// Raw strings read from an `audit_log` row.
pub struct RawAuditEvent {
  pub event_id:    String,
  pub action:      String,
  pub entity:      String,
  pub entity_id:   String,
  pub actor:       String,
  pub subject_id:  String,
  pub occurred_at: String,
  pub details:     String,
}

impl RawAuditEvent {
  pub fn encode(event: &AuditEvent) -> Result<Self> {
    Ok(Self {
      event_id:    encode_uuid(event.event_id),
      action:      event.action.as_str().to_owned(),
      entity:      event.entity.clone(),
      entity_id:   encode_uuid(event.entity_id),
      actor:       event.actor.clone(),
      subject_id:  event.subject_id.clone(),
      occurred_at: encode_dt(event.occurred_at),
      details:     serde_json::to_string(&event.details)?,
    })
  }

  pub fn into_event(self) -> Result<AuditEvent> {
    let action: AuditAction = serde_json::from_value(serde_json::Value::String(self.action))?;
    Ok(AuditEvent {
      event_id: decode_uuid(&self.event_id)?,
      action,
      entity: self.entity,
      entity_id: decode_uuid(&self.entity_id)?,
      actor: self.actor,
      subject_id: self.subject_id,
      occurred_at: decode_dt(&self.occurred_at)?,
      details: serde_json::from_str(&self.details)?,
    })
  }
}

// ─── Dynamic filters ─────────────────────────────────────────────────────────

/// Accumulates `AND`-joined `WHERE` clauses with positional parameters.
#[derive(Default)]
pub struct Filter {
  clauses: Vec<String>,
  params:  Vec<Value>,
}

impl Filter {
  pub fn eq(&mut self, column: &str, value: Option<impl Into<String>>) -> &mut Self {
    if let Some(value) = value {
      self.push(format!("{column} = ?"), Value::Text(value.into()));
    }
    self
  }

  pub fn since(&mut self, column: &str, at: Option<DateTime<Utc>>) -> &mut Self {
    if let Some(at) = at {
      self.push(format!("{column} >= ?"), Value::Text(encode_dt(at)));
    }
    self
  }

  fn push(&mut self, clause: String, value: Value) {
    self.clauses.push(clause);
    self.params.push(value);
  }

  /// `SELECT body FROM {table} WHERE … ORDER BY {order} LIMIT ? OFFSET ?`.
  pub fn into_select(
    self,
    table: &str,
    order: &str,
    limit: Option<usize>,
    offset: Option<usize>,
  ) -> (String, Vec<Value>) {
    let mut sql = format!("SELECT body FROM {table}");
    if !self.clauses.is_empty() {
      sql.push_str(" WHERE ");
      sql.push_str(&self.clauses.join(" AND "));
    }
    sql.push_str(&format!(" ORDER BY {order} LIMIT ? OFFSET ?"));

    let mut params = self.params;
    params.push(Value::Integer(limit.map_or(-1, |l| l as i64)));
    params.push(Value::Integer(offset.unwrap_or(0) as i64));
    (sql, params)
  }
}
