//! SQL schema for the Vouch SQLite store.
//!
//! Applied on open and gated on `PRAGMA user_version`.

pub const SCHEMA_VERSION: i64 = 1;

/// Full schema DDL; idempotent thanks to `IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;

-- Every row keeps the full record as JSON in `body`; the other columns are
-- copies used for filtering, ordering and compare-and-swap.
CREATE TABLE IF NOT EXISTS grants (
    grant_id    TEXT PRIMARY KEY,
    requester   TEXT NOT NULL,
    subject_id  TEXT NOT NULL,
    status      TEXT NOT NULL,
    issued_at   TEXT NOT NULL,   -- fixed-width RFC 3339 UTC
    version     INTEGER NOT NULL,
    body        TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sessions (
    session_id  TEXT PRIMARY KEY,
    owner       TEXT NOT NULL,
    subject_id  TEXT NOT NULL,
    kind        TEXT NOT NULL,   -- 'identification' | 'signature' | 'checks'
    status      TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    version     INTEGER NOT NULL,
    body        TEXT NOT NULL
);

-- Append-only.
CREATE TABLE IF NOT EXISTS audit_log (
    event_id    TEXT PRIMARY KEY,
    action      TEXT NOT NULL,
    entity      TEXT NOT NULL,
    entity_id   TEXT NOT NULL,
    actor       TEXT NOT NULL,
    subject_id  TEXT NOT NULL,
    occurred_at TEXT NOT NULL,
    details     TEXT NOT NULL DEFAULT 'null'
);

CREATE INDEX IF NOT EXISTS grants_requester_idx  ON grants(requester, issued_at);
CREATE INDEX IF NOT EXISTS grants_subject_idx    ON grants(subject_id);
CREATE INDEX IF NOT EXISTS sessions_owner_idx    ON sessions(owner, created_at);
CREATE INDEX IF NOT EXISTS sessions_subject_idx  ON sessions(subject_id);
CREATE INDEX IF NOT EXISTS audit_entity_idx      ON audit_log(entity_id, occurred_at);

PRAGMA user_version = 1;
";
