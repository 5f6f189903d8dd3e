//! Verification sessions: time-boxed, multi-step workflows tracked through a
//! lifecycle state machine to a terminal outcome.
//!
//! One shape serves identification, signature and checks sessions; the
//! [`SessionKind`] only decides the expected step sequence (used for progress
//! reporting, never for gating) and which result payload completes it.
//!
//! ```text
//! initiated ──step──▶ in_progress ──▶ completed | failed
//!     │                    │
//!     ├──── cancel ────────┴──▶ cancelled
//!     └──── read/mutate after expires_at ──▶ expired
//! ```

use std::{fmt, str::FromStr};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  Error, Result, audit::NotificationTarget, check::AggregatedRisk,
};

// ─── Kinds ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentificationMethod {
  VideoIdentification,
  DocumentVerification,
  BiometricVerification,
  ElectronicId,
}

impl IdentificationMethod {
  pub fn expected_steps(self) -> &'static [&'static str] {
    match self {
      Self::VideoIdentification => &[
        "document_capture",
        "face_capture",
        "liveness_check",
        "document_verification",
        "biometric_match",
        "manual_review",
      ],
      Self::DocumentVerification => &[
        "document_capture",
        "document_analysis",
        "fraud_detection",
        "manual_review",
      ],
      Self::BiometricVerification => {
        &["face_capture", "liveness_check", "biometric_match"]
      }
      Self::ElectronicId => &[
        "eid_authentication",
        "data_extraction",
        "certificate_validation",
      ],
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Self::VideoIdentification => "video_identification",
      Self::DocumentVerification => "document_verification",
      Self::BiometricVerification => "biometric_verification",
      Self::ElectronicId => "electronic_id",
    }
  }

  /// Path segment of the hosted identification flow.
  pub fn url_segment(self) -> &'static str {
    match self {
      Self::VideoIdentification => "video",
      Self::DocumentVerification => "document",
      Self::BiometricVerification => "biometric",
      Self::ElectronicId => "eid",
    }
  }
}

/// Simple, advanced or qualified electronic signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureMethod {
  Simple,
  Aes,
  Qes,
}

impl SignatureMethod {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Simple => "simple",
      Self::Aes => "aes",
      Self::Qes => "qes",
    }
  }
}

const SIGNATURE_STEPS: &[&str] = &[
  "preparation",
  "customer_notification",
  "document_review",
  "signature_capture",
  "signature_completion",
];

const CHECKS_STEPS: &[&str] = &["screening", "risk_assessment"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionKind {
  Identification { method: IdentificationMethod },
  Signature { method: SignatureMethod },
  Checks,
}

impl SessionKind {
  pub const LABELS: [&'static str; 3] = ["identification", "signature", "checks"];

  pub fn expected_steps(&self) -> &'static [&'static str] {
    match self {
      Self::Identification { method } => method.expected_steps(),
      Self::Signature { .. } => SIGNATURE_STEPS,
      Self::Checks => CHECKS_STEPS,
    }
  }

  /// Short label stored in the `kind` column and used in statistics.
  pub fn label(&self) -> &'static str {
    match self {
      Self::Identification { .. } => "identification",
      Self::Signature { .. } => "signature",
      Self::Checks => "checks",
    }
  }

  /// The consent data category that covers this kind's result.
  pub fn data_category(&self) -> &'static str {
    match self {
      Self::Identification { .. } => "identity",
      Self::Signature { .. } => "signature",
      Self::Checks => "kyc",
    }
  }
}

// ─── Status ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
  Initiated,
  InProgress,
  Completed,
  Failed,
  Expired,
  Cancelled,
}

impl SessionStatus {
  pub const ALL: [SessionStatus; 6] = [
    Self::Initiated,
    Self::InProgress,
    Self::Completed,
    Self::Failed,
    Self::Expired,
    Self::Cancelled,
  ];

  pub fn is_terminal(self) -> bool {
    !matches!(self, Self::Initiated | Self::InProgress)
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Initiated => "initiated",
      Self::InProgress => "in_progress",
      Self::Completed => "completed",
      Self::Failed => "failed",
      Self::Expired => "expired",
      Self::Cancelled => "cancelled",
    }
  }
}

impl fmt::Display for SessionStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for SessionStatus {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    Self::ALL
      .into_iter()
      .find(|st| st.as_str() == s)
      .ok_or_else(|| Error::ValidationFailed(format!("unknown session status {s:?}")))
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
  Pending,
  Processing,
  Completed,
  Failed,
  Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
  pub step:        String,
  pub status:      StepStatus,
  pub recorded_at: DateTime<Utc>,
  #[serde(default)]
  pub payload:     serde_json::Value,
}

// ─── Signature documents ─────────────────────────────────────────────────────

/// A document presented for signing. The hash is the caller's digest of the
/// document content; no document bytes pass through the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureDocument {
  pub document_id:    String,
  pub document_name:  String,
  pub document_hash:  String,
  #[serde(default)]
  pub signed_at:      Option<DateTime<Utc>>,
  #[serde(default)]
  pub signature_hash: Option<String>,
}

// ─── Completion inputs ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentInfo {
  pub document_type:     String,
  pub document_number:   String,
  pub issuing_country:   String,
  pub issuing_authority: Option<String>,
  pub issue_date:        Option<NaiveDate>,
  pub expiry_date:       Option<NaiveDate>,
  pub validity_status:   Option<String>,
}

/// Raw result reported by an identification provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IdentificationEvidence {
  pub document_info:      Option<DocumentInfo>,
  pub verification_score: Option<f64>,
  pub biometric_match:    Option<f64>,
  pub fraud_indicators:   Vec<String>,
  pub customer_data:      serde_json::Value,
  pub quality_checks:     serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateInfo {
  pub issuer:        String,
  pub subject:       String,
  pub valid_from:    Option<DateTime<Utc>>,
  pub valid_to:      Option<DateTime<Utc>>,
  pub serial_number: Option<String>,
  pub algorithm:     Option<String>,
}

/// Raw signature capture reported by a signing provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SignatureCapture {
  pub signature_value: String,
  pub timestamp:       Option<DateTime<Utc>>,
  pub certificate:     Option<CertificateInfo>,
  pub ip_address:      Option<String>,
  pub user_agent:      Option<String>,
  pub location:        Option<String>,
}

/// Payload of `complete`; must match the session kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Completion {
  Checks(AggregatedRisk),
  Identification(IdentificationEvidence),
  Signature(SignatureCapture),
}

// ─── Results ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LevelOfAssurance {
  Low,
  Medium,
  High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentificationResult {
  pub level_of_assurance: LevelOfAssurance,
  pub identified_at:      DateTime<Utc>,
  pub method:             String,
  pub document_info:      DocumentInfo,
  pub verification_score: f64,
  pub biometric_match:    Option<f64>,
  pub fraud_indicators:   Vec<String>,
  pub customer_data:      serde_json::Value,
  pub quality_checks:     serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedDocument {
  pub document_id:    String,
  pub document_name:  String,
  pub signature_hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureResult {
  /// Hex SHA-256 binding session, timestamp and signature value.
  pub signature_hash:   String,
  pub signed_at:        DateTime<Utc>,
  pub signature_method: String,
  pub certificate_info: Option<CertificateInfo>,
  pub documents:        Vec<SignedDocument>,
  #[serde(default)]
  pub metadata:         serde_json::Value,
}

/// Kind-specific result stored on a completed session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum SessionResult {
  Checks(AggregatedRisk),
  Identification(IdentificationResult),
  Signature(SignatureResult),
}

// ─── Session ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationSession {
  pub session_id:     Uuid,
  pub subject_id:     String,
  /// Institution that created the session; the authorisation scope.
  pub owner:          String,
  pub kind:           SessionKind,
  pub status:         SessionStatus,
  pub created_at:     DateTime<Utc>,
  /// Fixed at creation, never extended.
  pub expires_at:     DateTime<Utc>,
  pub completed_at:   Option<DateTime<Utc>>,
  pub updated_at:     DateTime<Utc>,
  pub steps:          Vec<StepRecord>,
  pub result:         Option<SessionResult>,
  pub failure_reason: Option<String>,
  pub notify:         Option<NotificationTarget>,
  #[serde(default)]
  pub metadata:       serde_json::Value,
  #[serde(default)]
  pub documents:      Vec<SignatureDocument>,
  pub version:        u64,
}

/// Input to `SessionManager::create`.
#[derive(Debug, Clone)]
pub struct NewSession {
  pub owner:      String,
  pub subject_id: String,
  pub kind:       SessionKind,
  pub ttl:        Duration,
  pub metadata:   serde_json::Value,
  pub notify:     Option<NotificationTarget>,
  pub documents:  Vec<SignatureDocument>,
}

impl NewSession {
  pub fn new(
    owner: impl Into<String>,
    subject_id: impl Into<String>,
    kind: SessionKind,
    ttl: Duration,
  ) -> Self {
    Self {
      owner: owner.into(),
      subject_id: subject_id.into(),
      kind,
      ttl,
      metadata: serde_json::Value::Null,
      notify: None,
      documents: Vec::new(),
    }
  }
}

impl VerificationSession {
  pub fn new(input: NewSession, now: DateTime<Utc>) -> Result<Self> {
    if input.subject_id.trim().is_empty() {
      return Err(Error::ValidationFailed("subject id must not be empty".into()));
    }
    if input.ttl <= Duration::zero() {
      return Err(Error::ValidationFailed("ttl must be positive".into()));
    }
    let expires_at = now
      .checked_add_signed(input.ttl)
      .ok_or_else(|| Error::ValidationFailed("ttl is out of range".into()))?;
    match input.kind {
      SessionKind::Signature { .. } => {
        if input.documents.is_empty() {
          return Err(Error::ValidationFailed(
            "signature sessions need at least one document".into(),
          ));
        }
        let incomplete = input.documents.iter().any(|d| {
          d.document_id.is_empty() || d.document_name.is_empty() || d.document_hash.is_empty()
        });
        if incomplete {
          return Err(Error::ValidationFailed(
            "each document needs documentId, documentName and documentHash".into(),
          ));
        }
      }
      _ if !input.documents.is_empty() => {
        return Err(Error::ValidationFailed(
          "documents are only accepted for signature sessions".into(),
        ));
      }
      _ => {}
    }

    Ok(Self {
      session_id: Uuid::new_v4(),
      subject_id: input.subject_id,
      owner: input.owner,
      kind: input.kind,
      status: SessionStatus::Initiated,
      created_at: now,
      expires_at,
      completed_at: None,
      updated_at: now,
      steps: Vec::new(),
      result: None,
      failure_reason: None,
      notify: input.notify,
      metadata: input.metadata,
      documents: input.documents,
      version: 0,
    })
  }

  pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
    now >= self.expires_at
  }

  /// Lazy expiry: a live session read or touched after its deadline becomes
  /// `expired`. Returns whether the status changed.
  pub fn expire_if_due(&mut self, now: DateTime<Utc>) -> bool {
    if !self.status.is_terminal() && self.is_past_deadline(now) {
      self.status = SessionStatus::Expired;
      self.updated_at = now;
      return true;
    }
    false
  }

  pub fn record_step(
    &mut self,
    step: String,
    status: StepStatus,
    payload: serde_json::Value,
    now: DateTime<Utc>,
  ) -> Result<()> {
    if step.trim().is_empty() {
      return Err(Error::ValidationFailed("step name must not be empty".into()));
    }
    self.ensure_live(now)?;
    if self.status.is_terminal() {
      return Err(Error::InvalidSessionState(self.status));
    }

    self.steps.push(StepRecord { step, status, recorded_at: now, payload });
    if self.status == SessionStatus::Initiated {
      self.status = SessionStatus::InProgress;
    }
    self.updated_at = now;
    Ok(())
  }

  pub fn complete(&mut self, result: SessionResult, now: DateTime<Utc>) -> Result<()> {
    self.check_transition("complete", now)?;
    self.status = SessionStatus::Completed;
    self.result = Some(result);
    self.completed_at = Some(now);
    self.updated_at = now;
    Ok(())
  }

  pub fn fail(&mut self, reason: String, now: DateTime<Utc>) -> Result<()> {
    self.check_transition("fail", now)?;
    self.status = SessionStatus::Failed;
    self.failure_reason = Some(reason);
    self.completed_at = Some(now);
    self.updated_at = now;
    Ok(())
  }

  pub fn cancel(&mut self, reason: Option<String>, now: DateTime<Utc>) -> Result<()> {
    self.check_transition("cancel", now)?;
    self.status = SessionStatus::Cancelled;
    self.failure_reason = reason;
    self.updated_at = now;
    Ok(())
  }

  /// Percentage of the kind's expected steps with a completed record.
  pub fn progress(&self) -> u8 {
    match self.status {
      SessionStatus::Completed => 100,
      SessionStatus::Failed | SessionStatus::Expired | SessionStatus::Cancelled => 0,
      SessionStatus::Initiated | SessionStatus::InProgress => {
        let expected = self.kind.expected_steps();
        if expected.is_empty() {
          return 0;
        }
        let done = expected
          .iter()
          .filter(|name| {
            self
              .steps
              .iter()
              .any(|r| r.step == **name && r.status == StepStatus::Completed)
          })
          .count();
        let pct = (done as f64 / expected.len() as f64 * 100.0).round();
        pct.min(100.0) as u8
      }
    }
  }

  /// Expired sessions always answer `Expired`, even once already marked.
  fn ensure_live(&self, now: DateTime<Utc>) -> Result<()> {
    if self.status == SessionStatus::Expired
      || (!self.status.is_terminal() && self.is_past_deadline(now))
    {
      return Err(Error::Expired { entity: "session", id: self.session_id });
    }
    Ok(())
  }

  /// Guard shared by `complete`, `fail` and `cancel`.
  pub fn check_transition(&self, action: &'static str, now: DateTime<Utc>) -> Result<()> {
    self.ensure_live(now)?;
    if self.status.is_terminal() {
      return Err(Error::InvalidTransition {
        entity: "session",
        action,
        from: self.status.to_string(),
      });
    }
    Ok(())
  }
}

// ─── Read model ──────────────────────────────────────────────────────────────

/// What `get_status` returns: the session plus computed progress. The result
/// is withheld when the reader is not entitled to it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
  pub session_id:     Uuid,
  pub subject_id:     String,
  pub kind:           SessionKind,
  pub status:         SessionStatus,
  pub progress:       u8,
  pub expected_steps: Vec<String>,
  pub created_at:     DateTime<Utc>,
  pub expires_at:     DateTime<Utc>,
  pub completed_at:   Option<DateTime<Utc>>,
  pub steps:          Vec<StepRecord>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub result:         Option<SessionResult>,
  pub failure_reason: Option<String>,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub documents:      Vec<SignatureDocument>,
}

impl SessionView {
  pub fn new(session: &VerificationSession, include_result: bool) -> Self {
    Self {
      session_id:     session.session_id,
      subject_id:     session.subject_id.clone(),
      kind:           session.kind,
      status:         session.status,
      progress:       session.progress(),
      expected_steps: session
        .kind
        .expected_steps()
        .iter()
        .map(|s| s.to_string())
        .collect(),
      created_at:     session.created_at,
      expires_at:     session.expires_at,
      completed_at:   session.completed_at,
      steps:          session.steps.clone(),
      result:         include_result.then(|| session.result.clone()).flatten(),
      failure_reason: session.failure_reason.clone(),
      documents:      session.documents.clone(),
    }
  }
}
