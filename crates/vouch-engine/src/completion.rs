//! Turning a raw completion payload into the stored session result.

use chrono::{DateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};
use vouch_core::{
  Error, Result,
  session::{
    Completion, DocumentInfo, IdentificationEvidence, IdentificationMethod,
    IdentificationResult, LevelOfAssurance, SessionKind, SessionResult, SignatureCapture,
    SignatureMethod, SignatureResult, SignedDocument, VerificationSession,
  },
};

fn sha256_hex(input: &str) -> String { hex::encode(Sha256::digest(input.as_bytes())) }

fn completion_label(c: &Completion) -> &'static str {
  match c {
    Completion::Checks(_) => "checks",
    Completion::Identification(_) => "identification",
    Completion::Signature(_) => "signature",
  }
}

/// Validate `completion` against the session's kind and build its result.
/// Signature processing also stamps the session's documents.
pub fn process(
  session: &mut VerificationSession,
  completion: Completion,
  now: DateTime<Utc>,
) -> Result<SessionResult> {
  match (session.kind, completion) {
    (SessionKind::Checks, Completion::Checks(run)) => Ok(SessionResult::Checks(run)),
    (SessionKind::Identification { method }, Completion::Identification(evidence)) => {
      identification(method, evidence, now).map(SessionResult::Identification)
    }
    (SessionKind::Signature { method }, Completion::Signature(capture)) => {
      signature(session, method, capture).map(SessionResult::Signature)
    }
    (kind, other) => Err(Error::ValidationFailed(format!(
      "{} session cannot be completed with a {} result",
      kind.label(),
      completion_label(&other),
    ))),
  }
}

pub fn level_of_assurance(method: IdentificationMethod, score: f64) -> LevelOfAssurance {
  match method {
    IdentificationMethod::ElectronicId => LevelOfAssurance::High,
    IdentificationMethod::VideoIdentification if score >= 85.0 => LevelOfAssurance::High,
    _ if score >= 70.0 => LevelOfAssurance::Medium,
    _ => LevelOfAssurance::Low,
  }
}

fn identification(
  method: IdentificationMethod,
  evidence: IdentificationEvidence,
  now: DateTime<Utc>,
) -> Result<IdentificationResult> {
  let Some(document_info) = evidence.document_info else {
    return Err(Error::ValidationFailed("identification result needs documentInfo".into()));
  };
  let Some(score) = evidence.verification_score else {
    return Err(Error::ValidationFailed(
      "identification result needs verificationScore".into(),
    ));
  };
  if !(0.0..=100.0).contains(&score) {
    return Err(Error::ValidationFailed(format!(
      "verificationScore {score} is outside 0..=100"
    )));
  }

  let document_info = DocumentInfo {
    validity_status: document_info.validity_status.or_else(|| Some("valid".into())),
    ..document_info
  };

  Ok(IdentificationResult {
    level_of_assurance: level_of_assurance(method, score),
    identified_at: now,
    method: format!("{}_with_document", method.as_str()),
    document_info,
    verification_score: score,
    biometric_match: evidence.biometric_match,
    fraud_indicators: evidence.fraud_indicators,
    customer_data: evidence.customer_data,
    quality_checks: evidence.quality_checks,
  })
}

fn signature(
  session: &mut VerificationSession,
  method: SignatureMethod,
  capture: SignatureCapture,
) -> Result<SignatureResult> {
  if capture.signature_value.is_empty() {
    return Err(Error::ValidationFailed("signature capture needs signatureValue".into()));
  }
  let Some(signed_at) = capture.timestamp else {
    return Err(Error::ValidationFailed("signature capture needs timestamp".into()));
  };

  let stamp = signed_at.to_rfc3339_opts(SecondsFormat::Millis, true);
  let signature_hash =
    sha256_hex(&format!("{}:{stamp}:{}", session.session_id, capture.signature_value));

  let mut documents = Vec::with_capacity(session.documents.len());
  for doc in &mut session.documents {
    let doc_hash = sha256_hex(&format!("{}:{signature_hash}", doc.document_hash));
    doc.signed_at = Some(signed_at);
    doc.signature_hash = Some(doc_hash.clone());
    documents.push(SignedDocument {
      document_id:    doc.document_id.clone(),
      document_name:  doc.document_name.clone(),
      signature_hash: doc_hash,
    });
  }

  let certificate_info = capture.certificate.map(|mut cert| {
    if cert.algorithm.is_none() {
      cert.algorithm = Some(method.as_str().to_owned());
    }
    cert
  });

  Ok(SignatureResult {
    signature_hash,
    signed_at,
    signature_method: format!("{}_electronic_signature", method.as_str()),
    certificate_info,
    documents,
    metadata: serde_json::json!({
      "ipAddress": capture.ip_address,
      "userAgent": capture.user_agent,
      "location": capture.location,
    }),
  })
}

#[cfg(test)]
mod tests {
  use chrono::Duration;
  use vouch_core::session::{NewSession, SignatureDocument};

  use super::*;

  fn now() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2025-04-10T08:30:00Z")
      .unwrap()
      .with_timezone(&Utc)
  }

  fn session(kind: SessionKind, documents: Vec<SignatureDocument>) -> VerificationSession {
    let mut input = NewSession::new("bank-a", "cust-1", kind, Duration::hours(1));
    input.documents = documents;
    VerificationSession::new(input, now()).unwrap()
  }

  fn passport() -> DocumentInfo {
    DocumentInfo {
      document_type:     "passport".into(),
      document_number:   "C01X00T47".into(),
      issuing_country:   "DE".into(),
      issuing_authority: None,
      issue_date:        None,
      expiry_date:       None,
      validity_status:   None,
    }
  }

  #[test]
  fn assurance_levels() {
    use IdentificationMethod::*;
    assert_eq!(level_of_assurance(ElectronicId, 10.0), LevelOfAssurance::High);
    assert_eq!(level_of_assurance(VideoIdentification, 85.0), LevelOfAssurance::High);
    assert_eq!(level_of_assurance(VideoIdentification, 84.0), LevelOfAssurance::Medium);
    assert_eq!(level_of_assurance(DocumentVerification, 95.0), LevelOfAssurance::Medium);
    assert_eq!(level_of_assurance(BiometricVerification, 69.9), LevelOfAssurance::Low);
  }

  #[test]
  fn identification_requires_document_and_score() {
    let kind = SessionKind::Identification { method: IdentificationMethod::VideoIdentification };
    let mut s = session(kind, vec![]);
    let missing_score = IdentificationEvidence {
      document_info: Some(passport()),
      ..Default::default()
    };
    assert!(matches!(
      process(&mut s, Completion::Identification(missing_score), now()),
      Err(Error::ValidationFailed(_))
    ));

    let ok = IdentificationEvidence {
      document_info: Some(passport()),
      verification_score: Some(91.0),
      ..Default::default()
    };
    let SessionResult::Identification(r) =
      process(&mut s, Completion::Identification(ok), now()).unwrap()
    else {
      panic!("wrong result kind");
    };
    assert_eq!(r.level_of_assurance, LevelOfAssurance::High);
    assert_eq!(r.method, "video_identification_with_document");
    assert_eq!(r.document_info.validity_status.as_deref(), Some("valid"));
  }

  #[test]
  fn signature_hashes_bind_session_and_documents() {
    let docs = vec![SignatureDocument {
      document_id:    "doc-1".into(),
      document_name:  "Account agreement".into(),
      document_hash:  "abc123".into(),
      signed_at:      None,
      signature_hash: None,
    }];
    let mut s = session(SessionKind::Signature { method: SignatureMethod::Qes }, docs);
    let capture = SignatureCapture {
      signature_value: "sig-bytes".into(),
      timestamp: Some(now()),
      ..Default::default()
    };

    let SessionResult::Signature(r) =
      process(&mut s, Completion::Signature(capture), now()).unwrap()
    else {
      panic!("wrong result kind");
    };
    let expected =
      sha256_hex(&format!("{}:2025-04-10T08:30:00.000Z:sig-bytes", s.session_id));
    assert_eq!(r.signature_hash, expected);
    assert_eq!(r.signature_method, "qes_electronic_signature");
    assert_eq!(r.documents[0].signature_hash, sha256_hex(&format!("abc123:{expected}")));
    assert_eq!(s.documents[0].signature_hash.as_deref(), Some(r.documents[0].signature_hash.as_str()));
  }

  #[test]
  fn mismatched_payload_is_rejected() {
    let mut s = session(SessionKind::Checks, vec![]);
    let err = process(
      &mut s,
      Completion::Signature(SignatureCapture::default()),
      now(),
    )
    .unwrap_err();
    assert!(matches!(err, Error::ValidationFailed(_)));
  }
}
