//! Deterministic stand-in screeners.
//!
//! Scores are drawn from a SHA-256 of `"{kind}:{subject_id}"`, so the same
//! subject always screens the same way. The classification thresholds match
//! what a real provider integration is expected to apply.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde_json::json;
use sha2::{Digest, Sha256};
use vouch_core::{
  check::{CheckKind, CheckOutcome, RiskLevel, RiskProfile, ScreeningSubject},
  clock::Clock,
  screener::{Screener, ScreeningError},
};

use crate::aggregator::ScreenerRegistry;

const SANCTIONS_LISTS: &[&str] = &["OFAC SDN", "EU Consolidated", "UN Security Council", "HM Treasury"];

/// Two uniform draws in `[0, 1)` derived from kind and subject.
fn draws(kind: &CheckKind, subject_id: &str) -> (f64, f64) {
  let digest = Sha256::digest(format!("{kind}:{subject_id}").as_bytes());
  let unit = |bytes: &[u8]| {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    (u64::from_be_bytes(buf) >> 11) as f64 / (1u64 << 53) as f64
  };
  (unit(&digest[0..8]), unit(&digest[8..16]))
}

fn round1(x: f64) -> f64 { (x * 10.0).round() / 10.0 }

#[derive(Debug, Clone, PartialEq)]
struct Verdict {
  status:          &'static str,
  level:           RiskLevel,
  score:           f64,
  recommendations: Vec<&'static str>,
  details:         serde_json::Value,
}

fn sanctions(is_match: bool, score: f64, subject: &ScreeningSubject) -> Verdict {
  let (status, level, recommendations) = if is_match && score >= 90.0 {
    ("potential_match", RiskLevel::High, vec![
      "Manual review required - high confidence sanctions match",
      "Do not proceed with onboarding until cleared by compliance",
    ])
  } else if score >= 70.0 {
    ("requires_review", RiskLevel::Medium, vec![
      "Manual review recommended - possible name similarity",
    ])
  } else {
    ("clear", RiskLevel::Low, vec![])
  };
  let matches = if is_match {
    json!([{
      "listName": "OFAC SDN",
      "matchedName": subject.display_name(),
      "confidence": round1(score),
      "reason": "Name similarity",
    }])
  } else {
    json!([])
  };
  Verdict {
    status,
    level,
    score: round1(score),
    recommendations,
    details: json!({ "screenedLists": SANCTIONS_LISTS, "matches": matches }),
  }
}

fn pep(is_pep: bool, score: f64) -> Verdict {
  let (status, level, recommendations) = if is_pep && score >= 85.0 {
    ("pep_identified", RiskLevel::High, vec![
      "Politically exposed person - enhanced due diligence required",
      "Senior management approval required",
    ])
  } else if score >= 60.0 {
    ("possible_pep", RiskLevel::Medium, vec!["Possible PEP association - verify with customer"])
  } else {
    ("clear", RiskLevel::Low, vec![])
  };
  Verdict {
    status,
    level,
    score: round1(score),
    recommendations,
    details: json!({ "pepCategory": if is_pep { Some("domestic") } else { None } }),
  }
}

/// `severity` is `None` when nothing was found.
fn adverse_media(severity: Option<RiskLevel>, articles: u32) -> Verdict {
  let (status, level, recommendations) = match severity {
    None => ("clear", RiskLevel::Low, vec![]),
    Some(RiskLevel::High) => ("adverse_media_found", RiskLevel::High, vec![
      "Significant adverse media found - detailed investigation required",
      "Consider enhanced monitoring",
    ]),
    Some(RiskLevel::Medium) => ("adverse_media_found", RiskLevel::Medium, vec![
      "Moderate adverse media - review and assess relevance",
    ]),
    Some(other) => ("adverse_media_found", other, vec![]),
  };
  Verdict {
    status,
    level,
    score: f64::from(articles),
    recommendations,
    details: json!({ "articlesFound": articles, "severity": severity }),
  }
}

fn identity(score: f64) -> Verdict {
  let (status, level, recommendations) = if score < 60.0 {
    ("verification_failed", RiskLevel::High, vec![
      "Identity verification failed - additional documentation required",
    ])
  } else if score < 80.0 {
    ("partial_verification", RiskLevel::Medium, vec!["Additional identity checks recommended"])
  } else {
    ("verified", RiskLevel::Low, vec![])
  };
  Verdict {
    status,
    level,
    score: round1(score),
    recommendations,
    details: json!({
      "dataConsistency": score > 70.0,
      "documentValidity": score > 60.0,
      "biometricMatch": score > 80.0,
      "addressVerification": score > 75.0,
    }),
  }
}

fn fraud(score: f64) -> Verdict {
  let (status, level, recommendations) = if score > 80.0 {
    ("high_fraud_risk", RiskLevel::High, vec![
      "High fraud risk detected - immediate review required",
      "Consider declining application",
    ])
  } else if score > 60.0 {
    ("moderate_fraud_risk", RiskLevel::Medium, vec![
      "Moderate fraud risk - additional verification recommended",
    ])
  } else {
    ("clear", RiskLevel::Low, vec![])
  };
  Verdict {
    status,
    level,
    score: round1(score),
    recommendations,
    details: json!({
      "deviceRisk": if score > 50.0 { "medium" } else { "low" },
      "behaviorAnalysis": if score > 70.0 { "suspicious" } else { "normal" },
    }),
  }
}

fn credit(score: u32) -> Verdict {
  let (status, level, recommendations) = if score < 500 {
    ("poor_credit", RiskLevel::High, vec![
      "Poor credit history - consider enhanced terms or decline",
    ])
  } else if score < 650 {
    ("fair_credit", RiskLevel::Medium, vec!["Fair credit - standard terms with monitoring"])
  } else {
    ("acceptable", RiskLevel::Low, vec![])
  };
  let rating = match score {
    s if s > 700 => "excellent",
    s if s > 650 => "good",
    s if s > 500 => "fair",
    _ => "poor",
  };
  Verdict {
    status,
    level,
    score: f64::from(score),
    recommendations,
    details: json!({ "creditScore": score, "creditRating": rating }),
  }
}

/// A deterministic screener for one of the built-in kinds.
#[derive(Debug)]
pub struct StubScreener {
  kind:    CheckKind,
  clock:   Arc<dyn Clock>,
  latency: Duration,
}

impl StubScreener {
  pub fn new(kind: CheckKind, clock: Arc<dyn Clock>) -> Self {
    Self { kind, clock, latency: Duration::ZERO }
  }

  /// Simulated provider round-trip.
  pub fn with_latency(mut self, latency: Duration) -> Self {
    self.latency = latency;
    self
  }

  fn verdict(&self, subject: &ScreeningSubject) -> Result<Verdict, ScreeningError> {
    let (a, b) = draws(&self.kind, &subject.subject_id);
    let v = match &self.kind {
      CheckKind::Sanctions => {
        let is_match = a < 0.02;
        let score = if is_match { b * 20.0 + 80.0 } else { b * 30.0 };
        sanctions(is_match, score, subject)
      }
      CheckKind::Pep => {
        let is_pep = a < 0.05;
        let score = if is_pep { b * 30.0 + 70.0 } else { b * 40.0 };
        pep(is_pep, score)
      }
      CheckKind::AdverseMedia => {
        let severity = (a < 0.03).then(|| match (b * 3.0) as u32 {
          0 => RiskLevel::Low,
          1 => RiskLevel::Medium,
          _ => RiskLevel::High,
        });
        let articles = if severity.is_some() { (a * 1000.0) as u32 % 5 + 1 } else { 0 };
        adverse_media(severity, articles)
      }
      CheckKind::IdentityVerification => identity(a * 100.0),
      CheckKind::Fraud => fraud(a * 100.0),
      CheckKind::Credit => credit((a * 400.0) as u32 + 400),
      CheckKind::Other(name) => {
        return Err(ScreeningError::Provider(format!("no stub for check kind {name}")));
      }
    };
    Ok(v)
  }
}

#[async_trait]
impl Screener for StubScreener {
  fn kind(&self) -> CheckKind { self.kind.clone() }

  async fn execute(
    &self,
    subject: &ScreeningSubject,
    profile: RiskProfile,
  ) -> Result<CheckOutcome, ScreeningError> {
    if subject.subject_id.trim().is_empty() {
      return Err(ScreeningError::InvalidSubject("empty subject id".into()));
    }
    if !self.latency.is_zero() {
      tokio::time::sleep(self.latency).await;
    }
    let v = self.verdict(subject)?;
    let mut details = v.details;
    if let Some(obj) = details.as_object_mut() {
      obj.insert("profile".into(), json!(profile));
    }
    Ok(CheckOutcome {
      kind: self.kind.clone(),
      status: v.status.to_owned(),
      risk_level: v.level,
      score: Some(v.score),
      recommendations: v.recommendations.into_iter().map(str::to_owned).collect(),
      details,
      error: None,
      checked_at: self.clock.now(),
    })
  }
}

impl ScreenerRegistry {
  /// A registry with a stub for every built-in kind.
  pub fn with_stubs(clock: Arc<dyn Clock>, latency: Duration) -> Self {
    let mut registry = Self::new();
    for kind in [
      CheckKind::Sanctions,
      CheckKind::Pep,
      CheckKind::AdverseMedia,
      CheckKind::IdentityVerification,
      CheckKind::Fraud,
      CheckKind::Credit,
    ] {
      registry.register(Arc::new(StubScreener::new(kind, clock.clone()).with_latency(latency)));
    }
    registry
  }
}
