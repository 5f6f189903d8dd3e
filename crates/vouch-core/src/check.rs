//! Check outcomes and the fail-safe risk reduction.
//!
//! Risk levels form a total order `low < medium < high`. An `unknown` level
//! (which every failed check carries) counts as `medium` when reduced, so a
//! check that could not run never lowers the overall verdict.

use std::{fmt, str::FromStr};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Error;

// ─── Check kinds ─────────────────────────────────────────────────────────────

/// The kind of screening a check performs. Open set: unknown names are kept
/// verbatim in [`CheckKind::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CheckKind {
  Sanctions,
  Pep,
  AdverseMedia,
  IdentityVerification,
  Fraud,
  Credit,
  Other(String),
}

impl CheckKind {
  /// Kinds run when a request names none.
  pub fn default_set() -> Vec<CheckKind> {
    vec![
      Self::Sanctions,
      Self::Pep,
      Self::AdverseMedia,
      Self::IdentityVerification,
    ]
  }

  pub fn as_str(&self) -> &str {
    match self {
      Self::Sanctions => "sanctions",
      Self::Pep => "pep",
      Self::AdverseMedia => "adverse_media",
      Self::IdentityVerification => "identity_verification",
      Self::Fraud => "fraud",
      Self::Credit => "credit",
      Self::Other(s) => s,
    }
  }
}

impl From<String> for CheckKind {
  fn from(s: String) -> Self {
    match s.as_str() {
      "sanctions" => Self::Sanctions,
      "pep" => Self::Pep,
      "adverse_media" => Self::AdverseMedia,
      "identity_verification" => Self::IdentityVerification,
      "fraud" | "fraud_check" => Self::Fraud,
      "credit" | "credit_check" => Self::Credit,
      _ => Self::Other(s),
    }
  }
}

impl From<CheckKind> for String {
  fn from(k: CheckKind) -> Self { k.as_str().to_owned() }
}

impl fmt::Display for CheckKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

// ─── Risk ────────────────────────────────────────────────────────────────────

/// Per-check risk classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
  Low,
  Medium,
  High,
  Unknown,
}

impl RiskLevel {
  /// The level this outcome contributes to the overall verdict.
  pub fn effective(self) -> OverallRisk {
    match self {
      Self::Low => OverallRisk::Low,
      Self::Medium | Self::Unknown => OverallRisk::Medium,
      Self::High => OverallRisk::High,
    }
  }
}

/// The reduced verdict of a run. Ordered so that `max` is the fail-safe
/// combination.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum OverallRisk {
  #[default]
  Low,
  Medium,
  High,
}

impl OverallRisk {
  pub const ALL: [OverallRisk; 3] = [Self::Low, Self::Medium, Self::High];

  /// Reduce per-check levels: any high wins, then any medium (or unknown),
  /// else low. An empty input is low.
  pub fn reduce<I>(levels: I) -> Self
  where
    I: IntoIterator<Item = RiskLevel>,
  {
    levels
      .into_iter()
      .map(RiskLevel::effective)
      .max()
      .unwrap_or_default()
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Low => "low",
      Self::Medium => "medium",
      Self::High => "high",
    }
  }
}

impl fmt::Display for OverallRisk {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// How thorough the screening should be. Passed through to screeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskProfile {
  Simplified,
  #[default]
  Standard,
  Enhanced,
}

impl FromStr for RiskProfile {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self, Error> {
    match s {
      "simplified" => Ok(Self::Simplified),
      "standard" => Ok(Self::Standard),
      "enhanced" => Ok(Self::Enhanced),
      other => Err(Error::ValidationFailed(format!("unknown risk profile {other:?}"))),
    }
  }
}

// ─── Subject & outcomes ──────────────────────────────────────────────────────

/// What a screener gets to look at.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreeningSubject {
  pub subject_id:  String,
  pub given_name:  Option<String>,
  pub family_name: Option<String>,
  pub birth_date:  Option<NaiveDate>,
  #[serde(default)]
  pub nationality: Vec<String>,
}

impl ScreeningSubject {
  pub fn new(subject_id: impl Into<String>) -> Self {
    Self { subject_id: subject_id.into(), ..Self::default() }
  }

  /// "Family, Given" when both are known.
  pub fn display_name(&self) -> Option<String> {
    match (&self.family_name, &self.given_name) {
      (Some(f), Some(g)) => Some(format!("{f}, {g}")),
      (Some(n), None) | (None, Some(n)) => Some(n.clone()),
      (None, None) => None,
    }
  }
}

/// The result of one check. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckOutcome {
  pub kind:            CheckKind,
  pub status:          String,
  pub risk_level:      RiskLevel,
  pub score:           Option<f64>,
  #[serde(default)]
  pub recommendations: Vec<String>,
  /// Kind-specific detail (screened lists, matches, ratings, ...).
  #[serde(default)]
  pub details:         serde_json::Value,
  /// Set only when the check could not be executed.
  pub error:           Option<String>,
  pub checked_at:      DateTime<Utc>,
}

impl CheckOutcome {
  pub const FAILED: &'static str = "failed";

  /// Outcome synthesized for a check that errored, timed out or had no
  /// screener. Its `unknown` level reduces as at least medium.
  pub fn failed(kind: CheckKind, error: impl Into<String>, at: DateTime<Utc>) -> Self {
    let recommendation =
      format!("{kind} check could not be completed - manual review required");
    Self {
      kind,
      status: Self::FAILED.to_owned(),
      risk_level: RiskLevel::Unknown,
      score: None,
      recommendations: vec![recommendation],
      details: serde_json::Value::Null,
      error: Some(error.into()),
      checked_at: at,
    }
  }

  pub fn is_failed(&self) -> bool { self.error.is_some() }
}

/// Output of one risk-aggregation run, folded into the owning session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedRisk {
  pub run_id:          Uuid,
  pub overall_risk:    OverallRisk,
  /// One entry per requested check, in request order.
  pub per_check:       Vec<CheckOutcome>,
  pub recommendations: Vec<String>,
  pub duration_ms:     u64,
  pub started_at:      DateTime<Utc>,
  pub completed_at:    DateTime<Utc>,
}

impl AggregatedRisk {
  /// Fold ordered outcomes into a run result.
  pub fn from_outcomes(
    run_id: Uuid,
    per_check: Vec<CheckOutcome>,
    started_at: DateTime<Utc>,
    completed_at: DateTime<Utc>,
    duration_ms: u64,
  ) -> Self {
    let overall_risk = OverallRisk::reduce(per_check.iter().map(|o| o.risk_level));
    let recommendations = per_check
      .iter()
      .flat_map(|o| o.recommendations.iter().cloned())
      .collect();
    Self {
      run_id,
      overall_risk,
      per_check,
      recommendations,
      duration_ms,
      started_at,
      completed_at,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  use RiskLevel::*;

  fn outcome(kind: CheckKind, level: RiskLevel, recs: &[&str]) -> CheckOutcome {
    CheckOutcome {
      kind,
      status: "clear".into(),
      risk_level: level,
      score: None,
      recommendations: recs.iter().map(|r| r.to_string()).collect(),
      details: serde_json::Value::Null,
      error: None,
      checked_at: Utc::now(),
    }
  }

  #[test]
  fn all_low_is_low() {
    assert_eq!(OverallRisk::reduce([Low, Low, Low]), OverallRisk::Low);
    assert_eq!(OverallRisk::reduce([]), OverallRisk::Low);
  }

  #[test]
  fn any_high_is_high() {
    assert_eq!(OverallRisk::reduce([Low, High, Unknown]), OverallRisk::High);
    assert_eq!(OverallRisk::reduce([High]), OverallRisk::High);
  }

  #[test]
  fn unknown_counts_as_medium() {
    assert_eq!(OverallRisk::reduce([Low, Unknown]), OverallRisk::Medium);
  }

  #[test]
  fn reduction_is_monotone_in_every_position() {
    let levels = [Low, Medium, High, Unknown];
    let rank = |l: RiskLevel| l.effective();
    for a in levels {
      for b in levels {
        for c in levels {
          let base = OverallRisk::reduce([a, b, c]);
          for raised in levels {
            if rank(raised) > rank(b) {
              assert!(OverallRisk::reduce([a, raised, c]) >= base);
            }
          }
          // Order never matters.
          assert_eq!(base, OverallRisk::reduce([c, a, b]));
        }
      }
    }
  }

  #[test]
  fn check_kind_is_an_open_set() {
    let k: CheckKind = serde_json::from_str("\"fraud_check\"").unwrap();
    assert_eq!(k, CheckKind::Fraud);
    let custom: CheckKind = serde_json::from_str("\"watchlist_x\"").unwrap();
    assert_eq!(custom, CheckKind::Other("watchlist_x".into()));
    assert_eq!(serde_json::to_string(&CheckKind::AdverseMedia).unwrap(), "\"adverse_media\"");
  }

  #[test]
  fn aggregation_concatenates_recommendations_in_order() {
    let run = AggregatedRisk::from_outcomes(
      Uuid::new_v4(),
      vec![
        outcome(CheckKind::Sanctions, Medium, &["review name", "hold"]),
        outcome(CheckKind::Pep, Low, &[]),
        outcome(CheckKind::Fraud, Medium, &["hold"]),
      ],
      Utc::now(),
      Utc::now(),
      5,
    );
    assert_eq!(run.overall_risk, OverallRisk::Medium);
    assert_eq!(run.recommendations, vec!["review name", "hold", "hold"]);
  }

  #[test]
  fn failed_outcome_is_unknown_with_recommendation() {
    let o = CheckOutcome::failed(CheckKind::Fraud, "timed out", Utc::now());
    assert!(o.is_failed());
    assert_eq!(o.status, "failed");
    assert_eq!(o.risk_level.effective(), OverallRisk::Medium);
    assert_eq!(o.recommendations.len(), 1);
  }
}
