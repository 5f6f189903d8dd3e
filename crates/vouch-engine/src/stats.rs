//! Per-institution statistics over sessions, check runs and consents.

use std::{
  collections::{BTreeMap, HashMap},
  fmt,
};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use vouch_core::{
  Result,
  check::OverallRisk,
  consent::{ConsentGrant, GrantStatus},
  session::{SessionKind, SessionResult, SessionStatus, VerificationSession},
  store::{GrantStore, SessionStore},
};

use crate::engine::Engine;

// ─── Timeframe ───────────────────────────────────────────────────────────────

/// A look-back window written as `<n>m`, `<n>h` or `<n>d`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeframe {
  amount: i64,
  unit:   char,
  window: Duration,
}

impl Default for Timeframe {
  fn default() -> Self { Self { amount: 30, unit: 'd', window: Duration::days(30) } }
}

impl Timeframe {
  /// Longest window accepted; longer ones are treated as unparsable.
  pub const MAX_DAYS: i64 = 36_500;

  /// Anything unparsable or out of range falls back to 30 days.
  pub fn parse(raw: &str) -> Self {
    let raw = raw.trim();
    let Some(unit) = raw.chars().last().filter(|c| matches!(c, 'm' | 'h' | 'd')) else {
      return Self::default();
    };
    let digits = &raw[..raw.len() - 1];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
      return Self::default();
    }
    let window = digits.parse::<i64>().ok().and_then(|amount| {
      let window = match unit {
        'm' => Duration::try_minutes(amount),
        'h' => Duration::try_hours(amount),
        _ => Duration::try_days(amount),
      }?;
      Some((amount, window))
    });
    match window {
      Some((amount, window))
        if amount > 0 && window <= Duration::days(Self::MAX_DAYS) =>
      {
        Self { amount, unit, window }
      }
      _ => Self::default(),
    }
  }

  pub fn duration(&self) -> Duration { self.window }

  /// Start of the window ending at `now`.
  pub fn since(&self, now: DateTime<Utc>) -> DateTime<Utc> {
    now.checked_sub_signed(self.window).unwrap_or(DateTime::<Utc>::MIN_UTC)
  }
}

impl fmt::Display for Timeframe {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}{}", self.amount, self.unit)
  }
}

fn percent(part: usize, whole: usize) -> f64 {
  if whole == 0 {
    return 0.0;
  }
  (part as f64 / whole as f64 * 10_000.0).round() / 100.0
}

fn mean(values: &[f64]) -> Option<f64> {
  if values.is_empty() {
    return None;
  }
  Some((values.iter().sum::<f64>() / values.len() as f64 * 100.0).round() / 100.0)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamedCount {
  pub name:  String,
  pub count: usize,
}

fn top(counts: HashMap<String, usize>, n: usize) -> Vec<NamedCount> {
  let mut entries: Vec<NamedCount> = counts
    .into_iter()
    .map(|(name, count)| NamedCount { name, count })
    .collect();
  entries.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
  entries.truncate(n);
  entries
}

// ─── Sessions ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
  pub timeframe:               String,
  pub total:                   usize,
  pub by_status:               BTreeMap<&'static str, usize>,
  pub by_kind:                 BTreeMap<&'static str, usize>,
  /// Percentage of sessions that completed.
  pub success_rate:            f64,
  pub average_completion_secs: Option<f64>,
}

pub fn session_stats(timeframe: Timeframe, sessions: &[VerificationSession]) -> SessionStats {
  let mut by_status: BTreeMap<&'static str, usize> =
    SessionStatus::ALL.iter().map(|s| (s.as_str(), 0)).collect();
  let mut by_kind: BTreeMap<&'static str, usize> =
    SessionKind::LABELS.iter().map(|k| (*k, 0)).collect();
  let mut durations = Vec::new();

  for s in sessions {
    *by_status.entry(s.status.as_str()).or_default() += 1;
    *by_kind.entry(s.kind.label()).or_default() += 1;
    if s.status == SessionStatus::Completed
      && let Some(done) = s.completed_at
    {
      durations.push((done - s.created_at).num_milliseconds() as f64 / 1000.0);
    }
  }

  SessionStats {
    timeframe: timeframe.to_string(),
    total: sessions.len(),
    success_rate: percent(by_status[SessionStatus::Completed.as_str()], sessions.len()),
    by_status,
    by_kind,
    average_completion_secs: mean(&durations),
  }
}

// ─── Checks ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckStats {
  pub timeframe:           String,
  pub total_runs:          usize,
  pub by_risk:             BTreeMap<&'static str, usize>,
  pub by_check_kind:       BTreeMap<String, usize>,
  pub failed_checks:       usize,
  pub average_duration_ms: Option<f64>,
}

pub fn check_stats(timeframe: Timeframe, sessions: &[VerificationSession]) -> CheckStats {
  let mut by_risk: BTreeMap<&'static str, usize> =
    OverallRisk::ALL.iter().map(|r| (r.as_str(), 0)).collect();
  let mut by_check_kind: BTreeMap<String, usize> = BTreeMap::new();
  let mut failed_checks = 0;
  let mut durations = Vec::new();
  let mut total_runs = 0;

  for run in sessions.iter().filter_map(|s| match &s.result {
    Some(SessionResult::Checks(run)) => Some(run),
    _ => None,
  }) {
    total_runs += 1;
    *by_risk.entry(run.overall_risk.as_str()).or_default() += 1;
    for outcome in &run.per_check {
      *by_check_kind.entry(outcome.kind.to_string()).or_default() += 1;
      if outcome.is_failed() {
        failed_checks += 1;
      }
    }
    durations.push(run.duration_ms as f64);
  }

  CheckStats {
    timeframe: timeframe.to_string(),
    total_runs,
    by_risk,
    by_check_kind,
    failed_checks,
    average_duration_ms: mean(&durations),
  }
}

// ─── Consents ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentStats {
  pub timeframe:             String,
  pub total:                 usize,
  pub by_status:             BTreeMap<&'static str, usize>,
  /// Share of decided grants that were approved.
  pub approval_rate:         f64,
  pub top_categories:        Vec<NamedCount>,
  pub top_purposes:          Vec<NamedCount>,
  pub average_approval_secs: Option<f64>,
}

fn was_approved(g: &ConsentGrant) -> bool {
  g.decided_at.is_some() && g.status != GrantStatus::Rejected
}

pub fn consent_stats(timeframe: Timeframe, grants: &[ConsentGrant]) -> ConsentStats {
  let mut by_status: BTreeMap<&'static str, usize> =
    GrantStatus::ALL.iter().map(|s| (s.as_str(), 0)).collect();
  let mut categories: HashMap<String, usize> = HashMap::new();
  let mut purposes: HashMap<String, usize> = HashMap::new();
  let mut approval_secs = Vec::new();
  let mut decided = 0;
  let mut approved = 0;

  for g in grants {
    *by_status.entry(g.status.as_str()).or_default() += 1;
    for c in &g.categories {
      *categories.entry(c.clone()).or_default() += 1;
    }
    *purposes.entry(g.purpose.clone()).or_default() += 1;

    if let Some(decided_at) = g.decided_at {
      decided += 1;
      if was_approved(g) {
        approved += 1;
        approval_secs.push((decided_at - g.issued_at).num_milliseconds() as f64 / 1000.0);
      }
    }
  }

  ConsentStats {
    timeframe: timeframe.to_string(),
    total: grants.len(),
    by_status,
    approval_rate: percent(approved, decided),
    top_categories: top(categories, 5),
    top_purposes: top(purposes, 5),
    average_approval_secs: mean(&approval_secs),
  }
}

// ─── Engine entry points ─────────────────────────────────────────────────────

impl<S: GrantStore + SessionStore> Engine<S> {
  pub async fn session_stats(&self, caller: &str, timeframe: Timeframe) -> Result<SessionStats> {
    let since = timeframe.since(self.sessions.now());
    let sessions = self.sessions.list_since(caller, since).await?;
    Ok(session_stats(timeframe, &sessions))
  }

  pub async fn check_stats(&self, caller: &str, timeframe: Timeframe) -> Result<CheckStats> {
    let since = timeframe.since(self.sessions.now());
    let sessions = self.sessions.list_since(caller, since).await?;
    Ok(check_stats(timeframe, &sessions))
  }

  pub async fn consent_stats(&self, caller: &str, timeframe: Timeframe) -> Result<ConsentStats> {
    let since = timeframe.since(self.consents.now());
    let grants = self.consents.list_since(caller, since).await?;
    Ok(consent_stats(timeframe, &grants))
  }
}

#[cfg(test)]
mod tests {
  use uuid::Uuid;
  use vouch_core::{
    check::{AggregatedRisk, CheckKind, CheckOutcome},
    consent::{ApprovalDecision, NewGrant},
    session::{NewSession, SessionResult},
  };

  use super::*;

  fn t0() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2025-05-01T10:00:00Z")
      .unwrap()
      .with_timezone(&Utc)
  }

  #[test]
  fn timeframe_parsing() {
    assert_eq!(Timeframe::parse("7d").duration(), Duration::days(7));
    assert_eq!(Timeframe::parse("12h").duration(), Duration::hours(12));
    assert_eq!(Timeframe::parse("90m").duration(), Duration::minutes(90));
    assert_eq!(Timeframe::parse("soon"), Timeframe::default());
    assert_eq!(Timeframe::parse("-3d"), Timeframe::default());
    assert_eq!(Timeframe::parse(""), Timeframe::default());
    assert_eq!(Timeframe::default().to_string(), "30d");
  }

  #[test]
  fn oversized_timeframes_fall_back_to_default() {
    for raw in ["1000000000d", "999999999999999d", "99999999999999999999h", "36501d"] {
      assert_eq!(Timeframe::parse(raw), Timeframe::default(), "{raw}");
    }
    assert_eq!(Timeframe::parse("36500d").duration(), Duration::days(36_500));
    assert_eq!(Timeframe::parse("36500d").since(t0()), t0() - Duration::days(36_500));
  }

  #[test]
  fn session_counts_and_rates() {
    let mut sessions = Vec::new();
    for i in 0..4 {
      let mut s = VerificationSession::new(
        NewSession::new("bank-a", format!("cust-{i}"), SessionKind::Checks, Duration::hours(1)),
        t0(),
      )
      .unwrap();
      if i < 3 {
        let run = AggregatedRisk::from_outcomes(Uuid::new_v4(), vec![], t0(), t0(), 10);
        s.complete(SessionResult::Checks(run), t0() + Duration::seconds(30 * (i + 1)))
          .unwrap();
      }
      sessions.push(s);
    }

    let stats = session_stats(Timeframe::default(), &sessions);
    assert_eq!(stats.total, 4);
    assert_eq!(stats.by_status["completed"], 3);
    assert_eq!(stats.by_status["initiated"], 1);
    assert_eq!(stats.by_kind["checks"], 4);
    assert_eq!(stats.success_rate, 75.0);
    assert_eq!(stats.average_completion_secs, Some(60.0));
  }

  #[test]
  fn check_counts_by_risk_and_kind() {
    let mut s = VerificationSession::new(
      NewSession::new("bank-a", "cust-1", SessionKind::Checks, Duration::hours(1)),
      t0(),
    )
    .unwrap();
    let run = AggregatedRisk::from_outcomes(
      Uuid::new_v4(),
      vec![
        CheckOutcome::failed(CheckKind::Sanctions, "down", t0()),
        CheckOutcome::failed(CheckKind::Pep, "down", t0()),
      ],
      t0(),
      t0(),
      40,
    );
    s.complete(SessionResult::Checks(run), t0()).unwrap();

    let stats = check_stats(Timeframe::default(), &[s]);
    assert_eq!(stats.total_runs, 1);
    assert_eq!(stats.by_risk["medium"], 1);
    assert_eq!(stats.by_check_kind["pep"], 1);
    assert_eq!(stats.failed_checks, 2);
    assert_eq!(stats.average_duration_ms, Some(40.0));
  }

  #[test]
  fn consent_rates_and_tops() {
    let mk = |categories: &[&str], purpose: &str| {
      ConsentGrant::new(
        NewGrant {
          requester:  "bank-a".into(),
          subject_id: "cust-1".into(),
          categories: categories.iter().map(|c| c.to_string()).collect(),
          purpose:    purpose.into(),
          ttl:        Duration::days(1),
        },
        t0(),
      )
      .unwrap()
    };
    let mut a = mk(&["identity", "address"], "onboarding");
    a.apply_decision(&ApprovalDecision::default(), t0() + Duration::seconds(20)).unwrap();
    let mut b = mk(&["identity"], "onboarding");
    b.apply_decision(
      &ApprovalDecision { approved: false, ..ApprovalDecision::default() },
      t0() + Duration::seconds(5),
    )
    .unwrap();
    let c = mk(&["kyc"], "credit_check");

    let stats = consent_stats(Timeframe::default(), &[a, b, c]);
    assert_eq!(stats.total, 3);
    assert_eq!(stats.approval_rate, 50.0);
    assert_eq!(stats.top_categories[0], NamedCount { name: "identity".into(), count: 2 });
    assert_eq!(stats.top_purposes[0].name, "onboarding");
    assert_eq!(stats.average_approval_secs, Some(20.0));
  }
}
