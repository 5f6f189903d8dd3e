//! Parallel check execution and fail-safe risk reduction.

use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;
use vouch_core::{
  check::{AggregatedRisk, CheckKind, CheckOutcome, RiskProfile, ScreeningSubject},
  clock::Clock,
  screener::Screener,
};

/// Screeners keyed by the kind they handle. Registering a second screener for
/// a kind replaces the first.
#[derive(Default, Clone)]
pub struct ScreenerRegistry {
  screeners: HashMap<CheckKind, Arc<dyn Screener>>,
}

impl ScreenerRegistry {
  pub fn new() -> Self { Self::default() }

  pub fn register(&mut self, screener: Arc<dyn Screener>) -> &mut Self {
    self.screeners.insert(screener.kind(), screener);
    self
  }

  pub fn get(&self, kind: &CheckKind) -> Option<Arc<dyn Screener>> {
    self.screeners.get(kind).cloned()
  }

  pub fn kinds(&self) -> impl Iterator<Item = &CheckKind> { self.screeners.keys() }
}

impl std::fmt::Debug for ScreenerRegistry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ScreenerRegistry")
      .field("kinds", &self.screeners.keys().collect::<Vec<_>>())
      .finish()
  }
}

pub struct RiskAggregator {
  registry: Arc<ScreenerRegistry>,
  clock:    Arc<dyn Clock>,
  timeout:  Duration,
}

impl RiskAggregator {
  pub fn new(registry: Arc<ScreenerRegistry>, clock: Arc<dyn Clock>, timeout: Duration) -> Self {
    Self { registry, clock, timeout }
  }

  /// Run every requested check concurrently and reduce the outcomes.
  ///
  /// Never fails: a check that errors, panics, times out or has no screener
  /// becomes a `failed` outcome with `unknown` risk. `per_check` follows the
  /// order of `kinds` regardless of completion order. An empty `kinds` runs
  /// [`CheckKind::default_set`].
  pub async fn run_checks(
    &self,
    run_id: Uuid,
    subject: &ScreeningSubject,
    kinds: &[CheckKind],
    profile: RiskProfile,
  ) -> AggregatedRisk {
    let kinds = if kinds.is_empty() { CheckKind::default_set() } else { kinds.to_vec() };
    let started_at = self.clock.now();
    let started = Instant::now();

    let handles: Vec<_> = kinds
      .iter()
      .map(|kind| {
        let screener = self.registry.get(kind);
        let subject = subject.clone();
        let timeout = self.timeout;
        let kind = kind.clone();
        tokio::spawn(async move {
          let Some(screener) = screener else {
            return Err(format!("no screener registered for {kind}"));
          };
          match tokio::time::timeout(timeout, screener.execute(&subject, profile)).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("timed out after {} ms", timeout.as_millis())),
          }
        })
      })
      .collect();

    let mut per_check = Vec::with_capacity(kinds.len());
    for (kind, handle) in kinds.into_iter().zip(handles) {
      let outcome = match handle.await {
        Ok(Ok(mut outcome)) => {
          debug!(%run_id, %kind, risk = ?outcome.risk_level, "check completed");
          outcome.kind = kind;
          outcome
        }
        Ok(Err(error)) => {
          warn!(%run_id, %kind, %error, "check failed");
          CheckOutcome::failed(kind, error, self.clock.now())
        }
        Err(join) => {
          warn!(%run_id, %kind, error = %join, "check task aborted");
          CheckOutcome::failed(kind, "check task aborted", self.clock.now())
        }
      };
      per_check.push(outcome);
    }

    let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    AggregatedRisk::from_outcomes(run_id, per_check, started_at, self.clock.now(), duration_ms)
  }
}
