//! The per-kind screening provider seam.

use async_trait::async_trait;

use crate::check::{CheckKind, CheckOutcome, RiskProfile, ScreeningSubject};

#[derive(Debug, thiserror::Error)]
pub enum ScreeningError {
  #[error("provider error: {0}")]
  Provider(String),

  #[error("provider unavailable: {0}")]
  Unavailable(String),

  #[error("subject cannot be screened: {0}")]
  InvalidSubject(String),
}

/// One kind of check against one subject. Implementations must be safe to
/// run concurrently with other screeners for the same subject.
#[async_trait]
pub trait Screener: Send + Sync {
  fn kind(&self) -> CheckKind;

  async fn execute(
    &self,
    subject: &ScreeningSubject,
    profile: RiskProfile,
  ) -> Result<CheckOutcome, ScreeningError>;
}
