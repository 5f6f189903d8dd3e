//! Engine tuning knobs, deserialised from the `[engine]` table of the server
//! configuration.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  /// Upper bound for a single screener call.
  pub check_timeout_ms:        u64,
  pub max_session_ttl_secs:    i64,
  /// TTL of the checks session created by a standalone run.
  pub checks_session_ttl_secs: i64,
  pub identification_base_url: String,
  pub signature_base_url:      String,
  /// Re-read attempts after a lost compare-and-swap on a consent grant.
  pub cas_retries:             u32,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      check_timeout_ms:        5_000,
      max_session_ttl_secs:    7 * 24 * 60 * 60,
      checks_session_ttl_secs: 60 * 60,
      identification_base_url: "http://localhost:8080/identify".into(),
      signature_base_url:      "http://localhost:8080/sign".into(),
      cas_retries:             3,
    }
  }
}

impl EngineConfig {
  pub fn check_timeout(&self) -> std::time::Duration {
    std::time::Duration::from_millis(self.check_timeout_ms)
  }

  pub fn max_session_ttl(&self) -> chrono::Duration {
    chrono::Duration::seconds(self.max_session_ttl_secs)
  }

  pub fn checks_session_ttl(&self) -> chrono::Duration {
    chrono::Duration::seconds(self.checks_session_ttl_secs)
  }
}
