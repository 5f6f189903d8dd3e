//! Runtime configuration, deserialised from `config.toml` layered with
//! `VOUCH_*` environment variables.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::Deserialize;
use vouch_api::Institution;
use vouch_engine::EngineConfig;

/// `store_path` value that selects the in-memory store.
pub const IN_MEMORY: &str = ":memory:";

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  #[serde(default = "default_host")]
  pub host:               String,
  #[serde(default = "default_port")]
  pub port:               u16,
  /// SQLite file, or `:memory:` for a store that lives only as long as the
  /// process. A leading `~/` is expanded.
  #[serde(default = "default_store_path")]
  pub store_path:         PathBuf,
  #[serde(default = "default_webhook_timeout_ms")]
  pub webhook_timeout_ms: u64,
  /// Artificial latency added to every stub screener.
  #[serde(default)]
  pub stub_latency_ms:    u64,
  #[serde(default)]
  pub engine:             EngineConfig,
  #[serde(default)]
  pub institutions:       Vec<Institution>,
}

fn default_host() -> String { "127.0.0.1".into() }

fn default_port() -> u16 { 8080 }

fn default_store_path() -> PathBuf { PathBuf::from(IN_MEMORY) }

fn default_webhook_timeout_ms() -> u64 { 5_000 }

impl ServerConfig {
  /// Read `path` (optional) and the environment. Nested keys use a double
  /// underscore, e.g. `VOUCH_ENGINE__CHECK_TIMEOUT_MS=2000`.
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    let settings = config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(
        config::Environment::with_prefix("VOUCH")
          .prefix_separator("_")
          .separator("__")
          .try_parsing(true),
      )
      .build()
      .context("failed to read config file")?;

    settings
      .try_deserialize()
      .context("failed to deserialise ServerConfig")
  }

  pub fn in_memory(&self) -> bool { self.store_path.as_os_str() == IN_MEMORY }

  pub fn address(&self) -> String { format!("{}:{}", self.host, self.port) }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
