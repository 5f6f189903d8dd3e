//! Assembly of the Vouch HTTP service: store selection, engine wiring and
//! the outer router.

pub mod config;
pub mod webhook;

use std::{sync::Arc, time::Duration};

use anyhow::Context as _;
use axum::{Json, Router, routing::get};
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use vouch_api::AppState;
use vouch_core::{
  audit::{AuditSink, Notifier},
  clock::SystemClock,
  store::{GrantStore, SessionStore},
};
use vouch_engine::{Engine, EngineDeps, MemoryStore, ScreenerRegistry, sinks::TracingAuditSink};
use vouch_store_sqlite::SqliteStore;

use crate::{
  config::{ServerConfig, expand_tilde},
  webhook::WebhookNotifier,
};

/// `GET /health`; unauthenticated.
async fn health() -> Json<Value> { Json(json!({ "status": "ok" })) }

/// Build the complete application router for `cfg`.
pub async fn build_app(cfg: &ServerConfig) -> anyhow::Result<Router> {
  if cfg.institutions.is_empty() {
    warn!("no institutions configured; every API request will be rejected");
  }

  let notifier: Arc<dyn Notifier> = Arc::new(
    WebhookNotifier::new(Duration::from_millis(cfg.webhook_timeout_ms))
      .context("failed to build webhook client")?,
  );

  let api = if cfg.in_memory() {
    info!("using in-memory store");
    let store = Arc::new(MemoryStore::new());
    api_for(cfg, store, Arc::new(TracingAuditSink), notifier)
  } else {
    let path = expand_tilde(&cfg.store_path);
    let store = SqliteStore::open(&path)
      .await
      .with_context(|| format!("failed to open store at {path:?}"))?;
    info!(?path, "opened sqlite store");
    let store = Arc::new(store);
    api_for(cfg, store.clone(), store, notifier)
  };

  Ok(
    Router::new()
      .route("/health", get(health))
      .merge(api)
      .layer(TraceLayer::new_for_http()),
  )
}

fn api_for<S>(
  cfg: &ServerConfig,
  store: Arc<S>,
  audit: Arc<dyn AuditSink>,
  notifier: Arc<dyn Notifier>,
) -> Router
where
  S: GrantStore + SessionStore + 'static,
{
  let clock = Arc::new(SystemClock);
  let screeners =
    ScreenerRegistry::with_stubs(clock.clone(), Duration::from_millis(cfg.stub_latency_ms));
  let engine = Engine::new(store, EngineDeps {
    clock,
    audit,
    notifier,
    screeners,
    config: cfg.engine.clone(),
  });
  vouch_api::api_router(AppState::new(engine, cfg.institutions.clone()))
}

#[cfg(test)]
mod tests {
  use std::path::PathBuf;

  use axum::{body::Body, http::{Request, StatusCode}};
  use tower::ServiceExt as _;
  use vouch_engine::EngineConfig;

  use super::*;

  fn cfg(store_path: PathBuf) -> ServerConfig {
    ServerConfig {
      host:               "127.0.0.1".into(),
      port:               0,
      store_path,
      webhook_timeout_ms: 1_000,
      stub_latency_ms:    0,
      engine:             EngineConfig::default(),
      institutions:       vec![],
    }
  }

  async fn get(app: Router, uri: &str) -> StatusCode {
    let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
    app.oneshot(req).await.unwrap().status()
  }

  #[tokio::test]
  async fn health_is_public_and_api_is_not() {
    let app = build_app(&cfg(PathBuf::from(crate::config::IN_MEMORY))).await.unwrap();
    assert_eq!(get(app.clone(), "/health").await, StatusCode::OK);
    assert_eq!(get(app, "/sessions/stats").await, StatusCode::UNAUTHORIZED);
  }

  #[tokio::test]
  async fn sqlite_store_is_opened_from_path() {
    let path = std::env::temp_dir().join(format!("vouch-{}.db", uuid::Uuid::new_v4()));
    let app = build_app(&cfg(path.clone())).await.unwrap();
    assert_eq!(get(app, "/health").await, StatusCode::OK);
    assert!(path.exists());
    let _ = std::fs::remove_file(&path);
  }
}
