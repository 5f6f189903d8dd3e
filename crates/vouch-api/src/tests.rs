//! Router tests driven through `tower::ServiceExt::oneshot`.

use std::sync::Arc;

use argon2::{Argon2, PasswordHasher, password_hash::SaltString};
use async_trait::async_trait;
use axum::{
  Router,
  body::Body,
  http::{Request, StatusCode, header},
};
use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use chrono::Utc;
use rand_core::OsRng;
use serde_json::{Value, json};
use tower::ServiceExt as _;
use vouch_core::{
  check::{CheckKind, CheckOutcome, RiskLevel, RiskProfile, ScreeningSubject},
  clock::ManualClock,
  screener::{Screener, ScreeningError},
};
use vouch_engine::{
  Engine, EngineConfig, EngineDeps, MemoryStore, ScreenerRegistry,
  sinks::{RecordingAuditSink, RecordingNotifier},
};

use crate::{AppState, Institution, api_router};

struct Clear(CheckKind);

#[async_trait]
impl Screener for Clear {
  fn kind(&self) -> CheckKind { self.0.clone() }

  async fn execute(
    &self,
    _subject: &ScreeningSubject,
    _profile: RiskProfile,
  ) -> Result<CheckOutcome, ScreeningError> {
    Ok(CheckOutcome {
      kind:            self.0.clone(),
      status:          "clear".into(),
      risk_level:      RiskLevel::Low,
      score:           Some(1.0),
      recommendations: vec![],
      details:         Value::Null,
      error:           None,
      checked_at:      Utc::now(),
    })
  }
}

fn institution(id: &str, password: &str) -> Institution {
  let salt = SaltString::generate(&mut OsRng);
  let hash = Argon2::default()
    .hash_password(password.as_bytes(), &salt)
    .unwrap()
    .to_string();
  Institution { id: id.into(), username: id.into(), password_hash: hash }
}

fn app() -> Router {
  let mut screeners = ScreenerRegistry::new();
  for kind in CheckKind::default_set() {
    screeners.register(Arc::new(Clear(kind)));
  }
  let engine = Engine::new(Arc::new(MemoryStore::new()), EngineDeps {
    clock:     Arc::new(ManualClock::default()),
    audit:     Arc::new(RecordingAuditSink::default()),
    notifier:  Arc::new(RecordingNotifier::default()),
    screeners,
    config:    EngineConfig::default(),
  });
  api_router(AppState::new(engine, vec![
    institution("bank-a", "secret-a"),
    institution("bank-b", "secret-b"),
  ]))
}

fn auth(user: &str) -> String {
  let pass = if user == "bank-a" { "secret-a" } else { "secret-b" };
  format!("Basic {}", B64.encode(format!("{user}:{pass}")))
}

async fn call(
  app: &Router,
  user: &str,
  method: &str,
  uri: &str,
  body: Option<Value>,
) -> (StatusCode, Value) {
  let builder = Request::builder()
    .method(method)
    .uri(uri)
    .header(header::AUTHORIZATION, auth(user));
  let req = match body {
    Some(b) => builder
      .header(header::CONTENT_TYPE, "application/json")
      .body(Body::from(b.to_string()))
      .unwrap(),
    None => builder.body(Body::empty()).unwrap(),
  };
  let resp = app.clone().oneshot(req).await.unwrap();
  let status = resp.status();
  let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
  let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
  (status, value)
}

// ─── Auth ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn requests_without_credentials_are_rejected() {
  let app = app();
  let req = Request::builder().uri("/consents").body(Body::empty()).unwrap();
  let resp = app.oneshot(req).await.unwrap();
  assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
  assert!(resp.headers().contains_key(header::WWW_AUTHENTICATE));
}

// ─── Consents ────────────────────────────────────────────────────────────────

async fn approved_grant(app: &Router, user: &str, categories: &[&str]) -> (String, String) {
  let (status, created) = call(app, user, "POST", "/consents", Some(json!({
    "subjectId": "cust-1",
    "categories": categories,
    "purpose": "onboarding",
    "ttlSeconds": 86_400,
  })))
  .await;
  assert_eq!(status, StatusCode::CREATED);
  assert_eq!(created["status"], "pending");
  let id = created["grantId"].as_str().unwrap().to_owned();
  let token = created["token"].as_str().unwrap().to_owned();

  let (status, approved) =
    call(app, user, "POST", &format!("/consents/{id}/approve"), Some(json!({}))).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(approved["status"], "approved");
  (id, token)
}

#[tokio::test]
async fn consent_validation_reports_outcomes_in_band() {
  let app = app();
  let (id, token) = approved_grant(&app, "bank-a", &["identity", "contact"]).await;

  let (status, ok) = call(
    &app,
    "bank-a",
    "GET",
    &format!("/consents/validate?token={token}&purpose=onboarding&categories=identity"),
    None,
  )
  .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(ok["valid"], true);
  assert_eq!(ok["allowedCategories"], json!(["identity"]));

  let (status, missing) = call(
    &app,
    "bank-a",
    "GET",
    &format!("/consents/validate?token={token}&categories=identity,kyc"),
    None,
  )
  .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(missing["valid"], false);
  assert_eq!(missing["error"], "INSUFFICIENT_SCOPE");
  assert_eq!(missing["missingCategories"], json!(["kyc"]));

  let (status, revoked) = call(
    &app,
    "bank-a",
    "POST",
    &format!("/consents/{id}/revoke"),
    Some(json!({ "reason": "customer request" })),
  )
  .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(revoked["status"], "revoked");
  assert!(revoked["revokedAt"].is_string());

  let (_, after) =
    call(&app, "bank-a", "GET", &format!("/consents/validate?token={token}"), None).await;
  assert_eq!(after["valid"], false);
  assert_eq!(after["error"], "INVALID_STATUS");
}

#[tokio::test]
async fn grants_are_scoped_to_their_requester() {
  let app = app();
  let (id, token) = approved_grant(&app, "bank-a", &["identity"]).await;

  let (status, body) = call(&app, "bank-b", "GET", &format!("/consents/{id}"), None).await;
  assert_eq!(status, StatusCode::FORBIDDEN);
  assert_eq!(body["error"], "ACCESS_DENIED");

  let (status, body) =
    call(&app, "bank-b", "GET", &format!("/consents/validate?token={token}"), None).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["error"], "ACCESS_DENIED");

  let (_, mine) = call(&app, "bank-b", "GET", "/consents", None).await;
  assert_eq!(mine, json!([]));
  let (_, theirs) = call(&app, "bank-a", "GET", "/consents?status=approved", None).await;
  assert_eq!(theirs.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn unknown_grant_is_404_and_bad_body_is_400() {
  let app = app();
  let (status, body) =
    call(&app, "bank-a", "GET", &format!("/consents/{}", uuid::Uuid::new_v4()), None).await;
  assert_eq!(status, StatusCode::NOT_FOUND);
  assert_eq!(body["error"], "NOT_FOUND");

  let (status, body) =
    call(&app, "bank-a", "POST", "/consents", Some(json!({ "subjectId": "cust-1" }))).await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert_eq!(body["error"], "VALIDATION_FAILED");

  let (status, _) = call(&app, "bank-a", "POST", "/consents", Some(json!({
    "subjectId": "cust-1",
    "categories": [],
    "purpose": "onboarding",
  })))
  .await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn out_of_range_durations_are_validation_failures() {
  let app = app();
  for ttl in [json!(10_000_000_000_000_i64), json!(i64::MAX)] {
    let (status, body) = call(&app, "bank-a", "POST", "/consents", Some(json!({
      "subjectId": "cust-1",
      "categories": ["kyc"],
      "purpose": "onboarding",
      "ttlSeconds": ttl,
    })))
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "VALIDATION_FAILED");

    let (status, body) = call(&app, "bank-a", "POST", "/sessions", Some(json!({
      "subjectId": "cust-1",
      "kind": { "type": "checks" },
      "ttlSeconds": ttl,
    })))
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "VALIDATION_FAILED");
  }

  for path in ["/consents/stats", "/checks/stats", "/sessions/stats"] {
    let (status, stats) =
      call(&app, "bank-a", "GET", &format!("{path}?timeframe=1000000000d"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["timeframe"], "30d");
  }
}

// ─── Checks ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn check_run_is_stored_and_counted() {
  let app = app();
  let (status, run) = call(&app, "bank-a", "POST", "/checks", Some(json!({
    "subject": { "subjectId": "cust-1", "givenName": "Ada", "familyName": "Lovelace" },
    "checks": ["sanctions", "pep"],
  })))
  .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(run["overallRisk"], "low");
  assert_eq!(run["perCheck"].as_array().unwrap().len(), 2);
  assert_eq!(run["perCheck"][0]["kind"], "sanctions");
  let run_id = run["runId"].as_str().unwrap().to_owned();

  let (status, stored) = call(&app, "bank-a", "GET", &format!("/checks/{run_id}"), None).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(stored["runId"], run_id);

  let (status, _) = call(&app, "bank-b", "GET", &format!("/checks/{run_id}"), None).await;
  assert_eq!(status, StatusCode::FORBIDDEN);

  let (_, stats) = call(&app, "bank-a", "GET", "/checks/stats?timeframe=1h", None).await;
  assert_eq!(stats["timeframe"], "1h");
  assert_eq!(stats["totalRuns"], 1);
  assert_eq!(stats["byRisk"]["low"], 1);
}

// ─── Sessions ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn identification_session_lifecycle() {
  let app = app();
  let (status, created) = call(&app, "bank-a", "POST", "/sessions", Some(json!({
    "subjectId": "cust-1",
    "kind": { "type": "identification", "method": "document_verification" },
    "ttlSeconds": 1800,
  })))
  .await;
  assert_eq!(status, StatusCode::CREATED);
  let id = created["sessionId"].as_str().unwrap().to_owned();
  assert!(created["sessionUrl"].as_str().unwrap().ends_with(&id));

  let (status, step) = call(
    &app,
    "bank-a",
    "POST",
    &format!("/sessions/{id}/steps"),
    Some(json!({ "step": "document_capture", "status": "completed" })),
  )
  .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(step["accepted"], true);
  assert_eq!(step["status"], "in_progress");

  let (status, done) = call(
    &app,
    "bank-a",
    "POST",
    &format!("/sessions/{id}/complete"),
    Some(json!({
      "type": "identification",
      "data": {
        "documentInfo": {
          "documentType": "passport",
          "documentNumber": "C01X00T47",
          "issuingCountry": "DE"
        },
        "verificationScore": 96.0
      }
    })),
  )
  .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(done["status"], "completed");
  assert_eq!(done["progress"], 100);

  let (status, again) = call(
    &app,
    "bank-a",
    "POST",
    &format!("/sessions/{id}/fail"),
    Some(json!({ "reason": "late" })),
  )
  .await;
  assert_eq!(status, StatusCode::CONFLICT);
  assert_eq!(again["error"], "INVALID_TRANSITION");
}

#[tokio::test]
async fn third_party_reads_session_with_consent() {
  let app = app();
  let (_, run) = call(&app, "bank-a", "POST", "/checks", Some(json!({
    "subject": { "subjectId": "cust-1" },
  })))
  .await;
  let session_id = run["runId"].as_str().unwrap().to_owned();

  let (status, denied) =
    call(&app, "bank-b", "GET", &format!("/sessions/{session_id}"), None).await;
  assert_eq!(status, StatusCode::FORBIDDEN);
  assert_eq!(denied["error"], "ACCESS_DENIED");

  let (_, token) = approved_grant(&app, "bank-b", &["kyc"]).await;
  let (status, view) = call(
    &app,
    "bank-b",
    "GET",
    &format!("/sessions/{session_id}?consentToken={token}&purpose=onboarding"),
    None,
  )
  .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(view["status"], "completed");
  assert_eq!(view["result"]["type"], "checks");
}

#[tokio::test]
async fn cancelled_session_rejects_completion() {
  let app = app();
  let (_, created) = call(&app, "bank-a", "POST", "/sessions", Some(json!({
    "subjectId": "cust-9",
    "kind": { "type": "checks" },
  })))
  .await;
  let id = created["sessionId"].as_str().unwrap().to_owned();

  let (status, cancelled) =
    call(&app, "bank-a", "POST", &format!("/sessions/{id}/cancel"), Some(json!({}))).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(cancelled["status"], "cancelled");

  let (status, body) = call(
    &app,
    "bank-a",
    "POST",
    &format!("/sessions/{id}/fail"),
    Some(json!({ "reason": "provider error" })),
  )
  .await;
  assert_eq!(status, StatusCode::CONFLICT);
  assert_eq!(body["error"], "INVALID_TRANSITION");

  let (_, stats) = call(&app, "bank-a", "GET", "/sessions/stats", None).await;
  assert_eq!(stats["total"], 1);
  assert_eq!(stats["byStatus"]["cancelled"], 1);
}
