//! Outbound notification delivery.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use vouch_core::audit::{Notification, NotificationTarget, Notifier, SinkError};
use vouch_engine::sinks::LogNotifier;

/// POSTs notifications as JSON to webhook targets. Email targets have no
/// transport here and are handed to [`LogNotifier`].
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
  client: reqwest::Client,
}

impl WebhookNotifier {
  pub fn new(timeout: Duration) -> reqwest::Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .user_agent(concat!("vouch/", env!("CARGO_PKG_VERSION")))
      .build()?;
    Ok(Self { client })
  }
}

#[async_trait]
impl Notifier for WebhookNotifier {
  async fn notify(
    &self,
    target: &NotificationTarget,
    notification: &Notification,
  ) -> Result<(), SinkError> {
    let url = match target {
      NotificationTarget::Webhook { url } => url,
      NotificationTarget::Email { .. } => return LogNotifier.notify(target, notification).await,
    };

    let response = self
      .client
      .post(url)
      .json(notification)
      .send()
      .await
      .map_err(|e| {
        if e.is_timeout() {
          SinkError::Timeout
        } else {
          SinkError::Transport(e.to_string())
        }
      })?;

    let status = response.status();
    if !status.is_success() {
      return Err(SinkError::Rejected(status.as_u16()));
    }
    debug!(%url, session_id = %notification.session_id, "webhook delivered");
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use std::sync::{Arc, Mutex};

  use axum::{Json, Router, extract::State, http::StatusCode, routing::post};
  use chrono::Utc;
  use tokio::net::TcpListener;
  use vouch_core::session::SessionStatus;

  use super::*;

  fn notification() -> Notification {
    Notification {
      event:          "session_completed".into(),
      session_id:     uuid::Uuid::new_v4(),
      subject_id:     "cust-1".into(),
      kind:           "checks".into(),
      status:         SessionStatus::Completed,
      occurred_at:    Utc::now(),
      result:         None,
      failure_reason: None,
    }
  }

  type Received = Arc<Mutex<Vec<serde_json::Value>>>;

  async fn receiver(status: StatusCode) -> (String, Received) {
    let received: Received = Arc::default();
    let app = Router::new()
      .route(
        "/hook",
        post(move |State(seen): State<Received>, Json(body): Json<serde_json::Value>| async move {
          seen.lock().unwrap().push(body);
          status
        }),
      )
      .with_state(received.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    (format!("http://{addr}/hook"), received)
  }

  #[tokio::test]
  async fn posts_the_notification_as_json() {
    let (url, received) = receiver(StatusCode::NO_CONTENT).await;
    let notifier = WebhookNotifier::new(Duration::from_secs(5)).unwrap();
    let n = notification();

    notifier.notify(&NotificationTarget::Webhook { url }, &n).await.unwrap();

    let bodies = received.lock().unwrap().clone();
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0]["event"], "session_completed");
    assert_eq!(bodies[0]["sessionId"], n.session_id.to_string());
  }

  #[tokio::test]
  async fn non_success_status_is_rejected() {
    let (url, _) = receiver(StatusCode::INTERNAL_SERVER_ERROR).await;
    let notifier = WebhookNotifier::new(Duration::from_secs(5)).unwrap();

    let err = notifier
      .notify(&NotificationTarget::Webhook { url }, &notification())
      .await
      .unwrap_err();
    assert!(matches!(err, SinkError::Rejected(500)));
  }

  #[tokio::test]
  async fn email_targets_are_logged_not_sent() {
    let notifier = WebhookNotifier::new(Duration::from_secs(5)).unwrap();
    let target = NotificationTarget::Email { address: "ops@bank-a.example".into() };
    assert!(notifier.notify(&target, &notification()).await.is_ok());
  }
}
