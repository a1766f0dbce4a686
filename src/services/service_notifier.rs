//! Best-effort webhook broadcast to peer services.
//!
//! Every configured target gets its own POST with its own timeout. A failing
//! target is logged and skipped; it never stops the others and never reaches
//! the caller. There is no retry.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, warn};

use crate::config::{Config, NotifyMode};
use crate::models::{EventType, ServiceTarget, UserView, WebhookRequest};

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("peer responded with status {0}")]
    Status(u16),

    #[error("request failed: {0}")]
    Request(String),
}

impl NotifyError {
    fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            NotifyError::Timeout(timeout)
        } else if err.is_connect() {
            NotifyError::Connect(err.to_string())
        } else {
            NotifyError::Request(err.to_string())
        }
    }
}

/// Result of one delivery attempt. `Ok` holds the peer's HTTP status.
#[derive(Debug)]
pub struct DeliveryOutcome {
    pub target: String,
    pub result: Result<u16, NotifyError>,
}

#[derive(Clone)]
pub struct ServiceNotifier {
    client: reqwest::Client,
    targets: Arc<[ServiceTarget]>,
    timeout: Duration,
    mode: NotifyMode,
}

impl ServiceNotifier {
    pub fn new(targets: Vec<ServiceTarget>, timeout: Duration, mode: NotifyMode) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            targets: targets.into(),
            timeout,
            mode,
        })
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Self::new(config.service_targets.clone(), config.notify_timeout, config.notify_mode)
    }

    pub fn targets(&self) -> &[ServiceTarget] {
        &self.targets
    }

    /// Broadcast a user event to every target. Never fails.
    ///
    /// In `Background` mode the deliveries run on a detached task and this
    /// returns immediately. In `Inline` mode it waits until every target has
    /// answered or hit its own client timeout.
    pub async fn notify(&self, event: EventType, user: &UserView) {
        if self.targets.is_empty() {
            return;
        }

        match self.mode {
            NotifyMode::Background => {
                let notifier = self.clone();
                let user = user.clone();
                tokio::spawn(async move {
                    notifier.deliver_all(event, &user).await;
                });
            }
            NotifyMode::Inline => {
                self.deliver_all(event, user).await;
            }
        }
    }

    /// One attempt per target, issued concurrently, in target order in the result.
    pub async fn deliver_all(&self, event: EventType, user: &UserView) -> Vec<DeliveryOutcome> {
        let timestamp = Utc::now();
        let deliveries = self.targets.iter().map(|target| {
            let request = WebhookRequest::new(event.webhook_name(), user, timestamp);
            self.deliver(target, request)
        });
        join_all(deliveries).await
    }

    async fn deliver(&self, target: &ServiceTarget, request: WebhookRequest) -> DeliveryOutcome {
        let url = target.endpoint();
        let result = match self.client.post(&url).json(&request).send().await {
            Ok(response) if response.status().is_success() => Ok(response.status().as_u16()),
            Ok(response) => Err(NotifyError::Status(response.status().as_u16())),
            Err(e) => Err(NotifyError::from_reqwest(e, self.timeout)),
        };

        match &result {
            Ok(status) => debug!(
                target_service = %target.name,
                url = %url,
                event = request.event,
                status,
                "Service notified"
            ),
            Err(e) => warn!(
                target_service = %target.name,
                url = %url,
                event = request.event,
                error = %e,
                "Failed to notify {}",
                target.name
            ),
        }

        DeliveryOutcome {
            target: target.name.clone(),
            result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
    use std::sync::Mutex;

    type Received = Arc<Mutex<Vec<serde_json::Value>>>;

    async fn spawn_peer(status: StatusCode) -> (String, Received) {
        let received: Received = Arc::default();
        let app = Router::new()
            .route(
                "/webhooks/user-events",
                post(
                    move |State(received): State<Received>, Json(body): Json<serde_json::Value>| async move {
                        received.lock().unwrap().push(body);
                        status
                    },
                ),
            )
            .with_state(received.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}", addr), received)
    }

    fn user() -> UserView {
        UserView {
            id: 7,
            name: "Ann".into(),
            email: "new@x.com".into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn empty_target_set_is_a_no_op() {
        let notifier = ServiceNotifier::new(vec![], Duration::from_secs(1), NotifyMode::Inline).unwrap();
        assert!(notifier.deliver_all(EventType::UserCreated, &user()).await.is_empty());
        notifier.notify(EventType::UserCreated, &user()).await;
    }

    #[tokio::test]
    async fn every_target_is_attempted_even_after_a_failure() {
        let (ok_url, received) = spawn_peer(StatusCode::OK).await;
        let (error_url, error_received) = spawn_peer(StatusCode::INTERNAL_SERVER_ERROR).await;
        let targets = vec![
            ServiceTarget::new("order-service", "http://127.0.0.1:1"),
            ServiceTarget::new("billing-service", error_url),
            ServiceTarget::new("notification-service", ok_url),
        ];
        let notifier = ServiceNotifier::new(targets, Duration::from_secs(2), NotifyMode::Inline).unwrap();

        let outcomes = notifier.deliver_all(EventType::UserUpdated, &user()).await;

        assert_eq!(outcomes.len(), 3);
        assert!(matches!(outcomes[0].result, Err(NotifyError::Connect(_))));
        assert!(matches!(outcomes[1].result, Err(NotifyError::Status(500))));
        assert_eq!(outcomes[2].result.as_ref().ok(), Some(&200));
        assert_eq!(error_received.lock().unwrap().len(), 1);

        let bodies = received.lock().unwrap();
        assert_eq!(bodies.len(), 1);
        assert_eq!(bodies[0]["event"], "user_updated");
        assert_eq!(bodies[0]["user_id"], 7);
        assert_eq!(bodies[0]["user_data"]["email"], "new@x.com");
        assert_eq!(bodies[0]["source_service"], "user-service");
    }

    #[tokio::test]
    async fn slow_targets_time_out() {
        let app = Router::new().route(
            "/webhooks/user-events",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                StatusCode::OK
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let targets = vec![ServiceTarget::new("slow-service", format!("http://{}", addr))];
        let notifier = ServiceNotifier::new(targets, Duration::from_millis(200), NotifyMode::Inline).unwrap();

        let started = std::time::Instant::now();
        let outcomes = notifier.deliver_all(EventType::UserDeleted, &user()).await;
        assert!(matches!(outcomes[0].result, Err(NotifyError::Timeout(_))));
        assert!(started.elapsed() < Duration::from_secs(2));

        // Inline notify waits out the per-call timeout and swallows the failure.
        let started = std::time::Instant::now();
        notifier.notify(EventType::UserDeleted, &user()).await;
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn inline_timeout_logs_the_hung_target() {
        let app = Router::new().route(
            "/webhooks/user-events",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                StatusCode::OK
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let logs = LogBuffer::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let targets = vec![ServiceTarget::new("slow-service", format!("http://{}", addr))];
        let notifier = ServiceNotifier::new(targets, Duration::from_millis(300), NotifyMode::Inline).unwrap();
        notifier.notify(EventType::UserUpdated, &user()).await;

        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("Failed to notify slow-service"), "{}", output);
        assert!(output.contains("timed out"), "{}", output);
    }

    #[tokio::test]
    async fn background_mode_returns_before_delivery() {
        let (url, received) = spawn_peer(StatusCode::OK).await;
        let targets = vec![ServiceTarget::new("notification-service", url)];
        let notifier = ServiceNotifier::new(targets, Duration::from_secs(2), NotifyMode::Background).unwrap();

        notifier.notify(EventType::UserCreated, &user()).await;

        for _ in 0..100 {
            if !received.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(received.lock().unwrap().len(), 1);
    }
}
