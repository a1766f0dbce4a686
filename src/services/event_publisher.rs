//! Event publishing port.
//!
//! `publish` is one-way: it accepts a `DomainEvent`, attempts delivery and
//! swallows failures, reporting them only through the log. Delivery is
//! at-most-once with no retry; a broker implementation can be plugged in
//! without touching the mutation path.

use std::sync::Arc;
use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use crate::config::{Config, PublisherKind};
use crate::models::DomainEvent;
use crate::utils::date::to_iso_string;

#[cfg_attr(test, mockall::automock)]
pub trait EventPublisher: Send + Sync {
    /// Hand the event off. Must return promptly and must not panic.
    fn publish(&self, event: DomainEvent);
}

/// Writes one structured log line per event.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogEventPublisher;

impl EventPublisher for LogEventPublisher {
    fn publish(&self, event: DomainEvent) {
        let payload = serde_json::to_string(event.payload()).unwrap_or_default();
        info!(
            event_type = %event.event_type(),
            user_id = %event.user_id(),
            payload = %payload,
            timestamp = %to_iso_string(&event.timestamp()),
            "Microservice event: {}",
            event.event_type()
        );
    }
}

/// `PUBLISH <event_type> <event json>` on Redis, from a detached task.
#[derive(Clone)]
pub struct RedisEventPublisher {
    connection: ConnectionManager,
    timeout: Duration,
}

impl RedisEventPublisher {
    pub async fn connect(redis_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let connection = tokio::time::timeout(timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| anyhow::anyhow!("timed out connecting to Redis after {:?}", timeout))??;
        info!("Redis event publisher connected");
        Ok(Self { connection, timeout })
    }
}

impl EventPublisher for RedisEventPublisher {
    fn publish(&self, event: DomainEvent) {
        let mut connection = self.connection.clone();
        let timeout = self.timeout;

        tokio::spawn(async move {
            let channel = event.event_type().as_str();
            let message = match serde_json::to_string(&event) {
                Ok(message) => message,
                Err(e) => {
                    warn!(channel, error = %e, "Failed to serialize event for Redis");
                    return;
                }
            };

            match tokio::time::timeout(timeout, connection.publish::<_, _, i64>(channel, message)).await {
                Ok(Ok(receivers)) => debug!(channel, receivers, "Event published to Redis"),
                Ok(Err(e)) => warn!(channel, error = %e, "Failed to publish event to Redis"),
                Err(_) => warn!(channel, timeout_ms = timeout.as_millis() as u64, "Redis publish timed out"),
            }
        });
    }
}

/// Forwards every event to each inner publisher in order.
#[derive(Clone, Default)]
pub struct FanoutPublisher {
    publishers: Vec<Arc<dyn EventPublisher>>,
}

impl FanoutPublisher {
    pub fn new(publishers: Vec<Arc<dyn EventPublisher>>) -> Self {
        Self { publishers }
    }
}

impl EventPublisher for FanoutPublisher {
    fn publish(&self, event: DomainEvent) {
        for publisher in &self.publishers {
            publisher.publish(event.clone());
        }
    }
}

/// Build the publisher chain named by `EVENT_PUBLISHER`.
///
/// A Redis connection failure at start-up degrades to the remaining
/// publishers instead of aborting; events are best-effort either way.
pub async fn from_config(config: &Config) -> Arc<dyn EventPublisher> {
    let mut publishers: Vec<Arc<dyn EventPublisher>> = Vec::new();
    for kind in &config.event_publishers {
        match kind {
            PublisherKind::Log => publishers.push(Arc::new(LogEventPublisher)),
            PublisherKind::Redis => {
                match RedisEventPublisher::connect(&config.redis_url, config.notify_timeout).await {
                    Ok(redis) => publishers.push(Arc::new(redis)),
                    Err(e) => warn!(error = %e, "Redis unavailable, events will not be published to Redis"),
                }
            }
        }
    }

    if publishers.is_empty() {
        publishers.push(Arc::new(LogEventPublisher));
    }
    if publishers.len() == 1 {
        return publishers.remove(0);
    }
    Arc::new(FanoutPublisher::new(publishers))
}
