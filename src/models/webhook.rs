//! Service-to-service webhook payloads, outbound and inbound.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::ids::UserId;
use super::user::UserView;

/// Value of `source_service` on every webhook this service sends.
pub const SOURCE_SERVICE: &str = "user-service";

/// Path peers expose for user events.
pub const USER_EVENTS_PATH: &str = "/webhooks/user-events";

/// A peer service that receives user webhooks. Loaded once from configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceTarget {
    pub name: String,
    pub base_url: String,
}

impl ServiceTarget {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), USER_EVENTS_PATH)
    }
}

/// Body of `POST {base_url}/webhooks/user-events`.
#[derive(Clone, Debug, Serialize)]
pub struct WebhookRequest {
    pub event: &'static str,
    pub user_id: Option<UserId>,
    pub user_data: UserView,
    #[serde(with = "crate::utils::date")]
    pub timestamp: DateTime<Utc>,
    pub source_service: &'static str,
}

impl WebhookRequest {
    pub fn new(event: &'static str, user: &UserView, timestamp: DateTime<Utc>) -> Self {
        Self {
            event,
            user_id: Some(user.id),
            user_data: user.clone(),
            timestamp,
            source_service: SOURCE_SERVICE,
        }
    }
}

/// Events this service understands when peers call `/webhooks/{service}-events`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InboundEvent {
    OrderCreated,
    PaymentCompleted,
    Unknown(String),
}

impl InboundEvent {
    /// Both the underscore and dotted spellings are accepted.
    pub fn parse(name: Option<&str>) -> Self {
        match name {
            Some("order_created") | Some("order.created") => InboundEvent::OrderCreated,
            Some("payment_completed") | Some("payment.completed") => InboundEvent::PaymentCompleted,
            Some(other) => InboundEvent::Unknown(other.to_string()),
            None => InboundEvent::Unknown("none".to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            InboundEvent::OrderCreated => "order.created",
            InboundEvent::PaymentCompleted => "payment.completed",
            InboundEvent::Unknown(name) => name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_base_url() {
        let target = ServiceTarget::new("order-service", "http://order-service");
        assert_eq!(target.endpoint(), "http://order-service/webhooks/user-events");

        let target = ServiceTarget::new("order-service", "http://localhost:9000/");
        assert_eq!(target.endpoint(), "http://localhost:9000/webhooks/user-events");
    }

    #[test]
    fn request_carries_projection_and_source() {
        let user = UserView {
            id: 7,
            name: "Ann".into(),
            email: "ann@x.com".into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let request = WebhookRequest::new("user_updated", &user, Utc::now());

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["event"], "user_updated");
        assert_eq!(json["user_id"], 7);
        assert_eq!(json["user_data"]["email"], "ann@x.com");
        assert_eq!(json["source_service"], "user-service");
        assert!(json["user_data"].get("password").is_none());
        assert!(json["user_data"].get("password_hash").is_none());
    }

    #[test]
    fn inbound_event_parsing() {
        assert_eq!(InboundEvent::parse(Some("order_created")), InboundEvent::OrderCreated);
        assert_eq!(InboundEvent::parse(Some("order.created")), InboundEvent::OrderCreated);
        assert_eq!(
            InboundEvent::parse(Some("payment_completed")),
            InboundEvent::PaymentCompleted
        );
        assert_eq!(
            InboundEvent::parse(Some("refund_issued")),
            InboundEvent::Unknown("refund_issued".into())
        );
        assert_eq!(InboundEvent::parse(None).name(), "none");
    }
}
