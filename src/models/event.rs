//! Domain events emitted after a user mutation.

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use super::ids::UserId;

/// Attribute names that must never leave the service inside an event payload.
const SECRET_FIELDS: &[&str] = &["password", "password_hash"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum EventType {
    #[serde(rename = "user.created")]
    UserCreated,
    #[serde(rename = "user.updated")]
    UserUpdated,
    #[serde(rename = "user.deleted")]
    UserDeleted,
}

impl EventType {
    pub const ALL: [EventType; 3] = [
        EventType::UserCreated,
        EventType::UserUpdated,
        EventType::UserDeleted,
    ];

    /// Name on the event bus, e.g. `user.created`.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::UserCreated => "user.created",
            EventType::UserUpdated => "user.updated",
            EventType::UserDeleted => "user.deleted",
        }
    }

    /// Name used in outbound webhooks, e.g. `user_created`.
    pub fn webhook_name(&self) -> &'static str {
        match self {
            EventType::UserCreated => "user_created",
            EventType::UserUpdated => "user_updated",
            EventType::UserDeleted => "user_deleted",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "user.created" | "user_created" => Some(EventType::UserCreated),
            "user.updated" | "user_updated" => Some(EventType::UserUpdated),
            "user.deleted" | "user_deleted" => Some(EventType::UserDeleted),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Subject of an event. `Pending` stands in when the entity has no id yet and serializes as `"new"`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UserRef {
    Id(UserId),
    Pending,
}

impl From<Option<UserId>> for UserRef {
    fn from(id: Option<UserId>) -> Self {
        id.map(UserRef::Id).unwrap_or(UserRef::Pending)
    }
}

impl Serialize for UserRef {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            UserRef::Id(id) => serializer.serialize_i64(*id),
            UserRef::Pending => serializer.serialize_str("new"),
        }
    }
}

impl std::fmt::Display for UserRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UserRef::Id(id) => write!(f, "{}", id),
            UserRef::Pending => write!(f, "new"),
        }
    }
}

/// Immutable record of one mutation. Built once, handed to a publisher, then dropped.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DomainEvent {
    event_type: EventType,
    user_id: UserRef,
    payload: Map<String, Value>,
    #[serde(with = "crate::utils::date")]
    timestamp: DateTime<Utc>,
}

impl DomainEvent {
    pub fn new(
        event_type: EventType,
        user_id: UserRef,
        mut payload: Map<String, Value>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        for field in SECRET_FIELDS {
            payload.remove(*field);
        }
        Self {
            event_type,
            user_id,
            payload,
            timestamp,
        }
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn user_id(&self) -> UserRef {
        self.user_id
    }

    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}
