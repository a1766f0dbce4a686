//! Shared types: user projection, domain events, webhook payloads and ID aliases.

pub mod event;
pub mod ids;
pub mod user;
pub mod webhook;

pub use event::{DomainEvent, EventType, UserRef};
pub use ids::UserId;
pub use user::{NewUser, UserChanges, UserInput, UserView};
pub use webhook::{InboundEvent, ServiceTarget, WebhookRequest};
