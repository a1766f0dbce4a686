use std::sync::Arc;

use serde_json::Map;

use crate::models::{DomainEvent, EventType, UserId, UserInput, UserRef, UserView};
use crate::services::event_publisher::EventPublisher;
use crate::services::service_notifier::ServiceNotifier;
use crate::utils::EventClock;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MutationKind {
    Created,
    Updated,
    Deleted,
}

impl MutationKind {
    pub fn event_type(&self) -> EventType {
        match self {
            MutationKind::Created => EventType::UserCreated,
            MutationKind::Updated => EventType::UserUpdated,
            MutationKind::Deleted => EventType::UserDeleted,
        }
    }
}

/// Runs after a user has been persisted: builds the event, publishes it, then
/// notifies peer services. Nothing here can fail the mutation.
pub struct MutationHook {
    publisher: Arc<dyn EventPublisher>,
    notifier: ServiceNotifier,
    clock: EventClock,
}

impl MutationHook {
    pub fn new(publisher: Arc<dyn EventPublisher>, notifier: ServiceNotifier) -> Self {
        Self {
            publisher,
            notifier,
            clock: EventClock::new(),
        }
    }

    /// Payload is the submitted attributes minus the password for create/update, empty for delete.
    /// A missing id becomes the `"new"` sentinel.
    pub fn build_event(&self, kind: MutationKind, user_id: Option<UserId>, input: Option<&UserInput>) -> DomainEvent {
        let payload = match kind {
            MutationKind::Deleted => Map::new(),
            MutationKind::Created | MutationKind::Updated => {
                input.map(UserInput::public_attributes).unwrap_or_default()
            }
        };
        DomainEvent::new(kind.event_type(), UserRef::from(user_id), payload, self.clock.now())
    }

    pub async fn after_mutation(&self, kind: MutationKind, user: &UserView, input: Option<&UserInput>) {
        let event = self.build_event(kind, Some(user.id), input);
        self.publisher.publish(event);
        self.notifier.notify(kind.event_type(), user).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NotifyMode;
    use crate::services::event_publisher::MockEventPublisher;
    use chrono::Utc;
    use std::time::Duration;

    fn silent_notifier() -> ServiceNotifier {
        ServiceNotifier::new(vec![], Duration::from_secs(1), NotifyMode::Inline).unwrap()
    }

    fn user() -> UserView {
        UserView {
            id: 1,
            name: "Ann".into(),
            email: "ann@x.com".into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn ann_input() -> UserInput {
        UserInput {
            name: Some("Ann".into()),
            email: Some("ann@x.com".into()),
            password: Some("secret".into()),
        }
    }

    #[test]
    fn builds_one_event_per_kind_without_password() {
        let hook = MutationHook::new(Arc::new(MockEventPublisher::new()), silent_notifier());
        let input = ann_input();

        for (kind, expected) in [
            (MutationKind::Created, EventType::UserCreated),
            (MutationKind::Updated, EventType::UserUpdated),
            (MutationKind::Deleted, EventType::UserDeleted),
        ] {
            let event = hook.build_event(kind, Some(1), Some(&input));
            assert_eq!(event.event_type(), expected);
            assert_eq!(event.user_id(), UserRef::Id(1));
            assert!(!event.payload().contains_key("password"));
        }
    }

    #[test]
    fn delete_payload_is_empty_and_create_payload_has_attributes() {
        let hook = MutationHook::new(Arc::new(MockEventPublisher::new()), silent_notifier());
        let input = ann_input();

        let created = hook.build_event(MutationKind::Created, Some(1), Some(&input));
        assert_eq!(created.payload()["name"], "Ann");
        assert_eq!(created.payload()["email"], "ann@x.com");

        let deleted = hook.build_event(MutationKind::Deleted, Some(1), Some(&input));
        assert!(deleted.payload().is_empty());
    }

    #[test]
    fn missing_id_uses_sentinel() {
        let hook = MutationHook::new(Arc::new(MockEventPublisher::new()), silent_notifier());
        let event = hook.build_event(MutationKind::Created, None, Some(&ann_input()));
        assert_eq!(event.user_id(), UserRef::Pending);
        assert_eq!(serde_json::to_value(&event).unwrap()["user_id"], "new");
    }

    #[test]
    fn timestamps_never_decrease() {
        let hook = MutationHook::new(Arc::new(MockEventPublisher::new()), silent_notifier());
        let first = hook.build_event(MutationKind::Created, Some(1), None);
        let second = hook.build_event(MutationKind::Updated, Some(1), None);
        assert!(second.timestamp() >= first.timestamp());
    }

    #[tokio::test]
    async fn after_mutation_publishes_exactly_once() {
        let mut publisher = MockEventPublisher::new();
        publisher
            .expect_publish()
            .withf(|event| {
                event.event_type() == EventType::UserUpdated
                    && event.payload().len() == 1
                    && event.payload()["email"] == "new@x.com"
            })
            .times(1)
            .return_const(());

        let hook = MutationHook::new(Arc::new(publisher), silent_notifier());
        let input = UserInput {
            email: Some("new@x.com".into()),
            password: Some("changed".into()),
            ..Default::default()
        };
        hook.after_mutation(MutationKind::Updated, &user(), Some(&input)).await;
    }
}
