pub mod event_publisher;
pub mod memory_store;
pub mod mutation_hook;
pub mod query;
pub mod service_notifier;
pub mod user_store;

pub use event_publisher::{EventPublisher, FanoutPublisher, LogEventPublisher, RedisEventPublisher};
pub use memory_store::InMemoryUserStore;
pub use mutation_hook::{MutationHook, MutationKind};
pub use service_notifier::{DeliveryOutcome, NotifyError, ServiceNotifier};
pub use user_store::{StoreError, UserStore};
