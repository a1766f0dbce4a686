pub mod health;
pub mod info;
pub mod users;
pub mod webhooks;

pub use health::health;
pub use info::info;
pub use webhooks::receive as receive_webhook;
