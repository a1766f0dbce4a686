pub mod clock;
pub mod date;

pub use clock::EventClock;
