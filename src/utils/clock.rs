use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};

/// Wall clock for event timestamps that never goes backwards within the process.
///
/// If the system clock steps back, the last issued instant is repeated until
/// real time catches up.
#[derive(Debug, Default)]
pub struct EventClock {
    last_micros: AtomicI64,
}

impl EventClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.observe(Utc::now())
    }

    fn observe(&self, wall: DateTime<Utc>) -> DateTime<Utc> {
        // Timestamps are published with microsecond precision.
        let micros = wall.timestamp_micros();
        let previous = self.last_micros.fetch_max(micros, Ordering::AcqRel);
        DateTime::from_timestamp_micros(previous.max(micros)).unwrap_or(wall)
    }
}
