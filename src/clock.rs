// =============================================================================
// CLOCK
// =============================================================================
// Services never call Utc::now() directly; they ask the injected clock so
// that order numbers and ship/delivery stamps are reproducible in tests.
// =============================================================================

use chrono::{DateTime, Utc};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock used by the running service
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
pub use fixed::FixedClock;
