//! Time source shared by capture, gating and playback.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Trait for time operations, allowing mock time in tests.
pub trait Clock: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> Instant;
}

/// Real system clock using `std::time::Instant::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
///
/// Clones share the same time, so a test can hand one copy to a component and
/// advance another.
#[derive(Debug, Clone)]
pub struct ManualClock {
    current: Arc<Mutex<Instant>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    pub fn starting_at(start: Instant) -> Self {
        Self {
            current: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut current) = self.current.lock() {
            *current += by;
        }
    }

    pub fn set(&self, to: Instant) {
        if let Ok(mut current) = self.current.lock() {
            *current = to;
        }
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        match self.current.lock() {
            Ok(current) => *current,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}
