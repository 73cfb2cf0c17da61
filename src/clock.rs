//! Time source abstraction
//!
//! Every time-based decision in the engine is a function of stored
//! timestamps and the current time, so the current time is injected.

use std::sync::{Arc, Mutex};

use web_time::{Duration, SystemTime};

/// A source of the current wall-clock time
pub trait Clock: Send + Sync {
    /// Returns the current time
    fn now(&self) -> SystemTime;
}

impl<T: Clock + ?Sized> Clock for Arc<T> {
    fn now(&self) -> SystemTime {
        (**self).now()
    }
}

/// Real time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// A clock that only moves when told to
///
/// Used to drive countdowns and timeouts deterministically.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<SystemTime>,
}

impl ManualClock {
    /// Creates a clock stopped at `start`
    pub fn new(start: SystemTime) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Creates a clock stopped `secs` seconds after the Unix epoch
    pub fn at_secs(secs: u64) -> Self {
        Self::new(SystemTime::UNIX_EPOCH + Duration::from_secs(secs))
    }

    /// Moves the clock to `time`
    pub fn set(&self, time: SystemTime) {
        *self.now.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = time;
    }

    /// Moves the clock forward by `delta`
    pub fn advance(&self, delta: Duration) {
        let mut now = self
            .now
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *now += delta;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> SystemTime {
        *self
            .now
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
