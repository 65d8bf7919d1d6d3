//! Injectable clock so cooldown logic can be tested without real timers.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Source of monotonic time for the sync trigger's cooldown checks.
pub trait Clock: Send + Sync {
  fn now(&self) -> Instant;
}

/// Real monotonic clock.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> Instant {
    Instant::now()
  }
}

/// Manually-advanced clock for tests.
///
/// Starts at an arbitrary base instant; `advance` moves it forward.
#[derive(Debug)]
pub struct ManualClock {
  base: Instant,
  offset: Mutex<Duration>,
}

impl ManualClock {
  pub fn new() -> Self {
    Self {
      base: Instant::now(),
      offset: Mutex::new(Duration::ZERO),
    }
  }

  pub fn advance(&self, by: Duration) {
    let mut offset = self.offset.lock().expect("clock offset poisoned");
    *offset += by;
  }
}

impl Default for ManualClock {
  fn default() -> Self {
    Self::new()
  }
}

impl Clock for ManualClock {
  fn now(&self) -> Instant {
    self.base + *self.offset.lock().expect("clock offset poisoned")
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn manual_clock_advances() {
    let clock = ManualClock::new();
    let start = clock.now();

    clock.advance(Duration::from_millis(750));

    assert_eq!(clock.now() - start, Duration::from_millis(750));
  }

  #[test]
  fn manual_clock_is_stable_between_advances() {
    let clock = ManualClock::new();
    assert_eq!(clock.now(), clock.now());
  }
}
