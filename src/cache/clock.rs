//! Time source used for TTL bookkeeping.

use chrono::{DateTime, Duration, Utc};
use std::sync::{Mutex, PoisonError};

/// Source of "now" for expiry checks.
pub trait Clock: Send + Sync {
  fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> {
    Utc::now()
  }
}

/// Clock that only moves when told to.
///
/// Lets tests step past a TTL without sleeping.
#[derive(Debug)]
pub struct ManualClock {
  now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
  pub fn new(start: DateTime<Utc>) -> Self {
    Self {
      now: Mutex::new(start),
    }
  }

  pub fn advance(&self, by: Duration) {
    let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
    *now += by;
  }
}

impl Default for ManualClock {
  fn default() -> Self {
    Self::new(Utc::now())
  }
}

impl Clock for ManualClock {
  fn now(&self) -> DateTime<Utc> {
    *self.now.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

/// Expiry instant for an entry stored at `stored_at` with the given TTL.
/// Saturates instead of overflowing for absurd TTLs.
pub(crate) fn expiry_after(stored_at: DateTime<Utc>, ttl_secs: u64) -> DateTime<Utc> {
  i64::try_from(ttl_secs)
    .ok()
    .and_then(Duration::try_seconds)
    .and_then(|ttl| stored_at.checked_add_signed(ttl))
    .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn manual_clock_moves_only_on_advance() {
    let clock = ManualClock::default();
    let start = clock.now();
    assert_eq!(clock.now(), start);

    clock.advance(Duration::seconds(5));
    assert_eq!(clock.now() - start, Duration::seconds(5));
  }

  #[test]
  fn expiry_saturates_for_huge_ttl() {
    let now = Utc::now();
    assert_eq!(expiry_after(now, u64::MAX), DateTime::<Utc>::MAX_UTC);
    assert_eq!(expiry_after(now, 60), now + Duration::seconds(60));
  }
}
