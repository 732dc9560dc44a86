//! Adaptive back-off between retries of a conflicted acquisition.
//!
//! Rollback-and-retry is the sole forward-progress mechanism of the locking
//! protocol: two threads that collide on a link both restore what they took
//! and wait. The wait grows exponentially so that repeat losers eventually
//! leave a long enough window for some contender to complete its whole
//! operation. The curve has two phases: a spin/yield phase delegated to
//! [`crossbeam_utils::Backoff`], then timed sleeps doubling from
//! [`SLEEP_BASE`] up to [`SLEEP_CAP`].

use std::cmp;
use std::thread;
use std::time::Duration;

use crossbeam_utils::Backoff as Spin;

/// First sleep taken once the spin phase is exhausted.
pub const SLEEP_BASE: Duration = Duration::from_micros(1);

/// Upper bound on a single back-off sleep.
pub const SLEEP_CAP: Duration = Duration::from_millis(1);

/// Exponential back-off state for one retry loop.
///
/// Create one per operation attempt and call [`relax`](Backoff::relax)
/// after each rollback. Must never be invoked while any `BUSY` field is
/// still held; the protocol releases everything before waiting.
pub struct Backoff {
    spin: Spin,
    sleep: Duration,
}

impl Backoff {
    pub fn new() -> Self {
        Backoff {
            spin: Spin::new(),
            sleep: SLEEP_BASE,
        }
    }

    /// Waits for the current step's duration and advances the curve.
    pub fn relax(&mut self) {
        if !self.spin.is_completed() {
            self.spin.snooze();
            return;
        }
        thread::sleep(self.sleep);
        self.sleep = cmp::min(self.sleep.saturating_mul(2), SLEEP_CAP);
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}
