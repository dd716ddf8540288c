//! Millisecond time sources for timestamps and dispatch metrics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Supplies the current time in milliseconds.
pub trait Clock: Send + Sync {
    /// Current time in milliseconds. Successive calls never go backwards.
    fn now_ms(&self) -> u64;
}

/// Wall-clock time anchored at construction and advanced monotonically.
///
/// The epoch offset is read once; later readings add elapsed [`Instant`]
/// time so adjustments to the system clock cannot make metrics negative.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
    origin_epoch_ms: u64,
}

impl SystemClock {
    /// Creates a clock anchored at the current wall time.
    #[must_use]
    pub fn new() -> Self {
        let origin_epoch_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| saturating_millis(elapsed.as_millis()));
        Self {
            origin: Instant::now(),
            origin_epoch_ms,
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        let elapsed = saturating_millis(self.origin.elapsed().as_millis());
        self.origin_epoch_ms.saturating_add(elapsed)
    }
}

fn saturating_millis(millis: u128) -> u64 {
    u64::try_from(millis).unwrap_or(u64::MAX)
}

/// A clock that only moves when told to.
///
/// # Example
///
/// ```
/// use switchboard::{Clock, ManualClock};
///
/// let clock = ManualClock::new(1_000);
/// clock.advance(250);
/// assert_eq!(clock.now_ms(), 1_250);
/// ```
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Creates a clock reading `start_ms`.
    #[must_use]
    pub const fn new(start_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ms),
        }
    }

    /// Moves the clock forward by `delta_ms`.
    pub fn advance(&self, delta_ms: u64) {
        self.now.fetch_add(delta_ms, Ordering::SeqCst);
    }

    /// Moves the clock to `now_ms`, never backwards.
    pub fn set(&self, now_ms: u64) {
        self.now.fetch_max(now_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}
