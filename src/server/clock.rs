// ABOUTME: Server-side monotonic clock
// ABOUTME: Provides epoch-anchored millisecond timestamps that never go backwards

use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;

/// Server clock for generating broadcast timestamps
///
/// The wall clock is sampled once at construction; after that time advances
/// with a monotonic [`Instant`], so timestamps are comparable with Unix
/// milliseconds but cannot jump backwards when the system clock is adjusted.
/// Uses tokio's `Instant`, so paused-time tests drive it deterministically.
#[derive(Debug)]
pub struct ServerClock {
    /// When the clock was created
    start: Instant,
    /// Unix milliseconds at `start`
    epoch_at_start_ms: i64,
}

impl ServerClock {
    /// Create a new server clock starting now
    pub fn new() -> Self {
        let epoch_at_start_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(Self::duration_to_millis)
            .unwrap_or(0);
        Self::starting_at(epoch_at_start_ms)
    }

    /// Create a clock whose current time is `epoch_ms`
    pub fn starting_at(epoch_ms: i64) -> Self {
        Self {
            start: Instant::now(),
            epoch_at_start_ms: epoch_ms,
        }
    }

    /// Get current server time in milliseconds since the Unix epoch
    #[inline]
    pub fn now_millis(&self) -> i64 {
        self.epoch_at_start_ms
            .saturating_add(Self::duration_to_millis(self.start.elapsed()))
    }

    /// Convert a duration to whole milliseconds, saturating at `i64::MAX`
    pub fn duration_to_millis(duration: Duration) -> i64 {
        i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
    }
}

impl Default for ServerClock {
    fn default() -> Self {
        Self::new()
    }
}
