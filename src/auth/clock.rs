//! Time sources for issuance and freshness decisions.

use chrono::Utc;
use tokio::time::Instant;

/// Source of "now" in unix seconds.
pub trait Clock: Send + Sync {
    fn now_unix(&self) -> i64;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> i64 {
        Utc::now().timestamp()
    }
}

/// Clock anchored at a unix timestamp and advanced by tokio's monotonic clock.
///
/// Under a paused tokio runtime it moves only when tokio time moves, which
/// keeps it in step with the refresh timers.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    anchor_unix: i64,
    anchor: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::starting_at(Utc::now().timestamp())
    }

    pub fn starting_at(anchor_unix: i64) -> Self {
        Self {
            anchor_unix,
            anchor: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_unix(&self) -> i64 {
        let elapsed = i64::try_from(self.anchor.elapsed().as_secs()).unwrap_or(i64::MAX);
        self.anchor_unix.saturating_add(elapsed)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn monotonic_clock_follows_tokio_time() {
        let clock = MonotonicClock::starting_at(1_000);
        assert_eq!(clock.now_unix(), 1_000);
        tokio::time::sleep(Duration::from_secs(90)).await;
        assert_eq!(clock.now_unix(), 1_090);
    }

    #[test]
    fn system_clock_is_after_2020() {
        assert!(SystemClock.now_unix() > 1_577_836_800);
    }
}
