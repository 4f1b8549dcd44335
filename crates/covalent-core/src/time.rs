//! Wall-clock source for transaction timestamps.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// A clock that only moves when told to. Each read advances it by `step`.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
    step: u64,
}

impl ManualClock {
    pub fn new(start: u64) -> Self {
        Self {
            now: AtomicU64::new(start),
            step: 1,
        }
    }

    /// A clock that never advances on its own.
    pub fn frozen(at: u64) -> Self {
        Self {
            now: AtomicU64::new(at),
            step: 0,
        }
    }

    pub fn set(&self, millis: u64) {
        self.now.store(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, millis: u64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.fetch_add(self.step, Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_ticks() {
        let clock = ManualClock::new(100);
        assert_eq!(clock.now_millis(), 100);
        assert_eq!(clock.now_millis(), 101);
        clock.advance(10);
        assert_eq!(clock.now_millis(), 112);

        let frozen = ManualClock::frozen(5);
        assert_eq!(frozen.now_millis(), 5);
        assert_eq!(frozen.now_millis(), 5);
    }
}
