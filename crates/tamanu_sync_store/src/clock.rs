//! Logical clock for `lastSynced` stamps.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Where a clock reads wall time from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClockSource {
    /// Unix millis from the system clock.
    #[default]
    System,
    /// No wall time: ticks count 1, 2, 3, ... Deterministic for tests.
    Logical,
}

/// A monotonic millisecond clock.
///
/// `tick()` never returns the same value twice and never goes backwards,
/// even if the system clock does. Each accepted write gets its own tick, so a
/// channel's log has a strict order and a watermark identifies one position.
#[derive(Debug, Default)]
pub struct SyncClock {
    source: ClockSource,
    last: AtomicU64,
}

impl SyncClock {
    /// Creates a clock reading the given source.
    #[must_use]
    pub fn new(source: ClockSource) -> Self {
        Self {
            source,
            last: AtomicU64::new(0),
        }
    }

    /// Returns wall time in Unix millis, or 0 for a logical clock.
    #[must_use]
    pub fn wall_ms(&self) -> u64 {
        match self.source {
            ClockSource::System => SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or_default(),
            ClockSource::Logical => 0,
        }
    }

    /// Returns a fresh timestamp strictly greater than every earlier one.
    pub fn tick(&self) -> u64 {
        let wall = self.wall_ms();
        let mut last = self.last.load(Ordering::Acquire);
        loop {
            let next = wall.max(last + 1);
            match self
                .last
                .compare_exchange_weak(last, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return next,
                Err(actual) => last = actual,
            }
        }
    }

    /// Returns the current time without consuming a tick.
    #[must_use]
    pub fn now(&self) -> u64 {
        self.wall_ms().max(self.last.load(Ordering::Acquire))
    }

    /// Advances the clock past a timestamp seen elsewhere (e.g. on replay).
    pub fn observe(&self, timestamp: u64) {
        self.last.fetch_max(timestamp, Ordering::AcqRel);
    }

    /// Returns the last issued or observed timestamp.
    #[must_use]
    pub fn last(&self) -> u64 {
        self.last.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn logical_ticks_count_up() {
        let clock = SyncClock::new(ClockSource::Logical);
        assert_eq!(clock.tick(), 1);
        assert_eq!(clock.tick(), 2);
        assert_eq!(clock.now(), 2);
    }

    #[test]
    fn observe_moves_past_restored_stamps() {
        let clock = SyncClock::new(ClockSource::Logical);
        clock.observe(500);
        assert_eq!(clock.tick(), 501);

        // Observing an older stamp is a no-op.
        clock.observe(10);
        assert_eq!(clock.tick(), 502);
    }

    #[test]
    fn system_ticks_are_strictly_increasing() {
        let clock = SyncClock::new(ClockSource::System);
        clock.observe(u64::MAX / 2);
        let a = clock.tick();
        let b = clock.tick();
        assert!(b > a);
        assert!(a > u64::MAX / 2);
    }

    #[test]
    fn concurrent_ticks_are_unique() {
        let clock = Arc::new(SyncClock::new(ClockSource::System));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let clock = Arc::clone(&clock);
                std::thread::spawn(move || (0..500).map(|_| clock.tick()).collect::<Vec<_>>())
            })
            .collect();

        let mut all: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        let total = all.len();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), total);
    }
}
