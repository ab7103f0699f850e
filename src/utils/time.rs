use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Strictly monotonic microsecond timestamp source.
///
/// Timestamps track wall time but never repeat and never go backwards: two
/// calls in the same microsecond (or across a wall-clock step) are resolved
/// by counter increment. Order books and orders take the clock as an
/// explicit dependency so tests can seed it deterministically.
#[derive(Debug)]
pub struct MonotonicClock {
    last: AtomicU64,
}

impl MonotonicClock {
    /// Create a clock seeded from the current wall time.
    pub fn new() -> Self {
        Self {
            last: AtomicU64::new(wall_micros()),
        }
    }

    /// Create a clock whose first timestamp will be `micros + 1`.
    ///
    /// Seeding far in the future makes every subsequent timestamp a plain
    /// counter increment, which is what deterministic tests want.
    pub fn starting_at(micros: u64) -> Self {
        Self {
            last: AtomicU64::new(micros),
        }
    }

    /// Next timestamp: `max(wall clock, last + 1)`.
    pub fn now_micros(&self) -> u64 {
        let wall = wall_micros();
        let mut last = self.last.load(Ordering::Relaxed);
        loop {
            let next = wall.max(last + 1);
            match self
                .last
                .compare_exchange_weak(last, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return next,
                Err(observed) => last = observed,
            }
        }
    }

    /// Raise the clock floor so no future timestamp is `<= micros`.
    ///
    /// Used when importing a snapshot whose resting orders carry timestamps
    /// from a previous run.
    pub fn observe(&self, micros: u64) {
        self.last.fetch_max(micros, Ordering::Relaxed);
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Microseconds since the Unix epoch.
fn wall_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}
