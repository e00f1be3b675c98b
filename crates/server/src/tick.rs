//! See [`TickClock`].

use std::time::Duration;

use tokio::time::Instant;

/// Schedules fixed-rate server ticks and skips ahead when running behind.
#[derive(Debug, Clone)]
pub struct TickClock {
    period: Duration,
    tick: u64,
    next_tick: Instant,
}

impl TickClock {
    /// First tick is due immediately.
    pub fn new(period: Duration) -> Self {
        Self {
            period: period.max(Duration::from_millis(1)),
            tick: 0,
            next_tick: Instant::now(),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Number of ticks completed.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// When the next tick should ideally start.
    pub fn next_tick(&self) -> Instant {
        self.next_tick
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now >= self.next_tick
    }

    /// Call after doing a tick to schedule the next one.
    pub fn on_tick_done(&mut self) {
        self.tick += 1;
        self.next_tick += self.period;

        let now = Instant::now();
        if self.next_tick < now {
            let behind = (now - self.next_tick).as_nanos();
            let period = self.period.as_nanos();
            let skipped = behind.div_ceil(period);
            tracing::warn!("Running too slow, skipping {} ticks", skipped);
            let skipped = u32::try_from(skipped).unwrap_or(u32::MAX);
            self.next_tick += self.period * skipped;
        }
    }
}
