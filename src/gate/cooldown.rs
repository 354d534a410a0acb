//! Post-publish cooldown
//!
//! A whole-second countdown with one repeating 1 s ticker. The ticker is created
//! lazily on the first [`CooldownTimer::next_tick`] after a start, so `start`,
//! `cancel` and `tick` need no runtime and tests can drive the countdown by hand.

use std::future;
use std::time::Duration;

use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::debug;

pub const DEFAULT_COOLDOWN_SECS: u32 = 5;

const TICK_PERIOD: Duration = Duration::from_secs(1);

#[derive(Debug, Default)]
pub struct CooldownTimer {
    remaining: u32,
    ticker: Option<Interval>,
}

impl CooldownTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// (Re)starts at the full duration. Any running countdown is cancelled first,
    /// so restarts never add up.
    pub fn start(&mut self, seconds: u32) {
        self.cancel();
        self.remaining = seconds;
        debug!("Cooldown started at {}s", seconds);
    }

    pub fn cancel(&mut self) {
        self.ticker = None;
        self.remaining = 0;
    }

    /// One elapsed second. Stops at zero; further ticks are no-ops.
    pub fn tick(&mut self) -> u32 {
        if self.remaining <= 1 {
            self.remaining = 0;
            self.ticker = None;
        } else {
            self.remaining -= 1;
        }
        self.remaining
    }

    /// Waits for the next second to elapse and applies it. Never resolves while
    /// the countdown is inactive.
    pub async fn next_tick(&mut self) -> u32 {
        if !self.is_active() {
            return future::pending().await;
        }

        let ticker = self.ticker.get_or_insert_with(|| {
            let mut interval = time::interval_at(Instant::now() + TICK_PERIOD, TICK_PERIOD);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        ticker.tick().await;
        self.tick()
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn is_active(&self) -> bool {
        self.remaining > 0
    }
}
