//! Leaky-bucket state for one rate-limit key.

use std::time::{Duration, Instant};

/// Water-level counter draining at a fixed rate.
///
/// Each admitted request adds one unit of water; draining happens lazily on
/// the request path. The drain clock (`drained_at`) advances only by whole
/// drained units, keeping the fractional remainder — advancing it to `now`
/// on every request would throw the remainder away and a caller polling
/// faster than `1/rate` would never drain at all. A request that would
/// overflow `capacity` is rejected without changing the level, which gives
/// admitted traffic a steady-state spacing of `1/rate` at the drain.
#[derive(Debug, Clone)]
pub struct LeakyBucket {
    water: u64,
    /// Drain clock; lags `now` by the undrained fraction.
    drained_at: Instant,
    /// Last request touch, for idle eviction.
    touched: Instant,
}

impl LeakyBucket {
    /// Creates a bucket holding the first request's unit of water.
    pub fn new(now: Instant) -> Self {
        Self {
            water: 1,
            drained_at: now,
            touched: now,
        }
    }

    /// Admits or rejects one request at time `now`.
    pub fn allow(&mut self, now: Instant, rate: f64, capacity: u64) -> bool {
        self.touched = now;

        let elapsed = now.saturating_duration_since(self.drained_at).as_secs_f64();
        let leaked = (elapsed * rate).floor() as u64;
        if leaked > 0 {
            self.water = self.water.saturating_sub(leaked);
            self.drained_at += Duration::from_secs_f64(leaked as f64 / rate);
        }

        if self.water + 1 > capacity {
            return false;
        }
        self.water += 1;
        true
    }

    /// Capacity headroom after the last update.
    pub fn remaining(&self, capacity: u64) -> u64 {
        capacity.saturating_sub(self.water)
    }

    /// Seconds until one unit drains, zero while there is headroom.
    pub fn reset_secs(&self, rate: f64, capacity: u64) -> u64 {
        if self.water < capacity {
            return 0;
        }
        (1.0 / rate).ceil() as u64
    }

    pub fn water(&self) -> u64 {
        self.water
    }

    pub fn last_update(&self) -> Instant {
        self.touched
    }
}
