//! Fixed-window counter for one rate-limit key.

use std::time::{Duration, Instant};

/// Request counter that resets at window boundaries.
///
/// Known boundary artifact: a burst at the very end of one window followed
/// by a burst at the start of the next admits up to `2 * limit` requests
/// within less than a window. Documented behavior of the algorithm, not a
/// defect; use the sliding window when that matters.
#[derive(Debug, Clone)]
pub struct FixedWindow {
    count: u64,
    window_start: Instant,
    last: Instant,
}

impl FixedWindow {
    /// Creates a window already counting the first request.
    pub fn new(now: Instant) -> Self {
        Self {
            count: 1,
            window_start: now,
            last: now,
        }
    }

    /// Admits or rejects one request at time `now`.
    pub fn allow(&mut self, now: Instant, limit: u64, window: Duration) -> bool {
        self.last = now;

        if now.saturating_duration_since(self.window_start) >= window {
            self.window_start = now;
            self.count = 1;
            return true;
        }

        if self.count >= limit {
            return false;
        }
        self.count += 1;
        true
    }

    pub fn remaining(&self, limit: u64) -> u64 {
        limit.saturating_sub(self.count)
    }

    /// Seconds until the current window rolls over.
    pub fn reset_secs(&self, now: Instant, window: Duration) -> u64 {
        let elapsed = now.saturating_duration_since(self.window_start);
        window.saturating_sub(elapsed).as_secs().max(1)
    }

    pub fn last_update(&self) -> Instant {
        self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const W: Duration = Duration::from_secs(10);

    #[test]
    fn admits_up_to_limit_within_window() {
        let now = Instant::now();
        let mut window = FixedWindow::new(now); // counts as 1
        assert!(window.allow(now, 3, W));
        assert!(window.allow(now, 3, W));
        assert!(!window.allow(now, 3, W));
    }

    #[test]
    fn rollover_resets_the_count() {
        let now = Instant::now();
        let mut window = FixedWindow::new(now);
        assert!(window.allow(now, 2, W));
        assert!(!window.allow(now, 2, W));

        let next = now + W;
        assert!(window.allow(next, 2, W));
        assert_eq!(window.remaining(2), 1);
    }

    #[test]
    fn boundary_burst_is_bounded_by_twice_limit() {
        let now = Instant::now();
        let mut window = FixedWindow::new(now);
        let mut admitted = 1u64;

        // Exhaust the first window just before it ends...
        let late = now + W - Duration::from_millis(10);
        while window.allow(late, 5, W) {
            admitted += 1;
        }
        // ...then burst right after the boundary.
        let early = now + W + Duration::from_millis(10);
        while window.allow(early, 5, W) {
            admitted += 1;
        }

        assert_eq!(admitted, 10, "exactly 2x limit across the boundary");
    }

    #[test]
    fn reset_hint_counts_down() {
        let now = Instant::now();
        let window = FixedWindow::new(now);
        let later = now + Duration::from_secs(4);
        assert_eq!(window.reset_secs(later, W), 6);
    }
}
