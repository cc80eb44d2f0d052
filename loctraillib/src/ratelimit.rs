//! Per-origin fixed-window write throttling.
//!
//! Counters live in process memory only: they reset on restart and are not
//! shared between store instances. This is a secondary defense on the write
//! path, not an abuse guarantee.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Counter state of one origin.
#[derive(Debug, Clone, Copy)]
struct RateLimitEntry {
    count: u32,
    window_reset_at: Instant,
}

/// Entries kept before expired windows are swept.
const SWEEP_THRESHOLD: usize = 4096;

#[derive(Debug)]
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    entries: Mutex<HashMap<String, RateLimitEntry>>,
}

impl RateLimiter {
    /// Allow `limit` requests per `window` for each origin.
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Record a request from `origin` now; `false` means it is over the limit.
    pub fn check(&self, origin: &str) -> bool {
        self.check_at(origin, Instant::now())
    }

    pub fn check_at(&self, origin: &str, now: Instant) -> bool {
        let mut entries = self.entries.lock();
        if entries.len() >= SWEEP_THRESHOLD {
            entries.retain(|_, e| e.window_reset_at > now);
        }

        let entry = entries
            .entry(origin.to_string())
            .or_insert(RateLimitEntry {
                count: 0,
                window_reset_at: now + self.window,
            });
        if now >= entry.window_reset_at {
            entry.count = 0;
            entry.window_reset_at = now + self.window;
        }

        if entry.count >= self.limit {
            tracing::debug!(origin, "rate limit exceeded");
            return false;
        }
        entry.count += 1;
        true
    }
}
