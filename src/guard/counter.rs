//! Fixed-window request counter.

use chrono::{DateTime, Duration, Utc};
use std::fmt;

use super::class::{LimitClass, LimitRule};

/// Key identifying a counter: one per (limit class, client key) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterKey {
    pub class: LimitClass,
    pub client: String,
}

impl CounterKey {
    pub fn new(class: LimitClass, client: &str) -> Self {
        Self {
            class,
            client: client.to_string(),
        }
    }
}

impl fmt::Display for CounterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.class, self.client)
    }
}

/// Counts requests within a fixed window.
///
/// The window is reset lazily: the first hit at or after `window_reset_at`
/// starts a fresh window. Nothing sweeps idle counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowCounter {
    count: u64,
    window_reset_at: DateTime<Utc>,
}

impl WindowCounter {
    /// Create a counter whose first window starts at `now`.
    pub fn new(now: DateTime<Utc>, window: Duration) -> Self {
        Self {
            count: 0,
            window_reset_at: window_end(now, window),
        }
    }

    /// Record one request and return the count within the current window.
    pub fn hit(&mut self, now: DateTime<Utc>, rule: &LimitRule) -> u64 {
        self.maybe_reset_window(now, rule.window());
        self.count = self.count.saturating_add(1);
        self.count
    }

    /// Requests recorded in the current window.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// When the current window ends.
    pub fn window_reset_at(&self) -> DateTime<Utc> {
        self.window_reset_at
    }

    /// Whole seconds until the window resets, rounded up.
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> u64 {
        ceil_secs(self.window_reset_at - now)
    }

    fn maybe_reset_window(&mut self, now: DateTime<Utc>, window: Duration) {
        if now >= self.window_reset_at {
            self.count = 0;
            self.window_reset_at = window_end(now, window);
        }
    }
}

fn window_end(start: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    start
        .checked_add_signed(window)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Round a remaining duration up to whole seconds; negative durations are zero.
pub(crate) fn ceil_secs(remaining: Duration) -> u64 {
    let millis = remaining.num_milliseconds();
    if millis <= 0 {
        return 0;
    }
    (millis as u64).div_ceil(1000)
}
