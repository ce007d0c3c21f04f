//! Sliding-window rate limiter for tool invocation, scoped per tool name.
//!
//! Keeps a runaway tool loop from hammering a single external tool-server
//! while leaving other tools unaffected.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Per-tool sliding-window limiter.
///
/// Uses a sync [`Mutex`] since the critical section is very short (no awaits).
#[derive(Debug)]
pub struct RateLimiter {
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
    window: Duration,
    max_count: u32,
}

impl RateLimiter {
    /// Create a limiter allowing up to `max_count` calls per `window` for
    /// each distinct tool name.
    pub fn new(window: Duration, max_count: u32) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            window,
            max_count,
        }
    }

    /// Record a call and check whether `tool_name` is within its limit.
    ///
    /// Returns `true` if the call is allowed (and is recorded), `false` if
    /// the tool is currently rate-limited (the call is not recorded).
    pub fn allow(&self, tool_name: &str) -> bool {
        let mut windows = self.windows.lock().expect("rate limiter poisoned");
        let entry = windows.entry(tool_name.to_owned()).or_default();

        let cutoff = Instant::now().checked_sub(self.window).unwrap_or_else(Instant::now);
        while entry.front().is_some_and(|t| *t < cutoff) {
            entry.pop_front();
        }

        let count = u32::try_from(entry.len()).unwrap_or(u32::MAX);
        if count >= self.max_count {
            return false;
        }
        entry.push_back(Instant::now());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_max_count_then_blocks() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 2);
        assert!(limiter.allow("search"));
        assert!(limiter.allow("search"));
        assert!(!limiter.allow("search"));
    }

    #[test]
    fn tools_are_limited_independently() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 1);
        assert!(limiter.allow("search"));
        assert!(limiter.allow("calendar"));
        assert!(!limiter.allow("search"));
    }
}
