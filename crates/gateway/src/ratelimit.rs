use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

/// Fixed-window counter for a single key. Guarded by its own mutex so
/// unrelated keys never contend on each other.
struct Window {
    count: u32,
    window_start: Instant,
}

/// Per-`path|client_ip` fixed-window rate limiter. The outer map uses a
/// coarse RwLock for load-or-create; once a record exists, contention
/// for that key is isolated to its own mutex.
pub struct RateLimiter {
    records: RwLock<HashMap<String, Mutex<Window>>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    pub fn key(path: &str, client_ip: &str) -> String {
        format!("{path}|{client_ip}")
    }

    /// Returns `(allowed, retry_after)`. `retry_after` is only meaningful
    /// when `allowed` is false and is clamped to at least one second.
    pub fn allow(&self, key: &str, limit: u32, window: Duration) -> (bool, Duration) {
        // Fast path: record already exists, take only a read lock on the
        // outer map.
        {
            let records = self.records.read().unwrap_or_else(|e| e.into_inner());
            if let Some(slot) = records.get(key) {
                return Self::check(slot, limit, window);
            }
        }

        // Slow path: insert under a write lock. Another thread may have
        // raced us here — `entry` handles that without double-inserting.
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        let slot = records.entry(key.to_string()).or_insert_with(|| {
            Mutex::new(Window {
                count: 0,
                window_start: Instant::now(),
            })
        });
        Self::check(slot, limit, window)
    }

    fn check(slot: &Mutex<Window>, limit: u32, window: Duration) -> (bool, Duration) {
        let mut w = slot.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        if now.duration_since(w.window_start) >= window {
            w.window_start = now;
            w.count = 0;
        }
        if w.count >= limit {
            let elapsed = now.duration_since(w.window_start);
            let remaining = window.saturating_sub(elapsed);
            let retry_after = remaining.max(Duration::from_secs(1));
            return (false, retry_after);
        }
        w.count += 1;
        (true, Duration::ZERO)
    }

    /// Remove windows whose window has expired — called on an interval
    /// at least as long as the window itself.
    pub fn sweep(&self, window: Duration) {
        let now = Instant::now();
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        records.retain(|_, slot| {
            let w = slot.lock().unwrap_or_else(|e| e.into_inner());
            now.duration_since(w.window_start) < window * 2
        });
    }

    #[cfg(test)]
    pub fn key_count(&self) -> usize {
        self.records.read().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_limit_then_denies() {
        let limiter = RateLimiter::new();
        let key = RateLimiter::key("/api/v1/devices", "10.0.0.1");
        for _ in 0..5 {
            let (allowed, _) = limiter.allow(&key, 5, Duration::from_secs(60));
            assert!(allowed);
        }
        let (allowed, retry_after) = limiter.allow(&key, 5, Duration::from_secs(60));
        assert!(!allowed);
        assert!(retry_after >= Duration::from_secs(1));
    }

    #[test]
    fn resets_after_window_elapses() {
        let limiter = RateLimiter::new();
        let key = RateLimiter::key("/api/v1/devices", "10.0.0.2");
        assert!(limiter.allow(&key, 1, Duration::from_millis(50)).0);
        assert!(!limiter.allow(&key, 1, Duration::from_millis(50)).0);
        std::thread::sleep(Duration::from_millis(60));
        assert!(limiter.allow(&key, 1, Duration::from_millis(50)).0);
    }

    #[test]
    fn unrelated_keys_do_not_share_a_window() {
        let limiter = RateLimiter::new();
        let a = RateLimiter::key("/p", "1.1.1.1");
        let b = RateLimiter::key("/p", "2.2.2.2");
        assert!(limiter.allow(&a, 1, Duration::from_secs(60)).0);
        assert!(!limiter.allow(&a, 1, Duration::from_secs(60)).0);
        assert!(limiter.allow(&b, 1, Duration::from_secs(60)).0);
    }
}
