//! Fixed-window request counters keyed by endpoint and client.
//!
//! Windows expire on their own: a stale entry is replaced the next time its
//! key is seen, and the map is pruned once it grows past `PRUNE_THRESHOLD`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::RateSpec;
use crate::errors::AppError;

const PRUNE_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct WindowKey {
    endpoint: &'static str,
    client: String,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

impl Window {
    fn expires_at(&self, length: Duration) -> Instant {
        self.started + length
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    spec: RateSpec,
    windows: Mutex<HashMap<WindowKey, Window>>,
}

impl RateLimiter {
    pub fn new(spec: RateSpec) -> Self {
        Self {
            spec,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn check(&self, endpoint: &'static str, client: &str) -> Result<(), AppError> {
        self.check_at(endpoint, client, Instant::now())
    }

    /// One attempt against `endpoint`, counted both for the client address
    /// (when known) and for the attempted identifier, so neither rotating
    /// usernames nor rotating addresses escapes the limit.
    pub fn check_attempt(&self, endpoint: &'static str, addr: Option<&str>, identifier: &str) -> Result<(), AppError> {
        let now = Instant::now();
        if let Some(addr) = addr {
            self.check_at(endpoint, &format!("addr:{addr}"), now)?;
        }
        self.check_at(endpoint, &format!("id:{}", identifier.trim().to_lowercase()), now)
    }

    /// Count one hit at `now`. Hits past the limit are refused and not counted.
    pub fn check_at(&self, endpoint: &'static str, client: &str, now: Instant) -> Result<(), AppError> {
        let length = self.spec.window;
        let mut windows = self.windows.lock();

        if windows.len() > PRUNE_THRESHOLD {
            windows.retain(|_, window| window.expires_at(length) > now);
        }

        let key = WindowKey {
            endpoint,
            client: client.to_string(),
        };
        let window = windows.entry(key).or_insert(Window { started: now, count: 0 });
        if window.expires_at(length) <= now {
            *window = Window { started: now, count: 0 };
        }

        if window.count >= self.spec.limit {
            let retry_after = window.expires_at(length).saturating_duration_since(now);
            tracing::warn!(endpoint, client, "rate limit exceeded");
            return Err(AppError::RateLimited {
                retry_after_secs: retry_after.as_secs().max(1),
            });
        }

        window.count += 1;
        Ok(())
    }
}
