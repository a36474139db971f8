//! Per-host politeness pacing (§5).
//!
//! The crawl model's concurrency knobs are `delay` (fixed per-request pause)
//! and `randomDelay` (uniform jitter added on top), applied per host-glob
//! before each request. This replaces the teacher's RPS token-bucket
//! (`DashMap<String, AtomicU128>` packed state) with the simpler fixed+jitter
//! model the spec calls for, keeping the same lock-free per-host map shape.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use rand::Rng;
use tokio::sync::Mutex;

/// Tracks, per host, when that host was last hit so the next request can be
/// paced against it. A `tokio::sync::Mutex<Instant>` per host keeps the
/// "wait until my turn, then stamp" sequence atomic without blocking
/// unrelated hosts.
pub struct Politeness {
    last_request: DashMap<String, Arc<Mutex<Instant>>>,
    delay: Duration,
    random_delay: Duration,
}

impl Politeness {
    #[must_use]
    pub fn new(delay: Duration, random_delay: Duration) -> Self {
        Self {
            last_request: DashMap::new(),
            delay,
            random_delay,
        }
    }

    /// Blocks the caller until `host`'s next request may proceed, then
    /// stamps the new last-request time. A no-op when both `delay` and
    /// `random_delay` are zero.
    pub async fn wait_turn(&self, host: &str) {
        if self.delay.is_zero() && self.random_delay.is_zero() {
            return;
        }

        let slot = self
            .last_request
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Instant::now() - self.delay - self.random_delay)))
            .clone();

        let mut last = slot.lock().await;
        let jitter = if self.random_delay.is_zero() {
            Duration::ZERO
        } else {
            let millis = self.random_delay.as_millis().max(1) as u64;
            Duration::from_millis(rand::rng().random_range(0..=millis))
        };
        let required_gap = self.delay + jitter;
        let elapsed = last.elapsed();
        if elapsed < required_gap {
            tokio::time::sleep(required_gap - elapsed).await;
        }
        *last = Instant::now();
    }
}
