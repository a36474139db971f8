//! Concurrent, atomic-insert dedupers (§3/§4.2).
//!
//! `Observe(key)` is lock-free-fast and linearizable: exactly one caller for
//! a given key sees `false` (first observation). No removal; lifetime
//! equals one target's crawl.

use dashmap::DashSet;

/// A single atomic-insert dedupe set, keyed by an arbitrary string.
#[derive(Debug, Default)]
pub struct Deduper {
    seen: DashSet<String>,
}

impl Deduper {
    #[must_use]
    pub fn new() -> Self {
        Self {
            seen: DashSet::new(),
        }
    }

    /// Returns `true` if `key` was already present, otherwise inserts it
    /// and returns `false`. At most one caller observes `false` for a key.
    pub fn observe(&self, key: impl Into<String>) -> bool {
        !self.seen.insert(key.into())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// The full set of dedupers scoped to a single target's crawl (§3: "Separate
/// dedupers exist for: visited URLs, JS assets, subdomain mentions, AWS
/// buckets, forms, upload forms, render queue.").
#[derive(Debug, Default)]
pub struct Dedupers {
    pub visited: Deduper,
    pub js_assets: Deduper,
    pub subdomains: Deduper,
    pub aws_buckets: Deduper,
    pub forms: Deduper,
    pub upload_forms: Deduper,
    pub render_queue: Deduper,
}

impl Dedupers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn observe_reports_first_caller_as_new() {
        let d = Deduper::new();
        assert!(!d.observe("https://a.test/"));
        assert!(d.observe("https://a.test/"));
        assert_eq!(d.len(), 1);
    }

    #[tokio::test]
    async fn observe_is_linearizable_under_concurrency() {
        let d = Arc::new(Deduper::new());
        let mut handles = Vec::new();
        for _ in 0..64 {
            let d = Arc::clone(&d);
            handles.push(tokio::spawn(async move { d.observe("same-key") }));
        }
        let mut false_count = 0;
        for h in handles {
            if !h.await.unwrap() {
                false_count += 1;
            }
        }
        assert_eq!(false_count, 1);
    }
}
