use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

/// Cooldown-based notification dedup store, keyed by product URL.
///
/// The only state shared across concurrent task runs. Passed around by
/// `Arc` handle and injected into the runner, so tests can supply their own
/// instance. Entries live for the process lifetime and age out implicitly:
/// lookups compare against the caller's "now", nothing is evicted.
///
/// Dispatch protocol: `try_acquire` → deliver → `record_notified` (attempt
/// made) or `release` (transport error). The acquire step claims the URL
/// under the same lock as the cooldown check, so two concurrent decisions
/// for one URL can never both come back true. A crash between dispatch and
/// record costs at most one duplicate next cycle, never a dropped product.
pub struct CooldownStore {
    default_window: chrono::Duration,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    last_notified: HashMap<String, DateTime<Utc>>,
    in_flight: HashSet<String>,
}

pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(1800);

impl CooldownStore {
    pub fn new(default_window: Duration) -> Self {
        Self {
            default_window: chrono::Duration::from_std(default_window)
                .unwrap_or_else(|_| chrono::Duration::seconds(1800)),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// True iff no dispatch was recorded for `url`, or the recorded one is at
    /// least the default window old.
    pub fn can_notify(&self, url: &str, now: DateTime<Utc>) -> bool {
        self.can_notify_within(url, now, self.default_window)
    }

    /// Window-explicit variant for tasks overriding the cooldown.
    pub fn can_notify_within(&self, url: &str, now: DateTime<Utc>, window: chrono::Duration) -> bool {
        let inner = self.inner.lock().expect("cooldown lock poisoned");
        Self::check(&inner, url, now, window)
    }

    /// Atomically check the cooldown and claim `url` for dispatch. Returns
    /// false if the URL is inside its window or already claimed by a
    /// concurrent run.
    pub fn try_acquire(&self, url: &str, now: DateTime<Utc>) -> bool {
        self.try_acquire_within(url, now, self.default_window)
    }

    pub fn try_acquire_within(&self, url: &str, now: DateTime<Utc>, window: chrono::Duration) -> bool {
        let mut inner = self.inner.lock().expect("cooldown lock poisoned");
        if !Self::check(&inner, url, now, window) {
            return false;
        }
        inner.in_flight.insert(url.to_string())
    }

    /// Upsert the dispatch timestamp and drop the in-flight claim. Called
    /// after a delivery attempt, whether the sink reported success or not.
    pub fn record_notified(&self, url: &str, now: DateTime<Utc>) {
        let mut inner = self.inner.lock().expect("cooldown lock poisoned");
        inner.in_flight.remove(url);
        inner.last_notified.insert(url.to_string(), now);
    }

    /// Abandon a claim without stamping, so the product stays eligible next
    /// cycle. Used when the transport errored before an attempt was made.
    pub fn release(&self, url: &str) {
        let mut inner = self.inner.lock().expect("cooldown lock poisoned");
        if inner.in_flight.remove(url) {
            debug!("released cooldown claim for {}", url);
        }
    }

    fn check(inner: &Inner, url: &str, now: DateTime<Utc>, window: chrono::Duration) -> bool {
        if inner.in_flight.contains(url) {
            return false;
        }
        match inner.last_notified.get(url) {
            Some(last) => now.signed_duration_since(*last) >= window,
            None => true,
        }
    }
}

impl Default for CooldownStore {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    const URL: &str = "https://www.ruten.com.tw/item/show?111";

    #[test]
    fn test_unknown_url_can_notify() {
        let store = CooldownStore::default();
        assert!(store.can_notify(URL, t(0)));
    }

    #[test]
    fn test_cooldown_window_boundaries() {
        let store = CooldownStore::default();
        store.record_notified(URL, t(0));

        assert!(!store.can_notify(URL, t(0)));
        assert!(!store.can_notify(URL, t(900)));
        assert!(!store.can_notify(URL, t(1799)));
        assert!(store.can_notify(URL, t(1800)));
        assert!(store.can_notify(URL, t(1801)));
    }

    #[test]
    fn test_record_upserts_timestamp() {
        let store = CooldownStore::default();
        store.record_notified(URL, t(0));
        store.record_notified(URL, t(1800));

        // Second record restarts the window.
        assert!(!store.can_notify(URL, t(3000)));
        assert!(store.can_notify(URL, t(3600)));
    }

    #[test]
    fn test_acquire_claims_exclusively() {
        let store = CooldownStore::default();
        assert!(store.try_acquire(URL, t(0)));
        // A concurrent decision for the same URL must not also see true.
        assert!(!store.try_acquire(URL, t(0)));
        assert!(!store.can_notify(URL, t(0)));

        store.record_notified(URL, t(0));
        assert!(!store.try_acquire(URL, t(900)));
        assert!(store.try_acquire(URL, t(1801)));
    }

    #[test]
    fn test_release_keeps_product_eligible() {
        let store = CooldownStore::default();
        assert!(store.try_acquire(URL, t(0)));
        store.release(URL);

        // No stamp was written; the next cycle may dispatch.
        assert!(store.try_acquire(URL, t(1)));
    }

    #[test]
    fn test_per_task_window_override() {
        let store = CooldownStore::default();
        store.record_notified(URL, t(0));

        let short = chrono::Duration::seconds(60);
        assert!(!store.can_notify_within(URL, t(30), short));
        assert!(store.can_notify_within(URL, t(60), short));
        // The default window still applies for other callers.
        assert!(!store.can_notify(URL, t(60)));
    }

    #[test]
    fn test_urls_are_independent() {
        let store = CooldownStore::default();
        store.record_notified(URL, t(0));
        assert!(store.can_notify("https://other/item", t(0)));
    }

    #[test]
    fn test_concurrent_acquire_single_winner() {
        use std::sync::Arc;

        let store = Arc::new(CooldownStore::default());
        let now = t(0);
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(std::thread::spawn(move || store.try_acquire(URL, now)));
        }

        let wins: usize = handles
            .into_iter()
            .map(|h| h.join().unwrap() as usize)
            .sum();
        assert_eq!(wins, 1);
    }
}
