//! Shared navigation history
//!
//! One append-mostly log per browser instance, shared by every session
//! driver the instance spawns. Drivers append an entry per navigation
//! attempt; tab cleanup reads it to find stale tabs and removes the entries
//! it reclaimed. Redirect detection appends the final URL after `stop()`.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use url::Url;

/// One navigation attempt.
#[derive(Debug)]
pub struct NavigateEntry {
    url: String,
    stopped: AtomicBool,
    created_at: Instant,
    active_time: Mutex<Instant>,
}

impl NavigateEntry {
    pub fn new(url: impl Into<String>) -> Arc<Self> {
        let now = Instant::now();
        Arc::new(Self {
            url: url.into(),
            stopped: AtomicBool::new(false),
            created_at: now,
            active_time: Mutex::new(now),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn stopped(&self) -> bool {
        self.stopped.load(Ordering::Relaxed)
    }

    pub fn mark_stopped(&self) {
        self.stopped.store(true, Ordering::Relaxed);
    }

    /// Bump the last-active timestamp; called on every driver operation
    /// while this entry is current.
    pub fn refresh(&self) {
        *self.active_time.lock() = Instant::now();
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn active_time(&self) -> Instant {
        *self.active_time.lock()
    }

    /// Stopped and inactive for longer than `cutoff`.
    pub fn is_stale(&self, cutoff: Duration) -> bool {
        self.stopped() && self.active_time().elapsed() > cutoff
    }
}

/// The append-mostly log itself. Injected into drivers, never a global.
#[derive(Debug, Default)]
pub struct NavigateHistory {
    entries: Mutex<Vec<Arc<NavigateEntry>>>,
}

impl NavigateHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, entry: Arc<NavigateEntry>) {
        self.entries.lock().push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn contains_url(&self, url: &str) -> bool {
        self.entries.lock().iter().any(|e| e.url() == url)
    }

    /// Whether any recorded navigation targeted the given host. Used for
    /// the one-shot per-site initialization hooks.
    pub fn has_visited_host(&self, host: &str) -> bool {
        self.entries
            .lock()
            .iter()
            .any(|e| host_of(e.url()).as_deref() == Some(host))
    }

    /// Entries for `url` that are stopped and inactive past `cutoff`.
    pub fn stale_entries_for(&self, url: &str, cutoff: Duration) -> Vec<Arc<NavigateEntry>> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.url() == url && e.is_stale(cutoff))
            .cloned()
            .collect()
    }

    /// Remove exactly the given entries (identity comparison).
    pub fn remove_entries(&self, stale: &[Arc<NavigateEntry>]) {
        let mut entries = self.entries.lock();
        entries.retain(|e| !stale.iter().any(|s| Arc::ptr_eq(e, s)));
    }

    pub fn snapshot(&self) -> Vec<Arc<NavigateEntry>> {
        self.entries.lock().clone()
    }
}

/// Host part of a URL, lowercased; `None` for unparseable input.
pub fn host_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_requires_stopped() {
        let entry = NavigateEntry::new("https://example.com/a");
        assert!(!entry.is_stale(Duration::ZERO));
        entry.mark_stopped();
        assert!(entry.is_stale(Duration::ZERO));
        assert!(!entry.is_stale(Duration::from_secs(3600)));
    }

    #[test]
    fn host_visits_are_tracked() {
        let history = NavigateHistory::new();
        history.add(NavigateEntry::new("https://shop.example.com/item/1"));

        assert!(history.has_visited_host("shop.example.com"));
        assert!(!history.has_visited_host("example.com"));
        assert!(history.contains_url("https://shop.example.com/item/1"));
    }

    #[test]
    fn remove_entries_is_by_identity() {
        let history = NavigateHistory::new();
        let a = NavigateEntry::new("https://example.com/a");
        let twin = NavigateEntry::new("https://example.com/a");
        history.add(a.clone());
        history.add(twin);

        history.remove_entries(&[a]);
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn host_of_normalizes_case() {
        assert_eq!(
            host_of("https://ShOp.Example.COM/x").as_deref(),
            Some("shop.example.com")
        );
        assert_eq!(host_of("not a url"), None);
    }
}
