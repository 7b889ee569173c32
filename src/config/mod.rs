//! Core configuration types for the harvesting engine
//!
//! A single [`CrawlSettings`] value is shared (via `Arc`) between browser
//! instances, session drivers and queues. Values are plain data; anything
//! that needs to be swapped per test (delay policies, rule tables, loaders)
//! is injected separately rather than carried here.

use std::path::PathBuf;
use std::time::Duration;

/// Default capacity of a loading queue.
///
/// An URL queue should be small since every URL costs about one second of
/// real time to fetch; buffering more provides no throughput benefit and
/// only risks staleness.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Settings shared across the browser, driver and queue layers.
#[derive(Debug, Clone)]
pub struct CrawlSettings {
    /// Run browsers without a visible window.
    pub(crate) headless: bool,
    /// Treat targets as single-page applications (keeps long-lived tabs,
    /// disables the timeout-based tab reclaim).
    pub(crate) spa_mode: bool,
    /// Upper bound for one fetch task; also feeds the stale-tab cutoff.
    pub(crate) fetch_task_timeout: Duration,
    /// Extra slack added to `fetch_task_timeout` before an idle tab is
    /// considered reclaimable.
    pub(crate) tab_reclaim_grace: Duration,
    /// Configure network-level URL blocking from the rule table before
    /// navigating.
    pub(crate) enable_url_blocking: bool,
    /// Override the user agent reported by new tabs.
    pub(crate) user_agent: Option<String>,
    /// Browser window dimensions.
    pub(crate) window_size: (u32, u32),
    /// Timeout for the launch handshake with the browser process.
    pub(crate) launch_timeout: Duration,
    /// Capacity of loading queues created with these settings.
    pub(crate) queue_capacity: usize,
    /// Cooldown between two refills of a loading queue.
    pub(crate) load_delay: Duration,
    /// Root directory for per-identity browser profiles. `None` falls back
    /// to the system temp directory.
    pub(crate) user_data_root: Option<PathBuf>,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            headless: true,
            spa_mode: false,
            fetch_task_timeout: Duration::from_secs(180),
            tab_reclaim_grace: Duration::from_secs(10),
            enable_url_blocking: false,
            user_agent: None,
            window_size: (1920, 1080),
            launch_timeout: Duration::from_secs(30),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            load_delay: Duration::from_secs(120),
            user_data_root: None,
        }
    }
}

impl CrawlSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn headless(&self) -> bool {
        self.headless
    }

    /// True when the browser runs with a visible window. In GUI mode
    /// `stop()` only stops loading (so a human can diagnose the page)
    /// instead of navigating away.
    pub fn is_gui(&self) -> bool {
        !self.headless
    }

    pub fn spa_mode(&self) -> bool {
        self.spa_mode
    }

    pub fn fetch_task_timeout(&self) -> Duration {
        self.fetch_task_timeout
    }

    /// Cutoff after which a stopped tab counts as stale: task timeout plus
    /// the reclaim grace period.
    pub fn tab_timeout(&self) -> Duration {
        self.fetch_task_timeout + self.tab_reclaim_grace
    }

    pub fn enable_url_blocking(&self) -> bool {
        self.enable_url_blocking
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }

    pub fn window_size(&self) -> (u32, u32) {
        self.window_size
    }

    pub fn launch_timeout(&self) -> Duration {
        self.launch_timeout
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    pub fn load_delay(&self) -> Duration {
        self.load_delay
    }

    pub fn user_data_root(&self) -> Option<&PathBuf> {
        self.user_data_root.as_ref()
    }

    pub fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    pub fn with_spa_mode(mut self, spa: bool) -> Self {
        self.spa_mode = spa;
        self
    }

    pub fn with_fetch_task_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_task_timeout = timeout;
        self
    }

    pub fn with_tab_reclaim_grace(mut self, grace: Duration) -> Self {
        self.tab_reclaim_grace = grace;
        self
    }

    pub fn with_url_blocking(mut self, enabled: bool) -> Self {
        self.enable_url_blocking = enabled;
        self
    }

    pub fn with_user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    pub fn with_window_size(mut self, width: u32, height: u32) -> Self {
        self.window_size = (width, height);
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    pub fn with_user_data_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.user_data_root = Some(root.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tab_timeout_includes_grace() {
        let settings = CrawlSettings::new().with_fetch_task_timeout(Duration::from_secs(60));
        assert_eq!(settings.tab_timeout(), Duration::from_secs(70));
    }

    #[test]
    fn gui_is_inverse_of_headless() {
        assert!(!CrawlSettings::default().is_gui());
        assert!(CrawlSettings::default().with_headless(false).is_gui());
    }
}
