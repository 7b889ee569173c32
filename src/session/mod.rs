//! Protocol-level browser session driver
//!
//! One [`SessionDriver`] per live tab. It translates high-level actions
//! (navigate, click, type, evaluate, screenshot) into remote-protocol calls
//! and tracks liveness: every protocol failure after the session was
//! established is counted as a session loss, never thrown. A driver with a
//! loss on record is "gone" — subsequent operations degrade to empty
//! results and the owning pool is expected to retire the context.
//!
//! A driver is owned by exactly one worker task; its operations are not
//! meant to be invoked concurrently.

pub mod block_rules;
pub mod site_init;

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::browser::BrowserInstance;
use crate::browser::history::NavigateEntry;
use crate::protocol::{ABOUT_BLANK, CookieRecord, ProtocolError, TabSession};
use crate::stealth::{ActionKind, DelayPolicy};
use block_rules::BlockRuleTable;
use site_init::SiteInitializerRegistry;

/// Pixel offset from an element's clickable point; clicking dead center of
/// every element is another machine tell.
const CLICK_OFFSET: (f64, f64) = (4.0, 4.0);

/// Stateful client for one remote browser tab.
pub struct SessionDriver {
    browser: Arc<BrowserInstance>,
    tab: Arc<dyn TabSession>,
    open_sequence: usize,
    closed: AtomicBool,
    session_losts: AtomicU32,
    last_active_time: Mutex<Instant>,
    navigate_entry: Mutex<Option<Arc<NavigateEntry>>>,
    navigate_url: Mutex<String>,
    delay_policy: DelayPolicy,
    block_rules: Arc<dyn BlockRuleTable>,
    site_initializers: Arc<SiteInitializerRegistry>,
}

impl SessionDriver {
    pub(crate) fn new(
        browser: Arc<BrowserInstance>,
        tab: Arc<dyn TabSession>,
        open_sequence: usize,
        delay_policy: DelayPolicy,
        block_rules: Arc<dyn BlockRuleTable>,
        site_initializers: Arc<SiteInitializerRegistry>,
    ) -> Self {
        Self {
            browser,
            tab,
            open_sequence,
            closed: AtomicBool::new(false),
            session_losts: AtomicU32::new(0),
            last_active_time: Mutex::new(Instant::now()),
            navigate_entry: Mutex::new(None),
            navigate_url: Mutex::new(String::new()),
            delay_policy,
            block_rules,
            site_initializers,
        }
    }

    /// Position of this driver in its browser instance's tab sequence.
    pub fn open_sequence(&self) -> usize {
        self.open_sequence
    }

    pub fn browser(&self) -> &Arc<BrowserInstance> {
        &self.browser
    }

    pub fn session_losts(&self) -> u32 {
        self.session_losts.load(Ordering::Relaxed)
    }

    pub fn last_active_time(&self) -> Instant {
        *self.last_active_time.lock()
    }

    /// The remote side is considered unusable: explicitly closed, browser
    /// process gone, protocol session detached, or any session loss on
    /// record.
    pub fn is_gone(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
            || !self.browser.transport().is_running()
            || !self.tab.is_open()
            || self.session_losts.load(Ordering::Relaxed) > 0
    }

    pub fn is_active(&self) -> bool {
        !self.is_gone()
    }

    /// Navigate the tab to `url`.
    ///
    /// Records a new [`NavigateEntry`] in the shared history, runs the
    /// one-shot site initializers for a first visit to this host, and
    /// configures URL blocking when enabled. Protocol failure is counted,
    /// not returned.
    pub async fn navigate_to(&self, url: &str) {
        if !self.is_active() {
            return;
        }

        self.site_initializers
            .run_for(url, self.browser.history(), &self.tab)
            .await;

        let entry = NavigateEntry::new(url);
        *self.navigate_entry.lock() = Some(entry.clone());
        self.browser.history().add(entry);
        *self.navigate_url.lock() = url.to_string();
        *self.last_active_time.lock() = Instant::now();

        self.browser.events().on_will_navigate.invoke(url);

        if self.browser.settings().enable_url_blocking() {
            self.setup_url_blocking(url).await;
        }

        if let Err(e) = self.tab.navigate(url).await {
            self.session_lost("navigate", &e);
        }
    }

    /// Evaluate a script in the page. Protocol failure degrades to `None`;
    /// an exception thrown inside the page is logged and also yields
    /// `None`.
    pub async fn evaluate(&self, expression: &str) -> Option<serde_json::Value> {
        if !self.is_active() {
            return None;
        }
        self.refresh_state();

        match self.tab.evaluate(expression).await {
            Ok(evaluation) => {
                if let Some(exception) = evaluation.exception {
                    debug!("{exception}\n>>>{expression}<<<");
                }
                evaluation.value
            }
            Err(e) => {
                self.session_lost("evaluate", &e);
                None
            }
        }
    }

    /// Click the first element matching `selector`, `count` times.
    ///
    /// The element is scrolled into view and the click lands slightly off
    /// its clickable point, after a humanization delay.
    pub async fn click(&self, selector: &str, count: usize) {
        if !self.is_active() {
            return;
        }
        self.refresh_state();

        let point = match self.tab.scroll_into_view(selector).await {
            Ok(Some(point)) => point,
            Ok(None) => {
                info!("No node found for selector: {selector}");
                return;
            }
            Err(e) => {
                self.session_lost("click", &e);
                return;
            }
        };

        self.pause(ActionKind::Click).await;
        let target = point.offset(CLICK_OFFSET.0, CLICK_OFFSET.1);
        if let Err(e) = self.tab.click_at(target, count).await {
            self.session_lost("click", &e);
            return;
        }
        self.gap().await;
    }

    /// Type `text` into the first element matching `selector`.
    pub async fn type_text(&self, selector: &str, text: &str) {
        if !self.is_active() {
            return;
        }
        self.refresh_state();

        self.pause(ActionKind::Type).await;
        match self.tab.type_text(selector, text).await {
            Ok(true) => {}
            Ok(false) => {
                warn!("No node found for selector: {selector}");
                return;
            }
            Err(e) => {
                self.session_lost("type", &e);
                return;
            }
        }
        self.gap().await;
    }

    /// Poll for an element until it exists or the budget runs out; returns
    /// the remaining budget (zero when exhausted).
    pub async fn wait_for(&self, selector: &str, timeout: Duration) -> Duration {
        if !self.is_active() {
            return timeout;
        }
        self.refresh_state();

        let start = Instant::now();
        loop {
            match self.tab.exists(selector).await {
                Ok(true) => break,
                Ok(false) => {}
                Err(e) => {
                    self.session_lost("wait for selector", &e);
                    break;
                }
            }
            if start.elapsed() >= timeout {
                break;
            }
            self.gap().await;
        }
        timeout.saturating_sub(start.elapsed())
    }

    /// Whether any element matches the selector.
    pub async fn exists(&self, selector: &str) -> bool {
        if !self.is_active() {
            return false;
        }
        self.refresh_state();

        match self.tab.exists(selector).await {
            Ok(found) => found,
            Err(e) => {
                self.session_lost("query selector", &e);
                false
            }
        }
    }

    /// Scroll the first match into view.
    pub async fn scroll_to(&self, selector: &str) {
        if !self.is_active() {
            return;
        }
        self.refresh_state();

        match self.tab.scroll_into_view(selector).await {
            Ok(Some(_)) => {}
            Ok(None) => info!("No node found for selector: {selector}"),
            Err(e) => self.session_lost("scroll", &e),
        }
    }

    /// Outer HTML of the current document.
    pub async fn page_source(&self) -> Option<String> {
        if !self.is_active() {
            return None;
        }

        match self.tab.outer_html().await {
            Ok(html) => Some(html),
            Err(e) => {
                self.session_lost("get page source", &e);
                None
            }
        }
    }

    /// Screenshot of the matched element, or the viewport for `None`.
    pub async fn capture_screenshot(&self, selector: Option<&str>) -> Option<Vec<u8>> {
        if !self.is_active() {
            return None;
        }
        self.refresh_state();

        match self.tab.screenshot(selector).await {
            Ok(Some(bytes)) => Some(bytes),
            Ok(None) => {
                info!(
                    "Can not take screenshot, no node found for selector: {}",
                    selector.unwrap_or("<viewport>")
                );
                None
            }
            Err(e) => {
                self.session_lost("capture screenshot", &e);
                None
            }
        }
    }

    /// Cookies visible to the tab; empty on degraded sessions.
    pub async fn cookies(&self) -> Vec<CookieRecord> {
        if !self.is_active() {
            return Vec::new();
        }
        self.refresh_state();

        match self.tab.cookies().await {
            Ok(cookies) => cookies,
            Err(e) => {
                self.session_lost("get cookies", &e);
                Vec::new()
            }
        }
    }

    /// Current URL of the tab; falls back to the last navigation target
    /// when the session is degraded.
    pub async fn current_url(&self) -> String {
        if !self.is_active() {
            return self.navigate_url.lock().clone();
        }

        match self.tab.url().await {
            Ok(url) if !url.is_empty() => {
                *self.navigate_url.lock() = url.clone();
                url
            }
            Ok(_) => self.navigate_url.lock().clone(),
            Err(e) => {
                self.session_lost("get current url", &e);
                self.navigate_url.lock().clone()
            }
        }
    }

    pub async fn bring_to_front(&self) {
        if !self.is_active() {
            return;
        }
        if let Err(e) = self.tab.bring_to_front().await {
            self.session_lost("bring to front", &e);
        }
    }

    /// Stop the current navigation.
    ///
    /// Headless instances navigate to a blank page so the browser releases
    /// the previous page's resources; GUI instances only stop loading, so a
    /// human can still diagnose what is on screen. Afterwards the redirect
    /// (if any) is recorded and stale tabs are reclaimed.
    pub async fn stop(&self) {
        if !self.is_active() {
            return;
        }
        self.refresh_state();

        let original_url = self.navigate_url.lock().clone();
        if let Some(entry) = self.navigate_entry.lock().as_ref() {
            entry.mark_stopped();
        }

        if self.browser.is_gui() {
            if let Err(e) = self.tab.stop_loading().await {
                self.session_lost("stop loading", &e);
                return;
            }
        } else {
            self.navigate_to(ABOUT_BLANK).await;
        }

        self.handle_redirect(&original_url).await;
        self.clean_tabs().await;
    }

    /// Close the tab held by this driver. Idempotent; the browser instance
    /// itself stays up.
    pub async fn close(&self) {
        if self
            .closed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            if let Err(e) = self.tab.close().await {
                debug!("Tab close tolerated failure: {e}");
            }
        }
    }

    /// Alias for [`SessionDriver::close`]; the browser instance is managed
    /// by its pool.
    pub async fn quit(&self) {
        self.close().await;
    }

    // ------------------------------------------------------------------
    // internals
    // ------------------------------------------------------------------

    fn refresh_state(&self) {
        *self.last_active_time.lock() = Instant::now();
        if let Some(entry) = self.navigate_entry.lock().as_ref() {
            entry.refresh();
        }
    }

    fn session_lost(&self, operation: &str, err: &ProtocolError) {
        self.session_losts.fetch_add(1, Ordering::Relaxed);
        warn!("Failed to {operation}, session might be closed | {err}");
    }

    async fn pause(&self, kind: ActionKind) {
        let delay = (self.delay_policy)(kind);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    async fn gap(&self) {
        self.pause(ActionKind::Gap).await;
    }

    async fn setup_url_blocking(&self, url: &str) {
        let rules = self.block_rules.rules_for(url);
        if rules.is_empty() {
            return;
        }
        let patterns: Vec<String> = rules
            .blocking_urls
            .iter()
            .filter(|pattern| !rules.must_pass(pattern))
            .cloned()
            .collect();
        if let Err(e) = self.tab.set_blocked_urls(patterns).await {
            self.session_lost("set blocked urls", &e);
        }
    }

    /// Record the landing URL when it differs from the navigation target.
    async fn handle_redirect(&self, original_url: &str) {
        let final_url = self.current_url().await;
        if final_url.is_empty() || final_url == original_url || final_url == ABOUT_BLANK {
            return;
        }
        self.browser.history().add(NavigateEntry::new(final_url.clone()));
        self.browser.events().on_navigated.invoke(&final_url);
    }

    /// Reclaim tabs left behind by humanization side-navigation.
    ///
    /// Two passes: tabs whose last same-URL navigation stopped longer than
    /// `fetch_task_timeout + grace` ago are closed (and their history
    /// entries dropped); blank tabs with no matching history entry are only
    /// reported — closing those could kill a tab opened moments ago.
    async fn clean_tabs(&self) {
        let tabs = match self.browser.transport().list_tabs().await {
            Ok(tabs) => tabs,
            Err(e) => {
                self.session_lost("list tabs", &e);
                return;
            }
        };

        if !self.browser.settings().spa_mode() {
            self.close_timeout_tabs(&tabs).await;
        }
        self.report_irrelevant_tabs(&tabs);
    }

    async fn close_timeout_tabs(&self, tabs: &[crate::protocol::TabInfo]) {
        let cutoff = self.browser.settings().tab_timeout();
        for tab in tabs {
            let Some(url) = &tab.url else { continue };
            let stale = self.browser.history().stale_entries_for(url, cutoff);
            if stale.is_empty() {
                continue;
            }
            self.browser.history().remove_entries(&stale);
            debug!("Closing stale tab {} on {url}", tab.id);
            if let Err(e) = self.browser.transport().close_tab(&tab.id).await {
                warn!("Failed to close stale tab {}: {e}", tab.id);
            }
        }
    }

    /// Detection only: candidates are logged, never force-closed.
    fn report_irrelevant_tabs(&self, tabs: &[crate::protocol::TabInfo]) {
        let irrelevant: Vec<&str> = tabs
            .iter()
            .filter(|t| {
                t.url
                    .as_deref()
                    .is_some_and(|u| u.starts_with("about:") && !self.browser.history().contains_url(u))
            })
            .map(|t| t.id.as_str())
            .collect();
        if !irrelevant.is_empty() {
            debug!("Found {} irrelevant tab(s): {:?}", irrelevant.len(), irrelevant);
        }
    }
}

impl std::fmt::Debug for SessionDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionDriver")
            .field("tab", &self.tab.id())
            .field("open_sequence", &self.open_sequence)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .field("session_losts", &self.session_losts.load(Ordering::Relaxed))
            .finish()
    }
}
