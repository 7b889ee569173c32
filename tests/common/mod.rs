//! Shared test fixtures: a scriptable in-memory protocol transport, an
//! in-memory URL store, and counting context factories.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use veilcrawl::queue::loader::ExternalUrlLoader;
use veilcrawl::{
    BrowserInstance, BrowserTransport, ClickPoint, ContextLauncher, CookieRecord, CrawlSettings,
    Evaluation, FingerprintProfile, HandlerChain, LaunchError, PrivacyContext, PrivacyContextId,
    ProtocolError, QueuedUrl, TabInfo, TabSession, UrlGroup, zero_delays,
};

/// Opt-in log output for debugging test failures: `RUST_LOG=debug cargo test`.
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

// ---------------------------------------------------------------------------
// Mock protocol transport
// ---------------------------------------------------------------------------

/// A scriptable tab: selectors in `dom` exist, operations listed in
/// `failing_ops` fail with a protocol error.
pub struct MockTab {
    id: String,
    open: AtomicBool,
    url: Mutex<String>,
    failing_ops: Mutex<HashSet<&'static str>>,
    pub navigations: Mutex<Vec<String>>,
    pub dom: Mutex<HashSet<String>>,
    pub eval_result: Mutex<Option<serde_json::Value>>,
    pub eval_exception: Mutex<Option<String>>,
    pub clicks: Mutex<Vec<(ClickPoint, usize)>>,
    pub typed: Mutex<Vec<(String, String)>>,
    pub blocked_urls: Mutex<Vec<String>>,
    pub init_scripts: Mutex<Vec<String>>,
}

impl MockTab {
    pub fn new(id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            open: AtomicBool::new(true),
            url: Mutex::new(String::new()),
            failing_ops: Mutex::new(HashSet::new()),
            navigations: Mutex::new(Vec::new()),
            dom: Mutex::new(HashSet::new()),
            eval_result: Mutex::new(None),
            eval_exception: Mutex::new(None),
            clicks: Mutex::new(Vec::new()),
            typed: Mutex::new(Vec::new()),
            blocked_urls: Mutex::new(Vec::new()),
            init_scripts: Mutex::new(Vec::new()),
        })
    }

    /// Make the named operation fail from now on.
    pub fn fail_on(&self, op: &'static str) {
        self.failing_ops.lock().insert(op);
    }

    pub fn set_url(&self, url: impl Into<String>) {
        *self.url.lock() = url.into();
    }

    pub fn add_element(&self, selector: impl Into<String>) {
        self.dom.lock().insert(selector.into());
    }

    fn check(&self, op: &'static str) -> Result<(), ProtocolError> {
        if self.failing_ops.lock().contains(op) {
            return Err(ProtocolError::Rpc(format!("simulated {op} failure")));
        }
        Ok(())
    }
}

#[async_trait]
impl TabSession for MockTab {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Relaxed)
    }

    async fn navigate(&self, url: &str) -> Result<(), ProtocolError> {
        self.check("navigate")?;
        self.navigations.lock().push(url.to_string());
        *self.url.lock() = url.to_string();
        Ok(())
    }

    async fn evaluate(&self, _expression: &str) -> Result<Evaluation, ProtocolError> {
        self.check("evaluate")?;
        Ok(Evaluation {
            value: self.eval_result.lock().clone(),
            exception: self.eval_exception.lock().clone(),
        })
    }

    async fn exists(&self, selector: &str) -> Result<bool, ProtocolError> {
        self.check("exists")?;
        Ok(self.dom.lock().contains(selector))
    }

    async fn scroll_into_view(&self, selector: &str) -> Result<Option<ClickPoint>, ProtocolError> {
        self.check("scroll_into_view")?;
        Ok(self
            .dom
            .lock()
            .contains(selector)
            .then_some(ClickPoint { x: 100.0, y: 50.0 }))
    }

    async fn click_at(&self, point: ClickPoint, count: usize) -> Result<(), ProtocolError> {
        self.check("click")?;
        self.clicks.lock().push((point, count));
        Ok(())
    }

    async fn type_text(&self, selector: &str, text: &str) -> Result<bool, ProtocolError> {
        self.check("type")?;
        if !self.dom.lock().contains(selector) {
            return Ok(false);
        }
        self.typed.lock().push((selector.to_string(), text.to_string()));
        Ok(true)
    }

    async fn outer_html(&self) -> Result<String, ProtocolError> {
        self.check("outer_html")?;
        Ok("<html><body>mock</body></html>".to_string())
    }

    async fn screenshot(&self, selector: Option<&str>) -> Result<Option<Vec<u8>>, ProtocolError> {
        self.check("screenshot")?;
        if let Some(selector) = selector
            && !self.dom.lock().contains(selector)
        {
            return Ok(None);
        }
        Ok(Some(vec![0x89, 0x50, 0x4e, 0x47]))
    }

    async fn cookies(&self) -> Result<Vec<CookieRecord>, ProtocolError> {
        self.check("cookies")?;
        Ok(Vec::new())
    }

    async fn url(&self) -> Result<String, ProtocolError> {
        self.check("url")?;
        Ok(self.url.lock().clone())
    }

    async fn stop_loading(&self) -> Result<(), ProtocolError> {
        self.check("stop_loading")?;
        Ok(())
    }

    async fn bring_to_front(&self) -> Result<(), ProtocolError> {
        self.check("bring_to_front")?;
        Ok(())
    }

    async fn set_blocked_urls(&self, patterns: Vec<String>) -> Result<(), ProtocolError> {
        self.check("set_blocked_urls")?;
        *self.blocked_urls.lock() = patterns;
        Ok(())
    }

    async fn add_init_script(&self, source: &str) -> Result<(), ProtocolError> {
        self.check("add_init_script")?;
        self.init_scripts.lock().push(source.to_string());
        Ok(())
    }

    async fn set_user_agent(&self, _user_agent: &str) -> Result<(), ProtocolError> {
        self.check("set_user_agent")?;
        Ok(())
    }

    async fn on_response_received(&self, _chain: HandlerChain<str>) -> Result<(), ProtocolError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), ProtocolError> {
        self.open.store(false, Ordering::Relaxed);
        Ok(())
    }
}

/// A transport over a set of mock tabs.
pub struct MockTransport {
    running: AtomicBool,
    tabs: Mutex<Vec<Arc<MockTab>>>,
    pub closed_tabs: Mutex<Vec<String>>,
    next_tab: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            running: AtomicBool::new(true),
            tabs: Mutex::new(Vec::new()),
            closed_tabs: Mutex::new(Vec::new()),
            next_tab: AtomicUsize::new(0),
        })
    }

    /// Register an extra tab without going through `create_tab`, e.g. a
    /// leftover humanization tab.
    pub fn add_tab(&self, tab: Arc<MockTab>) {
        self.tabs.lock().push(tab);
    }

    pub fn last_tab(&self) -> Arc<MockTab> {
        self.tabs.lock().last().expect("no tab created").clone()
    }

    pub fn stop_process(&self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

#[async_trait]
impl BrowserTransport for MockTransport {
    async fn create_tab(&self) -> Result<Arc<dyn TabSession>, LaunchError> {
        if !self.is_running() {
            return Err(LaunchError::Tab("process not running".into()));
        }
        let seq = self.next_tab.fetch_add(1, Ordering::Relaxed);
        let tab = MockTab::new(format!("tab-{seq}"));
        self.tabs.lock().push(tab.clone());
        Ok(tab)
    }

    async fn list_tabs(&self) -> Result<Vec<TabInfo>, ProtocolError> {
        Ok(self
            .tabs
            .lock()
            .iter()
            .map(|tab| TabInfo {
                id: tab.id().to_string(),
                url: Some(tab.url.lock().clone()),
            })
            .collect())
    }

    async fn close_tab(&self, tab_id: &str) -> Result<(), ProtocolError> {
        self.closed_tabs.lock().push(tab_id.to_string());
        let mut tabs = self.tabs.lock();
        if let Some(pos) = tabs.iter().position(|t| t.id() == tab_id) {
            let tab = tabs.remove(pos);
            tab.open.store(false, Ordering::Relaxed);
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    async fn ping(&self) -> bool {
        self.is_running()
    }

    async fn close(&self) -> Result<(), ProtocolError> {
        self.running.store(false, Ordering::Relaxed);
        self.tabs.lock().clear();
        Ok(())
    }
}

/// A browser instance over a fresh mock transport, zero-delay policy.
pub fn mock_browser(settings: CrawlSettings) -> (Arc<BrowserInstance>, Arc<MockTransport>) {
    let transport = MockTransport::new();
    let browser = Arc::new(
        BrowserInstance::new(Arc::new(settings), transport.clone())
            .with_delay_policy(zero_delays()),
    );
    (browser, transport)
}

// ---------------------------------------------------------------------------
// In-memory URL store
// ---------------------------------------------------------------------------

/// Store over a map of group -> queue, with call counters for TTL tests.
#[derive(Default)]
pub struct MemoryUrlLoader {
    store: Mutex<HashMap<UrlGroup, VecDeque<QueuedUrl>>>,
    pub count_calls: AtomicUsize,
    pub save_calls: AtomicUsize,
}

impl MemoryUrlLoader {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seed(&self, group: &UrlGroup, urls: impl IntoIterator<Item = QueuedUrl>) {
        self.store
            .lock()
            .entry(group.clone())
            .or_default()
            .extend(urls);
    }

    pub fn stored(&self, group: &UrlGroup) -> Vec<QueuedUrl> {
        self.store
            .lock()
            .get(group)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl ExternalUrlLoader for MemoryUrlLoader {
    fn save(&self, url: &QueuedUrl, group: &UrlGroup) -> anyhow::Result<()> {
        self.save_calls.fetch_add(1, Ordering::Relaxed);
        self.store
            .lock()
            .entry(group.clone())
            .or_default()
            .push_back(url.clone());
        Ok(())
    }

    fn load_to(
        &self,
        sink: &mut VecDeque<QueuedUrl>,
        max_count: usize,
        group: &UrlGroup,
    ) -> anyhow::Result<usize> {
        let mut store = self.store.lock();
        let Some(queue) = store.get_mut(group) else {
            return Ok(0);
        };
        let mut loaded = 0;
        while loaded < max_count {
            let Some(url) = queue.pop_front() else { break };
            sink.push_back(url);
            loaded += 1;
        }
        Ok(loaded)
    }

    fn count_remaining(&self, group: &UrlGroup) -> anyhow::Result<usize> {
        self.count_calls.fetch_add(1, Ordering::Relaxed);
        Ok(self.store.lock().get(group).map_or(0, VecDeque::len))
    }

    fn delete_all(&self, group: &UrlGroup) -> anyhow::Result<usize> {
        Ok(self
            .store
            .lock()
            .remove(group)
            .map_or(0, |q| q.len()))
    }
}

// ---------------------------------------------------------------------------
// Privacy context fixtures
// ---------------------------------------------------------------------------

/// Launcher producing browser instances over mock transports.
pub struct MockContextLauncher;

#[async_trait]
impl ContextLauncher for MockContextLauncher {
    async fn launch(
        &self,
        _id: &PrivacyContextId,
        _profile: &FingerprintProfile,
        settings: &Arc<CrawlSettings>,
    ) -> Result<Arc<BrowserInstance>, LaunchError> {
        let transport = MockTransport::new();
        Ok(Arc::new(
            BrowserInstance::new(settings.clone(), transport).with_delay_policy(zero_delays()),
        ))
    }
}

/// Context factory that counts how many contexts it created.
pub struct CountingFactory {
    pub created: AtomicUsize,
    settings: Arc<CrawlSettings>,
}

impl CountingFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            created: AtomicUsize::new(0),
            settings: Arc::new(CrawlSettings::default()),
        })
    }

    pub fn create(&self, id: PrivacyContextId) -> Arc<PrivacyContext> {
        self.created.fetch_add(1, Ordering::SeqCst);
        PrivacyContext::new(
            id,
            FingerprintProfile::default(),
            self.settings.clone(),
            Arc::new(MockContextLauncher),
        )
    }
}

impl veilcrawl::ContextFactory for CountingFactory {
    fn create(&self, id: PrivacyContextId) -> Arc<PrivacyContext> {
        CountingFactory::create(self, id)
    }
}
