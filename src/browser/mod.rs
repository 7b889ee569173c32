//! Browser instance layer
//!
//! A [`BrowserInstance`] pairs one transport (one browser process) with the
//! state shared by all of its tabs: the navigation history, the hook chains
//! and the policies drivers consult. Shared state is owned here and injected
//! into drivers — there are no ambient globals, so tests instantiate
//! isolated instances freely.

pub mod history;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::warn;
use uuid::Uuid;

use crate::browser_profile::BrowserProfile;
use crate::config::CrawlSettings;
use crate::events::NavigationEvents;
use crate::protocol::cdp::CdpBrowser;
use crate::protocol::{BrowserTransport, LaunchError};
use crate::session::SessionDriver;
use crate::session::block_rules::{BlockRuleTable, NoBlockRules};
use crate::session::site_init::SiteInitializerRegistry;
use crate::stealth::{self, DelayPolicy, humanized_delays};
use history::NavigateHistory;

/// One browser process plus the state its session drivers share.
pub struct BrowserInstance {
    id: Uuid,
    settings: Arc<CrawlSettings>,
    transport: Arc<dyn BrowserTransport>,
    history: Arc<NavigateHistory>,
    driver_seq: AtomicUsize,
    delay_policy: DelayPolicy,
    block_rules: Arc<dyn BlockRuleTable>,
    site_initializers: Arc<SiteInitializerRegistry>,
    events: NavigationEvents,
}

impl BrowserInstance {
    /// Wrap an already-running transport. This is the seam tests use to
    /// substitute a fake protocol implementation; call the `with_*` setters
    /// before sharing the instance.
    pub fn new(settings: Arc<CrawlSettings>, transport: Arc<dyn BrowserTransport>) -> Self {
        Self {
            id: Uuid::new_v4(),
            settings,
            transport,
            history: Arc::new(NavigateHistory::new()),
            driver_seq: AtomicUsize::new(0),
            delay_policy: humanized_delays(),
            block_rules: Arc::new(NoBlockRules),
            site_initializers: Arc::new(SiteInitializerRegistry::new()),
            events: NavigationEvents::new(),
        }
    }

    /// Launch a real Chrome process with a fresh profile directory.
    pub async fn launch(settings: Arc<CrawlSettings>) -> Result<Arc<Self>, LaunchError> {
        let profile = BrowserProfile::create(
            settings.user_data_root().map(PathBuf::as_path),
            "veilcrawl_profile",
        )
        .map_err(|e| LaunchError::Process(format!("failed to create profile: {e}")))?;

        let transport = CdpBrowser::launch(&settings, profile.into_path()).await?;
        Ok(Arc::new(Self::new(settings, transport)))
    }

    /// Replace the humanization delay policy (tests inject zero delays).
    pub fn with_delay_policy(mut self, policy: DelayPolicy) -> Self {
        self.delay_policy = policy;
        self
    }

    pub fn with_block_rules(mut self, rules: Arc<dyn BlockRuleTable>) -> Self {
        self.block_rules = rules;
        self
    }

    pub fn with_site_initializers(mut self, registry: SiteInitializerRegistry) -> Self {
        self.site_initializers = Arc::new(registry);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn settings(&self) -> &Arc<CrawlSettings> {
        &self.settings
    }

    pub fn transport(&self) -> &Arc<dyn BrowserTransport> {
        &self.transport
    }

    pub fn history(&self) -> &Arc<NavigateHistory> {
        &self.history
    }

    pub fn events(&self) -> &NavigationEvents {
        &self.events
    }

    pub fn is_gui(&self) -> bool {
        self.settings.is_gui()
    }

    /// Number of drivers opened on this instance so far.
    pub fn driver_count(&self) -> usize {
        self.driver_seq.load(Ordering::Relaxed)
    }

    /// Open a new tab and wrap it in a session driver.
    ///
    /// Stealth scripts are injected before the driver sees the tab; a tab
    /// that rejects every evasion script still yields a driver, just a
    /// noisier one.
    pub async fn new_driver(self: &Arc<Self>) -> Result<SessionDriver, LaunchError> {
        let tab = self.transport.create_tab().await?;

        if let Err(e) = stealth::inject(&tab, self.settings.user_agent()).await {
            warn!("Stealth injection failed for new tab: {e}");
        }

        if !self.events.on_response_received.is_empty()
            && let Err(e) = tab
                .on_response_received(self.events.on_response_received.clone())
                .await
        {
            warn!("Failed to subscribe to response events: {e}");
        }

        let open_sequence = self.driver_seq.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(SessionDriver::new(
            self.clone(),
            tab,
            open_sequence,
            self.delay_policy.clone(),
            self.block_rules.clone(),
            self.site_initializers.clone(),
        ))
    }

    /// Shut the whole browser down; every driver of this instance goes with
    /// it.
    pub async fn close(&self) {
        if let Err(e) = self.transport.close().await {
            warn!("Failed to close browser instance {}: {e}", self.id);
        }
    }
}
