//! Privacy contexts: isolated browsing identities
//!
//! A privacy context groups the session drivers of one identity — one
//! browser profile, fingerprint and proxy. Contexts are created on demand
//! by the [`manager::PrivacyContextManager`], marked leaked by an external
//! detector when the identity gets blocked, and never reused after closing.

pub mod manager;
pub mod preempt;

use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::OnceCell;
use tracing::info;
use uuid::Uuid;

use crate::browser::BrowserInstance;
use crate::config::CrawlSettings;
use crate::protocol::LaunchError;
use crate::session::SessionDriver;

/// Identity key of a privacy context.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PrivacyContextId(String);

impl PrivacyContextId {
    pub fn generate() -> Self {
        let id = Uuid::new_v4().simple().to_string();
        Self(id[..12].to_string())
    }

    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PrivacyContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fingerprint and network configuration of one identity.
#[derive(Debug, Clone, Default)]
pub struct FingerprintProfile {
    pub user_agent: Option<String>,
    pub proxy_server: Option<String>,
    pub user_data_dir: Option<PathBuf>,
}

/// Launches the browser instance backing a context. Injected so tests can
/// supply instances over a fake transport.
#[async_trait]
pub trait ContextLauncher: Send + Sync {
    async fn launch(
        &self,
        id: &PrivacyContextId,
        profile: &FingerprintProfile,
        settings: &Arc<CrawlSettings>,
    ) -> Result<Arc<BrowserInstance>, LaunchError>;
}

/// Production launcher: one Chrome process per identity, profile directory
/// and user agent taken from the fingerprint.
#[derive(Debug, Default)]
pub struct ChromeContextLauncher;

#[async_trait]
impl ContextLauncher for ChromeContextLauncher {
    async fn launch(
        &self,
        id: &PrivacyContextId,
        profile: &FingerprintProfile,
        settings: &Arc<CrawlSettings>,
    ) -> Result<Arc<BrowserInstance>, LaunchError> {
        let mut settings = (**settings).clone();
        if let Some(ua) = &profile.user_agent {
            settings = settings.with_user_agent(ua.clone());
        }
        if let Some(dir) = &profile.user_data_dir {
            settings = settings.with_user_data_root(dir.clone());
        }
        info!("Launching browser for privacy context {id}");
        BrowserInstance::launch(Arc::new(settings)).await
    }
}

/// One isolated browsing identity.
///
/// Cheap to create: the backing browser launches lazily on the first driver
/// request. The leak flag is written by an external detector (block-page or
/// CAPTCHA recognition) and only read here.
pub struct PrivacyContext {
    id: PrivacyContextId,
    profile: FingerprintProfile,
    settings: Arc<CrawlSettings>,
    launcher: Arc<dyn ContextLauncher>,
    leaked: AtomicBool,
    closed: AtomicBool,
    browser: OnceCell<Arc<BrowserInstance>>,
}

impl PrivacyContext {
    pub fn new(
        id: PrivacyContextId,
        profile: FingerprintProfile,
        settings: Arc<CrawlSettings>,
        launcher: Arc<dyn ContextLauncher>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            profile,
            settings,
            launcher,
            leaked: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            browser: OnceCell::new(),
        })
    }

    pub fn id(&self) -> &PrivacyContextId {
        &self.id
    }

    pub fn profile(&self) -> &FingerprintProfile {
        &self.profile
    }

    /// Whether the identity has been detected by a target site and must be
    /// retired.
    pub fn is_leaked(&self) -> bool {
        self.leaked.load(Ordering::Relaxed)
    }

    /// External leak signal entry point.
    pub fn mark_leaked(&self) {
        self.leaked.store(true, Ordering::Relaxed);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    /// Usable for new work: neither closed nor leaked.
    pub fn is_active(&self) -> bool {
        !self.is_closed() && !self.is_leaked()
    }

    /// The backing browser instance, launching it on first use.
    pub async fn browser(&self) -> Result<&Arc<BrowserInstance>, LaunchError> {
        if self.is_closed() {
            return Err(LaunchError::Process(format!(
                "privacy context {} is retired",
                self.id
            )));
        }
        self.browser
            .get_or_try_init(|| self.launcher.launch(&self.id, &self.profile, &self.settings))
            .await
    }

    /// Open a new session driver under this identity.
    pub async fn new_driver(&self) -> Result<SessionDriver, LaunchError> {
        let browser = self.browser().await?;
        browser.new_driver().await
    }

    /// Close the context and its browser. Idempotent; a closed context is
    /// never reused.
    pub async fn close(&self) {
        if self
            .closed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            if let Some(browser) = self.browser.get() {
                browser.close().await;
            }
            info!("Privacy context {} closed", self.id);
        }
    }
}

impl fmt::Debug for PrivacyContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivacyContext")
            .field("id", &self.id)
            .field("leaked", &self.is_leaked())
            .field("closed", &self.is_closed())
            .finish()
    }
}
