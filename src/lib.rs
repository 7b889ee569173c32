//! veilcrawl — anti-detection web harvesting core
//!
//! Drives real browser instances over the Chrome DevTools protocol while
//! rotating browsing identities and feeding them from bounded, lazily
//! refilled URL queues. Three subsystems cooperate:
//!
//! - [`session::SessionDriver`] — one stateful client per remote tab, with
//!   session-loss detection and humanized input timing;
//! - [`privacy::manager::PrivacyContextManager`] — the identity pool, with
//!   leak-driven rotation behind a preemption barrier;
//! - [`queue::LoadingQueue`] — a bounded work queue in front of an external
//!   unbounded store.
//!
//! Feature extraction, job submission and page persistence live outside
//! this crate; they cross its boundary as opaque values.

pub mod browser;
pub mod browser_profile;
pub mod browser_setup;
pub mod config;
pub mod events;
pub mod privacy;
pub mod protocol;
pub mod queue;
pub mod session;
pub mod stealth;

pub use browser::BrowserInstance;
pub use browser::history::{NavigateEntry, NavigateHistory};
pub use config::{CrawlSettings, DEFAULT_QUEUE_CAPACITY};
pub use events::{FilterChain, HandlerChain, NavigationEvents};
pub use privacy::manager::{ContextFactory, PrivacyContextManager};
pub use privacy::preempt::PreemptGate;
pub use privacy::{
    ChromeContextLauncher, ContextLauncher, FingerprintProfile, PrivacyContext, PrivacyContextId,
};
pub use protocol::{
    BrowserTransport, ClickPoint, CookieRecord, Evaluation, LaunchError, ProtocolError, TabInfo,
    TabSession,
};
pub use queue::loader::{ExternalUrlLoader, LocalFileUrlLoader, TempFileUrlLoader};
pub use queue::{LoadingQueue, QueuedUrl, UrlGroup};
pub use session::SessionDriver;
pub use session::block_rules::{BlockRuleTable, BlockRules, NoBlockRules, StaticBlockRules};
pub use session::site_init::{SiteInitializer, SiteInitializerRegistry};
pub use stealth::{ActionKind, DelayPolicy, humanized_delays, zero_delays};
