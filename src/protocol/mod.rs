//! Remote browser control transport
//!
//! The core drives browsers through the two traits in this module rather
//! than a concrete protocol client: [`BrowserTransport`] models one running
//! browser process (tab management, liveness), [`TabSession`] models the
//! protocol session attached to one tab (navigation, DOM, input, network
//! and runtime calls). The production implementation speaks the Chrome
//! DevTools protocol (see [`cdp`]); tests substitute in-memory fakes.
//!
//! Every call reports protocol failures as [`ProtocolError`] — a distinct,
//! catchable error kind. Callers treat any such failure as session loss;
//! the traits themselves never retry.

pub mod cdp;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::events::HandlerChain;

/// The blank page a headless driver parks on to release page resources.
pub const ABOUT_BLANK: &str = "about:blank";

/// A remote-protocol call failed after the session was established.
///
/// Never fatal by itself: drivers count these and degrade to empty results.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The remote end rejected or dropped an RPC.
    #[error("remote protocol call failed: {0}")]
    Rpc(String),
    /// The transport or tab session is already closed.
    #[error("remote session closed")]
    Closed,
}

/// Launching a browser (or attaching a protocol session to a fresh tab)
/// failed. Fatal for the driver being constructed; the caller must recreate
/// it from scratch.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("browser process failed to start: {0}")]
    Process(String),
    #[error("protocol handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),
    #[error("failed to open tab: {0}")]
    Tab(String),
}

/// Identity and last known location of one open tab.
#[derive(Debug, Clone)]
pub struct TabInfo {
    pub id: String,
    pub url: Option<String>,
}

/// Outcome of a script evaluation inside the page.
#[derive(Debug, Clone, Default)]
pub struct Evaluation {
    /// The resulting value, when the script produced one.
    pub value: Option<serde_json::Value>,
    /// Description of an exception thrown *inside* the page. The RPC itself
    /// succeeded in this case.
    pub exception: Option<String>,
}

/// A clickable page coordinate, already scrolled into view.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClickPoint {
    pub x: f64,
    pub y: f64,
}

impl ClickPoint {
    pub fn offset(self, dx: f64, dy: f64) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
        }
    }
}

/// One cookie as an untyped record; key layout follows the wire protocol.
pub type CookieRecord = serde_json::Map<String, serde_json::Value>;

/// Protocol session attached to a single tab.
///
/// Methods mirror the call contract the session driver needs; they do not
/// guard against concurrent use — a tab session is owned by exactly one
/// driver.
#[async_trait]
pub trait TabSession: Send + Sync {
    /// Stable identifier of the underlying tab, usable with
    /// [`BrowserTransport::close_tab`].
    fn id(&self) -> &str;

    /// Whether the protocol session is still attached.
    fn is_open(&self) -> bool;

    async fn navigate(&self, url: &str) -> Result<(), ProtocolError>;

    async fn evaluate(&self, expression: &str) -> Result<Evaluation, ProtocolError>;

    /// Whether any element matches the selector.
    async fn exists(&self, selector: &str) -> Result<bool, ProtocolError>;

    /// Scroll the first match into view and return its clickable point, or
    /// `None` when no element matches.
    async fn scroll_into_view(&self, selector: &str) -> Result<Option<ClickPoint>, ProtocolError>;

    /// Dispatch `count` click input events at the given point.
    async fn click_at(&self, point: ClickPoint, count: usize) -> Result<(), ProtocolError>;

    /// Focus the first match and type the text as key events. Returns false
    /// when no element matches.
    async fn type_text(&self, selector: &str, text: &str) -> Result<bool, ProtocolError>;

    /// Outer HTML of the document.
    async fn outer_html(&self) -> Result<String, ProtocolError>;

    /// Screenshot of the matched element, or the viewport when `selector`
    /// is `None`. `Ok(None)` means the selector matched nothing.
    async fn screenshot(&self, selector: Option<&str>) -> Result<Option<Vec<u8>>, ProtocolError>;

    async fn cookies(&self) -> Result<Vec<CookieRecord>, ProtocolError>;

    async fn url(&self) -> Result<String, ProtocolError>;

    async fn stop_loading(&self) -> Result<(), ProtocolError>;

    async fn bring_to_front(&self) -> Result<(), ProtocolError>;

    /// Configure network-level URL blocking for this tab.
    async fn set_blocked_urls(&self, patterns: Vec<String>) -> Result<(), ProtocolError>;

    /// Register a script evaluated on every new document before page
    /// scripts run.
    async fn add_init_script(&self, source: &str) -> Result<(), ProtocolError>;

    async fn set_user_agent(&self, user_agent: &str) -> Result<(), ProtocolError>;

    /// Subscribe the chain to response-received events; each event invokes
    /// the chain with the response URL.
    async fn on_response_received(&self, chain: HandlerChain<str>) -> Result<(), ProtocolError>;

    /// Detach the session and close the tab. Idempotent; already-closed
    /// transports are tolerated silently.
    async fn close(&self) -> Result<(), ProtocolError>;
}

/// One running browser process.
#[async_trait]
pub trait BrowserTransport: Send + Sync {
    /// Open a new tab and attach a protocol session to it.
    async fn create_tab(&self) -> Result<Arc<dyn TabSession>, LaunchError>;

    /// Enumerate all open tabs of this browser instance.
    async fn list_tabs(&self) -> Result<Vec<TabInfo>, ProtocolError>;

    /// Close a tab by id. Unknown ids are a no-op.
    async fn close_tab(&self, tab_id: &str) -> Result<(), ProtocolError>;

    /// Whether the browser process is still running. Synchronous because it
    /// is consulted on every driver operation.
    fn is_running(&self) -> bool;

    /// Round-trip liveness probe.
    async fn ping(&self) -> bool;

    /// Shut the browser down, closing all tabs.
    async fn close(&self) -> Result<(), ProtocolError>;
}
