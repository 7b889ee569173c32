//! Chrome DevTools protocol transport
//!
//! Production implementation of [`BrowserTransport`] / [`TabSession`] on top
//! of chromiumoxide. One [`CdpBrowser`] owns the browser process, its event
//! handler loop and the registry of open tabs; each [`CdpTab`] wraps one
//! `Page`.
//!
//! Chrome occasionally sends CDP events chromiumoxide cannot deserialize;
//! those are non-fatal and filtered out of the handler loop (see
//! chromiumoxide issues #167 and #229).

use async_trait::async_trait;
use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchKeyEventParams, DispatchKeyEventType, DispatchMouseEventParams,
    DispatchMouseEventType, MouseButton,
};
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams as NetworkEnableParams, EventResponseReceived, SetBlockedUrLsParams,
    SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, BringToFrontParams, CaptureScreenshotFormat,
    StopLoadingParams,
};
use chromiumoxide::error::CdpError;
use chromiumoxide::page::{Page, ScreenshotParams};
use dashmap::DashMap;
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::browser_profile;
use crate::browser_setup;
use crate::config::CrawlSettings;
use crate::events::HandlerChain;
use crate::protocol::{
    ABOUT_BLANK, BrowserTransport, ClickPoint, CookieRecord, Evaluation, LaunchError,
    ProtocolError, TabInfo, TabSession,
};

fn rpc_err(err: CdpError) -> ProtocolError {
    ProtocolError::Rpc(err.to_string())
}

/// One running Chrome process driven over CDP.
pub struct CdpBrowser {
    browser: Mutex<Browser>,
    tabs: Arc<DashMap<String, Page>>,
    running: Arc<AtomicBool>,
    handler_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
    user_data_dir: Option<PathBuf>,
}

impl CdpBrowser {
    /// Launch a browser process and start its event loop.
    pub async fn launch(
        settings: &CrawlSettings,
        user_data_dir: PathBuf,
    ) -> Result<Arc<Self>, LaunchError> {
        let (browser, mut handler) =
            browser_setup::launch_browser(settings, user_data_dir.clone()).await?;

        let running = Arc::new(AtomicBool::new(true));
        let running_flag = running.clone();
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    let msg = e.to_string();
                    let benign = msg.contains("data did not match any variant of untagged enum Message")
                        || msg.contains("Failed to deserialize WS response");
                    if benign {
                        trace!("Suppressed benign CDP serialization error: {msg}");
                    } else {
                        error!("Browser handler error: {msg}");
                    }
                }
            }
            // The stream ends when the browser process is gone.
            running_flag.store(false, Ordering::Relaxed);
            info!("Browser event handler loop completed");
        });

        Ok(Arc::new(Self {
            browser: Mutex::new(browser),
            tabs: Arc::new(DashMap::new()),
            running,
            handler_task: parking_lot::Mutex::new(Some(handler_task)),
            user_data_dir: Some(user_data_dir),
        }))
    }
}

#[async_trait]
impl BrowserTransport for CdpBrowser {
    async fn create_tab(&self) -> Result<Arc<dyn TabSession>, LaunchError> {
        if !self.is_running() {
            return Err(LaunchError::Tab("browser process is not running".into()));
        }

        let page = self
            .browser
            .lock()
            .await
            .new_page(ABOUT_BLANK)
            .await
            .map_err(|e| LaunchError::Tab(e.to_string()))?;

        let id = Uuid::new_v4().simple().to_string();
        self.tabs.insert(id.clone(), page.clone());
        debug!("Opened tab {id}");

        Ok(Arc::new(CdpTab {
            id,
            page,
            open: AtomicBool::new(true),
            tabs: self.tabs.clone(),
        }))
    }

    async fn list_tabs(&self) -> Result<Vec<TabInfo>, ProtocolError> {
        if !self.is_running() {
            return Err(ProtocolError::Closed);
        }

        // Snapshot before awaiting so no shard lock is held across a call.
        let pages: Vec<(String, Page)> = self
            .tabs
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let mut infos = Vec::with_capacity(pages.len());
        for (id, page) in pages {
            let url = page.url().await.ok().flatten();
            infos.push(TabInfo { id, url });
        }
        Ok(infos)
    }

    async fn close_tab(&self, tab_id: &str) -> Result<(), ProtocolError> {
        let Some((_, page)) = self.tabs.remove(tab_id) else {
            return Ok(());
        };
        debug!("Closing tab {tab_id}");
        if let Err(e) = page.close().await {
            debug!("Tab {tab_id} was already closed: {e}");
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    async fn ping(&self) -> bool {
        self.is_running() && self.browser.lock().await.version().await.is_ok()
    }

    async fn close(&self) -> Result<(), ProtocolError> {
        if !self.running.swap(false, Ordering::Relaxed) {
            return Ok(());
        }

        self.tabs.clear();
        {
            let mut browser = self.browser.lock().await;
            if let Err(e) = browser.close().await {
                warn!("Failed to close browser: {e}");
            }
            if let Err(e) = browser.wait().await {
                warn!("Failed to wait for browser exit: {e}");
            }
        }
        if let Some(task) = self.handler_task.lock().take() {
            task.abort();
        }
        if let Some(dir) = &self.user_data_dir {
            browser_profile::remove_profile_dir(dir);
        }
        Ok(())
    }
}

impl Drop for CdpBrowser {
    fn drop(&mut self) {
        if let Some(task) = self.handler_task.lock().take() {
            task.abort();
        }
    }
}

/// Protocol session for one Chrome tab.
pub struct CdpTab {
    id: String,
    page: Page,
    open: AtomicBool,
    tabs: Arc<DashMap<String, Page>>,
}

#[async_trait]
impl TabSession for CdpTab {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Relaxed)
    }

    async fn navigate(&self, url: &str) -> Result<(), ProtocolError> {
        self.page.goto(url).await.map_err(rpc_err)?;
        Ok(())
    }

    async fn evaluate(&self, expression: &str) -> Result<Evaluation, ProtocolError> {
        match self.page.evaluate(expression).await {
            Ok(result) => Ok(Evaluation {
                value: result.value().cloned(),
                exception: None,
            }),
            // The RPC round-trip succeeded; the script itself threw.
            Err(CdpError::JavascriptException(details)) => Ok(Evaluation {
                value: None,
                exception: Some(details.text.clone()),
            }),
            Err(err) => Err(rpc_err(err)),
        }
    }

    async fn exists(&self, selector: &str) -> Result<bool, ProtocolError> {
        let expr = format!(
            "document.querySelector({}) !== null",
            serde_json::to_string(selector).unwrap_or_default()
        );
        let evaluation = self.evaluate(&expr).await?;
        Ok(evaluation.value.and_then(|v| v.as_bool()).unwrap_or(false))
    }

    async fn scroll_into_view(&self, selector: &str) -> Result<Option<ClickPoint>, ProtocolError> {
        let element = match self.page.find_element(selector).await {
            Ok(element) => element,
            Err(CdpError::NotFound) => return Ok(None),
            Err(err) => return Err(rpc_err(err)),
        };
        // Geometry failures (hidden element, no content box) are an element
        // problem, not a session problem.
        if let Err(err) = element.scroll_into_view().await {
            debug!("Failed to scroll {selector} into view: {err}");
            return Ok(None);
        }
        match element.clickable_point().await {
            Ok(point) => Ok(Some(ClickPoint {
                x: point.x,
                y: point.y,
            })),
            Err(err) => {
                debug!("No clickable point for {selector}: {err}");
                Ok(None)
            }
        }
    }

    async fn click_at(&self, point: ClickPoint, count: usize) -> Result<(), ProtocolError> {
        let moved = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MouseMoved)
            .x(point.x)
            .y(point.y)
            .build()
            .map_err(ProtocolError::Rpc)?;
        self.page.execute(moved).await.map_err(rpc_err)?;

        for click in 0..count.max(1) {
            let pressed = DispatchMouseEventParams::builder()
                .r#type(DispatchMouseEventType::MousePressed)
                .x(point.x)
                .y(point.y)
                .button(MouseButton::Left)
                .click_count(click as i64 + 1)
                .build()
                .map_err(ProtocolError::Rpc)?;
            self.page.execute(pressed).await.map_err(rpc_err)?;

            let released = DispatchMouseEventParams::builder()
                .r#type(DispatchMouseEventType::MouseReleased)
                .x(point.x)
                .y(point.y)
                .button(MouseButton::Left)
                .click_count(click as i64 + 1)
                .build()
                .map_err(ProtocolError::Rpc)?;
            self.page.execute(released).await.map_err(rpc_err)?;
        }
        Ok(())
    }

    async fn type_text(&self, selector: &str, text: &str) -> Result<bool, ProtocolError> {
        if let Err(CdpError::NotFound) = self.page.find_element(selector).await {
            return Ok(false);
        }
        let focus = format!(
            "document.querySelector({})?.focus()",
            serde_json::to_string(selector).unwrap_or_default()
        );
        self.page.evaluate(focus).await.map_err(rpc_err)?;

        for ch in text.chars() {
            let params = DispatchKeyEventParams::builder()
                .r#type(DispatchKeyEventType::Char)
                .text(ch.to_string())
                .build()
                .map_err(ProtocolError::Rpc)?;
            self.page.execute(params).await.map_err(rpc_err)?;
        }
        Ok(true)
    }

    async fn outer_html(&self) -> Result<String, ProtocolError> {
        self.page.content().await.map_err(rpc_err)
    }

    async fn screenshot(&self, selector: Option<&str>) -> Result<Option<Vec<u8>>, ProtocolError> {
        match selector {
            Some(selector) => {
                let element = match self.page.find_element(selector).await {
                    Ok(element) => element,
                    Err(CdpError::NotFound) => return Ok(None),
                    Err(err) => return Err(rpc_err(err)),
                };
                let bytes = element
                    .screenshot(CaptureScreenshotFormat::Png)
                    .await
                    .map_err(rpc_err)?;
                Ok(Some(bytes))
            }
            None => {
                let bytes = self
                    .page
                    .screenshot(ScreenshotParams::builder().build())
                    .await
                    .map_err(rpc_err)?;
                Ok(Some(bytes))
            }
        }
    }

    async fn cookies(&self) -> Result<Vec<CookieRecord>, ProtocolError> {
        let cookies = self.page.get_cookies().await.map_err(rpc_err)?;
        let records = cookies
            .iter()
            .filter_map(|cookie| match serde_json::to_value(cookie) {
                Ok(serde_json::Value::Object(map)) => Some(map),
                _ => None,
            })
            .collect();
        Ok(records)
    }

    async fn url(&self) -> Result<String, ProtocolError> {
        Ok(self
            .page
            .url()
            .await
            .map_err(rpc_err)?
            .unwrap_or_default())
    }

    async fn stop_loading(&self) -> Result<(), ProtocolError> {
        self.page
            .execute(StopLoadingParams::default())
            .await
            .map_err(rpc_err)?;
        Ok(())
    }

    async fn bring_to_front(&self) -> Result<(), ProtocolError> {
        self.page
            .execute(BringToFrontParams::default())
            .await
            .map_err(rpc_err)?;
        Ok(())
    }

    async fn set_blocked_urls(&self, patterns: Vec<String>) -> Result<(), ProtocolError> {
        self.page
            .execute(NetworkEnableParams::default())
            .await
            .map_err(rpc_err)?;
        self.page
            .execute(SetBlockedUrLsParams::new(patterns))
            .await
            .map_err(rpc_err)?;
        Ok(())
    }

    async fn add_init_script(&self, source: &str) -> Result<(), ProtocolError> {
        self.page
            .execute(AddScriptToEvaluateOnNewDocumentParams {
                source: source.to_string(),
                include_command_line_api: None,
                world_name: None,
                run_immediately: None,
            })
            .await
            .map_err(rpc_err)?;
        Ok(())
    }

    async fn set_user_agent(&self, user_agent: &str) -> Result<(), ProtocolError> {
        self.page
            .execute(SetUserAgentOverrideParams {
                user_agent: user_agent.to_string(),
                accept_language: None,
                platform: None,
                user_agent_metadata: None,
            })
            .await
            .map_err(rpc_err)?;
        Ok(())
    }

    async fn on_response_received(&self, chain: HandlerChain<str>) -> Result<(), ProtocolError> {
        let mut events = self
            .page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(rpc_err)?;
        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                chain.invoke(&event.response.url);
            }
        });
        Ok(())
    }

    async fn close(&self) -> Result<(), ProtocolError> {
        if self.open.swap(false, Ordering::Relaxed) {
            self.tabs.remove(&self.id);
            if let Err(e) = self.page.clone().close().await {
                debug!("Tab {} was already closed: {e}", self.id);
            }
        }
        Ok(())
    }
}
