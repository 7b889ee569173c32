//! One-shot per-site initialization hooks
//!
//! Some sites need a warm-up before the first real visit from a fresh
//! browser instance (accept a region dialog, seed cookies, etc.). An
//! initializer runs at most once per host per browser instance; the shared
//! navigation history is the idempotence check, so a second driver in the
//! same instance never re-runs it.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::browser::history::{NavigateHistory, host_of};
use crate::protocol::TabSession;

/// A warm-up hook for one site (or family of sites).
#[async_trait]
pub trait SiteInitializer: Send + Sync {
    /// Whether this initializer applies to the navigation target.
    fn matches(&self, url: &str) -> bool;

    /// Run the warm-up against the tab about to navigate. Failures are the
    /// initializer's business; the driver proceeds regardless.
    async fn initialize(&self, tab: &Arc<dyn TabSession>);
}

/// Ordered set of initializers consulted before every navigation.
#[derive(Default)]
pub struct SiteInitializerRegistry {
    initializers: Vec<Arc<dyn SiteInitializer>>,
}

impl SiteInitializerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, initializer: Arc<dyn SiteInitializer>) {
        self.initializers.push(initializer);
    }

    pub fn is_empty(&self) -> bool {
        self.initializers.is_empty()
    }

    /// Run every matching initializer whose target host has no prior visit
    /// in `history`.
    pub async fn run_for(
        &self,
        url: &str,
        history: &NavigateHistory,
        tab: &Arc<dyn TabSession>,
    ) {
        if self.initializers.is_empty() {
            return;
        }
        let Some(host) = host_of(url) else {
            return;
        };
        if history.has_visited_host(&host) {
            return;
        }
        for initializer in &self.initializers {
            if initializer.matches(url) {
                debug!("Running site initializer for first visit to {host}");
                initializer.initialize(tab).await;
            }
        }
    }
}
