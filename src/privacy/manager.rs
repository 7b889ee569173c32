//! Privacy context pool
//!
//! Two partitions: `active` (identity-keyed, concurrently accessed) and
//! `zombie` (an unordered drain set awaiting close). A context lives in
//! exactly one partition at any time; the active→zombie transition is
//! atomic with removal from the active map.
//!
//! Leak remediation must not race: two callers independently detecting the
//! same leak must produce one retirement and one replacement, and no
//! ordinary task may start against a context mid-rotation. The preemption
//! barrier provides that exclusion at identity-rotation granularity without
//! serializing ordinary traffic.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

use super::preempt::PreemptGate;
use super::{PrivacyContext, PrivacyContextId};

/// Creates fresh contexts for the pool. Creation is cheap (browsers launch
/// lazily), so the factory is synchronous.
pub trait ContextFactory: Send + Sync {
    fn create(&self, id: PrivacyContextId) -> Arc<PrivacyContext>;
}

/// Owns the pool of privacy contexts and arbitrates preemptive access.
pub struct PrivacyContextManager {
    factory: Arc<dyn ContextFactory>,
    active: DashMap<PrivacyContextId, Arc<PrivacyContext>>,
    zombies: Mutex<VecDeque<Arc<PrivacyContext>>>,
    rotation_lock: tokio::sync::Mutex<()>,
    gate: PreemptGate,
    closed: AtomicBool,
}

impl PrivacyContextManager {
    pub fn new(factory: Arc<dyn ContextFactory>) -> Self {
        Self {
            factory,
            active: DashMap::new(),
            zombies: Mutex::new(VecDeque::new()),
            rotation_lock: tokio::sync::Mutex::new(()),
            gate: PreemptGate::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_active(&self) -> bool {
        !self.closed.load(Ordering::Relaxed)
    }

    /// Number of contexts in the active partition.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Number of retired contexts awaiting close.
    pub fn zombie_count(&self) -> usize {
        self.zombies.lock().len()
    }

    /// Whether the context currently sits in the zombie partition.
    pub fn is_zombie(&self, context: &Arc<PrivacyContext>) -> bool {
        self.zombies
            .lock()
            .iter()
            .any(|z| Arc::ptr_eq(z, context))
    }

    /// First active, healthy context; creates one for a fresh identity when
    /// none qualifies. Selection is first-healthy-wins by design — only one
    /// context is normally in flight per worker, so load balancing buys
    /// nothing.
    pub fn next_active_context(&self) -> Arc<PrivacyContext> {
        self.active
            .iter()
            .find(|entry| entry.value().is_active())
            .map(|entry| entry.value().clone())
            .unwrap_or_else(|| self.compute_if_absent(PrivacyContextId::generate()))
    }

    /// Get-or-create, atomic with respect to concurrent callers requesting
    /// the same id.
    pub fn compute_if_absent(&self, id: PrivacyContextId) -> Arc<PrivacyContext> {
        self.active
            .entry(id.clone())
            .or_insert_with(|| self.factory.create(id))
            .clone()
    }

    /// Run an ordinary task section under the preemption barrier. Worker
    /// loops wrap their per-URL work in this so identity rotation can drain
    /// them.
    pub async fn when_normal<F, T>(&self, section: F) -> T
    where
        F: Future<Output = T>,
    {
        self.gate.when_normal(section).await
    }

    /// Replace a leaked context, exactly once per leak.
    ///
    /// Fast path: a healthy context is returned unchanged, no preemption.
    /// Otherwise a preemptive section is entered (new ordinary tasks pause,
    /// admitted ones finish), the leak is re-checked, and the context is
    /// atomically moved to the zombie partition, closed asynchronously and
    /// replaced by `fallback()`. A caller that lost the race returns the
    /// winner's replacement instead of creating a second one.
    ///
    /// Must not be called from inside a [`PrivacyContextManager::when_normal`]
    /// section: the preemptive side waits for every admitted ordinary
    /// section to finish.
    pub async fn compute_if_leaked<F>(
        &self,
        context: Arc<PrivacyContext>,
        fallback: F,
    ) -> Arc<PrivacyContext>
    where
        F: FnOnce() -> Arc<PrivacyContext>,
    {
        if !context.is_leaked() {
            return context;
        }

        let _rotation = self.rotation_lock.lock().await;
        self.gate
            .preempt(async {
                // Leak status may have changed while we waited at the gate.
                if !context.is_leaked() {
                    return context.clone();
                }

                match self.active.remove(context.id()) {
                    Some((_, retired)) => {
                        info!("Privacy context {} leaked, rotating", retired.id());
                        self.zombies.lock().push_back(retired.clone());

                        let closing = retired.clone();
                        tokio::spawn(async move { closing.close().await });

                        let replacement = fallback();
                        self.active
                            .insert(replacement.id().clone(), replacement.clone());
                        replacement
                    }
                    None => {
                        // An earlier caller already rotated this identity.
                        debug!(
                            "Privacy context {} already retired, reusing replacement",
                            context.id()
                        );
                        self.next_active_context()
                    }
                }
            })
            .await
    }

    /// Best-effort close of every zombie context. Failures are logged,
    /// never thrown and never retried — a retired context that fails to
    /// close is abandoned.
    pub async fn healthy_check(&self) {
        let drained: Vec<_> = {
            let mut zombies = self.zombies.lock();
            zombies.drain(..).collect()
        };
        for zombie in drained {
            zombie.close().await;
        }
    }

    /// Shut the pool down: every active context is retired, then every
    /// zombie closed, swallowing per-context failures.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let ids: Vec<_> = self.active.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some((_, context)) = self.active.remove(&id) {
                self.zombies.lock().push_back(context);
            }
        }

        let drained: Vec<_> = {
            let mut zombies = self.zombies.lock();
            zombies.drain(..).collect()
        };
        for zombie in drained {
            zombie.close().await;
        }
        debug!("Privacy context manager closed");
    }
}

impl Drop for PrivacyContextManager {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::Relaxed) {
            warn!("PrivacyContextManager dropped without close(); contexts may leak browsers");
        }
    }
}
