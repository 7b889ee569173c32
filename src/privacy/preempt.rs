//! Preemption barrier
//!
//! Lets one privileged operation (identity rotation) run exclusively while
//! ordinary work is paused *from starting*: a pending preemption blocks new
//! ordinary sections, but ordinary sections already admitted run to
//! completion before the preemption proceeds. The contract is the barrier
//! behavior, not the primitive; a write-preferring readers/writer lock
//! provides exactly these semantics.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

/// Readers/writer-style gate between ordinary tasks and preemptive ones.
#[derive(Debug, Default)]
pub struct PreemptGate {
    lock: RwLock<()>,
    normal_entered: AtomicUsize,
    preempt_entered: AtomicUsize,
}

impl PreemptGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run an ordinary critical section.
    ///
    /// Admission blocks while a preemptive section is pending or running;
    /// once admitted the section always finishes.
    pub async fn when_normal<F, T>(&self, section: F) -> T
    where
        F: Future<Output = T>,
    {
        let _guard = self.lock.read().await;
        self.normal_entered.fetch_add(1, Ordering::Relaxed);
        section.await
    }

    /// Run a preemptive critical section.
    ///
    /// Waits for every admitted ordinary section to finish; while waiting,
    /// no new ordinary section is admitted (the lock is write-preferring).
    /// At most one preemptive section runs at a time.
    pub async fn preempt<F, T>(&self, section: F) -> T
    where
        F: Future<Output = T>,
    {
        let _guard = self.lock.write().await;
        self.preempt_entered.fetch_add(1, Ordering::Relaxed);
        section.await
    }

    /// Total ordinary sections admitted so far.
    pub fn normal_entered(&self) -> usize {
        self.normal_entered.load(Ordering::Relaxed)
    }

    /// Total preemptive sections admitted so far.
    pub fn preempt_entered(&self) -> usize {
        self.preempt_entered.load(Ordering::Relaxed)
    }
}
