//! Bounded loading queues over an external store
//!
//! A [`LoadingQueue`] keeps a small in-memory window onto an unbounded
//! external store: refills itself on a cooldown when slots free up, and
//! overflows persistable items back to the store instead of growing past
//! capacity. The store is the system of record — the buffer is a read-ahead
//! cache with write-behind overflow, so queues survive process restarts
//! through the store, not the buffer.

pub mod loader;

use parking_lot::Mutex;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::DEFAULT_QUEUE_CAPACITY;
use loader::ExternalUrlLoader;

/// Logical partition of the external store (for example one per domain).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UrlGroup(String);

impl UrlGroup {
    pub fn new(group: impl Into<String>) -> Self {
        Self(group.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UrlGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One unit of pending work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedUrl {
    url: String,
    #[serde(default)]
    depth: u8,
    /// Ephemeral items (generated at runtime) are held in memory only and
    /// never written to the external store.
    #[serde(default = "default_persistable")]
    persistable: bool,
}

fn default_persistable() -> bool {
    true
}

impl QueuedUrl {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            depth: 0,
            persistable: true,
        }
    }

    /// A runtime-generated item that must not outlive the process.
    pub fn ephemeral(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            depth: 0,
            persistable: false,
        }
    }

    pub fn with_depth(mut self, depth: u8) -> Self {
        self.depth = depth;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn depth(&self) -> u8 {
        self.depth
    }

    pub fn is_persistable(&self) -> bool {
        self.persistable
    }
}

struct QueueState {
    buffer: VecDeque<QueuedUrl>,
    last_load_time: Option<Instant>,
}

/// Bounded in-memory queue backed by an external unbounded store.
///
/// All operations serialize on one coarse lock: queues are deliberately
/// small, and concurrent refills could otherwise exceed capacity.
pub struct LoadingQueue {
    loader: Arc<dyn ExternalUrlLoader>,
    group: UrlGroup,
    capacity: usize,
    load_delay: Duration,
    state: Mutex<QueueState>,
    /// Memoized external size with its own TTL, decoupling frequent callers
    /// from store latency.
    estimate: Mutex<Option<(Instant, usize)>>,
}

impl LoadingQueue {
    pub fn new(loader: Arc<dyn ExternalUrlLoader>, group: UrlGroup) -> Self {
        Self {
            loader,
            group,
            capacity: DEFAULT_QUEUE_CAPACITY,
            load_delay: Duration::from_secs(120),
            state: Mutex::new(QueueState {
                buffer: VecDeque::new(),
                last_load_time: None,
            }),
            estimate: Mutex::new(None),
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    pub fn group(&self) -> &UrlGroup {
        &self.group
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn load_delay(&self) -> Duration {
        self.load_delay
    }

    /// In-memory count, after a refill attempt.
    pub fn size(&self) -> usize {
        let mut state = self.state.lock();
        self.try_refresh(&mut state);
        state.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn free_slots(&self) -> usize {
        self.capacity.saturating_sub(self.state.lock().buffer.len())
    }

    pub fn is_full(&self) -> bool {
        self.free_slots() == 0
    }

    /// Exact count in the external store for this group. Potentially a full
    /// scan; prefer [`LoadingQueue::estimated_external_size`].
    pub fn external_size(&self) -> usize {
        match self.loader.count_remaining(&self.group) {
            Ok(count) => count,
            Err(e) => {
                warn!("Failed to count external store for group {}: {e}", self.group);
                0
            }
        }
    }

    /// [`LoadingQueue::external_size`] memoized for one load-delay window.
    pub fn estimated_external_size(&self) -> usize {
        let mut estimate = self.estimate.lock();
        if let Some((at, count)) = *estimate
            && at.elapsed() < self.load_delay
        {
            return count;
        }
        let count = self.external_size();
        *estimate = Some((Instant::now(), count));
        count
    }

    /// Whether the refill cooldown has elapsed.
    pub fn is_expired(&self) -> bool {
        self.is_expired_after(self.load_delay)
    }

    fn is_expired_after(&self, delay: Duration) -> bool {
        match self.state.lock().last_load_time {
            Some(at) => at.elapsed() >= delay,
            None => true,
        }
    }

    /// Refill from the external store when slots are free and the cooldown
    /// elapsed. The only path that grows the buffer.
    pub fn load(&self) {
        self.load_after(self.load_delay);
    }

    /// Refill with an explicit cooldown.
    pub fn load_after(&self, delay: Duration) {
        let mut state = self.state.lock();
        let free = self.capacity.saturating_sub(state.buffer.len());
        let expired = match state.last_load_time {
            Some(at) => at.elapsed() >= delay,
            None => true,
        };
        if free > 0 && expired {
            state.last_load_time = Some(Instant::now());
            self.fill(&mut state, free);
        }
    }

    /// Unconditional refill ignoring the cooldown, still bounded by free
    /// slots. Returns how many items were pulled in.
    pub fn load_now(&self) -> usize {
        let mut state = self.state.lock();
        let free = self.capacity.saturating_sub(state.buffer.len());
        if free == 0 {
            return 0;
        }
        self.fill(&mut state, free)
    }

    /// Accept an item, never failing and never exceeding capacity: a
    /// persistable item that finds no free slot overflows to the external
    /// store instead of being held (it is relocated, not lost).
    pub fn offer(&self, url: QueuedUrl) -> bool {
        let mut state = self.state.lock();
        let free = self.capacity.saturating_sub(state.buffer.len());
        if !url.is_persistable() || free > 0 {
            state.buffer.push_back(url);
        } else {
            self.overflow(&url);
        }
        true
    }

    /// Write an item to the external store instead of holding it in memory.
    pub fn overflow(&self, url: &QueuedUrl) {
        if let Err(e) = self.loader.save(url, &self.group) {
            warn!("Failed to overflow url to store for group {}: {e}", self.group);
        }
    }

    /// Remove and return the head, refilling first when slots are free.
    pub fn poll(&self) -> Option<QueuedUrl> {
        let mut state = self.state.lock();
        self.try_refresh(&mut state);
        state.buffer.pop_front()
    }

    /// Return the head without removing it, refilling first.
    pub fn peek(&self) -> Option<QueuedUrl> {
        let mut state = self.state.lock();
        self.try_refresh(&mut state);
        state.buffer.front().cloned()
    }

    /// Randomize the in-memory order. Strictly sequential access patterns
    /// are easy to fingerprint.
    pub fn shuffle(&self) {
        let mut state = self.state.lock();
        state.buffer.make_contiguous().shuffle(&mut rand::rng());
    }

    /// Drop matching items from the in-memory buffer; returns how many.
    pub fn remove_if(&self, predicate: impl Fn(&QueuedUrl) -> bool) -> usize {
        let mut state = self.state.lock();
        let before = state.buffer.len();
        state.buffer.retain(|url| !predicate(url));
        before - state.buffer.len()
    }

    /// Drop everything, in memory and in the external store; returns the
    /// total number of items removed.
    pub fn delete_all(&self) -> usize {
        let mut state = self.state.lock();
        let in_memory = state.buffer.len();
        state.buffer.clear();
        drop(state);

        let external = match self.loader.delete_all(&self.group) {
            Ok(count) => count,
            Err(e) => {
                warn!("Failed to clear external store for group {}: {e}", self.group);
                0
            }
        };
        in_memory + external
    }

    fn try_refresh(&self, state: &mut QueueState) {
        let free = self.capacity.saturating_sub(state.buffer.len());
        if free == 0 {
            return;
        }
        let expired = match state.last_load_time {
            Some(at) => at.elapsed() >= self.load_delay,
            None => true,
        };
        if expired {
            state.last_load_time = Some(Instant::now());
            self.fill(state, free);
        }
    }

    /// Pull up to `free` items from the store; store failures degrade to
    /// "nothing loaded this round" (a partial load only under-fills the
    /// buffer, which is always safe).
    fn fill(&self, state: &mut QueueState, free: usize) -> usize {
        match self.loader.load_to(&mut state.buffer, free, &self.group) {
            Ok(loaded) => {
                if loaded > 0 {
                    debug!("Loaded {loaded} url(s) into queue for group {}", self.group);
                }
                // A misbehaving loader must not break the capacity
                // invariant; excess items go back to the store.
                while state.buffer.len() > self.capacity {
                    if let Some(excess) = state.buffer.pop_back() {
                        warn!("Loader overfilled queue for group {}; overflowing excess", self.group);
                        self.overflow(&excess);
                    }
                }
                loaded
            }
            Err(e) => {
                warn!("Failed to load urls for group {}: {e}", self.group);
                0
            }
        }
    }
}

impl fmt::Debug for LoadingQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadingQueue")
            .field("group", &self.group)
            .field("capacity", &self.capacity)
            .field("buffered", &self.state.lock().buffer.len())
            .finish()
    }
}
