//! Generic handler chains for boundary hook points
//!
//! Every hook point in the system is an ordered list of handlers invoked in
//! sequence. Instead of one bespoke pipeline type per signal, a single
//! generic chain is parameterized by the event payload type; hook sets are
//! then plain structs of chains.

use parking_lot::Mutex;
use std::sync::Arc;

/// An ordered chain of observers for events carrying an `A` payload.
///
/// Handlers run sequentially in registration order. The chain is cheap to
/// clone and safe to invoke concurrently; registration and invocation take
/// the internal lock only briefly.
pub struct HandlerChain<A: ?Sized> {
    handlers: Arc<Mutex<Vec<Arc<dyn Fn(&A) + Send + Sync>>>>,
}

// Manual impls: derives would demand `A: Clone`/`A: Default`, which the
// payload (often `str`) cannot satisfy.
impl<A: ?Sized> Clone for HandlerChain<A> {
    fn clone(&self) -> Self {
        Self {
            handlers: self.handlers.clone(),
        }
    }
}

impl<A: ?Sized> Default for HandlerChain<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: ?Sized> HandlerChain<A> {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.lock().is_empty()
    }

    /// Prepend a handler; it will run before all currently registered ones.
    pub fn add_first(&self, handler: impl Fn(&A) + Send + Sync + 'static) -> &Self {
        self.handlers.lock().insert(0, Arc::new(handler));
        self
    }

    /// Append a handler; it will run after all currently registered ones.
    pub fn add_last(&self, handler: impl Fn(&A) + Send + Sync + 'static) -> &Self {
        self.handlers.lock().push(Arc::new(handler));
        self
    }

    /// Invoke every handler in order with the given payload.
    pub fn invoke(&self, payload: &A) {
        // Snapshot under the lock so a handler may register more handlers
        // without deadlocking.
        let snapshot: Vec<_> = self.handlers.lock().iter().cloned().collect();
        for handler in snapshot {
            handler(payload);
        }
    }
}

/// A chain of transforming filters: each handler may rewrite or drop the
/// payload; the first `None` short-circuits the chain.
pub struct FilterChain<A> {
    filters: Arc<Mutex<Vec<Arc<dyn Fn(A) -> Option<A> + Send + Sync>>>>,
}

impl<A> Clone for FilterChain<A> {
    fn clone(&self) -> Self {
        Self {
            filters: self.filters.clone(),
        }
    }
}

impl<A> Default for FilterChain<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> FilterChain<A> {
    pub fn new() -> Self {
        Self {
            filters: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn len(&self) -> usize {
        self.filters.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.lock().is_empty()
    }

    pub fn add_first(&self, filter: impl Fn(A) -> Option<A> + Send + Sync + 'static) -> &Self {
        self.filters.lock().insert(0, Arc::new(filter));
        self
    }

    pub fn add_last(&self, filter: impl Fn(A) -> Option<A> + Send + Sync + 'static) -> &Self {
        self.filters.lock().push(Arc::new(filter));
        self
    }

    /// Run the payload through every filter in order.
    pub fn invoke(&self, payload: A) -> Option<A> {
        let snapshot: Vec<_> = self.filters.lock().iter().cloned().collect();
        let mut current = payload;
        for filter in snapshot {
            current = filter(current)?;
        }
        Some(current)
    }
}

/// Hook set observed by session drivers around navigation.
///
/// Consumed at the core's boundary; the driver only invokes, it never
/// registers.
#[derive(Clone, Default)]
pub struct NavigationEvents {
    /// Fired with the target URL just before the protocol navigate call.
    pub on_will_navigate: HandlerChain<str>,
    /// Fired with the final URL after `stop()` resolved redirects.
    pub on_navigated: HandlerChain<str>,
    /// Fired with the URL of every response the transport reports.
    pub on_response_received: HandlerChain<str>,
}

impl NavigationEvents {
    pub fn new() -> Self {
        Self::default()
    }
}
