//! Priority-ordered, in-process event bus.
//!
//! Subscribers register against an exact event name or a namespace
//! wildcard (`tool:*`). On `emit`, every matching subscriber is awaited in
//! turn, highest priority first and in registration order among equals.
//! A failing or panicking subscriber is logged and counted; it never stops
//! delivery to the rest and never fails the emit.
//!
//! The subscription list sits behind a `std::sync::RwLock` that is only
//! held while snapshotting the matching handlers, never across an await,
//! so handlers are free to subscribe or emit themselves.

pub mod events;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};
use uuid::Uuid;

pub use events::Event;

/// Boxed async subscriber callback.
pub type EventHandler = Arc<dyn Fn(Event) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Predicate over the event payload; the handler only runs when it returns `true`.
pub type EventFilter = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

#[derive(Clone, Default)]
pub struct SubscribeOptions {
    pub priority: i32,
    pub filter: Option<EventFilter>,
}

impl SubscribeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Higher priorities run first. Defaults to 0.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Pattern {
    Exact(String),
    /// Trailing `*`: matches any name starting with the literal prefix.
    Prefix(String),
}

impl Pattern {
    fn parse(pattern: &str) -> Self {
        match pattern.strip_suffix('*') {
            Some(prefix) => Self::Prefix(prefix.to_string()),
            None => Self::Exact(pattern.to_string()),
        }
    }

    fn matches(&self, name: &str) -> bool {
        match self {
            Self::Exact(exact) => exact == name,
            Self::Prefix(prefix) => name.starts_with(prefix.as_str()),
        }
    }
}

struct Subscription {
    id: SubscriptionId,
    pattern: Pattern,
    priority: i32,
    filter: Option<EventFilter>,
    handler: EventHandler,
}

/// Lifetime counters for the bus.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BusMetrics {
    pub total_events: u64,
    pub total_listeners: usize,
    /// Fraction of handler invocations that succeeded; 1.0 before any ran.
    pub success_rate: f64,
}

/// Result of a single [`EventBus::emit`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmitOutcome {
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Default)]
pub struct EventBus {
    /// Kept sorted by priority, descending; equal priorities keep registration order.
    subscriptions: RwLock<Vec<Subscription>>,
    total_events: AtomicU64,
    invocations: AtomicU64,
    failures: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Subscription>> {
        self.subscriptions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Subscription>> {
        self.subscriptions.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribe `handler` to events whose name matches `pattern`.
    pub fn subscribe<F, Fut>(&self, pattern: &str, opts: SubscribeOptions, handler: F) -> SubscriptionId
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let boxed: EventHandler = Arc::new(move |event| Box::pin(handler(event)));
        let id = SubscriptionId(Uuid::new_v4());
        let sub = Subscription {
            id,
            pattern: Pattern::parse(pattern),
            priority: opts.priority,
            filter: opts.filter,
            handler: boxed,
        };

        let mut subs = self.write();
        // After every existing subscription with priority >= ours.
        let at = subs.partition_point(|s| s.priority >= sub.priority);
        subs.insert(at, sub);
        debug!(pattern, priority = opts.priority, "Subscribed");
        id
    }

    /// Remove a subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self.write();
        let before = subs.len();
        subs.retain(|s| s.id != id);
        subs.len() != before
    }

    /// Deliver an event to every matching subscriber, in priority order.
    ///
    /// Always completes once every matching handler has been attempted.
    pub async fn emit(&self, name: &str, payload: Value) -> EmitOutcome {
        self.total_events.fetch_add(1, Ordering::Relaxed);

        let handlers: Vec<EventHandler> = self
            .read()
            .iter()
            .filter(|s| s.pattern.matches(name))
            .filter(|s| s.filter.as_ref().map_or(true, |f| f(&payload)))
            .map(|s| Arc::clone(&s.handler))
            .collect();

        if handlers.is_empty() {
            debug!(event = name, "No subscribers for event");
            return EmitOutcome::default();
        }

        let event = Event::new(name, payload);
        let mut outcome = EmitOutcome::default();
        for handler in handlers {
            self.invocations.fetch_add(1, Ordering::Relaxed);
            let call = AssertUnwindSafe(async { handler(event.clone()).await });
            match call.catch_unwind().await {
                Ok(Ok(())) => outcome.delivered += 1,
                Ok(Err(e)) => {
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    outcome.failed += 1;
                    warn!(event = name, "Event handler failed: {e:#}");
                }
                Err(_) => {
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    outcome.failed += 1;
                    warn!(event = name, "Event handler panicked");
                }
            }
        }
        outcome
    }

    /// Number of subscriptions that would receive an event named `name`.
    pub fn listener_count(&self, name: &str) -> usize {
        self.read().iter().filter(|s| s.pattern.matches(name)).count()
    }

    pub fn get_metrics(&self) -> BusMetrics {
        let invocations = self.invocations.load(Ordering::Relaxed);
        let failures = self.failures.load(Ordering::Relaxed);
        BusMetrics {
            total_events: self.total_events.load(Ordering::Relaxed),
            total_listeners: self.read().len(),
            success_rate: if invocations == 0 {
                1.0
            } else {
                (invocations - failures) as f64 / invocations as f64
            },
        }
    }

    /// Remove every subscription.
    pub fn clear(&self) {
        let mut subs = self.write();
        let removed = subs.len();
        subs.clear();
        debug!(removed, "Cleared event subscriptions");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
