//! Router: the single entry point every tool and agent call goes through.
//!
//! The router owns the registry, the result cache and the event bus. A
//! call is looked up by name, answered from the cache when the tool allows
//! it, otherwise dispatched to the handler, timed, recorded in the rolling
//! metrics window and announced on the bus. Callers always get a `Result`
//! back; handler errors and panics never escape as panics.
//!
//! Lifecycle: `Uninitialized → Initialized → ShuttingDown → Shutdown`.
//! Dispatch is only accepted while `Initialized`. Shutdown waits for
//! in-flight calls to finish before tearing down the bus and cache.
//!
//! Concurrent calls with the same fingerprint are not coalesced: both run
//! the handler and the last cache write wins.

pub mod metrics;

use futures::FutureExt;
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::events::{
    AGENT_EXECUTION_FAILURE, AGENT_EXECUTION_SUCCESS, ROUTER_INITIALIZED, ROUTER_SHUTDOWN,
    TOOL_CACHE_HIT, TOOL_EXECUTION_FAILURE, TOOL_EXECUTION_SUCCESS,
};
use crate::bus::EventBus;
use crate::cache::{Cache, SetOptions};
use crate::config::RouterConfig;
use crate::error::RouterError;
use crate::tools::{Agent, Tool, ToolInfo, ToolRegistry};
use metrics::{ExecutionRecord, HealthDetails, HealthReport, HealthStatus, MetricsWindow, RouterMetrics};

/// Cache key for a tool call: the tool name plus its arguments as compact
/// JSON. Object keys serialize in sorted order, so equal arguments always
/// produce the same fingerprint.
pub fn fingerprint(tool_name: &str, args: &Value) -> String {
    format!("{tool_name}:{args}")
}

/// Tag attached to every cached result of `tool_name`.
pub fn tool_tag(tool_name: &str) -> String {
    format!("tool:{tool_name}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouterState {
    Uninitialized,
    Initialized,
    ShuttingDown,
    Shutdown,
}

impl fmt::Display for RouterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Uninitialized => "uninitialized",
            Self::Initialized => "initialized",
            Self::ShuttingDown => "shutting_down",
            Self::Shutdown => "shutdown",
        })
    }
}

/// Everything built by `initialize`, swapped as a unit.
#[derive(Default)]
struct Components {
    config: RouterConfig,
    cache: Option<Arc<Cache>>,
    bus: Option<Arc<EventBus>>,
    sweeper: Option<CancellationToken>,
}

impl Components {
    async fn emit(&self, name: &str, payload: Value) {
        if let Some(bus) = &self.bus {
            bus.emit(name, payload).await;
        }
    }
}

/// Decrements the in-flight counter when a dispatch finishes, however it finishes.
struct InFlight<'a> {
    router: &'a Router,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.router.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.router.drained.notify_waiters();
        }
    }
}

/// What is being dispatched; decides events and error variants.
#[derive(Clone, Copy)]
enum Kind {
    Tool,
    Agent,
}

impl Kind {
    fn success_event(self) -> &'static str {
        match self {
            Self::Tool => TOOL_EXECUTION_SUCCESS,
            Self::Agent => AGENT_EXECUTION_SUCCESS,
        }
    }

    fn failure_event(self) -> &'static str {
        match self {
            Self::Tool => TOOL_EXECUTION_FAILURE,
            Self::Agent => AGENT_EXECUTION_FAILURE,
        }
    }

    fn name_field(self) -> &'static str {
        match self {
            Self::Tool => "toolName",
            Self::Agent => "agentName",
        }
    }
}

pub struct Router {
    state: Mutex<RouterState>,
    components: RwLock<Arc<Components>>,
    registry: RwLock<ToolRegistry>,
    window: Mutex<MetricsWindow>,
    in_flight: AtomicUsize,
    drained: Notify,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    /// Create an uninitialized router with an empty registry.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RouterState::Uninitialized),
            components: RwLock::new(Arc::new(Components::default())),
            registry: RwLock::new(ToolRegistry::new()),
            window: Mutex::new(MetricsWindow::new(RouterConfig::default().metrics_window)),
            in_flight: AtomicUsize::new(0),
            drained: Notify::new(),
        }
    }

    // ── Lock helpers ────────────────────────────────────────────────

    fn lock_state(&self) -> MutexGuard<'_, RouterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_window(&self) -> MutexGuard<'_, MetricsWindow> {
        self.window.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn registry(&self) -> RwLockReadGuard<'_, ToolRegistry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn registry_mut(&self) -> RwLockWriteGuard<'_, ToolRegistry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn components(&self) -> Arc<Components> {
        Arc::clone(&self.components.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn set_components(&self, components: Components) {
        *self.components.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(components);
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    pub fn state(&self) -> RouterState {
        *self.lock_state()
    }

    /// Build a fresh cache and event bus from `config` and start accepting calls.
    pub async fn initialize(&self, config: RouterConfig) -> Result<(), RouterError> {
        let cache = config
            .enable_caching
            .then(|| Arc::new(Cache::new(&config.cache)));
        let bus = config.enable_events.then(|| Arc::new(EventBus::new()));
        self.initialize_with(config, cache, bus).await
    }

    /// Like [`initialize`](Self::initialize) but with caller-supplied
    /// components. `None` disables caching or events respectively.
    pub async fn initialize_with(
        &self,
        config: RouterConfig,
        cache: Option<Arc<Cache>>,
        bus: Option<Arc<EventBus>>,
    ) -> Result<(), RouterError> {
        validate(&config)?;

        {
            let mut state = self.lock_state();
            match *state {
                RouterState::Initialized => {
                    warn!("Router already initialized; ignoring initialize()");
                    return Ok(());
                }
                RouterState::ShuttingDown => {
                    return Err(RouterError::NotInitialized(state.to_string()));
                }
                RouterState::Uninitialized | RouterState::Shutdown => {}
            }

            let sweeper = match (&cache, config.cache.sweep_interval()) {
                (Some(cache), Some(interval)) => {
                    let token = CancellationToken::new();
                    cache.spawn_sweeper(interval, token.clone());
                    Some(token)
                }
                _ => None,
            };

            *self.lock_window() = MetricsWindow::new(config.metrics_window);
            self.set_components(Components {
                config,
                cache,
                bus,
                sweeper,
            });
            *state = RouterState::Initialized;
        }

        let components = self.components();
        info!(
            caching = components.cache.is_some(),
            events = components.bus.is_some(),
            tools = self.registry().len(),
            "Router initialized"
        );
        components
            .emit(
                ROUTER_INITIALIZED,
                json!({
                    "caching": components.cache.is_some(),
                    "events": components.bus.is_some(),
                }),
            )
            .await;
        Ok(())
    }

    /// Drain in-flight calls, drop all bus listeners, clear the cache and
    /// the registry. Safe to call repeatedly.
    pub async fn shutdown(&self) {
        {
            let mut state = self.lock_state();
            match *state {
                RouterState::Shutdown | RouterState::ShuttingDown => return,
                RouterState::Uninitialized => {
                    *state = RouterState::Shutdown;
                    self.registry_mut().clear();
                    return;
                }
                RouterState::Initialized => *state = RouterState::ShuttingDown,
            }
        }
        info!("Router shutting down");

        loop {
            let drained = self.drained.notified();
            let pending = self.in_flight.load(Ordering::SeqCst);
            if pending == 0 {
                break;
            }
            debug!(pending, "Waiting for in-flight calls");
            drained.await;
        }

        let components = self.components();
        components.emit(ROUTER_SHUTDOWN, json!({})).await;
        if let Some(token) = &components.sweeper {
            token.cancel();
        }
        if let Some(bus) = &components.bus {
            bus.clear();
        }
        if let Some(cache) = &components.cache {
            cache.shutdown();
        }
        self.registry_mut().clear();

        *self.lock_state() = RouterState::Shutdown;
        info!("Router shut down");
    }

    /// Admit a dispatch: only while initialized. The returned guard keeps
    /// shutdown waiting until the call completes.
    fn begin(&self) -> Result<(InFlight<'_>, Arc<Components>), RouterError> {
        let state = self.lock_state();
        if *state != RouterState::Initialized {
            return Err(RouterError::NotInitialized(state.to_string()));
        }
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        drop(state);
        Ok((InFlight { router: self }, self.components()))
    }

    // ── Registry ────────────────────────────────────────────────────

    /// Register a tool. A tool with the same name is replaced.
    pub fn register_tool(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.registry_mut().register(tool).is_some() {
            warn!(tool = name, "Tool already registered; replacing previous descriptor");
        }
    }

    /// Register an agent. An agent with the same name is replaced.
    pub fn register_agent(&self, agent: Arc<dyn Agent>) {
        let name = agent.name().to_string();
        if self.registry_mut().register_agent(agent).is_some() {
            warn!(agent = name, "Agent already registered; replacing previous descriptor");
        }
    }

    pub fn unregister_tool(&self, name: &str) -> bool {
        self.registry_mut().unregister(name).is_some()
    }

    pub fn unregister_agent(&self, name: &str) -> bool {
        self.registry_mut().unregister_agent(name).is_some()
    }

    pub fn get_tools_by_category(&self, category: &str) -> Vec<ToolInfo> {
        self.registry().by_category(category)
    }

    /// Tools carrying at least one of `tags`.
    pub fn search_tools_by_tags<S: AsRef<str>>(&self, tags: &[S]) -> Vec<ToolInfo> {
        self.registry().search_by_tags(tags)
    }

    pub fn list_tools(&self) -> Vec<ToolInfo> {
        self.registry().all()
    }

    pub fn list_agents(&self) -> Vec<String> {
        self.registry().agent_names()
    }

    // ── Dispatch ────────────────────────────────────────────────────

    /// Execute a registered tool, serving from the cache when allowed.
    pub async fn execute_tool(&self, name: &str, args: Value) -> Result<Value, RouterError> {
        let (_guard, components) = self.begin()?;
        let tool = self
            .registry()
            .get(name)
            .ok_or_else(|| RouterError::ToolNotFound(name.to_string()))?;

        let cache = components.cache.as_ref().filter(|_| tool.cacheable());
        let key = fingerprint(name, &args);

        if let Some(cache) = cache {
            if let Some(value) = cache.get(&key) {
                debug!(tool = name, "Cache hit");
                components
                    .emit(TOOL_CACHE_HIT, json!({ "toolName": name, "key": key }))
                    .await;
                return Ok(value);
            }
        }

        let value = self
            .dispatch(&components, Kind::Tool, name, tool.execute(args))
            .await?;

        if let Some(cache) = cache {
            let mut tags = vec![tool_tag(name), tool.category().to_string()];
            tags.extend(tool.tags());
            let opts = SetOptions {
                ttl: tool.ttl(),
                tags,
            };
            if let Err(e) = cache.set(&key, value.clone(), opts) {
                warn!(tool = name, "Result not cached: {e:#}");
            }
        }
        Ok(value)
    }

    /// Execute a registered agent. Agent results are never cached.
    pub async fn execute_agent(&self, name: &str, args: Value) -> Result<Value, RouterError> {
        let (_guard, components) = self.begin()?;
        let agent = self
            .registry()
            .get_agent(name)
            .ok_or_else(|| RouterError::AgentNotFound(name.to_string()))?;

        self.dispatch(&components, Kind::Agent, name, agent.execute(args))
            .await
    }

    /// Execute many tool calls concurrently, one `Result` per call, in order.
    pub async fn execute_batch(&self, calls: Vec<(String, Value)>) -> Vec<Result<Value, RouterError>> {
        let futures = calls
            .into_iter()
            .map(|(name, args)| async move { self.execute_tool(&name, args).await });
        futures::future::join_all(futures).await
    }

    /// Run a handler future, time it, record it and announce the outcome.
    async fn dispatch<F>(
        &self,
        components: &Components,
        kind: Kind,
        name: &str,
        call: F,
    ) -> Result<Value, RouterError>
    where
        F: Future<Output = anyhow::Result<Value>>,
    {
        let started = Instant::now();
        let outcome = AssertUnwindSafe(call).catch_unwind().await;
        let response_time = started.elapsed().as_secs_f64() * 1000.0;

        let result = match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(format!("{e:#}")),
            Err(_) => Err("handler panicked".to_string()),
        };

        self.lock_window().push(ExecutionRecord {
            tool_name: name.to_string(),
            timestamp: chrono::Utc::now(),
            response_time_ms: response_time,
            success: result.is_ok(),
        });

        match result {
            Ok(value) => {
                debug!(name, response_time, "Execution succeeded");
                components
                    .emit(
                        kind.success_event(),
                        json!({ kind.name_field(): name, "responseTime": response_time }),
                    )
                    .await;
                Ok(value)
            }
            Err(message) => {
                warn!(name, response_time, "Execution failed: {message}");
                components
                    .emit(
                        kind.failure_event(),
                        json!({
                            kind.name_field(): name,
                            "responseTime": response_time,
                            "error": message,
                        }),
                    )
                    .await;
                Err(RouterError::ExecutionFailed {
                    name: name.to_string(),
                    message,
                })
            }
        }
    }

    // ── Cache control ───────────────────────────────────────────────

    /// Drop every cached result of `tool_name`. Returns entries removed.
    pub fn invalidate_tool_cache(&self, tool_name: &str) -> usize {
        self.invalidate_cache_tags(&[tool_tag(tool_name)])
    }

    /// Drop cached results carrying any of `tags` (tool tags or categories).
    pub fn invalidate_cache_tags<S: AsRef<str>>(&self, tags: &[S]) -> usize {
        self.components()
            .cache
            .as_ref()
            .map_or(0, |cache| cache.invalidate_by_tags(tags))
    }

    pub fn cache(&self) -> Option<Arc<Cache>> {
        self.components().cache.clone()
    }

    pub fn events(&self) -> Option<Arc<EventBus>> {
        self.components().bus.clone()
    }

    // ── Observability ───────────────────────────────────────────────

    pub fn get_metrics(&self) -> RouterMetrics {
        self.lock_window().summary()
    }

    /// Rolling metrics restricted to one tool or agent.
    pub fn tool_metrics(&self, name: &str) -> RouterMetrics {
        self.lock_window().summary_for(name)
    }

    pub fn get_health(&self) -> HealthReport {
        let components = self.components();
        let (metrics, window_size, window_capacity) = {
            let window = self.lock_window();
            (window.summary(), window.len(), window.capacity())
        };
        let (status, warnings) =
            HealthStatus::classify(metrics.error_rate, &components.config.error_rate_thresholds);

        HealthReport {
            status,
            details: HealthDetails {
                state: self.state().to_string(),
                error_rate: metrics.error_rate,
                window_size,
                window_capacity,
                average_response_time: metrics.average_response_time,
                warnings,
                cache: components.cache.as_ref().map(|c| c.get_metrics()),
                events: components.bus.as_ref().map(|b| b.get_metrics()),
            },
        }
    }
}

fn validate(config: &RouterConfig) -> Result<(), RouterError> {
    let t = &config.error_rate_thresholds;
    let in_range = |v: f64| (0.0..=1.0).contains(&v);
    if !(in_range(t.warning) && in_range(t.degraded) && in_range(t.unhealthy)) {
        return Err(RouterError::InvalidConfig(
            "error rate thresholds must be within 0.0..=1.0".into(),
        ));
    }
    if !(t.warning <= t.degraded && t.degraded <= t.unhealthy) {
        return Err(RouterError::InvalidConfig(
            "error rate thresholds must satisfy warning <= degraded <= unhealthy".into(),
        ));
    }
    if config.enable_caching && config.cache.max_size == 0 {
        return Err(RouterError::InvalidConfig("cache.maxSize must be positive".into()));
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::SubscribeOptions;
    use crate::tools::{FnAgent, FnTool};
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    async fn ready_router() -> Router {
        let router = Router::new();
        router.initialize(RouterConfig::default()).await.unwrap();
        router
    }

    fn counting_tool(name: &str, calls: &Arc<AtomicU32>, cacheable: bool) -> Arc<dyn Tool> {
        let calls = Arc::clone(calls);
        let tool = FnTool::new(name, "market", move |args: Value| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(json!({ "echo": args }))
            }
        })
        .tags(["bitcoin"]);
        if cacheable {
            Arc::new(tool.cacheable(Some(Duration::from_secs(30))))
        } else {
            Arc::new(tool)
        }
    }

    fn capture(bus: &EventBus, pattern: &str) -> Arc<Mutex<Vec<(String, Value)>>> {
        let seen: Arc<Mutex<Vec<(String, Value)>>> = Arc::default();
        let sink = Arc::clone(&seen);
        bus.subscribe(pattern, SubscribeOptions::new(), move |event| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().unwrap().push((event.name, event.payload));
                Ok(())
            }
        });
        seen
    }

    #[tokio::test]
    async fn test_execute_before_initialize() {
        let router = Router::new();
        let err = router.execute_tool("anything", json!({})).await.unwrap_err();
        assert_eq!(err, RouterError::NotInitialized("uninitialized".into()));
    }

    #[tokio::test]
    async fn test_tool_not_found() {
        let router = ready_router().await;
        let err = router.execute_tool("missing", json!({})).await.unwrap_err();
        assert_eq!(err, RouterError::ToolNotFound("missing".into()));
        let err = router.execute_agent("missing", json!({})).await.unwrap_err();
        assert_eq!(err, RouterError::AgentNotFound("missing".into()));
    }

    #[tokio::test]
    async fn test_cacheable_tool_runs_once() {
        let router = ready_router().await;
        let calls = Arc::new(AtomicU32::new(0));
        router.register_tool(counting_tool("get_bitcoin_price", &calls, true));
        let hits = capture(&router.events().unwrap(), TOOL_CACHE_HIT);

        let first = router.execute_tool("get_bitcoin_price", json!({"vs": "usd"})).await.unwrap();
        let second = router.execute_tool("get_bitcoin_price", json!({"vs": "usd"})).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let hits = hits.lock().unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].1["toolName"], "get_bitcoin_price");
    }

    #[tokio::test]
    async fn test_different_args_miss() {
        let router = ready_router().await;
        let calls = Arc::new(AtomicU32::new(0));
        router.register_tool(counting_tool("t", &calls, true));

        router.execute_tool("t", json!({"a": 1})).await.unwrap();
        router.execute_tool("t", json!({"a": 2})).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_fingerprint_ignores_key_order() {
        let a: Value = serde_json::from_str(r#"{"b": 2, "a": 1}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a": 1, "b": 2}"#).unwrap();
        assert_eq!(fingerprint("t", &a), fingerprint("t", &b));
        assert_ne!(fingerprint("t", &a), fingerprint("u", &a));
    }

    #[tokio::test]
    async fn test_unbounded_tool_ttl_is_cached() {
        let router = ready_router().await;
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        router.register_tool(Arc::new(
            FnTool::new("forever", "market", move |_| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(json!(1))
                }
            })
            .cacheable(Some(Duration::MAX)),
        ));

        router.execute_tool("forever", json!({})).await.unwrap();
        router.execute_tool("forever", json!({})).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_non_cacheable_always_runs() {
        let router = ready_router().await;
        let calls = Arc::new(AtomicU32::new(0));
        router.register_tool(counting_tool("t", &calls, false));

        router.execute_tool("t", json!({})).await.unwrap();
        router.execute_tool("t", json!({})).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(router.cache().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_caching_disabled() {
        let router = Router::new();
        let config = RouterConfig {
            enable_caching: false,
            ..RouterConfig::default()
        };
        router.initialize(config).await.unwrap();
        let calls = Arc::new(AtomicU32::new(0));
        router.register_tool(counting_tool("t", &calls, true));

        router.execute_tool("t", json!({})).await.unwrap();
        router.execute_tool("t", json!({})).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(router.cache().is_none());
    }

    #[tokio::test]
    async fn test_failure_is_returned_and_announced() {
        let router = ready_router().await;
        router.register_tool(Arc::new(FnTool::new("broken", "market", |_| async {
            Err::<Value, _>(anyhow::anyhow!("upstream 503"))
        })));
        let events = capture(&router.events().unwrap(), "tool:execution:*");

        let err = router.execute_tool("broken", json!({})).await.unwrap_err();
        assert_eq!(
            err,
            RouterError::ExecutionFailed {
                name: "broken".into(),
                message: "upstream 503".into()
            }
        );

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, TOOL_EXECUTION_FAILURE);
        assert_eq!(events[0].1["error"], "upstream 503");
        assert_eq!(router.get_metrics().error_rate, 1.0);
    }

    #[tokio::test]
    async fn test_panicking_handler_is_contained() {
        let router = ready_router().await;
        router.register_tool(Arc::new(FnTool::new("panics", "x", |_| async {
            if true {
                panic!("bad handler");
            }
            Ok::<Value, anyhow::Error>(json!(null))
        })));

        let err = router.execute_tool("panics", json!({})).await.unwrap_err();
        assert!(matches!(err, RouterError::ExecutionFailed { .. }));
        assert_eq!(router.state(), RouterState::Initialized);
        assert_eq!(router.get_metrics().request_count, 1);
    }

    #[tokio::test]
    async fn test_success_event_payload() {
        let router = ready_router().await;
        let calls = Arc::new(AtomicU32::new(0));
        router.register_tool(counting_tool("t", &calls, false));
        let events = capture(&router.events().unwrap(), TOOL_EXECUTION_SUCCESS);

        router.execute_tool("t", json!({})).await.unwrap();
        let events = events.lock().unwrap();
        assert_eq!(events[0].1["toolName"], "t");
        assert!(events[0].1["responseTime"].as_f64().unwrap() >= 0.0);
    }

    #[tokio::test]
    async fn test_estimator_failure_degrades_to_uncached() {
        let router = Router::new();
        let config = RouterConfig::default();
        let cache = Arc::new(Cache::with_estimator(
            &config.cache,
            Arc::new(|_, _| Err(anyhow::anyhow!("cannot size"))),
        ));
        router
            .initialize_with(config, Some(cache), Some(Arc::new(EventBus::new())))
            .await
            .unwrap();
        let calls = Arc::new(AtomicU32::new(0));
        router.register_tool(counting_tool("t", &calls, true));

        assert!(router.execute_tool("t", json!({})).await.is_ok());
        assert!(router.execute_tool("t", json!({})).await.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_agents_dispatch() {
        let router = ready_router().await;
        router.register_agent(Arc::new(FnAgent::new("outline_writer", |args: Value| async move {
            Ok(json!({ "outline": args["topic"] }))
        })));
        let events = capture(&router.events().unwrap(), "agent:*");

        let out = router
            .execute_agent("outline_writer", json!({"topic": "halving"}))
            .await
            .unwrap();
        assert_eq!(out["outline"], "halving");
        assert_eq!(events.lock().unwrap()[0].0, AGENT_EXECUTION_SUCCESS);
        assert_eq!(router.tool_metrics("outline_writer").request_count, 1);
    }

    #[tokio::test]
    async fn test_batch_isolates_failures() {
        let router = ready_router().await;
        let calls = Arc::new(AtomicU32::new(0));
        router.register_tool(counting_tool("ok", &calls, false));
        router.register_tool(Arc::new(FnTool::new("bad", "x", |_| async {
            Err::<Value, _>(anyhow::anyhow!("nope"))
        })));

        let results = router
            .execute_batch(vec![
                ("ok".into(), json!({"i": 1})),
                ("bad".into(), json!({})),
                ("missing".into(), json!({})),
                ("ok".into(), json!({"i": 2})),
            ])
            .await;

        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(RouterError::ExecutionFailed { .. })));
        assert_eq!(results[2], Err(RouterError::ToolNotFound("missing".into())));
        assert!(results[3].is_ok());
    }

    #[tokio::test]
    async fn test_invalidate_tool_cache() {
        let router = ready_router().await;
        let calls = Arc::new(AtomicU32::new(0));
        router.register_tool(counting_tool("t", &calls, true));

        router.execute_tool("t", json!({})).await.unwrap();
        assert_eq!(router.invalidate_tool_cache("t"), 1);
        router.execute_tool("t", json!({})).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        assert_eq!(router.invalidate_cache_tags(&["bitcoin"]), 1);
        assert_eq!(router.invalidate_cache_tags(&["market"]), 0);
    }

    #[tokio::test]
    async fn test_duplicate_registration_last_wins() {
        let router = ready_router().await;
        router.register_tool(Arc::new(FnTool::new("t", "x", |_| async { Ok(json!(1)) })));
        router.register_tool(Arc::new(FnTool::new("t", "y", |_| async { Ok(json!(2)) })));

        assert_eq!(router.execute_tool("t", json!({})).await.unwrap(), json!(2));
        assert_eq!(router.list_tools().len(), 1);
        assert_eq!(router.get_tools_by_category("y").len(), 1);
        assert!(router.get_tools_by_category("x").is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent_and_clears() {
        let router = ready_router().await;
        let calls = Arc::new(AtomicU32::new(0));
        router.register_tool(counting_tool("t", &calls, true));
        router.execute_tool("t", json!({})).await.unwrap();

        let bus = router.events().unwrap();
        let cache = router.cache().unwrap();
        let shutdown_events = capture(&bus, ROUTER_SHUTDOWN);

        router.shutdown().await;
        router.shutdown().await;

        assert_eq!(router.state(), RouterState::Shutdown);
        assert_eq!(shutdown_events.lock().unwrap().len(), 1);
        assert_eq!(bus.get_metrics().total_listeners, 0);
        assert!(cache.is_empty());
        assert!(router.list_tools().is_empty());
        assert_eq!(
            router.execute_tool("t", json!({})).await.unwrap_err(),
            RouterError::NotInitialized("shutdown".into())
        );
    }

    #[tokio::test]
    async fn test_shutdown_before_initialize_clears_registry() {
        let router = Router::new();
        let calls = Arc::new(AtomicU32::new(0));
        router.register_tool(counting_tool("t", &calls, false));

        router.shutdown().await;

        assert_eq!(router.state(), RouterState::Shutdown);
        assert!(router.list_tools().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_in_flight() {
        let router = Arc::new(ready_router().await);
        let release = Arc::new(Notify::new());
        let gate = Arc::clone(&release);
        router.register_tool(Arc::new(FnTool::new("slow", "x", move |_| {
            let gate = Arc::clone(&gate);
            async move {
                gate.notified().await;
                Ok(json!("done"))
            }
        })));

        let worker = {
            let router = Arc::clone(&router);
            tokio::spawn(async move { router.execute_tool("slow", json!({})).await })
        };
        while router.in_flight.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        let closer = {
            let router = Arc::clone(&router);
            tokio::spawn(async move { router.shutdown().await })
        };
        while router.state() != RouterState::ShuttingDown {
            tokio::task::yield_now().await;
        }
        assert_eq!(
            router.execute_tool("slow", json!({})).await.unwrap_err(),
            RouterError::NotInitialized("shutting_down".into())
        );

        release.notify_one();
        assert_eq!(worker.await.unwrap().unwrap(), json!("done"));
        closer.await.unwrap();
        assert_eq!(router.state(), RouterState::Shutdown);
    }

    #[tokio::test]
    async fn test_reinitialize_after_shutdown() {
        let router = ready_router().await;
        router.shutdown().await;
        router.initialize(RouterConfig::default()).await.unwrap();
        assert_eq!(router.state(), RouterState::Initialized);
        assert!(router.cache().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_thresholds_rejected() {
        let router = Router::new();
        let mut config = RouterConfig::default();
        config.error_rate_thresholds.degraded = 0.9;
        let err = router.initialize(config).await.unwrap_err();
        assert!(matches!(err, RouterError::InvalidConfig(_)));
        assert_eq!(router.state(), RouterState::Uninitialized);
    }

    #[tokio::test]
    async fn test_health_report() {
        let router = ready_router().await;
        let report = router.get_health();
        assert_eq!(report.status, HealthStatus::Healthy);
        assert_eq!(report.details.window_size, 0);
        assert_eq!(report.details.window_capacity, 100);
        assert!(report.details.cache.is_some());
        assert!(report.details.events.is_some());
    }
}
