//! Capability contracts and the registry the router dispatches through.
//!
//! Every tool implements the `Tool` trait and every agent the `Agent`
//! trait; both are registered in a `ToolRegistry` keyed by unique name.
//! Ad-hoc closures can be wrapped with [`FnTool`] and [`FnAgent`] instead
//! of writing a dedicated type.

pub mod market;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Trait that all routed tools must implement.
///
/// Tools are the data-source and document-generation capabilities external
/// collaborators plug into the router (price feeds, fee estimates, ...).
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool name used for dispatch (e.g., "get_bitcoin_price").
    fn name(&self) -> &str;

    /// Human-readable description of what the tool does.
    fn description(&self) -> &str {
        ""
    }

    /// Grouping used by `get_tools_by_category` (e.g., "market").
    fn category(&self) -> &str;

    /// Free-form search tags.
    fn tags(&self) -> Vec<String> {
        Vec::new()
    }

    /// Whether successful results may be served from the cache.
    fn cacheable(&self) -> bool {
        false
    }

    /// Cache lifetime override; `None` falls back to the cache default.
    fn ttl(&self) -> Option<Duration> {
        None
    }

    /// Execute the tool with the given JSON arguments.
    async fn execute(&self, args: Value) -> anyhow::Result<Value>;
}

/// Trait for agent modules dispatched through the router. Agent results
/// are never cached.
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    fn tags(&self) -> Vec<String> {
        Vec::new()
    }

    async fn execute(&self, args: Value) -> anyhow::Result<Value>;
}

/// Snapshot of a registered tool, returned by registry queries.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub category: String,
    pub tags: Vec<String>,
    pub cacheable: bool,
    pub ttl_secs: Option<u64>,
}

impl ToolInfo {
    fn of(tool: &dyn Tool) -> Self {
        Self {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            category: tool.category().to_string(),
            tags: tool.tags(),
            cacheable: tool.cacheable(),
            ttl_secs: tool.ttl().map(|d| d.as_secs()),
        }
    }
}

type BoxedHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

fn boxed<F, Fut>(handler: F) -> BoxedHandler
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(move |args| Box::pin(handler(args)))
}

// ── FnTool ──────────────────────────────────────────────────────────

/// A [`Tool`] backed by an async closure.
pub struct FnTool {
    name: String,
    description: String,
    category: String,
    tags: Vec<String>,
    cacheable: bool,
    ttl: Option<Duration>,
    handler: BoxedHandler,
}

impl FnTool {
    /// A non-cacheable tool with no tags.
    pub fn new<F, Fut>(name: impl Into<String>, category: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: String::new(),
            category: category.into(),
            tags: Vec::new(),
            cacheable: false,
            ttl: None,
            handler: boxed(handler),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Mark results cacheable, optionally with a TTL override.
    pub fn cacheable(mut self, ttl: Option<Duration>) -> Self {
        self.cacheable = true;
        self.ttl = ttl;
        self
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn category(&self) -> &str {
        &self.category
    }

    fn tags(&self) -> Vec<String> {
        self.tags.clone()
    }

    fn cacheable(&self) -> bool {
        self.cacheable
    }

    fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    async fn execute(&self, args: Value) -> anyhow::Result<Value> {
        (self.handler)(args).await
    }
}

// ── FnAgent ─────────────────────────────────────────────────────────

/// An [`Agent`] backed by an async closure.
pub struct FnAgent {
    name: String,
    tags: Vec<String>,
    handler: BoxedHandler,
}

impl FnAgent {
    pub fn new<F, Fut>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            tags: Vec::new(),
            handler: boxed(handler),
        }
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

#[async_trait]
impl Agent for FnAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn tags(&self) -> Vec<String> {
        self.tags.clone()
    }

    async fn execute(&self, args: Value) -> anyhow::Result<Value> {
        (self.handler)(args).await
    }
}

// ── Registry ────────────────────────────────────────────────────────

/// Name-keyed registry of tools and agents.
///
/// Registering a name twice replaces the earlier entry and hands it back
/// to the caller.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    agents: HashMap<String, Arc<dyn Agent>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, returning the one it replaced, if any.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Option<Arc<dyn Tool>> {
        debug!(tool = tool.name(), category = tool.category(), "Registered tool");
        self.tools.insert(tool.name().to_string(), tool)
    }

    pub fn unregister(&mut self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.remove(name)
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Check if a tool is registered.
    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn register_agent(&mut self, agent: Arc<dyn Agent>) -> Option<Arc<dyn Agent>> {
        debug!(agent = agent.name(), "Registered agent");
        self.agents.insert(agent.name().to_string(), agent)
    }

    pub fn unregister_agent(&mut self, name: &str) -> Option<Arc<dyn Agent>> {
        self.agents.remove(name)
    }

    pub fn get_agent(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.agents.get(name).cloned()
    }

    /// Tools in `category`, sorted by name.
    pub fn by_category(&self, category: &str) -> Vec<ToolInfo> {
        self.snapshot(|tool| tool.category() == category)
    }

    /// Tools carrying at least one of `tags`, sorted by name.
    pub fn search_by_tags<S: AsRef<str>>(&self, tags: &[S]) -> Vec<ToolInfo> {
        self.snapshot(|tool| {
            let own = tool.tags();
            tags.iter().any(|t| own.iter().any(|o| o == t.as_ref()))
        })
    }

    /// Every registered tool, sorted by name.
    pub fn all(&self) -> Vec<ToolInfo> {
        self.snapshot(|_| true)
    }

    fn snapshot(&self, keep: impl Fn(&dyn Tool) -> bool) -> Vec<ToolInfo> {
        let mut infos: Vec<ToolInfo> = self
            .tools
            .values()
            .filter(|tool| keep(tool.as_ref()))
            .map(|tool| ToolInfo::of(tool.as_ref()))
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Sorted names of registered agents.
    pub fn agent_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.agents.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether no tools are registered.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn clear(&mut self) {
        self.tools.clear();
        self.agents.clear();
    }
}
