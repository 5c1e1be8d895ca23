use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

pub mod args;
pub mod schedule;

pub use args::{ArgError, ToolArgs};
pub use schedule::{ScheduleError, next_runs};

// ── Tool metadata ────────────────────────────────────────────────────────────

/// Risk classification for a tool.  Ordered so policies can compare levels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a handler hands back to the executor.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    /// The tool ran; the value becomes the task result's data.
    Completed(Value),
    /// The tool decided not to act this time.
    Skipped { reason: String },
}

impl ToolOutput {
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped {
            reason: reason.into(),
        }
    }
}

impl From<Value> for ToolOutput {
    fn from(value: Value) -> Self {
        Self::Completed(value)
    }
}

// ── Handlers ─────────────────────────────────────────────────────────────────

type SyncFn = dyn Fn(&ToolArgs) -> Result<ToolOutput> + Send + Sync;
type SuspendingFn = dyn Fn(ToolArgs) -> BoxFuture<'static, Result<ToolOutput>> + Send + Sync;

/// The callable behind a tool.
///
/// Synchronous handlers run inline and never yield.  Suspending handlers
/// return a future that is awaited on the caller's task, so they may yield
/// at external calls.
#[derive(Clone)]
pub enum ToolHandler {
    Sync(Arc<SyncFn>),
    Suspending(Arc<SuspendingFn>),
}

impl ToolHandler {
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&ToolArgs) -> Result<ToolOutput> + Send + Sync + 'static,
    {
        Self::Sync(Arc::new(f))
    }

    pub fn suspending<F, Fut>(f: F) -> Self
    where
        F: Fn(ToolArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolOutput>> + Send + 'static,
    {
        Self::Suspending(Arc::new(move |args| f(args).boxed()))
    }

    pub fn is_suspending(&self) -> bool {
        matches!(self, Self::Suspending(_))
    }
}

impl fmt::Debug for ToolHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync(_) => f.write_str("ToolHandler::Sync"),
            Self::Suspending(_) => f.write_str("ToolHandler::Suspending"),
        }
    }
}

// ── Tool ─────────────────────────────────────────────────────────────────────

/// A named operation an agent exposes, plus its scheduling and risk metadata.
///
/// Built with [`Tool::new`] and the builder methods; read-only once it has
/// been handed to a [`ToolRegistry`].
#[derive(Debug, Clone)]
pub struct Tool {
    name: String,
    description: String,
    handler: ToolHandler,
    schedule: Option<String>,
    risk_level: RiskLevel,
    requires_approval: bool,
    timeout: Option<Duration>,
}

impl Tool {
    pub fn new(name: impl Into<String>, description: impl Into<String>, handler: ToolHandler) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            handler,
            schedule: None,
            risk_level: RiskLevel::Low,
            requires_approval: false,
            timeout: None,
        }
    }

    /// Attach a cron expression.  Stored as-is; nothing here validates it.
    pub fn schedule(mut self, cron: impl Into<String>) -> Self {
        self.schedule = Some(cron.into());
        self
    }

    pub fn risk(mut self, level: RiskLevel) -> Self {
        self.risk_level = level;
        self
    }

    pub fn requires_approval(mut self) -> Self {
        self.requires_approval = true;
        self
    }

    /// Deadline for a single invocation; takes precedence over executor config.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn handler(&self) -> &ToolHandler {
        &self.handler
    }

    pub fn cron(&self) -> Option<&str> {
        self.schedule.as_deref()
    }

    pub fn risk_level(&self) -> RiskLevel {
        self.risk_level
    }

    pub fn needs_approval(&self) -> bool {
        self.requires_approval
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name.clone(),
            description: self.description.clone(),
            schedule: self.schedule.clone(),
            risk_level: self.risk_level,
            requires_approval: self.requires_approval,
            suspending: self.handler.is_suspending(),
            timeout_secs: self.timeout.map(|d| d.as_secs_f64()),
        }
    }
}

/// Serializable metadata view of a [`Tool`] (everything but the handler).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
    pub risk_level: RiskLevel,
    pub requires_approval: bool,
    pub suspending: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<f64>,
}

// ── Registry ─────────────────────────────────────────────────────────────────

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("tool `{0}` is already registered")]
    Duplicate(String),
}

/// Per-agent mapping from tool name to [`Tool`], iterated in registration order.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Tool>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `tool`, replacing any tool with the same name.
    ///
    /// The replaced tool is returned; its slot in the listing order is kept.
    pub fn register(&mut self, tool: Tool) -> Option<Tool> {
        let name = tool.name.clone();
        let previous = self.tools.insert(name.clone(), tool);
        if previous.is_some() {
            warn!(tool = %name, "tool re-registered; previous definition replaced");
        } else {
            self.order.push(name);
        }
        previous
    }

    /// Like [`register`](Self::register) but refuses to replace an existing tool.
    pub fn try_register(&mut self, tool: Tool) -> Result<(), RegistryError> {
        if self.tools.contains_key(&tool.name) {
            return Err(RegistryError::Duplicate(tool.name));
        }
        self.register(tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.tools.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tool> {
        self.order.iter().filter_map(|name| self.tools.get(name))
    }

    pub fn list_specs(&self) -> Vec<ToolSpec> {
        self.iter().map(Tool::spec).collect()
    }

    /// Specs of tools that carry a cron schedule.
    pub fn scheduled_specs(&self) -> Vec<ToolSpec> {
        self.iter()
            .filter(|t| t.schedule.is_some())
            .map(Tool::spec)
            .collect()
    }
}

// ── ToolRegistry tests ───────────────────────────────────────────────────────
