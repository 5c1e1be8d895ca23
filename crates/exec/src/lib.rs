pub mod approval;
pub mod result_log;

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use lakeops_config::{ApprovalMode, ExecutorConfig};
use lakeops_core::{TaskResult, TaskStatus, wrap_payload};
use lakeops_tools::{RiskLevel, Tool, ToolArgs, ToolHandler, ToolOutput, ToolRegistry};

pub use approval::{
    ApprovalDecision, ApprovalGate, ApprovalReceiver, ApprovalRequest, ApprovalSender,
    AutoApprove, ChannelApprovalGate, approval_channel,
};
pub use result_log::{ResultLog, ResultsSummary};

// ── Execution Policy ─────────────────────────────────────────────────────────

/// Built from `ExecutorConfig` in lakeops-config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionPolicy {
    pub approval_mode: ApprovalMode,
    /// Deadline for tools with no more specific one.  `None` = unbounded.
    pub default_timeout: Option<Duration>,
    /// Per-tool deadlines; consulted after the tool's own deadline.
    #[serde(default)]
    pub tool_timeouts: HashMap<String, Duration>,
    /// Tools that are never invoked.
    #[serde(default)]
    pub tool_denylist: Vec<String>,
}

impl ExecutionPolicy {
    pub fn from_config(config: &ExecutorConfig) -> Self {
        let tool_timeouts = config
            .tool_timeouts
            .keys()
            .filter_map(|name| config.tool_timeout(name).map(|d| (name.clone(), d)))
            .collect();
        Self {
            approval_mode: config.approval_mode,
            default_timeout: config.default_timeout(),
            tool_timeouts,
            tool_denylist: config.tool_denylist.clone(),
        }
    }
}

// ── Task Executor ────────────────────────────────────────────────────────────

/// Invokes registered tools and turns every outcome into a [`TaskResult`].
///
/// Nothing a tool does escapes as an error: missing tools, handler errors,
/// panics and deadlines all become `failed` results, and policy or approval
/// refusals become `skipped` ones.  Each result is appended to the caller's
/// [`ResultLog`] before it is returned.
pub struct TaskExecutor {
    policy: ExecutionPolicy,
    gate: Arc<dyn ApprovalGate>,
}

impl TaskExecutor {
    pub fn new(policy: ExecutionPolicy) -> Self {
        Self {
            policy,
            gate: Arc::new(AutoApprove),
        }
    }

    pub fn with_gate(mut self, gate: Arc<dyn ApprovalGate>) -> Self {
        self.gate = gate;
        self
    }

    /// Attach an approval channel for a human-in-the-loop front end.
    pub fn with_approval(self, tx: ApprovalSender) -> Self {
        self.with_gate(Arc::new(ChannelApprovalGate::new(tx)))
    }

    pub fn policy(&self) -> &ExecutionPolicy {
        &self.policy
    }

    /// Whether the approval gate is consulted before `tool` runs.
    ///
    /// | Mode       | Gate consulted for                               |
    /// |------------|--------------------------------------------------|
    /// | `Advisory` | Nothing                                          |
    /// | `Gated`    | Tools flagged `requires_approval`                |
    /// | `Strict`   | Flagged tools and every `RiskLevel::High` tool   |
    pub fn requires_approval(&self, tool: &Tool) -> bool {
        match self.policy.approval_mode {
            ApprovalMode::Advisory => false,
            ApprovalMode::Gated => tool.needs_approval(),
            ApprovalMode::Strict => tool.needs_approval() || tool.risk_level() == RiskLevel::High,
        }
    }

    /// Tool deadline, then per-tool policy, then the policy default.  Bounds
    /// the approval wait as well as the call.
    pub fn effective_timeout(&self, tool: &Tool) -> Option<Duration> {
        tool.deadline()
            .or_else(|| self.policy.tool_timeouts.get(tool.name()).copied())
            .or(self.policy.default_timeout)
    }

    fn is_denied(&self, tool_name: &str) -> bool {
        self.policy.tool_denylist.iter().any(|name| name == tool_name)
    }

    pub async fn execute(
        &self,
        agent_name: &str,
        registry: &ToolRegistry,
        log: &ResultLog,
        tool_name: &str,
        args: ToolArgs,
    ) -> TaskResult {
        let start = Instant::now();

        // 1. Lookup
        let Some(tool) = registry.get(tool_name) else {
            let result = TaskResult::new(
                agent_name,
                tool_name,
                TaskStatus::Failed,
                format!("Tool '{tool_name}' not found in {agent_name}"),
            );
            return record(log, result);
        };

        debug!(agent = agent_name, tool = tool_name, "executing tool");

        // 2. Deny-list
        if self.is_denied(tool_name) {
            let result = TaskResult::new(
                agent_name,
                tool_name,
                TaskStatus::Skipped,
                "Skipped: blocked by policy (tool_denylist)",
            )
            .with_duration(start.elapsed().as_secs_f64());
            return record(log, result);
        }

        // 3. Approval
        if tool.needs_approval() {
            info!(
                agent = agent_name,
                tool = tool_name,
                risk = %tool.risk_level(),
                "tool requires approval"
            );
        }
        if self.requires_approval(tool) {
            let request = ApprovalRequest::new(
                agent_name,
                tool_name,
                tool.risk_level(),
                args.as_payload().clone(),
            );
            // The approver gets the same deadline as the tool itself.
            let review = self.gate.review(&request);
            let refusal = match self.effective_timeout(tool) {
                Some(limit) => match tokio::time::timeout(limit, review).await {
                    Ok(ApprovalDecision::Approve) => None,
                    Ok(ApprovalDecision::Deny) => Some(format!("approval denied for '{tool_name}'")),
                    Err(_) => {
                        warn!(agent = agent_name, tool = tool_name, "approver did not answer in time; denying");
                        Some(format!("approval timed out after {:.2}s", limit.as_secs_f64()))
                    }
                },
                None => match review.await {
                    ApprovalDecision::Approve => None,
                    ApprovalDecision::Deny => Some(format!("approval denied for '{tool_name}'")),
                },
            };
            if let Some(reason) = refusal {
                info!(agent = agent_name, tool = tool_name, %reason, "tool execution refused");
                let result = TaskResult::new(agent_name, tool_name, TaskStatus::Skipped, format!("Skipped: {reason}"))
                    .with_duration(start.elapsed().as_secs_f64());
                return record(log, result);
            }
        }

        // 4. Invoke
        let outcome = self.invoke(tool, args).await;
        let duration = start.elapsed().as_secs_f64();

        // 5. Build the result
        let result = match outcome {
            Ok(ToolOutput::Completed(value)) => TaskResult::new(
                agent_name,
                tool_name,
                TaskStatus::Success,
                format!("Completed in {duration:.2}s"),
            )
            .with_data(wrap_payload(value)),
            Ok(ToolOutput::Skipped { reason }) => TaskResult::new(
                agent_name,
                tool_name,
                TaskStatus::Skipped,
                format!("Skipped: {reason}"),
            ),
            Err(message) => TaskResult::new(
                agent_name,
                tool_name,
                TaskStatus::Failed,
                format!("Failed: {message}"),
            ),
        };
        record(log, result.with_duration(duration))
    }

    /// Run the handler.  Sync handlers run inline to completion; deadlines
    /// bound suspending handlers, which are the only ones that can yield.
    async fn invoke(&self, tool: &Tool, args: ToolArgs) -> Result<ToolOutput, String> {
        match tool.handler() {
            ToolHandler::Sync(f) => match panic::catch_unwind(AssertUnwindSafe(|| f(&args))) {
                Ok(Ok(output)) => Ok(output),
                Ok(Err(err)) => Err(format!("{err:#}")),
                Err(payload) => Err(panic_message(payload.as_ref())),
            },
            ToolHandler::Suspending(f) => {
                let future = match panic::catch_unwind(AssertUnwindSafe(|| f(args))) {
                    Ok(future) => AssertUnwindSafe(future).catch_unwind(),
                    Err(payload) => return Err(panic_message(payload.as_ref())),
                };
                let joined = match self.effective_timeout(tool) {
                    Some(limit) => match tokio::time::timeout(limit, future).await {
                        Ok(joined) => joined,
                        Err(_) => {
                            return Err(format!("timed out after {:.2}s", limit.as_secs_f64()));
                        }
                    },
                    None => future.await,
                };
                match joined {
                    Ok(Ok(output)) => Ok(output),
                    Ok(Err(err)) => Err(format!("{err:#}")),
                    Err(payload) => Err(panic_message(payload.as_ref())),
                }
            }
        }
    }
}

impl Default for TaskExecutor {
    fn default() -> Self {
        Self::new(ExecutionPolicy::default())
    }
}

fn record(log: &ResultLog, result: TaskResult) -> TaskResult {
    if result.status == TaskStatus::Failed {
        warn!(
            agent = %result.agent_name,
            tool = %result.tool_name,
            task_id = %result.task_id,
            "{result}"
        );
    } else {
        info!(
            agent = %result.agent_name,
            tool = %result.tool_name,
            task_id = %result.task_id,
            "{result}"
        );
    }
    log.push(result.clone());
    result
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    format!("handler panicked: {detail}")
}
