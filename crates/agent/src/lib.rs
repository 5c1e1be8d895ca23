//! Agents: role-specific owners of a tool registry and a per-cycle script.
//!
//! An agent is an [`AgentCore`] plus the tool groups it registers and the
//! order its [`Agent::run_cycle`] calls them in.  Tool bodies live in
//! [`groups`] and reach the outside world only through
//! [`lakeops_services::Services`].

pub mod context;
pub mod groups;
mod health;
mod performance;
mod provisioning;

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use lakeops_config::AppConfig;
use lakeops_core::{EventType, TaskResult, wrap_payload};
use lakeops_events::{EventBus, EventEmitter};
use lakeops_exec::{ResultLog, ResultsSummary, TaskExecutor};
use lakeops_services::Services;
use lakeops_tools::{ToolArgs, ToolRegistry, ToolSpec};

pub use context::CycleContext;
pub use groups::ToolDeps;
pub use health::HealthAgent;
pub use performance::PerformanceAgent;
pub use provisioning::ProvisioningAgent;

/// Where an agent runs in the orchestrator's two-phase cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    /// Phase 1, sequential.
    Provisioning,
    /// Phase 2, concurrent with health.
    Performance,
    /// Phase 2, concurrent with performance.
    Health,
}

impl AgentRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Provisioning => "provisioning",
            Self::Performance => "performance",
            Self::Health => "health",
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Core ─────────────────────────────────────────────────────────────────────

/// State every agent carries.
pub struct AgentCore {
    name: String,
    description: String,
    role: AgentRole,
    registry: ToolRegistry,
    executor: Arc<TaskExecutor>,
    results: ResultLog,
    emitter: EventEmitter,
}

impl AgentCore {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        role: AgentRole,
        executor: Arc<TaskExecutor>,
        result_capacity: usize,
    ) -> Self {
        let name = name.into();
        Self {
            emitter: EventEmitter::new(&name),
            name,
            description: description.into(),
            role,
            registry: ToolRegistry::new(),
            executor,
            results: ResultLog::new(result_capacity),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn role(&self) -> AgentRole {
        self.role
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ToolRegistry {
        &mut self.registry
    }

    pub fn results(&self) -> &ResultLog {
        &self.results
    }

    pub fn emitter(&self) -> &EventEmitter {
        &self.emitter
    }

    /// Tool dependencies bound to this agent's emitter.
    pub fn tool_deps(&self, services: Services, config: &AppConfig) -> ToolDeps {
        ToolDeps::new(services, self.emitter.clone(), config.thresholds.clone())
    }
}

impl fmt::Debug for AgentCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentCore")
            .field("name", &self.name)
            .field("role", &self.role)
            .field("tools", &self.registry.len())
            .field("results", &self.results.len())
            .finish()
    }
}

// ── Agent ────────────────────────────────────────────────────────────────────

#[async_trait]
pub trait Agent: Send + Sync {
    fn core(&self) -> &AgentCore;
    fn core_mut(&mut self) -> &mut AgentCore;

    /// Populate the registry.  Called once, when the agent is registered
    /// with the orchestrator.
    fn register_tools(&mut self);

    /// One automation pass.  Tool failures come back as `failed` results;
    /// an `Err` means the agent's own sequencing went wrong.
    async fn run_cycle(&self, ctx: &CycleContext) -> Result<Vec<TaskResult>>;

    fn name(&self) -> &str {
        self.core().name()
    }

    fn description(&self) -> &str {
        self.core().description()
    }

    fn role(&self) -> AgentRole {
        self.core().role()
    }

    /// Route this agent's events to `bus`.
    fn attach(&self, bus: Arc<EventBus>) {
        self.core().emitter.attach(bus);
    }

    async fn execute(&self, tool_name: &str, args: ToolArgs) -> TaskResult {
        let core = self.core();
        core.executor
            .execute(&core.name, &core.registry, &core.results, tool_name, args)
            .await
    }

    /// No-op until the agent has been attached to a bus.
    fn emit_event(&self, event_type: EventType, data: Value) {
        self.core().emitter.emit(event_type, wrap_payload(data));
    }

    fn results_summary(&self) -> ResultsSummary {
        self.core().results.summary(self.name())
    }

    fn tool_specs(&self) -> Vec<ToolSpec> {
        self.core().registry.list_specs()
    }
}

/// The three standard agents sharing one executor and collaborator set.
pub fn standard_agents(
    services: &Services,
    executor: Arc<TaskExecutor>,
    config: &AppConfig,
) -> Vec<Box<dyn Agent>> {
    vec![
        Box::new(ProvisioningAgent::new(services.clone(), executor.clone(), config)),
        Box::new(PerformanceAgent::new(services.clone(), executor.clone(), config)),
        Box::new(HealthAgent::new(services.clone(), executor, config)),
    ]
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use lakeops_services::MockStack;

    /// A registered agent wired to fresh mocks and an attached bus.
    pub fn setup<A: Agent>(build: impl FnOnce(Services, Arc<TaskExecutor>, &AppConfig) -> A) -> (A, MockStack, Arc<EventBus>) {
        let stack = MockStack::new();
        let config = AppConfig::default();
        let mut agent = build(stack.services(), Arc::new(TaskExecutor::default()), &config);
        agent.register_tools();
        let bus = Arc::new(EventBus::default());
        agent.attach(bus.clone());
        (agent, stack, bus)
    }

    pub fn args(project: &str, branch: &str) -> ToolArgs {
        ToolArgs::new().with("project_id", project).with("branch_id", branch)
    }

    pub fn event_types(bus: &EventBus) -> Vec<EventType> {
        bus.log().into_iter().map(|e| e.event_type).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lakeops_core::TaskStatus;
    use lakeops_tools::{Tool, ToolHandler, ToolOutput};
    use serde_json::json;

    struct Echo {
        core: AgentCore,
    }

    #[async_trait]
    impl Agent for Echo {
        fn core(&self) -> &AgentCore {
            &self.core
        }

        fn core_mut(&mut self) -> &mut AgentCore {
            &mut self.core
        }

        fn register_tools(&mut self) {
            self.core.registry_mut().register(Tool::new(
                "echo",
                "Return the arguments",
                ToolHandler::sync(|args| Ok(ToolOutput::Completed(Value::Object(args.as_payload().clone())))),
            ));
        }

        async fn run_cycle(&self, _ctx: &CycleContext) -> Result<Vec<TaskResult>> {
            Ok(vec![self.execute("echo", ToolArgs::new().with("n", 1)).await])
        }
    }

    fn echo() -> Echo {
        let mut agent = Echo {
            core: AgentCore::new(
                "echo",
                "test agent",
                AgentRole::Performance,
                Arc::new(TaskExecutor::default()),
                100,
            ),
        };
        agent.register_tools();
        agent
    }

    #[tokio::test]
    async fn execute_records_into_the_agent_log() {
        let agent = echo();
        let results = agent.run_cycle(&CycleContext::default()).await.unwrap();
        assert_eq!(results[0].status, TaskStatus::Success);
        assert_eq!(results[0].data["n"], 1);

        let missing = agent.execute("nope", ToolArgs::new()).await;
        assert_eq!(missing.status, TaskStatus::Failed);

        let summary = agent.results_summary();
        assert_eq!(summary.agent, "echo");
        assert_eq!(summary.total_tasks, 2);
        assert_eq!(summary.successful, 1);
        assert_eq!(summary.failed, 1);
    }

    #[test]
    fn emit_is_a_noop_until_attached() {
        let agent = echo();
        agent.emit_event(EventType::BranchCreated, json!({"branch_id": "x"}));

        let bus = Arc::new(EventBus::default());
        agent.attach(bus.clone());
        agent.emit_event(EventType::BranchCreated, json!({"branch_id": "y"}));

        let log = bus.log();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].source_agent, "echo");
        assert_eq!(log[0].data["branch_id"], "y");
    }

    #[test]
    fn standard_agents_cover_every_role() {
        let config = AppConfig::default();
        let agents = standard_agents(&Services::mock(), Arc::new(TaskExecutor::default()), &config);
        let roles: Vec<_> = agents.iter().map(|a| a.role()).collect();
        assert_eq!(
            roles,
            vec![AgentRole::Provisioning, AgentRole::Performance, AgentRole::Health]
        );
        assert_eq!(agents[0].name(), "ProvisioningAgent");
    }
}
