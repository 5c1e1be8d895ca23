use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use lakeops_config::AppConfig;
use lakeops_core::TaskResult;
use lakeops_exec::TaskExecutor;
use lakeops_services::Services;
use lakeops_tools::ToolArgs;

use crate::groups::{self, ToolDeps};
use crate::{Agent, AgentCore, AgentRole, CycleContext};

/// Tools run against every branch, in order, each cycle.
const RECURRING: &[&str] = &[
    "persist_pg_stat_statements",
    "run_full_index_analysis",
    "identify_tables_needing_vacuum",
    "schedule_vacuum_analyze",
    "check_txid_wraparound_risk",
    "tune_autovacuum_parameters",
];

/// Query statistics, index health and vacuum upkeep.
pub struct PerformanceAgent {
    core: AgentCore,
    deps: ToolDeps,
}

impl PerformanceAgent {
    pub fn new(services: Services, executor: Arc<TaskExecutor>, config: &AppConfig) -> Self {
        let core = AgentCore::new(
            "PerformanceAgent",
            "Proactively analyzes query patterns, indexing, and runtime configs; persists metrics to Delta for 90-day historical analysis and cross-branch comparison",
            AgentRole::Performance,
            executor,
            config.executor.result_log_capacity,
        );
        let deps = core.tool_deps(services, config);
        Self { core, deps }
    }
}

#[async_trait]
impl Agent for PerformanceAgent {
    fn core(&self) -> &AgentCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut AgentCore {
        &mut self.core
    }

    fn register_tools(&mut self) {
        let registry = self.core.registry_mut();
        groups::metrics::register(registry, &self.deps);
        groups::indexes::register(registry, &self.deps);
        groups::maintenance::register(registry, &self.deps);
        info!(agent = self.core.name(), tools = self.core.registry().len(), "tools registered");
    }

    async fn run_cycle(&self, ctx: &CycleContext) -> Result<Vec<TaskResult>> {
        let project = ctx.project_id();
        let mut results = Vec::new();
        for branch in ctx.branches() {
            let args = ToolArgs::new()
                .with("project_id", project)
                .with("branch_id", branch.as_str());
            for tool in RECURRING {
                results.push(self.execute(tool, args.clone()).await);
            }
        }
        Ok(results)
    }
}
