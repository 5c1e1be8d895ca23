use std::sync::Arc;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use lakeops_config::AppConfig;
use lakeops_core::TaskResult;
use lakeops_exec::TaskExecutor;
use lakeops_services::Services;
use lakeops_tools::ToolArgs;

use crate::groups::{self, ToolDeps};
use crate::{Agent, AgentCore, AgentRole, CycleContext};

/// Day 0 and Day 1: projects, branches, migrations and governance.
pub struct ProvisioningAgent {
    core: AgentCore,
    deps: ToolDeps,
}

impl ProvisioningAgent {
    pub fn new(services: Services, executor: Arc<TaskExecutor>, config: &AppConfig) -> Self {
        let core = AgentCore::new(
            "ProvisioningAgent",
            "Automates Day 0/Day 1 database setup, branching, schema management, CI/CD, and governance",
            AgentRole::Provisioning,
            executor,
            config.executor.result_log_capacity,
        );
        let deps = core.tool_deps(services, config);
        Self { core, deps }
    }
}

#[async_trait]
impl Agent for ProvisioningAgent {
    fn core(&self) -> &AgentCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut AgentCore {
        &mut self.core
    }

    fn register_tools(&mut self) {
        let registry = self.core.registry_mut();
        groups::project::register(registry, &self.deps);
        groups::branching::register(registry, &self.deps);
        groups::migration::register(registry, &self.deps);
        groups::governance::register(registry, &self.deps);
        info!(agent = self.core.name(), tools = self.core.registry().len(), "tools registered");
    }

    async fn run_cycle(&self, ctx: &CycleContext) -> Result<Vec<TaskResult>> {
        let project = ctx.project_id();
        let mut results = Vec::new();

        if ctx.bool_or("is_new_project", true) {
            let args = ToolArgs::new()
                .with("project_name", project)
                .with("domain", ctx.domain())
                .with("uc_catalog", ctx.catalog());
            results.push(self.execute("provision_with_governance", args).await);
        } else {
            let args = ToolArgs::new().with("project_id", project);
            results.push(self.execute("enforce_ttl_policies", args.clone()).await);
            results.push(self.execute("monitor_branch_count", args).await);
        }

        for pr in ctx.records("pending_prs") {
            let number = pr
                .get("number")
                .and_then(Value::as_i64)
                .ok_or_else(|| anyhow!("pending PR without a number: {}", Value::Object(pr.clone())))?;
            let tool = match pr.get("action").and_then(Value::as_str) {
                Some("opened") => "create_branch_on_pr",
                Some("closed") => "delete_branch_on_pr_close",
                other => {
                    debug!(pr = number, action = ?other, "ignoring PR action");
                    continue;
                }
            };
            let args = ToolArgs::new()
                .with("project_id", project)
                .with("pr_number", number);
            results.push(self.execute(tool, args).await);
        }

        for migration in ctx.records("pending_migrations") {
            let pr_number = migration.get("pr_number").and_then(Value::as_i64).unwrap_or(999);
            let files = migration.get("files").cloned().unwrap_or(Value::Array(Vec::new()));
            let args = ToolArgs::new()
                .with("project_id", project)
                .with("pr_number", pr_number)
                .with("migration_files", files);
            results.push(self.execute("test_migration_on_branch", args).await);
        }

        Ok(results)
    }
}
