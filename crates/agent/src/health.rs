use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info};

use lakeops_config::AppConfig;
use lakeops_core::TaskResult;
use lakeops_exec::TaskExecutor;
use lakeops_services::Services;
use lakeops_tools::ToolArgs;

use crate::groups::{self, ToolDeps, sync::default_pairs};
use crate::{Agent, AgentCore, AgentRole, CycleContext};

/// Day 2: health snapshots, alerting, sync validation, archival and cost.
pub struct HealthAgent {
    core: AgentCore,
    deps: ToolDeps,
}

impl HealthAgent {
    pub fn new(services: Services, executor: Arc<TaskExecutor>, config: &AppConfig) -> Self {
        let core = AgentCore::new(
            "HealthAgent",
            "Continuous Day 2 monitoring with low-latency alerting, sync validation, cold archival, and self-healing",
            AgentRole::Health,
            executor,
            config.executor.result_log_capacity,
        );
        let deps = core.tool_deps(services, config);
        Self { core, deps }
    }
}

#[async_trait]
impl Agent for HealthAgent {
    fn core(&self) -> &AgentCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut AgentCore {
        &mut self.core
    }

    fn register_tools(&mut self) {
        let registry = self.core.registry_mut();
        groups::monitoring::register(registry, &self.deps);
        groups::connections::register(registry, &self.deps);
        groups::sync::register(registry, &self.deps);
        groups::archival::register(registry, &self.deps);
        groups::cost::register(registry, &self.deps);
        groups::operations::register(registry, &self.deps);
        info!(agent = self.core.name(), tools = self.core.registry().len(), "tools registered");
    }

    async fn run_cycle(&self, ctx: &CycleContext) -> Result<Vec<TaskResult>> {
        let project = ctx.project_id();
        let mut results = Vec::new();

        for branch in ctx.branches() {
            let args = ToolArgs::new()
                .with("project_id", project)
                .with("branch_id", branch.as_str());

            let health = self.execute("monitor_system_health", args.clone()).await;
            if health.is_success() {
                // a snapshot without metrics evaluates against the defaults
                let metrics = health.data.get("metrics").cloned().unwrap_or_else(|| json!({}));
                results.push(health);
                let eval_args = args.clone().with("metrics", metrics);
                results.push(self.execute("evaluate_alert_thresholds", eval_args).await);
            } else {
                debug!(branch = %branch, "no health snapshot, thresholds not evaluated");
                results.push(health);
            }

            results.push(self.execute("monitor_connections", args).await);
        }

        let primary = ctx.primary_branch();
        let pairs = match ctx.get("sync_table_pairs") {
            Some(pairs) => pairs.clone(),
            None => serde_json::to_value(default_pairs())?,
        };
        let sync_args = ToolArgs::new()
            .with("project_id", project)
            .with("branch_id", primary.as_str())
            .with("table_pairs", pairs);
        results.push(self.execute("run_full_sync_validation", sync_args).await);

        let cold_args = ToolArgs::new()
            .with("project_id", project)
            .with("branch_id", primary.as_str());
        results.push(self.execute("identify_cold_data", cold_args).await);

        let cost_args = ToolArgs::new().with("project_id", project);
        results.push(self.execute("track_cost_attribution", cost_args).await);

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::setup;
    use lakeops_config::CycleConfig;
    use lakeops_core::TaskStatus;
    use lakeops_tools::{Tool, ToolHandler, ToolOutput};
    use serde_json::json;

    fn tool_names(results: &[TaskResult]) -> Vec<&str> {
        results.iter().map(|r| r.tool_name.as_str()).collect()
    }

    #[test]
    fn approval_gates_archival_only() {
        let (agent, _stack, _bus) = setup(HealthAgent::new);
        let gated: Vec<_> = agent
            .tool_specs()
            .into_iter()
            .filter(|spec| spec.requires_approval)
            .map(|spec| spec.name)
            .collect();
        assert_eq!(gated, vec!["archive_cold_data_to_delta"]);
    }

    #[tokio::test]
    async fn health_feeds_thresholds_then_once_per_cycle_checks() {
        let (agent, stack, _bus) = setup(HealthAgent::new);
        let ctx = CycleContext::new(CycleConfig::default());
        let results = agent.run_cycle(&ctx).await.unwrap();
        assert_eq!(
            tool_names(&results),
            vec![
                "monitor_system_health",
                "evaluate_alert_thresholds",
                "monitor_connections",
                "run_full_sync_validation",
                "identify_cold_data",
                "track_cost_attribution",
            ]
        );
        assert!(results.iter().all(|r| r.status == TaskStatus::Success));
        // events sits between the warning and critical dead-tuple ratios
        assert_eq!(results[1].data["alerts_triggered"], 1);
        assert_eq!(results[3].data["total_pairs"], 2);
        assert_eq!(stack.writer.records("sync_validation").len(), 2);
        assert!(!stack.writer.records("lakebase_metrics").is_empty());
    }

    #[test]
    fn incident_response_tools_are_registered() {
        let (agent, _stack, _bus) = setup(HealthAgent::new);
        for name in ["recommend_scale_to_zero_timeout", "diagnose_root_cause", "self_heal"] {
            assert!(agent.core().registry().contains(name), "{name} missing");
        }
        let weekly = agent
            .tool_specs()
            .into_iter()
            .find(|spec| spec.name == "recommend_scale_to_zero_timeout")
            .unwrap();
        assert_eq!(weekly.schedule.as_deref(), Some("0 4 * * 0"));
    }

    #[tokio::test]
    async fn snapshot_without_metrics_still_evaluates_thresholds() {
        let (mut agent, _stack, _bus) = setup(HealthAgent::new);
        agent.core_mut().registry_mut().register(Tool::new(
            "monitor_system_health",
            "Snapshot stub",
            ToolHandler::sync(|_| Ok(ToolOutput::Completed(json!({"status": "ok"})))),
        ));
        let ctx = CycleContext::new(CycleConfig::default());
        let results = agent.run_cycle(&ctx).await.unwrap();
        assert_eq!(results[1].tool_name, "evaluate_alert_thresholds");
        assert_eq!(results[1].status, TaskStatus::Success);
        assert_eq!(results[1].data["alerts_triggered"], 0);
    }

    #[tokio::test]
    async fn failed_snapshot_skips_threshold_evaluation() {
        let (agent, stack, _bus) = setup(HealthAgent::new);
        stack.db.fail_on("pg_stat_database");
        let ctx = CycleContext::new(CycleConfig::default()).with("branches", json!(["staging"]));
        let results = agent.run_cycle(&ctx).await.unwrap();
        assert_eq!(results[0].status, TaskStatus::Failed);
        assert_eq!(results[1].tool_name, "monitor_connections");
    }

    #[tokio::test]
    async fn context_table_pairs_override_defaults() {
        let (agent, stack, _bus) = setup(HealthAgent::new);
        let ctx = CycleContext::new(CycleConfig::default()).with(
            "sync_table_pairs",
            json!([{"source": "users", "target": "ops_catalog.lakebase_ops.users_delta"}]),
        );
        let results = agent.run_cycle(&ctx).await.unwrap();
        let sync = results
            .iter()
            .find(|r| r.tool_name == "run_full_sync_validation")
            .unwrap();
        assert_eq!(sync.data["total_pairs"], 1);
        assert_eq!(stack.writer.records("sync_validation").len(), 1);
    }
}
