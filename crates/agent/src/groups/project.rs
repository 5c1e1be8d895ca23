//! Project setup: the branch hierarchy of a new project and the ops catalog.

use anyhow::Result;
use serde_json::{Value, json};
use tracing::info;

use lakeops_core::EventType;
use lakeops_services::BranchRequest;
use lakeops_tools::{ToolArgs, ToolOutput, ToolRegistry};

use super::branching::ttl_for;
use super::{ToolDeps, arg_or, done, short_id, tool};

pub fn register(registry: &mut ToolRegistry, deps: &ToolDeps) {
    registry.register(tool(
        deps,
        "provision_lakebase_project",
        "Create a new Lakebase project with full branch hierarchy",
        provision_lakebase_project,
    ));
    registry.register(tool(
        deps,
        "create_ops_catalog",
        "Create ops_catalog and all operational Delta tables",
        |deps, _args| async move { done(create_ops_catalog(&deps).await?) },
    ));
}

async fn provision_lakebase_project(deps: ToolDeps, args: ToolArgs) -> Result<ToolOutput> {
    let project = args.str("project_name")?;
    let domain = args.str_or("domain", "");
    let environment = arg_or(&args, "environment", "production");
    let pattern = arg_or(&args, "branching_pattern", "multi_env_pipeline");
    done(provision_project(&deps, project, domain, &environment, &pattern).await?)
}

/// One branch of the standard hierarchy.
struct Tier {
    name: &'static str,
    source: Option<&'static str>,
    protected: bool,
    ttl_key: Option<&'static str>,
}

const HIERARCHY: [Tier; 3] = [
    Tier {
        name: "production",
        source: None,
        protected: true,
        ttl_key: None,
    },
    Tier {
        name: "staging",
        source: Some("production"),
        protected: true,
        ttl_key: None,
    },
    Tier {
        name: "development",
        source: Some("staging"),
        protected: false,
        ttl_key: Some("dev"),
    },
];

/// Create the project, its production/staging/development branches, and
/// protect the first two.
pub(crate) async fn provision_project(
    deps: &ToolDeps,
    project: &str,
    domain: &str,
    environment: &str,
    branching_pattern: &str,
) -> Result<Value> {
    info!(project, "provisioning project");
    let platform = &deps.services.platform;
    platform.create_project(project).await?;

    let mut created = Vec::new();
    let mut lifecycle = Vec::new();
    for tier in &HIERARCHY {
        let ttl = tier.ttl_key.and_then(ttl_for);
        let mut request = BranchRequest::new(tier.name, tier.source.unwrap_or("")).ttl(ttl);
        if tier.protected {
            request = request.protected();
        }
        platform.create_branch(project, &request).await?;

        created.push(json!({
            "branch": tier.name,
            "type": if tier.protected { "protected" } else { "ephemeral" },
            "ttl": ttl,
        }));
        lifecycle.push(json!({
            "event_id": short_id(),
            "project_id": project,
            "branch_id": tier.name,
            "event_type": "created",
            "source_branch": tier.source.unwrap_or(""),
            "ttl_seconds": ttl,
            "is_protected": tier.protected,
            "actor": deps.agent(),
            "reason": "Initial project setup",
        }));
    }

    for tier in HIERARCHY.iter().filter(|t| t.protected) {
        platform.protect_branch(project, tier.name).await?;
    }
    deps.record("branch_lifecycle", lifecycle).await?;

    let names: Vec<&str> = HIERARCHY.iter().map(|t| t.name).collect();
    deps.emit(
        EventType::ProvisioningComplete,
        json!({ "project_id": project, "branches": names }),
    );

    Ok(json!({
        "project": project,
        "domain": domain,
        "environment": environment,
        "branching_pattern": branching_pattern,
        "branches_created": created,
        "status": "provisioned",
    }))
}

pub(crate) async fn create_ops_catalog(deps: &ToolDeps) -> Result<Value> {
    let created = deps.services.writer.create_ops_catalog().await?;
    Ok(Value::Object(created))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::event_types;
    use lakeops_events::{EventBus, EventEmitter};
    use lakeops_services::{MockStack, PlatformClient};
    use std::sync::Arc;

    fn deps(stack: &MockStack) -> (ToolDeps, Arc<EventBus>) {
        let emitter = EventEmitter::new("ProvisioningAgent");
        let bus = Arc::new(EventBus::default());
        emitter.attach(bus.clone());
        (ToolDeps::new(stack.services(), emitter, Default::default()), bus)
    }

    #[tokio::test]
    async fn provisions_three_tier_hierarchy() {
        let stack = MockStack::new();
        let (deps, bus) = deps(&stack);

        let out = provision_project(&deps, "retail-prod", "retail", "production", "multi_env_pipeline")
            .await
            .unwrap();
        assert_eq!(out["status"], "provisioned");
        assert_eq!(out["branches_created"].as_array().unwrap().len(), 3);
        assert_eq!(out["branches_created"][2]["ttl"], 604_800);

        let branches = stack.platform.list_branches("retail-prod").await.unwrap();
        let protected: Vec<_> = branches
            .iter()
            .filter(|b| b.is_protected)
            .map(|b| b.short_name().to_string())
            .collect();
        assert_eq!(protected, vec!["production", "staging"]);

        let lifecycle = stack.writer.records("branch_lifecycle");
        assert_eq!(lifecycle.len(), 3);
        assert_eq!(lifecycle[0]["actor"], "ProvisioningAgent");
        assert_eq!(event_types(&bus), vec![EventType::ProvisioningComplete]);
        assert_eq!(bus.log()[0].data["branches"][1], "staging");
    }

    #[tokio::test]
    async fn ops_catalog_reports_created_tables() {
        let stack = MockStack::new();
        let (deps, _bus) = deps(&stack);
        let out = create_ops_catalog(&deps).await.unwrap();
        assert_eq!(out["status"], "created");
        assert!(out["statements_executed"].as_u64().unwrap() >= 3);
    }
}
