//! Governance and integrations: row-level security, Unity Catalog naming,
//! AI agent branching rules, CI/CD workflow generation, and the combined
//! provisioning workflow that runs them all.

use anyhow::Result;
use serde_json::{Value, json};

use lakeops_tools::{RiskLevel, Tool, ToolArgs, ToolHandler, ToolOutput, ToolRegistry};

use super::branching::ttl_for;
use super::project::{create_ops_catalog, provision_project};
use super::{ToolDeps, arg_or, done, tool};

const DEFAULT_TENANTS: [&str; 2] = ["tenant_alpha", "tenant_beta"];

pub fn register(registry: &mut ToolRegistry, deps: &ToolDeps) {
    registry.register(
        tool(
            deps,
            "configure_rls",
            "Setup row-level security for multi-tenant isolation",
            configure_rls_tool,
        )
        .risk(RiskLevel::High)
        .requires_approval(),
    );
    registry.register(Tool::new(
        "setup_unity_catalog_integration",
        "Align Lakebase with UC governance framework",
        ToolHandler::sync(|args| {
            let project = args.str("project_id")?;
            let catalog = args.str("uc_catalog")?;
            done(unity_catalog_mapping(project, catalog))
        }),
    ));
    registry.register(Tool::new(
        "setup_ai_agent_branching",
        "Configure AI agent branching instructions",
        ToolHandler::sync(|args| done(ai_agent_branching(args.str("project_id")?))),
    ));
    registry.register(Tool::new(
        "setup_cicd_pipeline",
        "Generate GitHub Actions YAML for branch automation",
        ToolHandler::sync(|args| done(cicd_pipeline(args.str("project_id")?))),
    ));
    registry.register(tool(
        deps,
        "provision_with_governance",
        "Full project setup with all governance and integrations",
        provision_with_governance,
    ));
}

// ── Row-level security ───────────────────────────────────────────────────────

fn rls_statements(tenant: &str) -> [String; 3] {
    [
        format!("CREATE SCHEMA IF NOT EXISTS {tenant};"),
        format!("ALTER TABLE {tenant}.orders ENABLE ROW LEVEL SECURITY;"),
        format!(
            "CREATE POLICY IF NOT EXISTS {tenant}_isolation ON {tenant}.orders \
             USING (tenant_id = current_setting('app.tenant_id'));"
        ),
    ]
}

fn tenants(args: &ToolArgs) -> Vec<String> {
    args.strings("tenants")
}

async fn configure_rls(deps: &ToolDeps, project: &str, branch: &str, tenants: &[String]) -> Result<Value> {
    let mut executed = 0;
    for tenant in tenants {
        for stmt in rls_statements(tenant) {
            deps.statement(project, branch, &stmt).await?;
            executed += 1;
        }
    }
    Ok(json!({
        "project_id": project,
        "branch_id": branch,
        "tenants": tenants,
        "rls_policies_created": tenants.len(),
        "statements_executed": executed,
    }))
}

async fn configure_rls_tool(deps: ToolDeps, args: ToolArgs) -> Result<ToolOutput> {
    let project = args.str("project_id")?;
    let branch = arg_or(&args, "branch_id", "production");
    let mut tenants = tenants(&args);
    if tenants.is_empty() {
        tenants = DEFAULT_TENANTS.iter().map(|t| t.to_string()).collect();
    }
    done(configure_rls(&deps, project, &branch, &tenants).await?)
}

// ── Integrations ─────────────────────────────────────────────────────────────

/// Lakebase names use hyphens, Unity Catalog names underscores.
fn unity_catalog_mapping(project: &str, catalog: &str) -> Value {
    let uc_name = project.replace('-', "_");
    json!({
        "lakebase_project": project,
        "uc_catalog": catalog,
        "uc_domain": uc_name,
        "naming_alignment": {
            "lakebase": project,
            "unity_catalog": uc_name,
            "separator_mapping": "hyphens (Lakebase) <-> underscores (UC)",
        },
        "lineage_tracking": true,
        "audit_via": "system.access.audit",
    })
}

fn ai_agent_branching(project: &str) -> Value {
    let ttl = ttl_for("ai-agent").unwrap_or(3_600);
    json!({
        "project_id": project,
        "branch_prefix": "ai-agent",
        "ttl_seconds": ttl,
        "source_branch": "development",
        "workflow": [
            "1. Create branch (ai-agent-test, TTL: 1h)",
            "2. Wait for ACTIVE status",
            "3. Apply migrations",
            "4. Validate with Schema Diff",
            "5. Surface migration SQL for human review",
            "6. Branch auto-deletes after 1 hour",
        ],
        "agent_instructions": "## AI Agent Database Branching\n\
            - Create branches from development with 1h TTL\n\
            - Branch name: ai-agent-test\n\
            - Always validate with Schema Diff before suggesting migration\n\
            - Never apply migrations to production or staging directly\n",
    })
}

const CREATE_BRANCH_WORKFLOW: &str = r#"name: Lakebase Branch on PR Open
on:
  pull_request:
    types: [opened, reopened]

env:
  LAKEBASE_PROJECT: __PROJECT__

jobs:
  create-branch:
    runs-on: ubuntu-latest
    steps:
      - name: Install Databricks CLI
        run: curl -fsSL https://raw.githubusercontent.com/databricks/setup-cli/main/install.sh | sh

      - name: Create Lakebase Branch
        env:
          DATABRICKS_HOST: ${{ secrets.DATABRICKS_HOST }}
          DATABRICKS_TOKEN: ${{ secrets.DATABRICKS_TOKEN }}
        run: |
          databricks postgres create-branch \
            "projects/${{ env.LAKEBASE_PROJECT }}" \
            "ci-pr-${{ github.event.pull_request.number }}" \
            --json '{"spec": {"source_branch": "projects/'${{ env.LAKEBASE_PROJECT }}'/branches/staging", "ttl": "14400s"}}'

      - name: Wait for Branch Active
        run: |
          for i in $(seq 1 30); do
            STATUS=$(databricks postgres get-branch \
              "projects/${{ env.LAKEBASE_PROJECT }}/branches/ci-pr-${{ github.event.pull_request.number }}" \
              --output json | jq -r '.status.state')
            if [ "$STATUS" = "ACTIVE" ]; then break; fi
            sleep 10
          done
"#;

const DELETE_BRANCH_WORKFLOW: &str = r#"name: Lakebase Branch Cleanup on PR Close
on:
  pull_request:
    types: [closed]

env:
  LAKEBASE_PROJECT: __PROJECT__

jobs:
  delete-branch:
    runs-on: ubuntu-latest
    steps:
      - name: Install Databricks CLI
        run: curl -fsSL https://raw.githubusercontent.com/databricks/setup-cli/main/install.sh | sh

      - name: Delete Lakebase Branch
        env:
          DATABRICKS_HOST: ${{ secrets.DATABRICKS_HOST }}
          DATABRICKS_TOKEN: ${{ secrets.DATABRICKS_TOKEN }}
        run: |
          databricks postgres delete-branch \
            "projects/${{ env.LAKEBASE_PROJECT }}/branches/ci-pr-${{ github.event.pull_request.number }}" \
            || true
"#;

fn cicd_pipeline(project: &str) -> Value {
    json!({
        "project_id": project,
        "create_branch_yaml": CREATE_BRANCH_WORKFLOW.replace("__PROJECT__", project),
        "delete_branch_yaml": DELETE_BRANCH_WORKFLOW.replace("__PROJECT__", project),
        "secrets_required": ["DATABRICKS_HOST", "DATABRICKS_TOKEN"],
        "variables_required": ["LAKEBASE_PROJECT"],
    })
}

// ── Combined workflow ────────────────────────────────────────────────────────

async fn provision_with_governance(deps: ToolDeps, args: ToolArgs) -> Result<ToolOutput> {
    let project = args.str("project_name")?;
    let domain = args.str_or("domain", "");
    let environment = args.str_or("environment", "production");
    let pattern = args.str_or("branching_pattern", "multi_env_pipeline");
    let catalog = args.str_or("uc_catalog", "ops_catalog");
    let tenants = tenants(&args);

    let mut out = json!({
        "ops_catalog": create_ops_catalog(&deps).await?,
        "project": provision_project(&deps, project, domain, environment, pattern).await?,
    });
    if !tenants.is_empty() {
        out["rls"] = configure_rls(&deps, project, "production", &tenants).await?;
    }
    out["uc_integration"] = unity_catalog_mapping(project, catalog);
    out["cicd"] = cicd_pipeline(project);
    out["ai_agents"] = ai_agent_branching(project);
    done(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lakeops_events::EventEmitter;
    use lakeops_services::MockStack;

    fn deps(stack: &MockStack) -> ToolDeps {
        ToolDeps::new(stack.services(), EventEmitter::new("ProvisioningAgent"), Default::default())
    }

    #[test]
    fn rls_tool_is_high_risk_and_gated() {
        let stack = MockStack::new();
        let mut registry = ToolRegistry::new();
        register(&mut registry, &deps(&stack));
        let rls = registry.get("configure_rls").unwrap();
        assert_eq!(rls.risk_level(), RiskLevel::High);
        assert!(rls.needs_approval());
        assert!(!registry.get("setup_cicd_pipeline").unwrap().handler().is_suspending());
    }

    #[tokio::test]
    async fn rls_defaults_to_two_tenants() {
        let stack = MockStack::new();
        let ToolOutput::Completed(out) =
            configure_rls_tool(deps(&stack), ToolArgs::new().with("project_id", "p"))
                .await
                .unwrap()
        else {
            panic!("expected completion");
        };
        assert_eq!(out["rls_policies_created"], 2);
        assert_eq!(out["statements_executed"], 6);
        assert_eq!(out["branch_id"], "production");
        assert!(stack.db.statements()[2].starts_with("CREATE POLICY IF NOT EXISTS tenant_alpha_isolation"));
    }

    #[test]
    fn unity_catalog_names_use_underscores() {
        let mapping = unity_catalog_mapping("supply-chain-prod", "ops_catalog");
        assert_eq!(mapping["uc_domain"], "supply_chain_prod");
        assert_eq!(mapping["naming_alignment"]["lakebase"], "supply-chain-prod");
    }

    #[test]
    fn workflows_embed_the_project() {
        let pipeline = cicd_pipeline("retail-prod");
        let create = pipeline["create_branch_yaml"].as_str().unwrap();
        assert!(create.contains("LAKEBASE_PROJECT: retail-prod"));
        assert!(create.contains("${{ secrets.DATABRICKS_TOKEN }}"));
        assert!(!pipeline["delete_branch_yaml"].as_str().unwrap().contains("__PROJECT__"));
    }

    #[tokio::test]
    async fn governance_workflow_runs_every_stage() {
        let stack = MockStack::new();
        let args = ToolArgs::new()
            .with("project_name", "retail-prod")
            .with("domain", "retail")
            .with("tenants", json!(["acme"]));
        let ToolOutput::Completed(out) = provision_with_governance(deps(&stack), args).await.unwrap() else {
            panic!("expected completion");
        };
        assert_eq!(out["ops_catalog"]["status"], "created");
        assert_eq!(out["project"]["status"], "provisioned");
        assert_eq!(out["rls"]["statements_executed"], 3);
        assert_eq!(out["uc_integration"]["uc_catalog"], "ops_catalog");
        assert_eq!(out["ai_agents"]["ttl_seconds"], 3_600);
        assert!(out["cicd"]["create_branch_yaml"].is_string());
    }

    #[tokio::test]
    async fn governance_without_tenants_skips_rls() {
        let stack = MockStack::new();
        let args = ToolArgs::new().with("project_name", "p");
        let ToolOutput::Completed(out) = provision_with_governance(deps(&stack), args).await.unwrap() else {
            panic!("expected completion");
        };
        assert!(out.get("rls").is_none());
        assert!(stack.db.statements().is_empty());
    }
}
