//! Schema migrations: idempotent DDL application, schema diffs between
//! branches and the nine-step migration test on a CI branch.

use std::collections::BTreeMap;

use anyhow::Result;
use serde_json::{Value, json};

use lakeops_core::{EventType, Payload};
use lakeops_services::{queries, row_str};
use lakeops_tools::{RiskLevel, ToolArgs, ToolOutput, ToolRegistry};

use super::branching::{ci_branch_name, create_branch, ttl_for};
use super::{ToolDeps, done, tool};

const DEFAULT_MIGRATIONS: [&str; 3] = [
    "CREATE TABLE IF NOT EXISTS orders (id SERIAL PRIMARY KEY, customer_id INT, status TEXT, created_at TIMESTAMPTZ DEFAULT NOW());",
    "CREATE INDEX IF NOT EXISTS idx_orders_customer_id ON orders(customer_id);",
    "ALTER TABLE orders ADD COLUMN IF NOT EXISTS updated_at TIMESTAMPTZ DEFAULT NOW();",
];

pub fn register(registry: &mut ToolRegistry, deps: &ToolDeps) {
    registry.register(
        tool(
            deps,
            "apply_schema_migration",
            "Apply idempotent DDL migrations to a branch",
            apply_schema_migration_tool,
        )
        .risk(RiskLevel::Medium),
    );
    registry.register(tool(
        deps,
        "capture_schema_diff",
        "Generate schema diff between branches",
        capture_schema_diff_tool,
    ));
    registry.register(tool(
        deps,
        "test_migration_on_branch",
        "Full 9-step migration testing workflow",
        test_migration_on_branch,
    ));
}

/// Whether `ddl` can be re-run safely.
///
/// Guarded statements (`IF [NOT] EXISTS`, `OR REPLACE`) and plain DML pass;
/// unguarded `DROP TABLE`, `DROP INDEX`, `TRUNCATE` and `CREATE` do not.
pub fn is_idempotent_ddl(ddl: &str) -> bool {
    let upper = ddl.trim().to_uppercase();
    if ["IF NOT EXISTS", "IF EXISTS", "OR REPLACE"]
        .iter()
        .any(|guard| upper.contains(guard))
    {
        return true;
    }
    if ["DROP TABLE ", "DROP INDEX ", "TRUNCATE "]
        .iter()
        .any(|danger| upper.contains(danger))
    {
        return false;
    }
    if ["INSERT", "UPDATE", "DELETE", "SELECT"]
        .iter()
        .any(|dml| upper.starts_with(dml))
    {
        return true;
    }
    !upper.starts_with("CREATE")
}

fn migration_files(args: &ToolArgs) -> Vec<String> {
    let files = args.strings("migration_files");
    if files.is_empty() {
        DEFAULT_MIGRATIONS.iter().map(|s| s.to_string()).collect()
    } else {
        files
    }
}

pub(crate) async fn apply_schema_migration(
    deps: &ToolDeps,
    project: &str,
    branch: &str,
    files: &[String],
) -> Result<Value> {
    let mut migrations = Vec::with_capacity(files.len());
    let mut applied = 0;
    for (i, ddl) in files.iter().enumerate() {
        if !is_idempotent_ddl(ddl) {
            migrations.push(json!({
                "migration": i + 1,
                "status": "rejected",
                "reason": "Non-idempotent DDL",
            }));
            continue;
        }
        let affected = deps.statement(project, branch, ddl).await?;
        applied += 1;
        migrations.push(json!({
            "migration": i + 1,
            "ddl": ddl.chars().take(80).collect::<String>(),
            "status": "applied",
            "affected": affected,
        }));
    }
    let rejected = files.len() - applied;

    deps.emit(
        EventType::SchemaMigrated,
        json!({ "project_id": project, "branch_id": branch, "migrations_applied": applied }),
    );
    Ok(json!({
        "project_id": project,
        "branch_id": branch,
        "migrations": migrations,
        "total_applied": applied,
        "total_rejected": rejected,
    }))
}

async fn apply_schema_migration_tool(deps: ToolDeps, args: ToolArgs) -> Result<ToolOutput> {
    let project = args.str("project_id")?;
    let branch = args.str("branch_id")?;
    done(apply_schema_migration(&deps, project, branch, &migration_files(&args)).await?)
}

/// table → column → type
type SchemaMap = BTreeMap<String, BTreeMap<String, String>>;

fn schema_map(rows: &[Payload]) -> SchemaMap {
    let mut schema = SchemaMap::new();
    for row in rows {
        schema
            .entry(row_str(row, "table_name").to_string())
            .or_default()
            .insert(
                row_str(row, "column_name").to_string(),
                row_str(row, "data_type").to_string(),
            );
    }
    schema
}

/// What `target` has that `source` lacks, and the reverse.
fn diff_schemas(source: &SchemaMap, target: &SchemaMap) -> Value {
    let tables_added: Vec<_> = target.keys().filter(|t| !source.contains_key(*t)).collect();
    let tables_removed: Vec<_> = source.keys().filter(|t| !target.contains_key(*t)).collect();

    let mut columns_added = Vec::new();
    let mut columns_removed = Vec::new();
    for (table, target_cols) in target {
        let Some(source_cols) = source.get(table) else {
            continue;
        };
        for (column, ty) in target_cols {
            if !source_cols.contains_key(column) {
                columns_added.push(json!({ "table": table, "column": column, "type": ty }));
            }
        }
        for (column, ty) in source_cols {
            if !target_cols.contains_key(column) {
                columns_removed.push(json!({ "table": table, "column": column, "type": ty }));
            }
        }
    }

    json!({
        "tables_added": tables_added,
        "tables_removed": tables_removed,
        "columns_added": columns_added,
        "columns_removed": columns_removed,
    })
}

pub(crate) async fn capture_schema_diff(
    deps: &ToolDeps,
    project: &str,
    source_branch: &str,
    target_branch: &str,
) -> Result<Value> {
    let source = schema_map(&deps.query(project, source_branch, queries::SCHEMA_COLUMNS).await?);
    let target = schema_map(&deps.query(project, target_branch, queries::SCHEMA_COLUMNS).await?);
    let diff = diff_schemas(&source, &target);
    let has_changes = diff
        .as_object()
        .is_some_and(|d| d.values().any(|v| v.as_array().is_some_and(|a| !a.is_empty())));

    Ok(json!({
        "project_id": project,
        "source_branch": source_branch,
        "target_branch": target_branch,
        "diff": diff,
        "has_changes": has_changes,
    }))
}

async fn capture_schema_diff_tool(deps: ToolDeps, args: ToolArgs) -> Result<ToolOutput> {
    let project = args.str("project_id")?;
    let source = args.str("source_branch")?;
    let target = args.str("target_branch")?;
    done(capture_schema_diff(&deps, project, source, target).await?)
}

fn step(n: u32, action: impl Into<String>, status: &str) -> Value {
    json!({ "step": n, "action": action.into(), "status": status })
}

async fn test_migration_on_branch(deps: ToolDeps, args: ToolArgs) -> Result<ToolOutput> {
    let project = args.str("project_id")?;
    let branch = ci_branch_name(args.i64_or("pr_number", 999));
    let ttl = ttl_for("ci").unwrap_or(14_400);
    let files = migration_files(&args);

    let mut steps = vec![
        step(1, "Migration files received", "ok"),
        step(2, "CI/CD pipeline triggered", "ok"),
    ];

    create_branch(&deps, project, &branch, "ci", "staging", Some(ttl)).await?;
    steps.push(step(3, format!("Branch '{branch}' created (TTL: {ttl}s)"), "ok"));

    let migration = apply_schema_migration(&deps, project, &branch, &files).await?;
    let applied = migration["total_applied"].as_u64().unwrap_or(0);
    let rejected = migration["total_rejected"].as_u64().unwrap_or(0);
    steps.push(step(
        4,
        format!("Migrations applied: {applied} success, {rejected} rejected"),
        if rejected == 0 { "ok" } else { "warning" },
    ));

    let diff = capture_schema_diff(&deps, project, "staging", &branch).await?;
    steps.push(step(5, format!("Schema diff captured: {}", diff["diff"]), "ok"));

    let smoke = deps.query(project, &branch, "SELECT 1").await;
    steps.push(match smoke {
        Ok(_) => step(6, "Integration smoke test passed", "ok"),
        Err(err) => step(6, format!("Integration smoke test failed: {err}"), "failed"),
    });
    steps.push(step(7, "Schema diff ready for code review", "ok"));
    steps.push(step(8, "Pending: replay migrations on merge", "pending"));
    steps.push(step(9, format!("Branch auto-deletes after {ttl}s"), "pending"));

    let passed = steps
        .iter()
        .all(|s| matches!(s["status"].as_str(), Some("ok" | "pending")));

    done(json!({
        "steps": steps,
        "overall_status": if passed { "pass" } else { "fail" },
        "branch_name": branch,
        "schema_diff": diff["diff"],
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::event_types;
    use lakeops_events::{EventBus, EventEmitter};
    use lakeops_services::{MockStack, rows_from};
    use std::sync::Arc;

    fn deps(stack: &MockStack) -> (ToolDeps, Arc<EventBus>) {
        let emitter = EventEmitter::new("ProvisioningAgent");
        let bus = Arc::new(EventBus::default());
        emitter.attach(bus.clone());
        (ToolDeps::new(stack.services(), emitter, Default::default()), bus)
    }

    #[test]
    fn idempotency_rules() {
        assert!(is_idempotent_ddl("CREATE TABLE IF NOT EXISTS t (id int)"));
        assert!(is_idempotent_ddl("drop table if exists t"));
        assert!(is_idempotent_ddl("CREATE OR REPLACE VIEW v AS SELECT 1"));
        assert!(is_idempotent_ddl("  insert into t values (1)"));
        assert!(is_idempotent_ddl("ALTER TABLE t ALTER COLUMN c SET DEFAULT 0"));
        assert!(!is_idempotent_ddl("DROP TABLE t"));
        assert!(!is_idempotent_ddl("TRUNCATE t"));
        assert!(!is_idempotent_ddl("CREATE INDEX idx ON t(c)"));
    }

    #[tokio::test]
    async fn rejects_unsafe_ddl_and_applies_the_rest() {
        let stack = MockStack::new();
        let (deps, bus) = deps(&stack);
        let files = vec![
            "CREATE TABLE IF NOT EXISTS a (id int)".to_string(),
            "DROP TABLE b".to_string(),
        ];
        let out = apply_schema_migration(&deps, "p", "ci-pr-1", &files).await.unwrap();
        assert_eq!(out["total_applied"], 1);
        assert_eq!(out["total_rejected"], 1);
        assert_eq!(out["migrations"][1]["status"], "rejected");
        assert_eq!(stack.db.statements(), vec!["CREATE TABLE IF NOT EXISTS a (id int)"]);
        assert_eq!(event_types(&bus), vec![EventType::SchemaMigrated]);
    }

    #[test]
    fn diff_reports_added_and_removed_objects() {
        let source = schema_map(&rows_from(json!([
            {"table_name": "orders", "column_name": "id", "data_type": "integer"},
            {"table_name": "orders", "column_name": "legacy", "data_type": "text"},
            {"table_name": "old", "column_name": "id", "data_type": "integer"},
        ])));
        let target = schema_map(&rows_from(json!([
            {"table_name": "orders", "column_name": "id", "data_type": "integer"},
            {"table_name": "orders", "column_name": "updated_at", "data_type": "timestamptz"},
            {"table_name": "audit_log", "column_name": "id", "data_type": "integer"},
        ])));
        let diff = diff_schemas(&source, &target);
        assert_eq!(diff["tables_added"], json!(["audit_log"]));
        assert_eq!(diff["tables_removed"], json!(["old"]));
        assert_eq!(diff["columns_added"][0]["column"], "updated_at");
        assert_eq!(diff["columns_removed"][0]["column"], "legacy");
    }

    #[tokio::test]
    async fn identical_branches_have_no_changes() {
        let stack = MockStack::new();
        let (deps, _bus) = deps(&stack);
        let out = capture_schema_diff(&deps, "p", "staging", "ci-pr-1").await.unwrap();
        assert_eq!(out["has_changes"], false);
    }

    #[tokio::test]
    async fn nine_step_workflow_passes_with_default_migrations() {
        let stack = MockStack::new();
        let (deps, bus) = deps(&stack);
        let out = test_migration_on_branch(deps, ToolArgs::new().with("project_id", "p").with("pr_number", 7))
            .await
            .unwrap();
        let ToolOutput::Completed(out) = out else {
            panic!("expected a completed run");
        };
        assert_eq!(out["steps"].as_array().unwrap().len(), 9);
        assert_eq!(out["overall_status"], "pass");
        assert_eq!(out["branch_name"], "ci-pr-7");
        assert_eq!(stack.db.statements().len(), 3);
        assert_eq!(
            event_types(&bus),
            vec![EventType::BranchCreated, EventType::SchemaMigrated]
        );
    }

    #[tokio::test]
    async fn rejected_migration_fails_the_workflow() {
        let stack = MockStack::new();
        let (deps, _bus) = deps(&stack);
        let args = ToolArgs::new()
            .with("project_id", "p")
            .with("migration_files", json!(["TRUNCATE orders"]));
        let ToolOutput::Completed(out) = test_migration_on_branch(deps, args).await.unwrap() else {
            panic!("expected a completed run");
        };
        assert_eq!(out["branch_name"], "ci-pr-999");
        assert_eq!(out["steps"][3]["status"], "warning");
        assert_eq!(out["overall_status"], "fail");
    }
}
