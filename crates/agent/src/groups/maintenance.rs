//! Vacuum scheduling, transaction-ID wraparound monitoring and per-table
//! autovacuum tuning.

use anyhow::Result;
use serde_json::{Value, json};
use tracing::warn;

use lakeops_core::{EventType, Payload};
use lakeops_services::{Alert, AlertSeverity, queries, row_f64, row_i64, row_str};
use lakeops_tools::{RiskLevel, ToolArgs, ToolOutput, ToolRegistry};

use super::{ToolDeps, done, now_iso, short_id, tool};

/// Postgres refuses new transactions at roughly this XID age.
const WRAPAROUND_LIMIT: f64 = 2_000_000_000.0;

const VACUUM_PCT: f64 = 10.0;
const VACUUM_FULL_PCT: f64 = 30.0;

pub fn register(registry: &mut ToolRegistry, deps: &ToolDeps) {
    registry.register(
        tool(
            deps,
            "identify_tables_needing_vacuum",
            "Find tables with high dead tuple ratio",
            identify_tool,
        )
        .schedule("0 2 * * *"),
    );
    registry.register(
        tool(
            deps,
            "schedule_vacuum_analyze",
            "Execute VACUUM ANALYZE on identified tables",
            schedule_vacuum_analyze,
        )
        .schedule("0 2 * * *"),
    );
    registry.register(
        tool(
            deps,
            "schedule_vacuum_full",
            "Execute VACUUM FULL on heavily bloated tables",
            schedule_vacuum_full,
        )
        .risk(RiskLevel::High)
        .requires_approval(),
    );
    registry.register(
        tool(
            deps,
            "check_txid_wraparound_risk",
            "Alert on transaction ID wraparound risk",
            check_txid_wraparound_risk,
        )
        .schedule("*/5 * * * *"),
    );
    registry.register(
        tool(
            deps,
            "tune_autovacuum_parameters",
            "Dynamically adjust per-table autovacuum thresholds",
            tune_autovacuum_parameters,
        )
        .schedule("0 3 * * *"),
    );
}

// ── Vacuum ───────────────────────────────────────────────────────────────────

/// Dead-tuple percentage, from the live and dead counts when present and
/// the reported `dead_pct` otherwise.
fn dead_pct(row: &Payload) -> f64 {
    let live = row_i64(row, "n_live_tup");
    let dead = row_i64(row, "n_dead_tup");
    if live + dead > 0 {
        dead as f64 / (live + dead) as f64 * 100.0
    } else {
        row_f64(row, "dead_pct").unwrap_or(0.0)
    }
}

fn vacuum_target(row: &Payload, pct: f64, action: &str) -> Value {
    json!({
        "table": row_str(row, "relname"),
        "schema": row.get("schemaname").and_then(Value::as_str).unwrap_or("public"),
        "dead_tuple_pct": (pct * 100.0).round() / 100.0,
        "dead_tuples": row_i64(row, "n_dead_tup"),
        "action": action,
    })
}

pub(crate) async fn identify_tables_needing_vacuum(deps: &ToolDeps, project: &str, branch: &str) -> Result<Value> {
    let rows = deps.query(project, branch, queries::TABLES_NEEDING_VACUUM).await?;
    let mut vacuum = Vec::new();
    let mut vacuum_full = Vec::new();
    for row in &rows {
        let pct = dead_pct(row);
        if pct > VACUUM_FULL_PCT {
            vacuum_full.push(vacuum_target(row, pct, "VACUUM FULL (requires exclusive lock)"));
        } else if pct > VACUUM_PCT {
            vacuum.push(vacuum_target(row, pct, "VACUUM ANALYZE"));
        }
    }
    Ok(json!({
        "tables_needing_vacuum": vacuum.len(),
        "tables_needing_vacuum_full": vacuum_full.len(),
        "vacuum_targets": vacuum,
        "vacuum_full_targets": vacuum_full,
    }))
}

async fn identify_tool(deps: ToolDeps, args: ToolArgs) -> Result<ToolOutput> {
    let project = args.str("project_id")?;
    let branch = args.str("branch_id")?;
    done(identify_tables_needing_vacuum(&deps, project, branch).await?)
}

fn history_record(project: &str, branch: &str, table: &str, operation: &str, status: &str) -> Value {
    json!({
        "operation_id": short_id(),
        "project_id": project,
        "branch_id": branch,
        "table_name": table,
        "schema_name": "public",
        "operation_type": operation,
        "dead_tuples_before": 0,
        "dead_tuples_after": 0,
        "duration_seconds": 0.0,
        "executed_at": now_iso(),
        "status": status,
    })
}

async fn schedule_vacuum_analyze(deps: ToolDeps, args: ToolArgs) -> Result<ToolOutput> {
    let project = args.str("project_id")?;
    let branch = args.str("branch_id")?;
    let tables = if args.contains("tables") {
        args.strings("tables")
    } else {
        let analysis = identify_tables_needing_vacuum(&deps, project, branch).await?;
        analysis["vacuum_targets"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|t| t["table"].as_str().map(str::to_string))
            .collect()
    };

    let mut results = Vec::with_capacity(tables.len());
    let mut history = Vec::with_capacity(tables.len());
    let mut vacuumed = 0;
    for table in &tables {
        let outcome = deps.statement(project, branch, &format!("VACUUM ANALYZE {table}")).await;
        let result = match outcome {
            Ok(_) => {
                vacuumed += 1;
                json!({ "table": table, "operation": "VACUUM ANALYZE", "status": "success" })
            }
            Err(err) => {
                warn!(table = %table, error = %err, "vacuum failed");
                json!({ "table": table, "operation": "VACUUM ANALYZE", "status": "failed", "error": format!("{err:#}") })
            }
        };
        let status = result["status"].as_str().unwrap_or("failed");
        history.push(history_record(project, branch, table, "VACUUM ANALYZE", status));
        results.push(result);
    }
    if !history.is_empty() {
        deps.record("vacuum_history", history).await?;
    }

    deps.emit(
        EventType::VacuumCompleted,
        json!({ "project_id": project, "tables_vacuumed": vacuumed }),
    );
    done(json!({
        "tables_vacuumed": vacuumed,
        "tables_failed": results.len() - vacuumed,
        "results": results,
    }))
}

async fn schedule_vacuum_full(deps: ToolDeps, args: ToolArgs) -> Result<ToolOutput> {
    let project = args.str("project_id")?;
    let branch = args.str("branch_id")?;
    let table = args.str("table")?;

    let locks = deps
        .query(
            project,
            branch,
            &format!("SELECT count(*) as lock_count FROM pg_locks WHERE relation = '{table}'::regclass AND granted"),
        )
        .await?;
    let active = locks.first().map(|row| row_i64(row, "lock_count")).unwrap_or(0);
    if active > 0 {
        warn!(table, active_locks = active, "deferring VACUUM FULL");
        return done(json!({
            "table": table,
            "operation": "VACUUM FULL",
            "status": "deferred",
            "reason": format!("{active} active locks"),
        }));
    }

    deps.statement(project, branch, &format!("VACUUM FULL {table}")).await?;
    deps.record(
        "vacuum_history",
        vec![history_record(project, branch, table, "VACUUM FULL", "success")],
    )
    .await?;
    done(json!({ "table": table, "operation": "VACUUM FULL", "status": "success" }))
}

// ── Wraparound ───────────────────────────────────────────────────────────────

async fn check_txid_wraparound_risk(deps: ToolDeps, args: ToolArgs) -> Result<ToolOutput> {
    let project = args.str("project_id")?;
    let branch = args.str("branch_id")?;
    let rows = deps.query(project, branch, queries::TXID_WRAPAROUND_RISK).await?;
    let thresholds = deps.thresholds.clone();

    let mut risk = "safe";
    for row in &rows {
        let age = row_i64(row, "xid_age") as f64;
        if age > thresholds.txid_age_critical {
            risk = "critical";
            deps.alert(
                Alert::new(
                    AlertSeverity::Critical,
                    "Transaction ID Wraparound CRITICAL",
                    format!(
                        "XID age: {age:.0} ({:.1}% of 2B limit). Emergency VACUUM FREEZE required!",
                        age / WRAPAROUND_LIMIT * 100.0
                    ),
                )
                .metric("txid_age", age)
                .threshold(thresholds.txid_age_critical)
                .scope(project, branch)
                .sop("Emergency VACUUM FREEZE"),
            )
            .await?;
        } else if age > thresholds.txid_age_warning {
            if risk != "critical" {
                risk = "warning";
            }
            deps.alert(
                Alert::new(
                    AlertSeverity::Warning,
                    "Transaction ID Wraparound Warning",
                    format!("XID age: {age:.0} approaching safety threshold"),
                )
                .metric("txid_age", age)
                .threshold(thresholds.txid_age_warning)
                .scope(project, branch),
            )
            .await?;
        }
    }

    done(json!({
        "project_id": project,
        "branch_id": branch,
        "risk_level": risk,
        "databases": rows,
    }))
}

// ── Autovacuum ───────────────────────────────────────────────────────────────

/// Per-table `(threshold, scale_factor)`; small tables keep the defaults.
fn autovacuum_settings(live: i64) -> Option<(i64, f64)> {
    if live > 1_000_000 {
        Some(((live / 100).max(1_000), 0.01))
    } else if live > 100_000 {
        Some(((live / 20).max(500), 0.05))
    } else {
        None
    }
}

async fn tune_autovacuum_parameters(deps: ToolDeps, args: ToolArgs) -> Result<ToolOutput> {
    let project = args.str("project_id")?;
    let branch = args.str("branch_id")?;
    let tables = deps.query(project, branch, queries::AUTOVACUUM_CANDIDATES).await?;

    let mut actions = Vec::new();
    for row in &tables {
        let live = row_i64(row, "n_live_tup");
        let Some((threshold, scale)) = autovacuum_settings(live) else {
            continue;
        };
        let table = row_str(row, "relname");
        let stmt = format!(
            "ALTER TABLE {table} SET (\
             autovacuum_vacuum_threshold = {threshold}, \
             autovacuum_vacuum_scale_factor = {scale}, \
             autovacuum_analyze_threshold = {threshold}, \
             autovacuum_analyze_scale_factor = {scale})"
        );
        deps.statement(project, branch, &stmt).await?;
        actions.push(json!({
            "table": table,
            "live_tuples": live,
            "vacuum_threshold": threshold,
            "scale_factor": scale,
        }));
    }
    done(json!({ "tables_tuned": actions.len(), "actions": actions }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{args, event_types};
    use lakeops_events::{EventBus, EventEmitter};
    use lakeops_services::MockStack;
    use std::sync::Arc;

    fn deps(stack: &MockStack) -> (ToolDeps, Arc<EventBus>) {
        let emitter = EventEmitter::new("PerformanceAgent");
        let bus = Arc::new(EventBus::default());
        emitter.attach(bus.clone());
        (ToolDeps::new(stack.services(), emitter, Default::default()), bus)
    }

    fn completed(out: ToolOutput) -> Value {
        match out {
            ToolOutput::Completed(value) => value,
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn dead_tuple_ratio_picks_vacuum_targets() {
        let stack = MockStack::new();
        let (deps, _bus) = deps(&stack);
        let out = identify_tables_needing_vacuum(&deps, "p", "b").await.unwrap();
        // orders 13.79%, events 20%, users 0.5%
        assert_eq!(out["tables_needing_vacuum"], 2);
        assert_eq!(out["tables_needing_vacuum_full"], 0);
        assert_eq!(out["vacuum_targets"][0]["table"], "orders");
        assert_eq!(out["vacuum_targets"][0]["dead_tuple_pct"], 13.79);
    }

    #[tokio::test]
    async fn heavy_bloat_needs_vacuum_full() {
        let stack = MockStack::new();
        stack.db.set_rows(
            "pg_stat_user_tables",
            json!([{"relname": "logs", "n_live_tup": 1000, "n_dead_tup": 1000}]),
        );
        let (deps, _bus) = deps(&stack);
        let out = identify_tables_needing_vacuum(&deps, "p", "b").await.unwrap();
        assert_eq!(out["vacuum_full_targets"][0]["dead_tuple_pct"], 50.0);
        assert_eq!(out["vacuum_full_targets"][0]["schema"], "public");
    }

    #[tokio::test]
    async fn vacuum_analyze_tolerates_per_table_failures() {
        let stack = MockStack::new();
        stack.db.fail_on("vacuum analyze events");
        let (deps, bus) = deps(&stack);
        let out = completed(schedule_vacuum_analyze(deps, args("p", "b")).await.unwrap());
        assert_eq!(out["tables_vacuumed"], 1);
        assert_eq!(out["tables_failed"], 1);
        assert_eq!(out["results"][1]["status"], "failed");

        let history = stack.writer.records("vacuum_history");
        assert_eq!(history.len(), 2);
        assert_eq!(history[1]["status"], "failed");
        assert_eq!(event_types(&bus), vec![EventType::VacuumCompleted]);
        assert_eq!(bus.log()[0].data["tables_vacuumed"], 1);
    }

    #[tokio::test]
    async fn explicit_table_list_overrides_detection() {
        let stack = MockStack::new();
        let (deps, _bus) = deps(&stack);
        let out = completed(
            schedule_vacuum_analyze(deps, args("p", "b").with("tables", json!(["users"])))
                .await
                .unwrap(),
        );
        assert_eq!(out["tables_vacuumed"], 1);
        assert_eq!(stack.db.statements(), vec!["VACUUM ANALYZE users"]);
    }

    #[tokio::test]
    async fn vacuum_full_defers_on_locks() {
        let stack = MockStack::new();
        let (deps, _bus) = deps(&stack);
        let out = completed(
            schedule_vacuum_full(deps.clone(), args("p", "b").with("table", "orders"))
                .await
                .unwrap(),
        );
        assert_eq!(out["status"], "success");
        assert_eq!(stack.db.statements(), vec!["VACUUM FULL orders"]);

        stack.db.set_rows("pg_locks", json!([{"lock_count": 3}]));
        let out = completed(
            schedule_vacuum_full(deps, args("p", "b").with("table", "orders"))
                .await
                .unwrap(),
        );
        assert_eq!(out["status"], "deferred");
        assert_eq!(out["reason"], "3 active locks");
        assert_eq!(stack.writer.records("vacuum_history").len(), 1);
    }

    #[tokio::test]
    async fn txid_age_raises_alerts_by_threshold() {
        let stack = MockStack::new();
        let (deps, _bus) = deps(&stack);
        let out = completed(check_txid_wraparound_risk(deps.clone(), args("p", "b")).await.unwrap());
        assert_eq!(out["risk_level"], "safe");
        assert!(stack.alerts.history().is_empty());

        stack.db.set_rows(
            "pg_stat_database",
            json!([{"datname": "a", "xid_age": 1_200_000_000}, {"datname": "b", "xid_age": 600_000_000}]),
        );
        let out = completed(check_txid_wraparound_risk(deps, args("p", "b")).await.unwrap());
        assert_eq!(out["risk_level"], "critical");
        let alerts = stack.alerts.history();
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].severity, AlertSeverity::Critical);
        assert_eq!(alerts[0].source_agent, "PerformanceAgent");
        assert_eq!(alerts[1].severity, AlertSeverity::Warning);
    }

    #[test]
    fn autovacuum_settings_scale_with_table_size() {
        assert_eq!(autovacuum_settings(5_000_000), Some((50_000, 0.01)));
        assert_eq!(autovacuum_settings(1_050_000), Some((10_500, 0.01)));
        assert_eq!(autovacuum_settings(200_000), Some((10_000, 0.05)));
        assert_eq!(autovacuum_settings(100_000), None);
    }

    #[tokio::test]
    async fn autovacuum_tuning_alters_large_tables() {
        let stack = MockStack::new();
        let (deps, _bus) = deps(&stack);
        let out = completed(tune_autovacuum_parameters(deps, args("p", "b")).await.unwrap());
        assert_eq!(out["tables_tuned"], 2);
        assert_eq!(out["actions"][1]["vacuum_threshold"], 200_000);
        let statements = stack.db.statements();
        assert!(statements[0].starts_with("ALTER TABLE orders SET (autovacuum_vacuum_threshold = 50000"));
    }
}
