//! System health: metric collection from the statistics views, threshold
//! evaluation with alerting, and the low-risk remediations that may run
//! without a human.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info};

use lakeops_core::{EventType, Payload};
use lakeops_services::{Alert, AlertSeverity, queries, row_f64, row_i64, row_str};
use lakeops_tools::{ToolArgs, ToolOutput, ToolRegistry};

use super::connections::{DEFAULT_MAX_IDLE_MINUTES, terminate_idle_connections};
use super::{ToolDeps, done, now_iso, short_id, tool};

/// Typical connection limit of a branch endpoint.
const MAX_CONNECTIONS: f64 = 100.0;

/// One health snapshot of a branch.  Every field defaults so a partial
/// mapping (for example from a caller-supplied context) still evaluates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthMetrics {
    pub cache_hit_ratio: f64,
    pub deadlocks: i64,
    pub active_connections: i64,
    pub connection_utilization: f64,
    pub idle_connections: i64,
    pub idle_in_transaction: i64,
    pub active_queries: i64,
    pub max_dead_tuple_ratio: f64,
    pub worst_dead_tuple_table: String,
    pub waiting_locks: i64,
    pub txid_age: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub io_hit_ratio: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub io_read_time_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub io_write_time_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wal_bytes_generated: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wal_buffers_full: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wal_write_time_ms: Option<f64>,
}

impl Default for HealthMetrics {
    fn default() -> Self {
        Self {
            cache_hit_ratio: 1.0,
            deadlocks: 0,
            active_connections: 0,
            connection_utilization: 0.0,
            idle_connections: 0,
            idle_in_transaction: 0,
            active_queries: 0,
            max_dead_tuple_ratio: 0.0,
            worst_dead_tuple_table: String::new(),
            waiting_locks: 0,
            txid_age: 0,
            io_hit_ratio: None,
            io_read_time_ms: None,
            io_write_time_ms: None,
            wal_bytes_generated: None,
            wal_buffers_full: None,
            wal_write_time_ms: None,
        }
    }
}

impl HealthMetrics {
    /// `(name, value)` for every numeric metric that was collected.
    pub fn numeric(&self) -> Vec<(&'static str, f64)> {
        let mut out = vec![
            ("cache_hit_ratio", self.cache_hit_ratio),
            ("deadlocks", self.deadlocks as f64),
            ("active_connections", self.active_connections as f64),
            ("connection_utilization", self.connection_utilization),
            ("idle_connections", self.idle_connections as f64),
            ("idle_in_transaction", self.idle_in_transaction as f64),
            ("active_queries", self.active_queries as f64),
            ("max_dead_tuple_ratio", self.max_dead_tuple_ratio),
            ("waiting_locks", self.waiting_locks as f64),
            ("txid_age", self.txid_age as f64),
        ];
        let optional = [
            ("io_hit_ratio", self.io_hit_ratio),
            ("io_read_time_ms", self.io_read_time_ms),
            ("io_write_time_ms", self.io_write_time_ms),
            ("wal_bytes_generated", self.wal_bytes_generated.map(|v| v as f64)),
            ("wal_buffers_full", self.wal_buffers_full.map(|v| v as f64)),
            ("wal_write_time_ms", self.wal_write_time_ms),
        ];
        out.extend(optional.into_iter().filter_map(|(name, v)| v.map(|v| (name, v))));
        out
    }
}

fn ratio(hits: i64, misses: i64) -> f64 {
    let total = hits + misses;
    if total > 0 { hits as f64 / total as f64 } else { 1.0 }
}

pub fn register(registry: &mut ToolRegistry, deps: &ToolDeps) {
    registry.register(
        tool(
            deps,
            "monitor_system_health",
            "Collect all health metrics from pg_stat views",
            monitor_system_health,
        )
        .schedule("*/5 * * * *"),
    );
    registry.register(
        tool(
            deps,
            "evaluate_alert_thresholds",
            "Check health metrics against warning and critical thresholds",
            evaluate_alert_thresholds,
        )
        .schedule("*/5 * * * *"),
    );
    registry.register(tool(
        deps,
        "execute_low_risk_sop",
        "Auto-execute safe remediations (vacuum, connection kill)",
        execute_low_risk_sop,
    ));
}

// ── Collection ───────────────────────────────────────────────────────────────

/// Dead-tuple ratio of a table row, derived from the counts when the view
/// does not report it.
fn dead_ratio(row: &Payload) -> f64 {
    if let Some(r) = row_f64(row, "dead_ratio") {
        return r;
    }
    let dead = row_i64(row, "n_dead_tup");
    let total = dead + row_i64(row, "n_live_tup");
    if total > 0 { dead as f64 / total as f64 } else { 0.0 }
}

pub(crate) async fn collect_metrics(deps: &ToolDeps, project: &str, branch: &str) -> Result<HealthMetrics> {
    let mut m = HealthMetrics::default();

    if let Some(stats) = deps.query(project, branch, queries::DATABASE_STATS).await?.first() {
        m.cache_hit_ratio = ratio(row_i64(stats, "blks_hit"), row_i64(stats, "blks_read"));
        m.deadlocks = row_i64(stats, "deadlocks");
        m.active_connections = row_i64(stats, "numbackends");
    }

    // Grouped rows carry `cnt`; ungrouped rows count once.
    let mut total = 0;
    for row in deps.query(project, branch, queries::CONNECTION_STATES).await? {
        let count = if row.contains_key("cnt") { row_i64(&row, "cnt") } else { 1 };
        total += count;
        match row_str(&row, "state") {
            "idle" => m.idle_connections += count,
            "idle in transaction" => m.idle_in_transaction += count,
            "active" => m.active_queries += count,
            _ => {}
        }
    }
    m.connection_utilization = total as f64 / MAX_CONNECTIONS;

    for row in deps.query(project, branch, queries::TABLE_DEAD_TUPLES).await? {
        let r = dead_ratio(&row);
        if r > m.max_dead_tuple_ratio {
            m.max_dead_tuple_ratio = r;
            m.worst_dead_tuple_table = row_str(&row, "relname").to_string();
        }
    }

    m.waiting_locks = deps
        .query(project, branch, queries::WAITING_LOCKS)
        .await?
        .first()
        .map(|row| row_i64(row, "waiting_locks"))
        .unwrap_or(0);
    m.txid_age = deps
        .query(project, branch, queries::MAX_TXID_AGE)
        .await?
        .first()
        .map(|row| row_i64(row, "max_xid_age"))
        .unwrap_or(0);

    if let Some(io) = deps.query(project, branch, queries::IO_STATS).await?.first() {
        m.io_hit_ratio = Some(ratio(row_i64(io, "total_hits"), row_i64(io, "total_reads")));
        m.io_read_time_ms = Some(row_f64(io, "total_read_time_ms").unwrap_or(0.0));
        m.io_write_time_ms = Some(row_f64(io, "total_write_time_ms").unwrap_or(0.0));
    }
    if let Some(wal) = deps.query(project, branch, queries::WAL_STATS).await?.first() {
        m.wal_bytes_generated = Some(row_i64(wal, "wal_bytes"));
        m.wal_buffers_full = Some(row_i64(wal, "wal_buffers_full"));
        m.wal_write_time_ms = Some(row_f64(wal, "wal_write_time").unwrap_or(0.0));
    }
    Ok(m)
}

async fn monitor_system_health(deps: ToolDeps, args: ToolArgs) -> Result<ToolOutput> {
    let project = args.str("project_id")?;
    let branch = args.str("branch_id")?;
    let metrics = collect_metrics(&deps, project, branch).await?;

    let taken_at = now_iso();
    let records = metrics
        .numeric()
        .into_iter()
        .map(|(name, value)| {
            json!({
                "metric_id": short_id(),
                "project_id": project,
                "branch_id": branch,
                "metric_name": name,
                "metric_value": value,
                "threshold_level": "normal",
                "snapshot_timestamp": taken_at,
            })
        })
        .collect();
    deps.record("lakebase_metrics", records).await?;
    debug!(project, branch, cache_hit = metrics.cache_hit_ratio, "health snapshot");

    done(json!({ "project_id": project, "branch_id": branch, "metrics": metrics }))
}

// ── Evaluation ───────────────────────────────────────────────────────────────

#[derive(Default)]
struct Evaluation {
    alerts: Vec<Value>,
    sops: Vec<Value>,
}

impl Evaluation {
    async fn alert(&mut self, deps: &ToolDeps, alert: Alert, project: &str, branch: &str) -> Result<()> {
        let critical = alert.severity == AlertSeverity::Critical;
        let sent = deps.alert(alert.scope(project, branch)).await?;
        if critical {
            deps.emit(
                EventType::ThresholdBreached,
                json!({
                    "project_id": project,
                    "branch_id": branch,
                    "metric": sent.metric_name,
                    "value": sent.metric_value,
                    "threshold": sent.threshold,
                }),
            );
        }
        self.alerts.push(Value::Object(sent.to_payload()));
        Ok(())
    }
}

pub(crate) async fn evaluate_thresholds(
    deps: &ToolDeps,
    metrics: &HealthMetrics,
    project: &str,
    branch: &str,
) -> Result<Value> {
    let t = deps.thresholds.clone();
    let mut eval = Evaluation::default();

    let cache = metrics.cache_hit_ratio;
    if cache < t.cache_hit_critical {
        let alert = Alert::new(
            AlertSeverity::Critical,
            "Cache Hit Ratio CRITICAL",
            format!(
                "Cache hit ratio: {:.2}% (threshold: {:.0}%). Analyze shared_buffers, recommend CU increase.",
                cache * 100.0,
                t.cache_hit_critical * 100.0
            ),
        )
        .metric("cache_hit_ratio", cache)
        .threshold(t.cache_hit_critical)
        .sop("Analyze shared_buffers, recommend CU increase");
        eval.alert(deps, alert, project, branch).await?;
    } else if cache < t.cache_hit_warning {
        let alert = Alert::new(
            AlertSeverity::Warning,
            "Cache Hit Ratio Warning",
            format!("Cache hit ratio: {:.2}%", cache * 100.0),
        )
        .metric("cache_hit_ratio", cache)
        .threshold(t.cache_hit_warning);
        eval.alert(deps, alert, project, branch).await?;
    }

    let util = metrics.connection_utilization;
    if util > t.conn_util_critical {
        let alert = Alert::new(
            AlertSeverity::Critical,
            "Connection Utilization CRITICAL",
            format!(
                "Connection utilization: {:.0}%. Auto-terminating idle connections > 30min.",
                util * 100.0
            ),
        )
        .metric("connection_utilization", util)
        .threshold(t.conn_util_critical)
        .sop("Auto-terminate idle > 30min")
        .auto_remediated();
        eval.alert(deps, alert, project, branch).await?;
        let result = terminate_idle_connections(deps, project, branch, DEFAULT_MAX_IDLE_MINUTES).await?;
        eval.sops.push(json!({ "sop": "terminate_idle", "result": result }));
    } else if util > t.conn_util_warning {
        let alert = Alert::new(
            AlertSeverity::Warning,
            "Connection Utilization Warning",
            format!("Connection utilization: {:.0}%", util * 100.0),
        )
        .metric("connection_utilization", util)
        .threshold(t.conn_util_warning);
        eval.alert(deps, alert, project, branch).await?;
    }

    let dead = metrics.max_dead_tuple_ratio;
    let table = match metrics.worst_dead_tuple_table.as_str() {
        "" => "unknown",
        name => name,
    };
    if dead > t.dead_tuple_critical {
        let alert = Alert::new(
            AlertSeverity::Critical,
            format!("Dead Tuple Ratio CRITICAL on {table}"),
            format!("Dead tuple ratio: {:.0}%. Scheduling VACUUM ANALYZE.", dead * 100.0),
        )
        .metric("dead_tuple_ratio", dead)
        .threshold(t.dead_tuple_critical)
        .sop("Schedule VACUUM ANALYZE")
        .auto_remediated();
        eval.alert(deps, alert, project, branch).await?;
        if table != "unknown" {
            let result = vacuum_table(deps, project, branch, table).await?;
            eval.sops.push(json!({ "sop": "vacuum_triggered", "table": table, "result": result }));
        }
    } else if dead > t.dead_tuple_warning {
        let alert = Alert::new(
            AlertSeverity::Warning,
            format!("Dead Tuple Ratio Warning on {table}"),
            format!("Dead tuple ratio: {:.0}%", dead * 100.0),
        )
        .metric("dead_tuple_ratio", dead)
        .threshold(t.dead_tuple_warning);
        eval.alert(deps, alert, project, branch).await?;
    }

    let age = metrics.txid_age as f64;
    if age > t.txid_age_critical {
        let alert = Alert::new(
            AlertSeverity::Critical,
            "TXID Wraparound CRITICAL",
            format!("Transaction ID age: {}. Emergency VACUUM FREEZE required!", metrics.txid_age),
        )
        .metric("txid_age", age)
        .threshold(t.txid_age_critical)
        .sop("Emergency VACUUM FREEZE");
        eval.alert(deps, alert, project, branch).await?;
    }

    if !eval.alerts.is_empty() {
        info!(project, branch, alerts = eval.alerts.len(), sops = eval.sops.len(), "thresholds breached");
    }
    Ok(json!({
        "alerts_triggered": eval.alerts.len(),
        "sops_auto_executed": eval.sops.len(),
        "alerts": eval.alerts,
        "sops": eval.sops,
    }))
}

async fn evaluate_alert_thresholds(deps: ToolDeps, args: ToolArgs) -> Result<ToolOutput> {
    let project = args.str_or("project_id", "");
    let branch = args.str_or("branch_id", "");
    let metrics: HealthMetrics = if args.contains("metrics") {
        args.decode("metrics")?
    } else {
        HealthMetrics::default()
    };
    done(evaluate_thresholds(&deps, &metrics, project, branch).await?)
}

// ── Remediation ──────────────────────────────────────────────────────────────

async fn vacuum_table(deps: &ToolDeps, project: &str, branch: &str, table: &str) -> Result<Value> {
    let action = format!("VACUUM ANALYZE {table}");
    deps.statement(project, branch, &action).await?;
    deps.emit(
        EventType::SelfHealExecuted,
        json!({ "issue": "high_dead_tuples", "action": action }),
    );
    Ok(json!({ "action": action, "status": "executed" }))
}

async fn execute_low_risk_sop(deps: ToolDeps, args: ToolArgs) -> Result<ToolOutput> {
    let issue = args.str("issue_type")?;
    let project = args.str("project_id")?;
    let branch = args.str("branch_id")?;

    match issue {
        "high_dead_tuples" => {
            let context = args.payload("context")?;
            let table = match args.str_or("table", "") {
                "" => context.get("table").and_then(Value::as_str).unwrap_or(""),
                table => table,
            };
            if table.is_empty() {
                return Ok(ToolOutput::skipped("high_dead_tuples needs a table"));
            }
            done(vacuum_table(&deps, project, branch, table).await?)
        }
        "high_connections" => {
            let result = terminate_idle_connections(&deps, project, branch, DEFAULT_MAX_IDLE_MINUTES).await?;
            done(json!({ "action": "terminate_idle_connections", "status": "executed", "result": result }))
        }
        "vacuum_freeze" => {
            deps.statement(project, branch, "VACUUM FREEZE").await?;
            deps.emit(
                EventType::SelfHealExecuted,
                json!({ "issue": issue, "action": "VACUUM FREEZE" }),
            );
            done(json!({ "action": "VACUUM FREEZE", "status": "executed" }))
        }
        other => Ok(ToolOutput::skipped(format!("Unknown issue type: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{args, event_types};
    use lakeops_events::{EventBus, EventEmitter};
    use lakeops_services::MockStack;
    use std::sync::Arc;

    fn deps(stack: &MockStack) -> (ToolDeps, Arc<EventBus>) {
        let emitter = EventEmitter::new("HealthAgent");
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
    async fn snapshot_reads_every_view() {
        let stack = MockStack::new();
        let (deps, _bus) = deps(&stack);
        let m = collect_metrics(&deps, "p", "production").await.unwrap();
        assert!((m.cache_hit_ratio - 0.99).abs() < 1e-9);
        assert_eq!(m.deadlocks, 1);
        assert_eq!(m.active_connections, 15);
        assert_eq!(m.idle_connections, 1);
        assert!((m.connection_utilization - 0.03).abs() < 1e-9);
        assert_eq!(m.worst_dead_tuple_table, "events");
        assert!((m.max_dead_tuple_ratio - 0.2).abs() < 1e-9);
        assert_eq!(m.waiting_locks, 0);
        assert_eq!(m.txid_age, 300_000_000);
        assert_eq!(m.wal_buffers_full, Some(50));
        assert!(m.io_hit_ratio.unwrap() > 0.98);
    }

    #[tokio::test]
    async fn health_tool_persists_numeric_metrics() {
        let stack = MockStack::new();
        let (deps, _bus) = deps(&stack);
        let out = completed(monitor_system_health(deps, args("p", "production")).await.unwrap());
        assert_eq!(out["metrics"]["worst_dead_tuple_table"], "events");

        let written = stack.writer.records("lakebase_metrics");
        assert_eq!(written.len(), 16);
        assert!(written.iter().all(|r| r["branch_id"] == "production"));
        assert!(written.iter().any(|r| r["metric_name"] == "txid_age"));
    }

    #[test]
    fn partial_metrics_decode_with_defaults() {
        let m: HealthMetrics = serde_json::from_value(json!({"connection_utilization": 0.5})).unwrap();
        assert_eq!(m.cache_hit_ratio, 1.0);
        assert_eq!(m.connection_utilization, 0.5);
        assert_eq!(m.numeric().len(), 10);
    }

    #[tokio::test]
    async fn healthy_snapshot_raises_only_the_dead_tuple_warning() {
        let stack = MockStack::new();
        let (deps, bus) = deps(&stack);
        let metrics = collect_metrics(&deps, "p", "b").await.unwrap();
        let out = evaluate_thresholds(&deps, &metrics, "p", "b").await.unwrap();
        assert_eq!(out["alerts_triggered"], 1);
        assert_eq!(out["alerts"][0]["severity"], "warning");
        assert_eq!(out["sops_auto_executed"], 0);
        assert!(bus.log().is_empty());
    }

    #[tokio::test]
    async fn critical_breaches_remediate_and_emit() {
        let stack = MockStack::new();
        let (deps, bus) = deps(&stack);
        let metrics = HealthMetrics {
            cache_hit_ratio: 0.90,
            connection_utilization: 0.9,
            max_dead_tuple_ratio: 0.4,
            worst_dead_tuple_table: "events".into(),
            txid_age: 1_500_000_000,
            ..Default::default()
        };
        let out = evaluate_thresholds(&deps, &metrics, "p", "b").await.unwrap();
        assert_eq!(out["alerts_triggered"], 4);
        assert_eq!(out["sops_auto_executed"], 2);

        let statements = stack.db.statements();
        assert!(statements.contains(&"SELECT pg_terminate_backend(102)".to_string()));
        assert!(statements.contains(&"VACUUM ANALYZE events".to_string()));

        let types = event_types(&bus);
        assert_eq!(types.iter().filter(|t| **t == EventType::ThresholdBreached).count(), 4);
        assert_eq!(types.iter().filter(|t| **t == EventType::SelfHealExecuted).count(), 2);

        let alerts = stack.alerts.history();
        assert!(alerts.iter().all(|a| a.severity == AlertSeverity::Critical));
        assert_eq!(alerts[0].source_agent, "HealthAgent");
    }

    #[tokio::test]
    async fn threshold_tool_reads_metrics_argument() {
        let stack = MockStack::new();
        let (deps, _bus) = deps(&stack);
        let tool_args = args("p", "b").with("metrics", json!({"cache_hit_ratio": 0.97}));
        let out = completed(evaluate_alert_thresholds(deps, tool_args).await.unwrap());
        assert_eq!(out["alerts_triggered"], 1);
        assert_eq!(out["alerts"][0]["metric_name"], "cache_hit_ratio");
    }

    #[tokio::test]
    async fn low_risk_sops() {
        let stack = MockStack::new();
        let (deps, bus) = deps(&stack);

        let vacuum = args("p", "b")
            .with("issue_type", "high_dead_tuples")
            .with("context", json!({"table": "orders"}));
        let out = completed(execute_low_risk_sop(deps.clone(), vacuum).await.unwrap());
        assert_eq!(out["action"], "VACUUM ANALYZE orders");

        let freeze = args("p", "b").with("issue_type", "vacuum_freeze");
        completed(execute_low_risk_sop(deps.clone(), freeze).await.unwrap());
        assert_eq!(stack.db.statements(), vec!["VACUUM ANALYZE orders", "VACUUM FREEZE"]);
        assert_eq!(event_types(&bus).len(), 2);

        let unknown = args("p", "b").with("issue_type", "disk_full");
        let out = execute_low_risk_sop(deps, unknown).await.unwrap();
        assert_eq!(out, ToolOutput::skipped("Unknown issue type: disk_full"));
    }
}
