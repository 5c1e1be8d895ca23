//! Database-to-lakehouse sync validation: row-count drift, freshness lag
//! and key checksums between each table and its lakehouse copy.

use anyhow::Result;
use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::warn;

use lakeops_core::{EventType, Payload};
use lakeops_services::{Alert, AlertSeverity, queries, row_i64, row_str};
use lakeops_tools::{ToolArgs, ToolOutput, ToolRegistry};

use super::{ToolDeps, done, now_iso, short_id, tool};

const MAX_COUNT_DRIFT: i64 = 1_000;
const MAX_LAG_SECONDS: i64 = 3_600;

/// A database table and the lakehouse table it is synced to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TablePair {
    pub source: String,
    pub target: String,
    #[serde(default = "default_ts_col")]
    pub ts_col: String,
}

fn default_ts_col() -> String {
    "updated_at".to_string()
}

impl TablePair {
    pub fn new(source: &str, target: &str, ts_col: &str) -> Self {
        Self {
            source: source.to_string(),
            target: target.to_string(),
            ts_col: ts_col.to_string(),
        }
    }
}

pub fn default_pairs() -> Vec<TablePair> {
    vec![
        TablePair::new("orders", "ops_catalog.lakebase_ops.orders_delta", "updated_at"),
        TablePair::new("events", "ops_catalog.lakebase_ops.events_delta", "created_at"),
    ]
}

pub fn register(registry: &mut ToolRegistry, deps: &ToolDeps) {
    registry.register(
        tool(
            deps,
            "validate_sync_completeness",
            "Compare row counts and timestamps",
            completeness_tool,
        )
        .schedule("*/15 * * * *"),
    );
    registry.register(
        tool(
            deps,
            "validate_sync_integrity",
            "Checksum verification on key columns",
            integrity_tool,
        )
        .schedule("*/15 * * * *"),
    );
    registry.register(
        tool(
            deps,
            "run_full_sync_validation",
            "Complete sync validation cycle",
            run_full_sync_validation,
        )
        .schedule("*/15 * * * *"),
    );
}

// ── Completeness ─────────────────────────────────────────────────────────────

fn parse_ts(raw: &str) -> Option<NaiveDateTime> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.naive_utc())
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S"))
        .ok()
}

/// Seconds the target trails the source; `None` when either side has no
/// parseable timestamp.
fn freshness_lag(source_max: &str, target_max: &str) -> Option<i64> {
    let (src, tgt) = (parse_ts(source_max)?, parse_ts(target_max)?);
    Some((src - tgt).num_seconds().max(0))
}

fn sync_status(drift: i64, lag: Option<i64>) -> &'static str {
    if lag.is_some_and(|l| l > MAX_LAG_SECONDS) {
        "stale"
    } else if drift > MAX_COUNT_DRIFT {
        "drift_detected"
    } else {
        "healthy"
    }
}

fn count_and_latest(rows: &[Payload]) -> (i64, String) {
    rows.first()
        .map(|row| (row_i64(row, "count"), row_str(row, "max_ts").to_string()))
        .unwrap_or_default()
}

pub(crate) async fn validate_completeness(
    deps: &ToolDeps,
    project: &str,
    branch: &str,
    pair: &TablePair,
) -> Result<Value> {
    let source = deps
        .query(project, branch, &queries::count_and_max(&pair.source, &pair.ts_col))
        .await?;
    let target = deps
        .services
        .warehouse
        .execute_query(&queries::count_and_max(&pair.target, &pair.ts_col))
        .await?;
    let (src_count, src_max) = count_and_latest(&source);
    let (tgt_count, tgt_max) = count_and_latest(&target);

    let drift = (src_count - tgt_count).abs();
    let lag = freshness_lag(&src_max, &tgt_max);
    let status = sync_status(drift, lag);

    let record = json!({
        "validation_id": short_id(),
        "project_id": project,
        "branch_id": branch,
        "source_table": pair.source,
        "target_table": pair.target,
        "source_count": src_count,
        "target_count": tgt_count,
        "count_drift": drift,
        "source_max_ts": src_max,
        "target_max_ts": tgt_max,
        "freshness_lag_seconds": lag,
        "status": status,
        "validated_at": now_iso(),
    });
    deps.record("sync_validation", vec![record.clone()]).await?;

    if status != "healthy" {
        warn!(source = %pair.source, target = %pair.target, drift, status, "sync out of step");
        let severity = if status == "stale" {
            AlertSeverity::Critical
        } else {
            AlertSeverity::Warning
        };
        deps.alert(
            Alert::new(
                severity,
                format!("Sync {status}: {} -> {}", pair.source, pair.target),
                format!(
                    "Count drift: {drift}, Freshness lag: {}",
                    lag.map_or_else(|| "unknown".to_string(), |l| format!("{l}s"))
                ),
            )
            .metric("sync_freshness", lag.unwrap_or(0) as f64)
            .scope(project, branch),
        )
        .await?;
        deps.emit(
            EventType::SyncDriftDetected,
            json!({ "source": pair.source, "target": pair.target, "drift": drift, "status": status }),
        );
    }
    Ok(record)
}

fn pair_from_args(args: &ToolArgs) -> Result<TablePair> {
    Ok(TablePair {
        source: args.str("source_table")?.to_string(),
        target: args.str("target_table")?.to_string(),
        ts_col: args.str_or("timestamp_column", "updated_at").to_string(),
    })
}

async fn completeness_tool(deps: ToolDeps, args: ToolArgs) -> Result<ToolOutput> {
    let project = args.str("project_id")?;
    let branch = args.str("branch_id")?;
    let pair = pair_from_args(&args)?;
    done(validate_completeness(&deps, project, branch, &pair).await?)
}

// ── Integrity ────────────────────────────────────────────────────────────────

fn checksum(rows: &[Payload]) -> Option<String> {
    rows.first()
        .and_then(|row| row.get("checksum"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

pub(crate) async fn validate_integrity(
    deps: &ToolDeps,
    project: &str,
    branch: &str,
    pair: &TablePair,
    key_columns: &[String],
) -> Result<Value> {
    let source = deps
        .query(project, branch, &queries::key_checksum(&pair.source, key_columns))
        .await?;
    let target = deps
        .services
        .warehouse
        .execute_query(&queries::key_checksum(&pair.target, key_columns))
        .await?;

    let (status, matched) = match (checksum(&source), checksum(&target)) {
        (Some(a), Some(b)) if a == b => ("integrity_verified", Some(true)),
        (Some(_), Some(_)) => ("checksum_mismatch", Some(false)),
        _ => ("checksum_unavailable", None),
    };
    Ok(json!({
        "source_table": pair.source,
        "target_table": pair.target,
        "key_columns": key_columns,
        "checksum_match": matched,
        "status": status,
    }))
}

fn key_columns(args: &ToolArgs) -> Vec<String> {
    match args.strings("key_columns") {
        cols if cols.is_empty() => vec!["id".to_string()],
        cols => cols,
    }
}

async fn integrity_tool(deps: ToolDeps, args: ToolArgs) -> Result<ToolOutput> {
    let project = args.str("project_id")?;
    let branch = args.str("branch_id")?;
    let pair = pair_from_args(&args)?;
    done(validate_integrity(&deps, project, branch, &pair, &key_columns(&args)).await?)
}

// ── Full pass ────────────────────────────────────────────────────────────────

async fn run_full_sync_validation(deps: ToolDeps, args: ToolArgs) -> Result<ToolOutput> {
    let project = args.str("project_id")?;
    let branch = args.str("branch_id")?;
    let pairs: Vec<TablePair> = if args.contains("table_pairs") {
        args.decode("table_pairs")?
    } else {
        default_pairs()
    };
    let keys = key_columns(&args);

    let mut validations = Vec::with_capacity(pairs.len());
    let mut healthy = 0;
    for pair in &pairs {
        let completeness = validate_completeness(&deps, project, branch, pair).await?;
        let integrity = validate_integrity(&deps, project, branch, pair, &keys).await?;
        if completeness["status"] == "healthy" {
            healthy += 1;
        }
        validations.push(json!({
            "source": pair.source,
            "target": pair.target,
            "completeness": completeness,
            "integrity": integrity,
        }));
    }
    done(json!({
        "total_pairs": validations.len(),
        "healthy": healthy,
        "issues": validations.len() - healthy,
        "validations": validations,
    }))
}
