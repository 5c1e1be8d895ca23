//! Statement statistics: snapshots of `pg_stat_statements` persisted for
//! long-term trending and cross-branch comparison.

use anyhow::Result;
use serde_json::{Value, json};

use lakeops_core::Payload;
use lakeops_services::{queries, row_i64, row_str};
use lakeops_tools::{ToolArgs, ToolOutput, ToolRegistry};

use super::{ToolDeps, done, now_iso, short_id, tool};

/// Integer and float columns copied from each statement row.
const COUNTER_COLUMNS: [&str; 11] = [
    "calls",
    "rows",
    "shared_blks_hit",
    "shared_blks_read",
    "temp_blks_written",
    "temp_blks_read",
    "wal_records",
    "wal_fpi",
    "wal_bytes",
    "jit_functions",
    "queryid",
];
const TIMING_COLUMNS: [&str; 6] = [
    "total_exec_time",
    "mean_exec_time",
    "jit_generation_time",
    "jit_inlining_time",
    "jit_optimization_time",
    "jit_emission_time",
];

const MAX_QUERY_CHARS: usize = 4_000;

pub fn register(registry: &mut ToolRegistry, deps: &ToolDeps) {
    registry.register(
        tool(
            deps,
            "persist_pg_stat_statements",
            "Capture pg_stat_statements to Delta (every 5 min)",
            persist_pg_stat_statements,
        )
        .schedule("*/5 * * * *"),
    );
    registry.register(tool(
        deps,
        "collect_pg_stat_statements_info",
        "Report pg_stat_statements deallocation and reset stats",
        collect_pg_stat_statements_info,
    ));
}

fn snapshot_record(row: &Payload, snapshot_id: &str, project: &str, branch: &str, taken_at: &str) -> Value {
    let mut record = json!({
        "snapshot_id": snapshot_id,
        "project_id": project,
        "branch_id": branch,
        "query": row_str(row, "query").chars().take(MAX_QUERY_CHARS).collect::<String>(),
        "snapshot_timestamp": taken_at,
    });
    for column in COUNTER_COLUMNS {
        if row.contains_key(column) {
            record[column] = json!(row_i64(row, column));
        }
    }
    for column in TIMING_COLUMNS {
        if let Some(v) = row.get(column) {
            record[column] = json!(v.as_f64().unwrap_or(0.0));
        }
    }
    record
}

async fn persist_pg_stat_statements(deps: ToolDeps, args: ToolArgs) -> Result<ToolOutput> {
    let project = args.str("project_id")?;
    let branch = args.str("branch_id")?;
    let rows = deps.query(project, branch, queries::PG_STAT_STATEMENTS_FULL).await?;
    if rows.is_empty() {
        return Ok(ToolOutput::skipped("no data"));
    }

    let snapshot_id = short_id();
    let taken_at = now_iso();
    let records: Vec<Value> = rows
        .iter()
        .map(|row| snapshot_record(row, &snapshot_id, project, branch, &taken_at))
        .collect();
    let count = records.len();
    let receipt = deps.record("pg_stat_history", records).await?;

    done(json!({
        "status": "success",
        "snapshot_id": snapshot_id,
        "records": count,
        "top_query_by_time": row_str(&rows[0], "query").chars().take(80).collect::<String>(),
        "write_result": receipt,
    }))
}

async fn collect_pg_stat_statements_info(deps: ToolDeps, args: ToolArgs) -> Result<ToolOutput> {
    let project = args.str("project_id")?;
    let branch = args.str("branch_id")?;
    let rows = deps.query(project, branch, queries::PG_STAT_STATEMENTS_INFO).await?;
    let Some(info) = rows.first() else {
        return done(json!({ "status": "no_data" }));
    };
    done(json!({
        "dealloc": row_i64(info, "dealloc"),
        "stats_reset": info.get("stats_reset"),
        "note": "High dealloc count means pg_stat_statements.max is too low",
    }))
}
