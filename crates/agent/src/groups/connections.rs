//! Connection pool monitoring and idle-session cleanup.

use std::collections::BTreeMap;

use anyhow::Result;
use serde_json::{Value, json};
use tracing::info;

use lakeops_core::EventType;
use lakeops_services::{queries, row_f64, row_str};
use lakeops_tools::{ToolArgs, ToolOutput, ToolRegistry};

use super::{ToolDeps, done, tool};

pub(crate) const DEFAULT_MAX_IDLE_MINUTES: i64 = 30;

pub fn register(registry: &mut ToolRegistry, deps: &ToolDeps) {
    registry.register(
        tool(
            deps,
            "monitor_connections",
            "Track active/idle/idle-in-tx connections",
            monitor_tool,
        )
        .schedule("* * * * *"),
    );
    registry.register(tool(
        deps,
        "terminate_idle_connections",
        "Kill sessions idle > 30 min",
        terminate_tool,
    ));
}

pub(crate) async fn monitor_connections(
    deps: &ToolDeps,
    project: &str,
    branch: &str,
    max_idle_minutes: i64,
) -> Result<Value> {
    let sessions = deps.query(project, branch, queries::CONNECTION_DETAILS).await?;
    let max_idle_seconds = (max_idle_minutes * 60) as f64;

    let mut states: BTreeMap<String, u64> = ["active", "idle", "idle in transaction", "other"]
        .into_iter()
        .map(|s| (s.to_string(), 0))
        .collect();
    let mut long_idle = Vec::new();
    for session in &sessions {
        let state = match row_str(session, "state") {
            "" => "other",
            s => s,
        };
        *states.entry(state.to_string()).or_default() += 1;

        let idle = row_f64(session, "idle_seconds").unwrap_or(0.0);
        if state == "idle" && idle > max_idle_seconds {
            long_idle.push(json!({
                "pid": session.get("pid"),
                "idle_seconds": idle,
                "backend_start": session.get("backend_start"),
            }));
        }
    }

    Ok(json!({
        "total_connections": states.values().sum::<u64>(),
        "states": states,
        "long_idle_sessions": long_idle.len(),
        "long_idle_details": long_idle,
    }))
}

/// Terminate every session idle longer than `max_idle_minutes`.
pub(crate) async fn terminate_idle_connections(
    deps: &ToolDeps,
    project: &str,
    branch: &str,
    max_idle_minutes: i64,
) -> Result<Value> {
    let info = monitor_connections(deps, project, branch, max_idle_minutes).await?;
    let pids: Vec<i64> = info["long_idle_details"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|s| s["pid"].as_i64())
        .collect();

    for pid in &pids {
        deps.statement(project, branch, &format!("SELECT pg_terminate_backend({pid})"))
            .await?;
    }
    if !pids.is_empty() {
        info!(project, branch, sessions = pids.len(), "terminated idle sessions");
        deps.emit(
            EventType::SelfHealExecuted,
            json!({ "action": "terminate_idle_connections", "pids_terminated": pids }),
        );
    }
    Ok(json!({ "sessions_terminated": pids.len(), "pids": pids }))
}

async fn monitor_tool(deps: ToolDeps, args: ToolArgs) -> Result<ToolOutput> {
    let project = args.str("project_id")?;
    let branch = args.str("branch_id")?;
    let max_idle = args.i64_or("max_idle_minutes", DEFAULT_MAX_IDLE_MINUTES);
    done(monitor_connections(&deps, project, branch, max_idle).await?)
}

async fn terminate_tool(deps: ToolDeps, args: ToolArgs) -> Result<ToolOutput> {
    let project = args.str("project_id")?;
    let branch = args.str("branch_id")?;
    let max_idle = args.i64_or("max_idle_minutes", DEFAULT_MAX_IDLE_MINUTES);
    done(terminate_idle_connections(&deps, project, branch, max_idle).await?)
}
