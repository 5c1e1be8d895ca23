//! Cost attribution from the platform billing tables.

use anyhow::Result;
use serde_json::{Map, Value, json};

use lakeops_services::{queries, row_f64, row_str};
use lakeops_tools::{ToolArgs, ToolOutput, ToolRegistry};

use super::{ToolDeps, done, tool};

/// CI share of DBUs above which TTL enforcement is called out.
const CI_SHARE_LIMIT: f64 = 5.0;
const NON_PRODUCTION_SHARE_LIMIT: f64 = 50.0;

pub fn register(registry: &mut ToolRegistry, deps: &ToolDeps) {
    registry.register(
        tool(
            deps,
            "track_cost_attribution",
            "Query system.billing.usage for Lakebase costs",
            track_cost_attribution,
        )
        .schedule("0 6 * * *"),
    );
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

fn recommendations(shares: &[(String, f64)]) -> Vec<String> {
    let mut out = Vec::new();
    let ci: f64 = shares
        .iter()
        .filter(|(branch, _)| branch.starts_with("ci"))
        .map(|(_, pct)| pct)
        .sum();
    if ci > CI_SHARE_LIMIT {
        out.push(format!(
            "CI branches consumed {ci:.0}% of DBUs, ensure TTL policies are enforced"
        ));
    }
    let non_production: f64 = shares
        .iter()
        .filter(|(branch, _)| branch != "production")
        .map(|(_, pct)| pct)
        .sum();
    if non_production > NON_PRODUCTION_SHARE_LIMIT {
        out.push(format!(
            "Non-production branches consumed {non_production:.0}% of DBUs, verify scale-to-zero is working"
        ));
    }
    out
}

async fn track_cost_attribution(deps: ToolDeps, args: ToolArgs) -> Result<ToolOutput> {
    let project = args.str("project_id")?;
    let rows = deps.services.warehouse.execute_query(queries::BILLING_BY_BRANCH).await?;
    if rows.is_empty() {
        return Ok(ToolOutput::skipped("no billing data"));
    }

    let usage: Vec<(String, f64)> = rows
        .iter()
        .map(|row| (row_str(row, "branch").to_string(), row_f64(row, "dbus").unwrap_or(0.0)))
        .collect();
    let total: f64 = usage.iter().map(|(_, dbus)| dbus).sum();
    let shares: Vec<(String, f64)> = usage
        .iter()
        .map(|(branch, dbus)| {
            let pct = if total > 0.0 { dbus / total * 100.0 } else { 0.0 };
            (branch.clone(), pct)
        })
        .collect();

    let breakdown: Map<String, Value> = usage
        .iter()
        .zip(&shares)
        .map(|((branch, dbus), (_, pct))| (branch.clone(), json!({ "dbus": dbus, "pct": round1(*pct) })))
        .collect();

    done(json!({
        "project_id": project,
        "period": "last_7_days",
        "total_dbus": total,
        "cost_breakdown": breakdown,
        "recommendations": recommendations(&shares),
    }))
}
