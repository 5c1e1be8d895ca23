//! Incident response: idle-timeout tuning, root-cause diagnosis of an
//! anomaly, and the remediation step that only acts on low-risk plans.

use anyhow::Result;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use lakeops_config::ThresholdsConfig;
use lakeops_core::{EventType, Payload};
use lakeops_services::{queries, row_f64, row_str};
use lakeops_tools::{ToolArgs, ToolOutput, ToolRegistry};

use super::connections::{DEFAULT_MAX_IDLE_MINUTES, terminate_idle_connections};
use super::{ToolDeps, done, tool};

const DEFAULT_TIMEOUT_MINUTES: f64 = 5.0;
/// Gaps at least this long are real idle periods, not bursts.
const MAX_TIMEOUT_MINUTES: f64 = 60.0;
const TIMEOUT_STEP_MINUTES: f64 = 5.0;

pub fn register(registry: &mut ToolRegistry, deps: &ToolDeps) {
    registry.register(
        tool(
            deps,
            "recommend_scale_to_zero_timeout",
            "Optimize idle timeout settings",
            recommend_scale_to_zero_timeout,
        )
        .schedule("0 4 * * 0"),
    );
    registry.register(tool(
        deps,
        "diagnose_root_cause",
        "Correlate metrics for root cause analysis",
        diagnose_root_cause,
    ));
    registry.register(tool(
        deps,
        "self_heal",
        "Execute approved auto-remediation",
        self_heal,
    ));
}

// ── Scale to zero ────────────────────────────────────────────────────────────

/// Timeout that keeps the compute warm across every burst gap, in whole
/// steps.  `None` when the current timeout already covers them.
fn timeout_for(gaps: &[f64], current: f64) -> Option<f64> {
    let longest = gaps
        .iter()
        .copied()
        .filter(|gap| *gap < MAX_TIMEOUT_MINUTES)
        .fold(0.0, f64::max);
    if longest <= current {
        return None;
    }
    let stepped = (longest / TIMEOUT_STEP_MINUTES).ceil() * TIMEOUT_STEP_MINUTES;
    Some(stepped.clamp(TIMEOUT_STEP_MINUTES, MAX_TIMEOUT_MINUTES))
}

async fn observed_gaps(deps: &ToolDeps, project: &str, branch: &str) -> Result<Vec<f64>> {
    let sessions = deps.query(project, branch, queries::CONNECTION_DETAILS).await?;
    Ok(sessions
        .iter()
        .filter(|s| !matches!(row_str(s, "state"), "active" | ""))
        .filter_map(|s| row_f64(s, "idle_seconds"))
        .map(|secs| secs / 60.0)
        .collect())
}

async fn recommend_scale_to_zero_timeout(deps: ToolDeps, args: ToolArgs) -> Result<ToolOutput> {
    let project = args.str("project_id")?;
    let branch = args.str("branch_id")?;
    let current = args.f64_or("current_timeout_minutes", DEFAULT_TIMEOUT_MINUTES);

    let gaps: Vec<f64> = match args.get("idle_gaps_minutes").and_then(Value::as_array) {
        Some(items) => items.iter().filter_map(Value::as_f64).collect(),
        None => observed_gaps(&deps, project, branch).await?,
    };
    if gaps.is_empty() {
        return Ok(ToolOutput::skipped("no idle gaps observed"));
    }

    let (recommended, reason) = match timeout_for(&gaps, current) {
        Some(minutes) => {
            let cold_starts = gaps
                .iter()
                .filter(|gap| **gap > current && **gap < MAX_TIMEOUT_MINUTES)
                .count();
            let reason = format!(
                "{cold_starts} of {} idle gaps end within {minutes:.0} minutes and currently cause a cold start",
                gaps.len()
            );
            (minutes, reason)
        }
        None => (current, "current timeout already covers the bursty gaps".to_string()),
    };

    done(json!({
        "project_id": project,
        "branch_id": branch,
        "current_timeout_minutes": current,
        "recommended_timeout_minutes": recommended,
        "gaps_observed": gaps.len(),
        "reason": reason,
    }))
}

// ── Diagnosis ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnosis {
    pub anomaly: String,
    pub value: f64,
    pub probable_causes: Vec<&'static str>,
    pub recommended_actions: Vec<&'static str>,
    pub auto_fixable: bool,
}

/// Map one anomalous metric to its usual causes.  Values inside the
/// critical band diagnose as nothing.
pub fn diagnose(t: &ThresholdsConfig, metric: &str, value: f64) -> Diagnosis {
    let (causes, actions, auto_fixable): (Vec<&'static str>, Vec<&'static str>, bool) = match metric {
        "cache_hit_ratio" if value < t.cache_hit_critical => (
            vec![
                "Working set exceeds available shared_buffers",
                "Full table scans on large tables without proper indexes",
                "Recent restart causing cold cache",
            ],
            vec![
                "Increase CU (compute units) to get more shared_buffers",
                "Add indexes for frequently scanned tables (see index recommendations)",
                "Use pg_prewarm to warm cache after restart",
            ],
            false,
        ),
        "dead_tuple_ratio" if value > t.dead_tuple_critical => (
            vec![
                "Autovacuum not keeping up with high-churn tables",
                "Long-running transactions preventing vacuum from reclaiming space",
            ],
            vec![
                "Execute manual VACUUM ANALYZE on affected tables",
                "Tune autovacuum parameters for high-churn tables",
                "Investigate and terminate long-running transactions",
            ],
            true,
        ),
        "connection_utilization" if value > t.conn_util_critical => (
            vec![
                "Application leaking connections or not using a pool",
                "Sessions left idle after their transaction finished",
            ],
            vec![
                "Terminate sessions idle longer than 30 minutes",
                "Put a connection pooler with an idle timeout in front of the branch",
            ],
            true,
        ),
        "txid_age" if value > t.txid_age_critical => (
            vec!["Anti-wraparound vacuum blocked or too slow on large tables"],
            vec![
                "Run VACUUM FREEZE on the oldest tables",
                "Find and end transactions holding back the xmin horizon",
            ],
            false,
        ),
        _ => (Vec::new(), Vec::new(), false),
    };
    Diagnosis {
        anomaly: metric.to_string(),
        value,
        probable_causes: causes,
        recommended_actions: actions,
        auto_fixable,
    }
}

async fn diagnose_root_cause(deps: ToolDeps, args: ToolArgs) -> Result<ToolOutput> {
    let report = args.payload("anomaly_report")?;
    let metric = report.get("metric").and_then(Value::as_str).unwrap_or("unknown");
    let value = report.get("value").and_then(Value::as_f64).unwrap_or(0.0);
    let diagnosis = diagnose(&deps.thresholds, metric, value);
    done(serde_json::to_value(diagnosis)?)
}

// ── Remediation ──────────────────────────────────────────────────────────────

fn plan_str<'a>(plan: &'a Payload, key: &str) -> &'a str {
    plan.get(key).and_then(Value::as_str).unwrap_or("")
}

async fn self_heal(deps: ToolDeps, args: ToolArgs) -> Result<ToolOutput> {
    let issue = args.str("issue_id")?;
    let plan = args.payload("remediation_plan")?;
    let action = plan_str(&plan, "action");
    let risk = match plan_str(&plan, "risk_level") {
        "" => "high",
        risk => risk,
    };

    if risk != "low" {
        warn!(issue, action, risk, "remediation escalated");
        return done(json!({
            "issue_id": issue,
            "status": "escalated",
            "reason": format!("Risk level '{risk}' requires human approval"),
            "recommended_action": action,
        }));
    }

    let project = plan_str(&plan, "project_id");
    let branch = plan_str(&plan, "branch_id");
    let lowered = action.to_lowercase();
    let status = if lowered.contains("vacuum") {
        let table = plan_str(&plan, "table");
        if table.is_empty() {
            return Ok(ToolOutput::skipped("vacuum remediation needs a table"));
        }
        deps.statement(project, branch, &format!("VACUUM ANALYZE {table}"))
            .await?;
        "remediated"
    } else if lowered.contains("terminate") {
        terminate_idle_connections(&deps, project, branch, DEFAULT_MAX_IDLE_MINUTES).await?;
        "remediated"
    } else {
        "unknown_action"
    };

    info!(issue, action, status, "self-heal");
    deps.emit(
        EventType::SelfHealExecuted,
        json!({ "issue_id": issue, "action": action, "status": status }),
    );
    done(json!({ "issue_id": issue, "action": action, "status": status }))
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

    fn heal(issue: &str, plan: Value) -> ToolArgs {
        ToolArgs::new().with("issue_id", issue).with("remediation_plan", plan)
    }

    #[tokio::test]
    async fn risky_plans_are_escalated_untouched() {
        let stack = MockStack::new();
        let (deps, bus) = deps(&stack);
        let plan = json!({"action": "VACUUM FULL orders", "risk_level": "medium", "table": "orders"});
        let out = completed(self_heal(deps.clone(), heal("inc-1", plan)).await.unwrap());
        assert_eq!(out["status"], "escalated");
        assert_eq!(out["recommended_action"], "VACUUM FULL orders");

        // no risk level means high
        let out = completed(self_heal(deps, heal("inc-2", json!({"action": "vacuum"}))).await.unwrap());
        assert!(out["reason"].as_str().unwrap().contains("'high'"));

        assert!(stack.db.statements().is_empty());
        assert!(bus.log().is_empty());
    }

    #[tokio::test]
    async fn low_risk_plans_remediate_and_emit() {
        let stack = MockStack::new();
        let (deps, bus) = deps(&stack);
        let vacuum = json!({
            "action": "Vacuum high-churn table", "risk_level": "low",
            "project_id": "p", "branch_id": "b", "table": "events"
        });
        let out = completed(self_heal(deps.clone(), heal("inc-3", vacuum)).await.unwrap());
        assert_eq!(out["status"], "remediated");

        let terminate = json!({
            "action": "terminate idle sessions", "risk_level": "low",
            "project_id": "p", "branch_id": "b"
        });
        let out = completed(self_heal(deps, heal("inc-4", terminate)).await.unwrap());
        assert_eq!(out["status"], "remediated");

        assert_eq!(
            stack.db.statements(),
            vec!["VACUUM ANALYZE events", "SELECT pg_terminate_backend(102)"]
        );
        let types = event_types(&bus);
        assert_eq!(types.iter().filter(|t| **t == EventType::SelfHealExecuted).count(), 3);
        assert_eq!(bus.log().last().unwrap().data["issue_id"], "inc-4");
    }

    #[tokio::test]
    async fn unknown_low_risk_action_is_reported() {
        let stack = MockStack::new();
        let (deps, bus) = deps(&stack);
        let plan = json!({"action": "reindex", "risk_level": "low"});
        let out = completed(self_heal(deps.clone(), heal("inc-5", plan)).await.unwrap());
        assert_eq!(out["status"], "unknown_action");
        assert_eq!(bus.log().len(), 1);

        let plan = json!({"action": "vacuum", "risk_level": "low"});
        let out = self_heal(deps, heal("inc-6", plan)).await.unwrap();
        assert!(matches!(out, ToolOutput::Skipped { .. }));
    }

    #[test]
    fn cache_misses_point_at_shared_buffers() {
        let t = ThresholdsConfig::default();
        let d = diagnose(&t, "cache_hit_ratio", 0.90);
        assert_eq!(d.probable_causes.len(), 3);
        assert!(d.recommended_actions[0].contains("shared_buffers"));
        assert!(!d.auto_fixable);

        let healthy = diagnose(&t, "cache_hit_ratio", 0.97);
        assert!(healthy.probable_causes.is_empty());
    }

    #[test]
    fn dead_tuples_are_auto_fixable() {
        let t = ThresholdsConfig::default();
        let d = diagnose(&t, "dead_tuple_ratio", 0.40);
        assert!(d.auto_fixable);
        assert_eq!(d.recommended_actions[0], "Execute manual VACUUM ANALYZE on affected tables");
        assert!(!diagnose(&t, "dead_tuple_ratio", 0.20).auto_fixable);
        assert!(diagnose(&t, "replication_lag", 999.0).probable_causes.is_empty());
    }

    #[tokio::test]
    async fn diagnosis_tool_reads_the_anomaly_report() {
        let stack = MockStack::new();
        let (deps, _bus) = deps(&stack);
        let tool_args = ToolArgs::new().with("anomaly_report", json!({"metric": "dead_tuple_ratio", "value": 0.3}));
        let out = completed(diagnose_root_cause(deps, tool_args).await.unwrap());
        assert_eq!(out["anomaly"], "dead_tuple_ratio");
        assert_eq!(out["auto_fixable"], true);
    }

    #[test]
    fn timeout_rounds_up_to_cover_bursts() {
        assert_eq!(timeout_for(&[8.0, 12.0, 9.0], 5.0), Some(15.0));
        assert_eq!(timeout_for(&[2.0, 4.0], 5.0), None);
        // overnight idleness is what scale to zero is for
        assert_eq!(timeout_for(&[90.0, 3.0], 5.0), None);
    }

    #[tokio::test]
    async fn scale_to_zero_uses_observed_sessions_by_default() {
        let stack = MockStack::new();
        let (deps, _bus) = deps(&stack);
        let out = completed(
            recommend_scale_to_zero_timeout(deps.clone(), args("p", "b"))
                .await
                .unwrap(),
        );
        // an hour-long idle session and a two-minute one
        assert_eq!(out["gaps_observed"], 2);
        assert_eq!(out["recommended_timeout_minutes"], 5.0);

        let bursty = args("p", "b").with("idle_gaps_minutes", json!([8, 12, 9]));
        let out = completed(recommend_scale_to_zero_timeout(deps, bursty).await.unwrap());
        assert_eq!(out["recommended_timeout_minutes"], 15.0);
        assert!(out["reason"].as_str().unwrap().starts_with("3 of 3"));
    }
}
