//! Cross-agent reactions wired up by the binaries.

use serde_json::Value;
use tracing::info;

use lakeops_core::{Event, EventType};

use crate::Framework;

static MISSING: Value = Value::Null;

fn field<'a>(event: &'a Event, key: &str) -> &'a Value {
    event.data.get(key).unwrap_or(&MISSING)
}

/// Log the hand-offs between agents: provisioning into health monitoring,
/// threshold breaches into vacuum scheduling, vacuum runs into metric
/// refreshes and index findings into the review queue.
pub fn install_standard_subscriptions(framework: &Framework) {
    framework.subscribe(EventType::ProvisioningComplete, |event| {
        info!(
            project = %field(event, "project_id"),
            branches = %field(event, "branches"),
            "provisioning complete, health monitoring picks up the new branches"
        );
        Ok(())
    });
    framework.subscribe(EventType::ThresholdBreached, |event| {
        let metric = field(event, "metric").as_str().unwrap_or_default();
        if metric.contains("dead_tuple") {
            info!(branch = %field(event, "branch_id"), "dead tuple threshold breached, vacuum will be scheduled");
        }
        Ok(())
    });
    framework.subscribe(EventType::VacuumCompleted, |event| {
        info!(
            tables = field(event, "tables_vacuumed").as_i64().unwrap_or(0),
            "vacuum completed, health metrics will refresh"
        );
        Ok(())
    });
    framework.subscribe(EventType::IndexRecommendation, |event| {
        info!(
            issues = field(event, "total_issues").as_i64().unwrap_or(0),
            "index issues added to the review queue"
        );
        Ok(())
    });
}
