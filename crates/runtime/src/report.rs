use std::collections::BTreeMap;

use serde::Serialize;

use lakeops_core::{TaskResult, TaskStatus};
use lakeops_exec::ResultsSummary;

/// Timing of one orchestrator phase.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseReport {
    pub label: String,
    pub agents: Vec<String>,
    pub duration_seconds: f64,
}

/// Everything one [`Framework::run_full_cycle`](crate::Framework::run_full_cycle) produced.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    /// Results of this cycle only, keyed by agent name.
    pub results: BTreeMap<String, Vec<TaskResult>>,
    pub phases: Vec<PhaseReport>,
    pub duration_seconds: f64,
    /// Events dispatched while the cycle ran.
    pub events: u64,
    /// Lifetime summaries, so they include earlier cycles.
    pub agent_summaries: BTreeMap<String, ResultsSummary>,
}

impl CycleReport {
    pub fn total_tasks(&self) -> usize {
        self.results.values().map(Vec::len).sum()
    }

    pub fn failed_tasks(&self) -> impl Iterator<Item = &TaskResult> {
        self.results
            .values()
            .flatten()
            .filter(|r| r.status == TaskStatus::Failed)
    }
}
