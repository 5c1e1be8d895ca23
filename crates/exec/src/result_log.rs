use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use lakeops_core::{TaskResult, TaskStatus};

/// Bounded, append-only record of an agent's task results.
///
/// When full, the oldest result is evicted.  A capacity of `0` disables
/// eviction.
#[derive(Debug)]
pub struct ResultLog {
    entries: Mutex<VecDeque<TaskResult>>,
    capacity: usize,
}

impl ResultLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<TaskResult>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, result: TaskResult) {
        let mut entries = self.lock();
        if self.capacity > 0 && entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(result);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Copy of the retained results, oldest first.
    pub fn snapshot(&self) -> Vec<TaskResult> {
        self.lock().iter().cloned().collect()
    }

    pub fn last(&self) -> Option<TaskResult> {
        self.lock().back().cloned()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn summary(&self, agent: &str) -> ResultsSummary {
        let entries = self.lock();
        let mut summary = ResultsSummary {
            agent: agent.to_string(),
            total_tasks: entries.len(),
            ..ResultsSummary::default()
        };
        for result in entries.iter() {
            match result.status {
                TaskStatus::Success => summary.successful += 1,
                TaskStatus::Failed => summary.failed += 1,
                TaskStatus::Skipped => summary.skipped += 1,
                TaskStatus::Pending | TaskStatus::Running => {}
            }
        }
        if summary.total_tasks > 0 {
            summary.success_rate = Some(summary.successful as f64 / summary.total_tasks as f64);
        }
        summary
    }
}

impl Default for ResultLog {
    fn default() -> Self {
        Self::new(10_000)
    }
}

/// Counts by status over an agent's retained results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultsSummary {
    pub agent: String,
    pub total_tasks: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Fraction in `0.0..=1.0`; `None` when no tasks ran.
    pub success_rate: Option<f64>,
}

impl ResultsSummary {
    /// `"66.7%"`, or `"N/A"` for an empty log.
    pub fn success_rate_label(&self) -> String {
        match self.success_rate {
            Some(rate) => format!("{:.1}%", rate * 100.0),
            None => "N/A".to_string(),
        }
    }
}
