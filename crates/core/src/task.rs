use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Payload;

/// Lifecycle of a single tool invocation.
///
/// `Pending` and `Running` are transient; a recorded [`TaskResult`] always
/// carries one of the terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Skipped)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable record of one tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub agent_name: String,
    pub tool_name: String,
    pub status: TaskStatus,
    pub message: String,
    #[serde(default)]
    pub data: Payload,
    pub timestamp: DateTime<Utc>,
    pub duration_seconds: f64,
}

impl TaskResult {
    /// A result with a fresh task id, the current time, no data and zero duration.
    pub fn new(
        agent_name: impl Into<String>,
        tool_name: impl Into<String>,
        status: TaskStatus,
        message: impl Into<String>,
    ) -> Self {
        Self {
            task_id: next_task_id(),
            agent_name: agent_name.into(),
            tool_name: tool_name.into(),
            status,
            message: message.into(),
            data: Payload::new(),
            timestamp: Utc::now(),
            duration_seconds: 0.0,
        }
    }

    pub fn with_data(mut self, data: Payload) -> Self {
        self.data = data;
        self
    }

    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.duration_seconds = seconds;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Success
    }
}

impl fmt::Display for TaskResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}.{}: {}",
            self.status, self.agent_name, self.tool_name, self.message
        )
    }
}

/// Generate a task id that is unique for the lifetime of the process.
pub fn next_task_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&TaskStatus::Skipped).unwrap();
        assert_eq!(json, "\"skipped\"");
        let back: TaskStatus = serde_json::from_str("\"failed\"").unwrap();
        assert_eq!(back, TaskStatus::Failed);
    }

    #[test]
    fn only_outcomes_are_terminal() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Success.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Skipped.is_terminal());
    }

    #[test]
    fn display_matches_log_line_format() {
        let result = TaskResult::new("HealthAgent", "monitor_connections", TaskStatus::Success, "Completed in 0.01s");
        assert_eq!(
            result.to_string(),
            "[success] HealthAgent.monitor_connections: Completed in 0.01s"
        );
    }

    #[test]
    fn task_ids_are_unique() {
        let ids: HashSet<String> = (0..1_000).map(|_| next_task_id()).collect();
        assert_eq!(ids.len(), 1_000);
    }

    #[test]
    fn builder_sets_data_and_duration() {
        let mut data = Payload::new();
        data.insert("rows".into(), serde_json::json!(3));
        let result = TaskResult::new("a", "t", TaskStatus::Success, "ok")
            .with_data(data.clone())
            .with_duration(1.5);
        assert_eq!(result.data, data);
        assert!((result.duration_seconds - 1.5).abs() < f64::EPSILON);
        assert!(result.is_success());
    }
}
