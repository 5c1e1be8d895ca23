//! External collaborators the agents' tools call through: the branch
//! database, the managed-platform API, the lakehouse writer and reader, and
//! alert delivery.  Each is a narrow async trait so tools stay independent of
//! the transport, and [`mock`] provides in-memory stand-ins for all of them.

pub mod alerts;
pub mod catalog;
pub mod mock;
pub mod queries;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use lakeops_core::Payload;

pub use alerts::{Alert, AlertChannel, AlertSender, AlertSeverity, AlertSummary, RoutingAlertSender};
pub use catalog::{WriteReceipt, archive_table, resolve_table};
pub use mock::MockStack;

// ── Database ─────────────────────────────────────────────────────────────────

/// SQL access to one branch of one project.
#[async_trait]
pub trait DatabaseClient: Send + Sync {
    async fn execute_query(&self, project_id: &str, branch_id: &str, sql: &str) -> Result<Vec<Payload>>;

    /// Returns the number of affected rows.
    async fn execute_statement(&self, project_id: &str, branch_id: &str, sql: &str) -> Result<u64>;
}

// ── Platform ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchRequest {
    pub name: String,
    pub source_branch: String,
    pub ttl_seconds: Option<u64>,
    pub is_protected: bool,
}

impl BranchRequest {
    pub fn new(name: impl Into<String>, source_branch: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source_branch: source_branch.into(),
            ttl_seconds: None,
            is_protected: false,
        }
    }

    pub fn ttl(mut self, ttl_seconds: Option<u64>) -> Self {
        self.ttl_seconds = ttl_seconds;
        self
    }

    pub fn protected(mut self) -> Self {
        self.is_protected = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchInfo {
    /// Fully qualified: `projects/<project>/branches/<branch>`.
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub source_branch: Option<String>,
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
    #[serde(default)]
    pub is_protected: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl BranchInfo {
    /// The last path segment of `name`.
    pub fn short_name(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }

    /// Seconds since creation, when the platform reports a creation time.
    pub fn age_seconds(&self, now: DateTime<Utc>) -> Option<i64> {
        self.created_at.map(|created| (now - created).num_seconds())
    }
}

/// Project and branch lifecycle on the managed database platform.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    async fn create_project(&self, project_id: &str) -> Result<Payload>;
    async fn create_branch(&self, project_id: &str, request: &BranchRequest) -> Result<BranchInfo>;
    async fn list_branches(&self, project_id: &str) -> Result<Vec<BranchInfo>>;
    async fn delete_branch(&self, project_id: &str, branch_id: &str) -> Result<bool>;
    async fn protect_branch(&self, project_id: &str, branch_id: &str) -> Result<bool>;
    /// Re-create `branch_id` from its parent's current state.
    async fn reset_branch(&self, project_id: &str, branch_id: &str) -> Result<bool>;
}

// ── Lakehouse ────────────────────────────────────────────────────────────────

/// Appends operational records to the lakehouse tables under the ops catalog.
#[async_trait]
pub trait MetricsWriter: Send + Sync {
    /// `table_key` is resolved with [`resolve_table`].
    async fn write_metrics(&self, table_key: &str, records: Vec<Payload>) -> Result<WriteReceipt>;

    /// Writes to the archive schema; see [`archive_table`].
    async fn write_archive(&self, table: &str, records: Vec<Payload>) -> Result<WriteReceipt>;

    /// Create the ops catalog, its schemas and every operational table.
    async fn create_ops_catalog(&self) -> Result<Payload>;
}

/// Read-only SQL against the lakehouse (synced copies, billing system tables).
#[async_trait]
pub trait WarehouseClient: Send + Sync {
    async fn execute_query(&self, sql: &str) -> Result<Vec<Payload>>;
}

// ── Bundle ───────────────────────────────────────────────────────────────────

/// The collaborator set handed to every tool group.
#[derive(Clone)]
pub struct Services {
    pub db: Arc<dyn DatabaseClient>,
    pub platform: Arc<dyn PlatformClient>,
    pub writer: Arc<dyn MetricsWriter>,
    pub warehouse: Arc<dyn WarehouseClient>,
    pub alerts: Arc<dyn AlertSender>,
}

impl Services {
    /// In-memory collaborators with canned data.
    pub fn mock() -> Self {
        MockStack::new().services()
    }
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services").finish_non_exhaustive()
    }
}

// ── Row helpers ──────────────────────────────────────────────────────────────

/// Integer column; accepts JSON numbers and numeric strings, `0` otherwise.
pub fn row_i64(row: &Payload, key: &str) -> i64 {
    match row.get(key) {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)).unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse::<f64>().map(|f| f as i64).unwrap_or(0),
        _ => 0,
    }
}

/// Float column; accepts JSON numbers and numeric strings.
pub fn row_f64(row: &Payload, key: &str) -> Option<f64> {
    match row.get(key) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn row_str<'a>(row: &'a Payload, key: &str) -> &'a str {
    row.get(key).and_then(Value::as_str).unwrap_or("")
}

/// Keep the object elements of a JSON array.
pub fn rows_from(value: Value) -> Vec<Payload> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect(),
        Value::Object(map) => vec![map],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn row_accessors_coerce_numeric_strings() {
        let row = rows_from(json!({"a": "12", "b": 3.5, "c": "x", "d": 7}))
            .pop()
            .unwrap();
        assert_eq!(row_i64(&row, "a"), 12);
        assert_eq!(row_i64(&row, "b"), 3);
        assert_eq!(row_i64(&row, "c"), 0);
        assert_eq!(row_i64(&row, "missing"), 0);
        assert_eq!(row_f64(&row, "d"), Some(7.0));
        assert_eq!(row_f64(&row, "c"), None);
        assert_eq!(row_str(&row, "c"), "x");
        assert_eq!(row_str(&row, "a"), "12");
        assert_eq!(row_str(&row, "d"), "");
    }

    #[test]
    fn rows_from_drops_non_objects() {
        let rows = rows_from(json!([{"a": 1}, 2, "x", {"b": 2}]));
        assert_eq!(rows.len(), 2);
        assert!(rows_from(json!("scalar")).is_empty());
    }

    #[test]
    fn branch_short_name_strips_project_prefix() {
        let info = BranchInfo {
            name: "projects/p/branches/ci-pr-7".into(),
            status: "READY".into(),
            source_branch: None,
            ttl_seconds: None,
            is_protected: false,
            created_at: None,
        };
        assert_eq!(info.short_name(), "ci-pr-7");
    }
}
