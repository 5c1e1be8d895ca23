//! In-memory collaborators with canned Postgres statistics.  The CLI uses
//! them in mock mode; tests use them to observe what tools wrote and sent.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::{Value, json};
use tracing::debug;

use lakeops_core::Payload;

use crate::alerts::RoutingAlertSender;
use crate::catalog::{WriteReceipt, archive_table, ops_catalog_ddl, resolve_table};
use crate::{
    BranchInfo, BranchRequest, DatabaseClient, MetricsWriter, PlatformClient, Services, WarehouseClient,
    rows_from,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Database ─────────────────────────────────────────────────────────────────

/// Views in the order queries are matched against them.  More specific
/// names come first so `pg_stat_statements_info` is not taken for
/// `pg_stat_statements`.
const VIEW_PATTERNS: &[(&str, &str)] = &[
    ("s.idx_scan = 0", "unused_indexes"),
    ("seq_scan > 100", "missing_indexes"),
    ("pg_stat_statements_info", "pg_stat_statements_info"),
    ("pg_stat_statements", "pg_stat_statements"),
    ("pg_stat_user_indexes", "pg_stat_user_indexes"),
    ("pg_stat_user_tables", "pg_stat_user_tables"),
    ("pg_stat_activity", "pg_stat_activity"),
    ("pg_stat_database", "pg_stat_database"),
    ("pg_database", "pg_stat_database"),
    ("pg_stat_io", "pg_stat_io"),
    ("pg_stat_wal", "pg_stat_wal"),
    ("pg_stat_checkpointer", "pg_stat_checkpointer"),
    ("pg_locks", "pg_locks"),
    ("pg_constraint", "pg_constraint"),
    ("pg_index", "pg_index"),
    ("pg_class", "pg_class"),
];

const TABLES: &[&str] = &["orders", "events", "users"];

/// A database whose statistics views return fixed rows.
///
/// Queries are matched by the first view name they mention.  `COUNT`
/// queries against a known table return its row count and newest
/// timestamp; anything else returns `[{"result": "mock_ok"}]`.  Statements
/// affect one row and are recorded for inspection.
pub struct MockDatabase {
    views: Mutex<HashMap<String, Vec<Payload>>>,
    row_counts: HashMap<&'static str, i64>,
    max_timestamps: HashMap<&'static str, &'static str>,
    statements: Mutex<Vec<String>>,
    failing: Mutex<Vec<String>>,
}

impl MockDatabase {
    pub fn new() -> Self {
        Self {
            views: Mutex::new(default_views()),
            row_counts: HashMap::from([("orders", 5_000_000), ("events", 20_000_000), ("users", 100_000)]),
            max_timestamps: HashMap::from([
                ("orders", "2026-02-21 14:30:00"),
                ("events", "2026-02-21 14:31:00"),
            ]),
            statements: Mutex::new(Vec::new()),
            failing: Mutex::new(Vec::new()),
        }
    }

    /// Replace the rows a view returns.
    pub fn set_rows(&self, view: &str, rows: Value) {
        lock(&self.views).insert(view.to_string(), rows_from(rows));
    }

    /// Make every query or statement containing `pattern` fail.
    pub fn fail_on(&self, pattern: &str) {
        lock(&self.failing).push(pattern.to_lowercase());
    }

    /// Statements executed so far, in order.
    pub fn statements(&self) -> Vec<String> {
        lock(&self.statements).clone()
    }

    fn check_failure(&self, sql: &str) -> Result<()> {
        let lowered = sql.to_lowercase();
        if let Some(pattern) = lock(&self.failing).iter().find(|p| lowered.contains(p.as_str())) {
            bail!("mock database error: statement matched `{pattern}`");
        }
        Ok(())
    }

    fn rows_for(&self, sql: &str) -> Vec<Payload> {
        let q = sql.to_lowercase();
        if let Some((_, view)) = VIEW_PATTERNS.iter().find(|(pattern, _)| q.contains(pattern)) {
            return lock(&self.views).get(*view).cloned().unwrap_or_default();
        }
        if let Some(checksum) = mock_checksum(&q) {
            return checksum;
        }
        if q.contains("count") {
            let table = TABLES.iter().find(|t| q.contains(*t)).copied().unwrap_or("orders");
            let count = self.row_counts.get(table).copied().unwrap_or(0);
            let max_ts = self.max_timestamps.get(table).copied().unwrap_or("2026-02-21 00:00:00");
            return rows_from(json!([{ "count": count, "max_ts": max_ts }]));
        }
        rows_from(json!([{ "result": "mock_ok" }]))
    }
}

impl Default for MockDatabase {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DatabaseClient for MockDatabase {
    async fn execute_query(&self, project_id: &str, branch_id: &str, sql: &str) -> Result<Vec<Payload>> {
        self.check_failure(sql)?;
        debug!(project = project_id, branch = branch_id, "mock query");
        Ok(self.rows_for(sql))
    }

    async fn execute_statement(&self, project_id: &str, branch_id: &str, sql: &str) -> Result<u64> {
        self.check_failure(sql)?;
        debug!(project = project_id, branch = branch_id, "mock statement");
        lock(&self.statements).push(sql.trim().to_string());
        Ok(1)
    }
}

/// Both sides of a sync hash a known table to the same value.
fn mock_checksum(lowered_sql: &str) -> Option<Vec<Payload>> {
    if !lowered_sql.contains("md5(") {
        return None;
    }
    let table = TABLES.iter().find(|t| lowered_sql.contains(*t))?;
    Some(rows_from(json!([{ "checksum": format!("mock-{table}") }])))
}

fn default_views() -> HashMap<String, Vec<Payload>> {
    let views = [
        (
            "pg_stat_statements",
            json!([
                {
                    "queryid": 1001, "query": "SELECT * FROM orders WHERE customer_id = $1",
                    "calls": 15000, "total_exec_time": 45000.0, "mean_exec_time": 3.0,
                    "rows": 75000, "shared_blks_hit": 500000, "shared_blks_read": 5000,
                    "temp_blks_written": 0, "temp_blks_read": 0,
                    "wal_records": 0, "wal_fpi": 0, "wal_bytes": 0,
                    "jit_functions": 0, "jit_generation_time": 0.0,
                    "jit_inlining_time": 0.0, "jit_optimization_time": 0.0, "jit_emission_time": 0.0
                },
                {
                    "queryid": 1002, "query": "INSERT INTO events (type, data) VALUES ($1, $2)",
                    "calls": 50000, "total_exec_time": 25000.0, "mean_exec_time": 0.5,
                    "rows": 50000, "shared_blks_hit": 200000, "shared_blks_read": 1000,
                    "temp_blks_written": 100, "temp_blks_read": 50,
                    "wal_records": 50000, "wal_fpi": 500, "wal_bytes": 25600000,
                    "jit_functions": 0, "jit_generation_time": 0.0,
                    "jit_inlining_time": 0.0, "jit_optimization_time": 0.0, "jit_emission_time": 0.0
                },
                {
                    "queryid": 1003,
                    "query": "SELECT o.*, p.name FROM orders o JOIN products p ON o.product_id = p.id WHERE o.status = $1",
                    "calls": 8000, "total_exec_time": 160000.0, "mean_exec_time": 20.0,
                    "rows": 40000, "shared_blks_hit": 300000, "shared_blks_read": 50000,
                    "temp_blks_written": 5000, "temp_blks_read": 3000,
                    "wal_records": 0, "wal_fpi": 0, "wal_bytes": 0,
                    "jit_functions": 12, "jit_generation_time": 5.2,
                    "jit_inlining_time": 3.1, "jit_optimization_time": 8.4, "jit_emission_time": 2.7
                }
            ]),
        ),
        (
            "pg_stat_statements_info",
            json!([{ "dealloc": 42, "stats_reset": "2026-01-15 00:00:00" }]),
        ),
        (
            "pg_stat_user_tables",
            json!([
                {
                    "schemaname": "public", "relname": "orders", "n_live_tup": 5000000,
                    "n_dead_tup": 800000, "seq_scan": 150, "idx_scan": 45000,
                    "last_vacuum": "2026-02-20 02:00:00", "last_autovacuum": "2026-02-20 14:00:00"
                },
                {
                    "schemaname": "public", "relname": "events", "n_live_tup": 20000000,
                    "n_dead_tup": 5000000, "seq_scan": 500, "idx_scan": 1000,
                    "last_vacuum": "2026-02-19 02:00:00", "last_autovacuum": "2026-02-19 08:00:00"
                },
                {
                    "schemaname": "public", "relname": "users", "n_live_tup": 100000,
                    "n_dead_tup": 500, "seq_scan": 10, "idx_scan": 80000,
                    "last_vacuum": "2026-02-21 02:00:00", "last_autovacuum": "2026-02-21 06:00:00"
                }
            ]),
        ),
        (
            "unused_indexes",
            json!([{
                "schemaname": "public", "table_name": "orders", "index_name": "idx_orders_old_status",
                "idx_scan": 0, "index_size_bytes": 52428800
            }]),
        ),
        ("missing_indexes", json!([])),
        (
            "pg_stat_user_indexes",
            json!([
                {
                    "schemaname": "public", "table_name": "orders", "index_name": "idx_orders_customer_id",
                    "idx_scan": 45000, "idx_tup_read": 90000, "index_size_bytes": 104857600
                },
                {
                    "schemaname": "public", "table_name": "orders", "index_name": "idx_orders_old_status",
                    "idx_scan": 0, "idx_tup_read": 0, "index_size_bytes": 52428800
                },
                {
                    "schemaname": "public", "table_name": "events", "index_name": "idx_events_type",
                    "idx_scan": 1000, "idx_tup_read": 5000000, "index_size_bytes": 209715200
                }
            ]),
        ),
        (
            "pg_stat_activity",
            json!([
                { "pid": 101, "state": "active", "query": "SELECT 1", "idle_seconds": 0,
                  "backend_start": "2026-02-21 10:00:00" },
                { "pid": 102, "state": "idle", "query": "", "idle_seconds": 3600,
                  "backend_start": "2026-02-21 08:00:00" },
                { "pid": 103, "state": "idle in transaction", "query": "UPDATE orders SET ...",
                  "wait_event_type": "Lock", "idle_seconds": 120, "backend_start": "2026-02-21 09:30:00" }
            ]),
        ),
        (
            "pg_stat_database",
            json!([{
                "datname": "databricks_postgres", "numbackends": 15, "xact_commit": 500000,
                "xact_rollback": 50, "blks_read": 100000, "blks_hit": 9900000,
                "deadlocks": 1, "temp_files": 10, "temp_bytes": 1048576,
                "xid_age": 300000000, "max_xid_age": 300000000
            }]),
        ),
        (
            "pg_locks",
            json!([{ "pid": 103, "locktype": "relation", "mode": "RowExclusiveLock", "granted": true }]),
        ),
        (
            "pg_stat_io",
            json!([{
                "backend_type": "client backend", "total_reads": 150000, "total_hits": 9800000,
                "total_read_time_ms": 4500.0, "total_write_time_ms": 2400.0
            }]),
        ),
        (
            "pg_stat_wal",
            json!([{
                "wal_records": 12500000, "wal_fpi": 125000, "wal_bytes": 6400000000_i64,
                "wal_buffers_full": 50, "wal_write_time": 12000.0, "wal_sync_time": 8000.0
            }]),
        ),
        (
            "pg_stat_checkpointer",
            json!([{
                "num_timed": 120, "num_requested": 5, "write_time": 45000.0,
                "sync_time": 12000.0, "buffers_written": 500000
            }]),
        ),
        (
            "pg_class",
            json!([
                { "table_name": "orders", "column_name": "id", "data_type": "integer", "ordinal_position": 1 },
                { "table_name": "orders", "column_name": "customer_id", "data_type": "integer", "ordinal_position": 2 },
                { "table_name": "orders", "column_name": "status", "data_type": "character varying(50)", "ordinal_position": 3 },
                { "table_name": "events", "column_name": "id", "data_type": "integer", "ordinal_position": 1 },
                { "table_name": "events", "column_name": "data", "data_type": "jsonb", "ordinal_position": 2 },
                { "table_name": "users", "column_name": "id", "data_type": "integer", "ordinal_position": 1 },
                { "table_name": "users", "column_name": "email", "data_type": "character varying(255)", "ordinal_position": 2 }
            ]),
        ),
        (
            "pg_index",
            json!([{
                "table_name": "orders", "index_a": "idx_orders_customer_id", "index_b": "idx_orders_cust_id_v2",
                "size_a": 104857600, "size_b": 104857600
            }]),
        ),
        (
            "pg_constraint",
            json!([{
                "table_name": "orders", "constraint_name": "fk_orders_customer",
                "column_name": "customer_id", "referenced_table": "users"
            }]),
        ),
    ];
    views
        .into_iter()
        .map(|(view, rows)| (view.to_string(), rows_from(rows)))
        .collect()
}

// ── Platform ─────────────────────────────────────────────────────────────────

/// Tracks branches per project.  A project seen for the first time starts
/// with protected `production` and `staging` branches plus `development`.
#[derive(Default)]
pub struct MockPlatform {
    projects: Mutex<HashMap<String, Vec<BranchInfo>>>,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move a branch's creation time into the past.
    pub fn backdate(&self, project_id: &str, branch_id: &str, seconds: i64) {
        let path = branch_path(project_id, branch_id);
        self.with_project(project_id, |branches| {
            if let Some(branch) = branches.iter_mut().find(|b| b.name == path) {
                let created = branch.created_at.unwrap_or_else(Utc::now);
                branch.created_at = Some(created - Duration::seconds(seconds));
            }
        });
    }

    fn with_project<R>(&self, project_id: &str, f: impl FnOnce(&mut Vec<BranchInfo>) -> R) -> R {
        let mut projects = lock(&self.projects);
        let branches = projects
            .entry(project_id.to_string())
            .or_insert_with(|| seed_branches(project_id));
        f(branches)
    }
}

fn branch_path(project_id: &str, branch: &str) -> String {
    format!("projects/{project_id}/branches/{branch}")
}

fn seed_branches(project_id: &str) -> Vec<BranchInfo> {
    [
        ("production", None, true),
        ("staging", Some("production"), true),
        ("development", Some("staging"), false),
    ]
    .into_iter()
    .map(|(name, source, protected)| BranchInfo {
        name: branch_path(project_id, name),
        status: "READY".to_string(),
        source_branch: source.map(str::to_string),
        ttl_seconds: None,
        is_protected: protected,
        created_at: None,
    })
    .collect()
}

#[async_trait]
impl PlatformClient for MockPlatform {
    async fn create_project(&self, project_id: &str) -> Result<Payload> {
        self.with_project(project_id, |_| ());
        Ok(rows_from(json!({ "name": format!("projects/{project_id}"), "status": "ACTIVE" }))
            .pop()
            .unwrap_or_default())
    }

    async fn create_branch(&self, project_id: &str, request: &BranchRequest) -> Result<BranchInfo> {
        let info = BranchInfo {
            name: branch_path(project_id, &request.name),
            status: "READY".to_string(),
            source_branch: Some(request.source_branch.clone()),
            ttl_seconds: request.ttl_seconds,
            is_protected: request.is_protected,
            created_at: Some(Utc::now()),
        };
        self.with_project(project_id, |branches| {
            branches.retain(|b| b.name != info.name);
            branches.push(info.clone());
        });
        Ok(info)
    }

    async fn list_branches(&self, project_id: &str) -> Result<Vec<BranchInfo>> {
        Ok(self.with_project(project_id, |branches| branches.clone()))
    }

    async fn delete_branch(&self, project_id: &str, branch_id: &str) -> Result<bool> {
        let path = branch_path(project_id, branch_id);
        Ok(self.with_project(project_id, |branches| {
            let before = branches.len();
            branches.retain(|b| b.name != path);
            branches.len() < before
        }))
    }

    async fn protect_branch(&self, project_id: &str, branch_id: &str) -> Result<bool> {
        let path = branch_path(project_id, branch_id);
        Ok(self.with_project(project_id, |branches| {
            branches
                .iter_mut()
                .find(|b| b.name == path)
                .map(|b| b.is_protected = true)
                .is_some()
        }))
    }

    async fn reset_branch(&self, project_id: &str, branch_id: &str) -> Result<bool> {
        let path = branch_path(project_id, branch_id);
        Ok(self.with_project(project_id, |branches| branches.iter().any(|b| b.name == path)))
    }
}

// ── Lakehouse ────────────────────────────────────────────────────────────────

/// Keeps written records per fully qualified table.
#[derive(Default)]
pub struct InMemoryMetricsWriter {
    tables: Mutex<HashMap<String, Vec<Payload>>>,
}

impl InMemoryMetricsWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records written under a logical key (see [`resolve_table`]).
    pub fn records(&self, table_key: &str) -> Vec<Payload> {
        self.table(&resolve_table(table_key))
    }

    /// Records written to a fully qualified table.
    pub fn table(&self, table: &str) -> Vec<Payload> {
        lock(&self.tables).get(table).cloned().unwrap_or_default()
    }

    pub fn total_records(&self) -> usize {
        lock(&self.tables).values().map(Vec::len).sum()
    }

    /// Record count per fully qualified table, sorted by table name.
    pub fn table_counts(&self) -> BTreeMap<String, usize> {
        lock(&self.tables)
            .iter()
            .map(|(table, records)| (table.clone(), records.len()))
            .collect()
    }

    fn append(&self, table: String, records: Vec<Payload>) -> WriteReceipt {
        let written = records.len();
        debug!(table = %table, records = written, "writing records");
        lock(&self.tables).entry(table.clone()).or_default().extend(records);
        WriteReceipt::success(table, written)
    }
}

#[async_trait]
impl MetricsWriter for InMemoryMetricsWriter {
    async fn write_metrics(&self, table_key: &str, records: Vec<Payload>) -> Result<WriteReceipt> {
        Ok(self.append(resolve_table(table_key), records))
    }

    async fn write_archive(&self, table: &str, records: Vec<Payload>) -> Result<WriteReceipt> {
        Ok(self.append(archive_table(table), records))
    }

    async fn create_ops_catalog(&self) -> Result<Payload> {
        let ddl = ops_catalog_ddl();
        Ok(rows_from(json!({
            "statements_executed": ddl.len(),
            "ddl": ddl,
            "status": "created",
        }))
        .pop()
        .unwrap_or_default())
    }
}

/// Lakehouse reads: synced copies trail the source by 150 rows and 15
/// minutes, and billing returns a fixed seven-day breakdown per branch.
pub struct MockWarehouse {
    source: Arc<MockDatabase>,
}

impl MockWarehouse {
    pub fn new(source: Arc<MockDatabase>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl WarehouseClient for MockWarehouse {
    async fn execute_query(&self, sql: &str) -> Result<Vec<Payload>> {
        let q = sql.to_lowercase();
        if q.contains("system.billing.usage") {
            return Ok(rows_from(json!([
                { "branch": "production", "dbus": 800.0 },
                { "branch": "staging", "dbus": 200.0 },
                { "branch": "development", "dbus": 150.0 },
                { "branch": "ci_branches", "dbus": 100.5 }
            ])));
        }
        if let Some(checksum) = mock_checksum(&q) {
            return Ok(checksum);
        }
        if q.contains("count") {
            let table = TABLES.iter().find(|t| q.contains(*t)).copied().unwrap_or("orders");
            let count = self.source.row_counts.get(table).copied().unwrap_or(0);
            return Ok(rows_from(json!([{
                "count": (count - 150).max(0),
                "max_ts": "2026-02-21 14:15:00",
            }])));
        }
        Ok(Vec::new())
    }
}

// ── Stack ────────────────────────────────────────────────────────────────────

/// The mock collaborators with their concrete types still visible.
#[derive(Clone)]
pub struct MockStack {
    pub db: Arc<MockDatabase>,
    pub platform: Arc<MockPlatform>,
    pub writer: Arc<InMemoryMetricsWriter>,
    pub warehouse: Arc<MockWarehouse>,
    pub alerts: Arc<RoutingAlertSender>,
}

impl MockStack {
    pub fn new() -> Self {
        let db = Arc::new(MockDatabase::new());
        Self {
            warehouse: Arc::new(MockWarehouse::new(db.clone())),
            db,
            platform: Arc::new(MockPlatform::new()),
            writer: Arc::new(InMemoryMetricsWriter::new()),
            alerts: Arc::new(RoutingAlertSender::default()),
        }
    }

    pub fn services(&self) -> Services {
        Services {
            db: self.db.clone(),
            platform: self.platform.clone(),
            writer: self.writer.clone(),
            warehouse: self.warehouse.clone(),
            alerts: self.alerts.clone(),
        }
    }
}

impl Default for MockStack {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries;
    use crate::{row_i64, row_str};

    #[tokio::test]
    async fn queries_match_by_view() {
        let db = MockDatabase::new();
        let info = db.execute_query("p", "b", queries::PG_STAT_STATEMENTS_INFO).await.unwrap();
        assert_eq!(row_i64(&info[0], "dealloc"), 42);

        let statements = db.execute_query("p", "b", queries::PG_STAT_STATEMENTS_FULL).await.unwrap();
        assert_eq!(statements.len(), 3);

        let unused = db.execute_query("p", "b", queries::UNUSED_INDEXES).await.unwrap();
        assert_eq!(unused.len(), 1);
        assert_eq!(db.execute_query("p", "b", queries::BLOATED_INDEXES).await.unwrap().len(), 3);

        let fks = db.execute_query("p", "b", queries::MISSING_FK_INDEXES).await.unwrap();
        assert_eq!(row_str(&fks[0], "constraint_name"), "fk_orders_customer");

        let dups = db.execute_query("p", "b", queries::DUPLICATE_INDEXES).await.unwrap();
        assert_eq!(row_str(&dups[0], "index_b"), "idx_orders_cust_id_v2");

        let txid = db.execute_query("p", "b", queries::TXID_WRAPAROUND_RISK).await.unwrap();
        assert_eq!(row_i64(&txid[0], "xid_age"), 300_000_000);
    }

    #[tokio::test]
    async fn count_queries_pick_the_named_table() {
        let db = MockDatabase::new();
        let rows = db
            .execute_query("p", "b", &queries::count_and_max("events", "created_at"))
            .await
            .unwrap();
        assert_eq!(row_i64(&rows[0], "count"), 20_000_000);
        assert_eq!(row_str(&rows[0], "max_ts"), "2026-02-21 14:31:00");

        let other = db.execute_query("p", "b", "SELECT now()").await.unwrap();
        assert_eq!(row_str(&other[0], "result"), "mock_ok");
    }

    #[tokio::test]
    async fn statements_are_recorded_and_failures_injected() {
        let db = MockDatabase::new();
        assert_eq!(db.execute_statement("p", "b", "VACUUM ANALYZE orders").await.unwrap(), 1);
        db.fail_on("vacuum full");
        assert!(db.execute_statement("p", "b", "VACUUM FULL orders").await.is_err());
        assert_eq!(db.statements(), vec!["VACUUM ANALYZE orders"]);
    }

    #[tokio::test]
    async fn set_rows_overrides_a_view() {
        let db = MockDatabase::new();
        db.set_rows("pg_locks", json!([]));
        assert!(db.execute_query("p", "b", queries::WAITING_LOCKS).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn platform_tracks_branch_lifecycle() {
        let platform = MockPlatform::new();
        assert_eq!(platform.list_branches("p").await.unwrap().len(), 3);

        let info = platform
            .create_branch("p", &BranchRequest::new("ci-pr-7", "staging").ttl(Some(14_400)))
            .await
            .unwrap();
        assert_eq!(info.name, "projects/p/branches/ci-pr-7");
        assert_eq!(platform.list_branches("p").await.unwrap().len(), 4);

        assert!(platform.reset_branch("p", "ci-pr-7").await.unwrap());
        assert!(platform.delete_branch("p", "ci-pr-7").await.unwrap());
        assert!(!platform.delete_branch("p", "ci-pr-7").await.unwrap());
        assert!(!platform.reset_branch("p", "ci-pr-7").await.unwrap());
    }

    #[tokio::test]
    async fn backdate_ages_created_branches() {
        let platform = MockPlatform::new();
        platform
            .create_branch("p", &BranchRequest::new("ci-pr-1", "staging"))
            .await
            .unwrap();
        platform.backdate("p", "ci-pr-1", 20_000);
        let branch = platform
            .list_branches("p")
            .await
            .unwrap()
            .into_iter()
            .find(|b| b.short_name() == "ci-pr-1")
            .unwrap();
        assert!(branch.age_seconds(Utc::now()).unwrap() >= 20_000);
    }

    #[tokio::test]
    async fn protect_marks_existing_branches_only() {
        let platform = MockPlatform::new();
        assert!(platform.protect_branch("p", "development").await.unwrap());
        assert!(!platform.protect_branch("p", "nope").await.unwrap());
        let dev = platform
            .list_branches("p")
            .await
            .unwrap()
            .into_iter()
            .find(|b| b.short_name() == "development")
            .unwrap();
        assert!(dev.is_protected);
    }

    #[tokio::test]
    async fn writer_keeps_records_per_table() {
        let writer = InMemoryMetricsWriter::new();
        let receipt = writer
            .write_metrics("vacuum_history", rows_from(json!([{"a": 1}, {"a": 2}])))
            .await
            .unwrap();
        assert_eq!(receipt.table, "ops_catalog.lakebase_ops.vacuum_history");
        assert_eq!(receipt.records_written, 2);

        writer
            .write_archive("orders_cold", rows_from(json!([{"id": 1}])))
            .await
            .unwrap();
        assert_eq!(writer.records("vacuum_history").len(), 2);
        assert_eq!(writer.table("ops_catalog.lakebase_archive.orders_cold").len(), 1);
        assert_eq!(writer.total_records(), 3);
        let counts = writer.table_counts();
        assert_eq!(counts.len(), 2);
        assert_eq!(counts["ops_catalog.lakebase_ops.vacuum_history"], 2);
    }

    #[tokio::test]
    async fn warehouse_copies_trail_the_source() {
        let stack = MockStack::new();
        let rows = stack
            .warehouse
            .execute_query(&queries::count_and_max("ops_catalog.lakebase_ops.orders_delta", "updated_at"))
            .await
            .unwrap();
        assert_eq!(row_i64(&rows[0], "count"), 5_000_000 - 150);

        let billing = stack.warehouse.execute_query(queries::BILLING_BY_BRANCH).await.unwrap();
        assert_eq!(billing.len(), 4);
    }
}
