use serde::{Deserialize, Serialize};

pub const OPS_CATALOG: &str = "ops_catalog";
pub const OPS_SCHEMA: &str = "lakebase_ops";
pub const ARCHIVE_SCHEMA: &str = "lakebase_archive";

/// Logical table keys the tools write to, with their physical table names.
pub const OPS_TABLES: &[(&str, &str)] = &[
    ("pg_stat_history", "pg_stat_history"),
    ("index_recommendations", "index_recommendations"),
    ("vacuum_history", "vacuum_history"),
    ("lakebase_metrics", "lakebase_metrics"),
    ("sync_validation", "sync_validation_history"),
    ("branch_lifecycle", "branch_lifecycle"),
    ("data_archival", "data_archival_history"),
];

/// Fully qualified table for a logical key.  Unknown keys map to a table of
/// the same name in the ops schema.
pub fn resolve_table(key: &str) -> String {
    let table = OPS_TABLES
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, t)| *t)
        .unwrap_or(key);
    format!("{OPS_CATALOG}.{OPS_SCHEMA}.{table}")
}

pub fn archive_table(table: &str) -> String {
    format!("{OPS_CATALOG}.{ARCHIVE_SCHEMA}.{table}")
}

/// DDL that sets up the ops catalog: catalog, both schemas, every ops table.
pub fn ops_catalog_ddl() -> Vec<String> {
    let mut ddl = vec![
        format!("CREATE CATALOG IF NOT EXISTS {OPS_CATALOG}"),
        format!("CREATE SCHEMA IF NOT EXISTS {OPS_CATALOG}.{OPS_SCHEMA}"),
        format!("CREATE SCHEMA IF NOT EXISTS {OPS_CATALOG}.{ARCHIVE_SCHEMA}"),
    ];
    ddl.extend(
        OPS_TABLES
            .iter()
            .map(|(key, _)| format!("CREATE TABLE IF NOT EXISTS {} USING DELTA", resolve_table(key))),
    );
    ddl
}

/// What a lakehouse write reports back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteReceipt {
    pub table: String,
    pub records_written: usize,
    pub status: String,
}

impl WriteReceipt {
    pub fn success(table: impl Into<String>, records_written: usize) -> Self {
        Self {
            table: table.into(),
            records_written,
            status: "success".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_keys_resolve_to_physical_tables() {
        assert_eq!(
            resolve_table("sync_validation"),
            "ops_catalog.lakebase_ops.sync_validation_history"
        );
        assert_eq!(
            resolve_table("pg_stat_history"),
            "ops_catalog.lakebase_ops.pg_stat_history"
        );
    }

    #[test]
    fn unknown_keys_resolve_inside_ops_schema() {
        assert_eq!(resolve_table("adhoc"), "ops_catalog.lakebase_ops.adhoc");
        assert_eq!(archive_table("orders_cold"), "ops_catalog.lakebase_archive.orders_cold");
    }

    #[test]
    fn catalog_ddl_covers_every_table() {
        let ddl = ops_catalog_ddl();
        assert_eq!(ddl.len(), 3 + OPS_TABLES.len());
        assert!(ddl.iter().all(|s| s.contains("IF NOT EXISTS")));
    }
}
