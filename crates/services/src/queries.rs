//! Postgres catalog queries used by the tool groups.  Native `pg_*` views
//! only, no `information_schema`.

// ── Statement statistics ─────────────────────────────────────────────────────

pub const PG_STAT_STATEMENTS_FULL: &str = "
    SELECT queryid, query, calls, total_exec_time, mean_exec_time,
           rows, shared_blks_hit, shared_blks_read, temp_blks_written,
           temp_blks_read, wal_records, wal_fpi, wal_bytes,
           jit_functions, jit_generation_time, jit_inlining_time,
           jit_optimization_time, jit_emission_time
    FROM pg_stat_statements
    ORDER BY total_exec_time DESC
";

pub const PG_STAT_STATEMENTS_INFO: &str = "
    SELECT dealloc, stats_reset
    FROM pg_stat_statements_info
";

// ── Indexes ──────────────────────────────────────────────────────────────────

pub const UNUSED_INDEXES: &str = "
    SELECT schemaname, relname AS table_name, indexrelname AS index_name,
           idx_scan, pg_relation_size(indexrelid) AS index_size_bytes
    FROM pg_stat_user_indexes s
    JOIN pg_index i ON s.indexrelid = i.indexrelid
    WHERE s.idx_scan = 0
      AND NOT i.indisunique AND NOT i.indisprimary
    ORDER BY pg_relation_size(s.indexrelid) DESC
";

pub const BLOATED_INDEXES: &str = "
    SELECT schemaname, relname AS table_name, indexrelname AS index_name,
           idx_scan, idx_tup_read, index_size_bytes
    FROM pg_stat_user_indexes
";

pub const MISSING_INDEXES: &str = "
    SELECT schemaname, relname, seq_scan, seq_tup_read, idx_scan, n_live_tup,
           CASE WHEN seq_scan > 0 THEN seq_tup_read / seq_scan ELSE 0 END AS avg_tup_per_scan
    FROM pg_stat_user_tables
    WHERE seq_scan > 100 AND n_live_tup > 10000
      AND (idx_scan = 0 OR seq_scan > idx_scan * 10)
    ORDER BY seq_tup_read DESC
";

pub const DUPLICATE_INDEXES: &str = "
    SELECT a.indrelid::regclass AS table_name,
           a.indexrelid::regclass AS index_a,
           b.indexrelid::regclass AS index_b,
           pg_relation_size(a.indexrelid) AS size_a,
           pg_relation_size(b.indexrelid) AS size_b
    FROM pg_catalog.pg_index a
    JOIN pg_catalog.pg_index b
      ON a.indrelid = b.indrelid
     AND a.indexrelid < b.indexrelid
    WHERE a.indkey::text = b.indkey::text
      AND NOT a.indisprimary AND NOT b.indisprimary
";

pub const MISSING_FK_INDEXES: &str = "
    SELECT conrelid::regclass AS table_name,
           conname AS constraint_name,
           a.attname AS column_name,
           confrelid::regclass AS referenced_table
    FROM pg_catalog.pg_constraint con
    JOIN pg_catalog.pg_attribute a
      ON a.attrelid = con.conrelid AND a.attnum = ANY(con.conkey)
    WHERE con.contype = 'f'
      AND NOT EXISTS (
          SELECT 1 FROM pg_catalog.pg_index i
          WHERE i.indrelid = con.conrelid
            AND con.conkey[1] = ANY(i.indkey::int[])
      )
";

// ── Maintenance ──────────────────────────────────────────────────────────────

pub const TABLES_NEEDING_VACUUM: &str = "
    SELECT schemaname, relname, n_live_tup, n_dead_tup,
           ROUND(n_dead_tup::numeric / NULLIF(n_live_tup + n_dead_tup, 0) * 100, 2) AS dead_pct,
           last_vacuum, last_autovacuum, last_analyze, last_autoanalyze
    FROM pg_stat_user_tables
    WHERE n_dead_tup > 1000
    ORDER BY n_dead_tup DESC
";

pub const TXID_WRAPAROUND_RISK: &str = "
    SELECT datname, age(datfrozenxid) AS xid_age,
           ROUND(100.0 * age(datfrozenxid) / 2000000000, 2) AS pct_to_wraparound
    FROM pg_database
    ORDER BY age(datfrozenxid) DESC
";

pub const AUTOVACUUM_CANDIDATES: &str = "
    SELECT schemaname, relname, n_live_tup, n_dead_tup, seq_scan, idx_scan
    FROM pg_stat_user_tables WHERE n_live_tup > 10000
";

// ── Health ───────────────────────────────────────────────────────────────────

pub const DATABASE_STATS: &str = "
    SELECT datname, numbackends, xact_commit, xact_rollback,
           blks_read, blks_hit, deadlocks, temp_files, temp_bytes
    FROM pg_stat_database WHERE datname = 'databricks_postgres'
";

pub const CONNECTION_STATES: &str = "
    SELECT state, count(*) as cnt FROM pg_stat_activity
    WHERE backend_type = 'client backend' GROUP BY state
";

pub const TABLE_DEAD_TUPLES: &str = "
    SELECT relname, n_live_tup, n_dead_tup,
           CASE WHEN n_live_tup + n_dead_tup > 0
                THEN n_dead_tup::float / (n_live_tup + n_dead_tup)
                ELSE 0 END AS dead_ratio
    FROM pg_stat_user_tables
    ORDER BY n_dead_tup DESC LIMIT 5
";

pub const WAITING_LOCKS: &str = "
    SELECT count(*) as waiting_locks FROM pg_locks WHERE NOT granted
";

pub const MAX_TXID_AGE: &str = "
    SELECT max(age(datfrozenxid)) as max_xid_age FROM pg_database
";

pub const IO_STATS: &str = "
    SELECT backend_type, SUM(reads) as total_reads, SUM(hits) as total_hits,
           SUM(read_time) as total_read_time_ms, SUM(write_time) as total_write_time_ms
    FROM pg_stat_io
    WHERE backend_type = 'client backend'
    GROUP BY backend_type
";

pub const WAL_STATS: &str = "
    SELECT wal_records, wal_fpi, wal_bytes, wal_buffers_full,
           wal_write_time, wal_sync_time
    FROM pg_stat_wal
";

pub const CONNECTION_DETAILS: &str = "
    SELECT pid, state, usename, application_name,
           client_addr, backend_start, state_change,
           EXTRACT(EPOCH FROM (now() - state_change)) AS idle_seconds,
           wait_event_type, wait_event, query
    FROM pg_stat_activity
    WHERE backend_type = 'client backend'
    ORDER BY state_change
";

pub const COLD_TABLES: &str = "
    SELECT schemaname, relname, n_live_tup,
           last_seq_scan, last_idx_scan
    FROM pg_stat_user_tables
    WHERE n_live_tup > 100000
    ORDER BY GREATEST(last_seq_scan, last_idx_scan) ASC NULLS FIRST
";

// ── Schema ───────────────────────────────────────────────────────────────────

pub const SCHEMA_COLUMNS: &str = "
    SELECT c.relname AS table_name, a.attname AS column_name,
           pg_catalog.format_type(a.atttypid, a.atttypmod) AS data_type,
           a.attnum AS ordinal_position, a.attnotnull AS not_null,
           pg_get_expr(d.adbin, d.adrelid) AS column_default
    FROM pg_catalog.pg_class c
    JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
    JOIN pg_catalog.pg_attribute a ON a.attrelid = c.oid
    LEFT JOIN pg_catalog.pg_attrdef d ON d.adrelid = c.oid AND d.adnum = a.attnum
    WHERE n.nspname = 'public' AND c.relkind IN ('r', 'p')
      AND a.attnum > 0 AND NOT a.attisdropped
    ORDER BY c.relname, a.attnum
";

// ── Lakehouse ────────────────────────────────────────────────────────────────

pub const BILLING_BY_BRANCH: &str = "
    SELECT usage_metadata.branch AS branch, SUM(usage_quantity) AS dbus
    FROM system.billing.usage
    WHERE billing_origin_product = 'DATABASE'
      AND usage_date >= current_date() - INTERVAL 7 DAYS
    GROUP BY usage_metadata.branch
";

/// Row count and newest timestamp of a table, on either side of a sync.
pub fn count_and_max(table: &str, timestamp_column: &str) -> String {
    format!("SELECT COUNT(*) AS count, MAX({timestamp_column}) AS max_ts FROM {table}")
}

/// Checksum over the key columns of every row, comparable across the
/// database and its lakehouse copy.
pub fn key_checksum(table: &str, key_columns: &[String]) -> String {
    let key = key_columns
        .iter()
        .map(|c| format!("CAST({c} AS TEXT)"))
        .collect::<Vec<_>>()
        .join(" || '|' || ");
    format!("SELECT md5(string_agg({key}, ',' ORDER BY {key})) AS checksum FROM {table}")
}
