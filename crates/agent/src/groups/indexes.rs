//! Index health: unused, bloated, missing, duplicate and unindexed-FK
//! detection, each producing reviewable recommendations.

use anyhow::Result;
use serde::Serialize;
use serde_json::{Value, json};

use lakeops_core::{EventType, Payload};
use lakeops_services::{queries, row_i64, row_str};
use lakeops_tools::{ToolArgs, ToolOutput, ToolRegistry};

use super::{ToolDeps, done, now_iso, short_id, tool};

const MB: f64 = 1024.0 * 1024.0;

/// Bloat is suspected above this size when the index is rarely scanned.
const BLOAT_MIN_BYTES: i64 = 50 * 1024 * 1024;
const BLOAT_MAX_SCANS: i64 = 100;

/// A pending change to an index, written to `index_recommendations` for
/// human review.
#[derive(Debug, Clone, Serialize)]
pub struct IndexRecommendation {
    pub recommendation_id: String,
    pub project_id: String,
    pub branch_id: String,
    pub table_name: String,
    pub schema_name: String,
    /// `drop_unused`, `drop_duplicate` or `create_fk_index`.
    pub recommendation_type: &'static str,
    pub index_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_columns: Option<String>,
    pub confidence: &'static str,
    pub estimated_impact: String,
    pub ddl_statement: String,
    pub status: &'static str,
    pub created_at: String,
}

impl IndexRecommendation {
    fn new(project: &str, branch: &str, table: &str, kind: &'static str) -> Self {
        Self {
            recommendation_id: short_id(),
            project_id: project.to_string(),
            branch_id: branch.to_string(),
            table_name: table.to_string(),
            schema_name: "public".to_string(),
            recommendation_type: kind,
            index_name: None,
            suggested_columns: None,
            confidence: "high",
            estimated_impact: String::new(),
            ddl_statement: String::new(),
            status: "pending_review",
            created_at: now_iso(),
        }
    }
}

pub fn register(registry: &mut ToolRegistry, deps: &ToolDeps) {
    let checks = [
        (
            "detect_unused_indexes",
            "Find indexes with idx_scan=0 for 7+ days",
            Check::Unused,
        ),
        (
            "detect_bloated_indexes",
            "Find indexes with bloat ratio > 2.0x",
            Check::Bloated,
        ),
        (
            "detect_missing_indexes",
            "Find tables with seq_scan >> idx_scan",
            Check::Missing,
        ),
        (
            "detect_duplicate_indexes",
            "Find overlapping column sets",
            Check::Duplicate,
        ),
        (
            "detect_missing_fk_indexes",
            "Find unindexed foreign keys",
            Check::MissingFk,
        ),
        (
            "run_full_index_analysis",
            "Complete index health analysis (all checks)",
            Check::Full,
        ),
    ];
    for (name, description, check) in checks {
        registry.register(
            tool(deps, name, description, move |deps, args| run_check(deps, args, check))
                .schedule("0 * * * *"),
        );
    }
}

#[derive(Debug, Clone, Copy)]
enum Check {
    Unused,
    Bloated,
    Missing,
    Duplicate,
    MissingFk,
    Full,
}

async fn run_check(deps: ToolDeps, args: ToolArgs, check: Check) -> Result<ToolOutput> {
    let project = args.str("project_id")?;
    let branch = args.str("branch_id")?;
    let out = match check {
        Check::Unused => detect_unused(&deps, project, branch).await?,
        Check::Bloated => detect_bloated(&deps, project, branch).await?,
        Check::Missing => detect_missing(&deps, project, branch).await?,
        Check::Duplicate => detect_duplicates(&deps, project, branch).await?,
        Check::MissingFk => detect_missing_fk(&deps, project, branch).await?,
        Check::Full => full_analysis(&deps, project, branch).await?,
    };
    done(out)
}

async fn write_recommendations(deps: &ToolDeps, recs: &[IndexRecommendation]) -> Result<()> {
    if recs.is_empty() {
        return Ok(());
    }
    let records = recs
        .iter()
        .map(serde_json::to_value)
        .collect::<Result<Vec<_>, _>>()?;
    deps.record("index_recommendations", records).await?;
    Ok(())
}

fn size_mb(row: &Payload, key: &str) -> f64 {
    row_i64(row, key) as f64 / MB
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

async fn detect_unused(deps: &ToolDeps, project: &str, branch: &str) -> Result<Value> {
    let rows = deps.query(project, branch, queries::UNUSED_INDEXES).await?;
    let recs: Vec<IndexRecommendation> = rows
        .iter()
        .map(|row| {
            let mb = size_mb(row, "index_size_bytes");
            let index = row_str(row, "index_name");
            let mut rec = IndexRecommendation::new(project, branch, row_str(row, "table_name"), "drop_unused");
            if let Some(schema) = row.get("schemaname").and_then(Value::as_str) {
                rec.schema_name = schema.to_string();
            }
            rec.index_name = Some(index.to_string());
            rec.confidence = if mb > 10.0 { "high" } else { "medium" };
            rec.estimated_impact = format!("Reclaim {mb:.1} MB");
            rec.ddl_statement = format!("DROP INDEX CONCURRENTLY IF EXISTS {index};");
            rec
        })
        .collect();
    write_recommendations(deps, &recs).await?;

    let reclaimable: f64 = rows.iter().map(|r| size_mb(r, "index_size_bytes")).sum();
    Ok(json!({
        "unused_indexes_found": recs.len(),
        "total_reclaimable_mb": round1(reclaimable),
        "recommendations": recs
            .iter()
            .map(|r| json!({
                "index": r.index_name,
                "table": r.table_name,
                "confidence": r.confidence,
                "impact": r.estimated_impact,
            }))
            .collect::<Vec<_>>(),
    }))
}

async fn detect_bloated(deps: &ToolDeps, project: &str, branch: &str) -> Result<Value> {
    let rows = deps.query(project, branch, queries::BLOATED_INDEXES).await?;
    let bloated: Vec<Value> = rows
        .iter()
        .filter(|row| {
            row_i64(row, "index_size_bytes") > BLOAT_MIN_BYTES && row_i64(row, "idx_scan") < BLOAT_MAX_SCANS
        })
        .map(|row| {
            let index = row_str(row, "index_name");
            json!({
                "index_name": index,
                "table_name": row_str(row, "table_name"),
                "size_mb": round1(size_mb(row, "index_size_bytes")),
                "idx_scan": row_i64(row, "idx_scan"),
                "ddl": format!("REINDEX INDEX CONCURRENTLY {index};"),
            })
        })
        .collect();
    Ok(json!({ "bloated_indexes_found": bloated.len(), "indexes": bloated }))
}

async fn detect_missing(deps: &ToolDeps, project: &str, branch: &str) -> Result<Value> {
    let rows = deps.query(project, branch, queries::MISSING_INDEXES).await?;
    let candidates: Vec<Value> = rows
        .iter()
        .map(|row| {
            json!({
                "table": row_str(row, "relname"),
                "schema": row.get("schemaname").and_then(Value::as_str).unwrap_or("public"),
                "seq_scans": row_i64(row, "seq_scan"),
                "idx_scans": row_i64(row, "idx_scan"),
                "live_tuples": row_i64(row, "n_live_tup"),
                "avg_tup_per_scan": row_i64(row, "avg_tup_per_scan"),
                "recommendation": "Analyze WHERE clauses in frequent queries to determine optimal index columns",
            })
        })
        .collect();
    Ok(json!({ "missing_index_candidates": candidates.len(), "candidates": candidates }))
}

async fn detect_duplicates(deps: &ToolDeps, project: &str, branch: &str) -> Result<Value> {
    let rows = deps.query(project, branch, queries::DUPLICATE_INDEXES).await?;
    let mut duplicates = Vec::with_capacity(rows.len());
    let mut recs = Vec::with_capacity(rows.len());
    for row in &rows {
        let (index_a, index_b) = (row_str(row, "index_a"), row_str(row, "index_b"));
        let size_b = round1(size_mb(row, "size_b"));
        let ddl = format!("DROP INDEX CONCURRENTLY {index_b};");

        let mut rec = IndexRecommendation::new(project, branch, row_str(row, "table_name"), "drop_duplicate");
        rec.index_name = Some(index_b.to_string());
        rec.estimated_impact = format!("Reclaim {size_b:.1} MB (duplicate of {index_a})");
        rec.ddl_statement = ddl.clone();
        recs.push(rec);

        duplicates.push(json!({
            "table": row_str(row, "table_name"),
            "index_a": index_a,
            "index_b": index_b,
            "size_a_mb": round1(size_mb(row, "size_a")),
            "size_b_mb": size_b,
            "recommendation": ddl,
        }));
    }
    write_recommendations(deps, &recs).await?;
    Ok(json!({ "duplicate_indexes_found": duplicates.len(), "duplicates": duplicates }))
}

async fn detect_missing_fk(deps: &ToolDeps, project: &str, branch: &str) -> Result<Value> {
    let rows = deps.query(project, branch, queries::MISSING_FK_INDEXES).await?;
    let mut candidates = Vec::with_capacity(rows.len());
    let mut recs = Vec::with_capacity(rows.len());
    for row in &rows {
        let table = row_str(row, "table_name");
        let column = row_str(row, "column_name");
        let constraint = row_str(row, "constraint_name");
        let ddl = format!("CREATE INDEX CONCURRENTLY idx_{table}_{column} ON {table}({column});");

        let mut rec = IndexRecommendation::new(project, branch, table, "create_fk_index");
        rec.suggested_columns = Some(column.to_string());
        rec.estimated_impact = format!("Improve JOIN performance on FK {constraint}");
        rec.ddl_statement = ddl.clone();
        recs.push(rec);

        candidates.push(json!({
            "table": table,
            "constraint": constraint,
            "column": column,
            "referenced_table": row_str(row, "referenced_table"),
            "recommendation": ddl,
        }));
    }
    write_recommendations(deps, &recs).await?;
    Ok(json!({ "missing_fk_indexes": candidates.len(), "candidates": candidates }))
}

fn count(section: &Value, key: &str) -> u64 {
    section[key].as_u64().unwrap_or(0)
}

async fn full_analysis(deps: &ToolDeps, project: &str, branch: &str) -> Result<Value> {
    let unused = detect_unused(deps, project, branch).await?;
    let bloated = detect_bloated(deps, project, branch).await?;
    let missing = detect_missing(deps, project, branch).await?;
    let duplicates = detect_duplicates(deps, project, branch).await?;
    let missing_fk = detect_missing_fk(deps, project, branch).await?;

    let total_issues = count(&unused, "unused_indexes_found")
        + count(&bloated, "bloated_indexes_found")
        + count(&missing, "missing_index_candidates")
        + count(&duplicates, "duplicate_indexes_found")
        + count(&missing_fk, "missing_fk_indexes");
    let health_score = 100u64.saturating_sub(total_issues * 10);

    if total_issues > 0 {
        deps.emit(
            EventType::IndexRecommendation,
            json!({ "project_id": project, "branch_id": branch, "total_issues": total_issues }),
        );
    }

    Ok(json!({
        "project_id": project,
        "branch_id": branch,
        "analysis_timestamp": now_iso(),
        "unused": unused,
        "bloated": bloated,
        "missing": missing,
        "duplicates": duplicates,
        "missing_fk": missing_fk,
        "total_issues": total_issues,
        "health_score": health_score,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::event_types;
    use lakeops_events::{EventBus, EventEmitter};
    use lakeops_services::MockStack;
    use std::sync::Arc;

    fn deps(stack: &MockStack) -> (ToolDeps, Arc<EventBus>) {
        let emitter = EventEmitter::new("PerformanceAgent");
        let bus = Arc::new(EventBus::default());
        emitter.attach(bus.clone());
        (ToolDeps::new(stack.services(), emitter, Default::default()), bus)
    }

    #[test]
    fn every_check_is_hourly() {
        let stack = MockStack::new();
        let mut registry = ToolRegistry::new();
        register(&mut registry, &deps(&stack).0);
        assert_eq!(registry.len(), 6);
        assert!(registry.iter().all(|t| t.cron() == Some("0 * * * *")));
    }

    #[tokio::test]
    async fn unused_index_becomes_a_drop_recommendation() {
        let stack = MockStack::new();
        let (deps, _bus) = deps(&stack);
        let out = detect_unused(&deps, "p", "production").await.unwrap();
        assert_eq!(out["unused_indexes_found"], 1);
        assert_eq!(out["total_reclaimable_mb"], 50.0);
        assert_eq!(out["recommendations"][0]["confidence"], "high");

        let written = stack.writer.records("index_recommendations");
        assert_eq!(written.len(), 1);
        assert_eq!(written[0]["recommendation_type"], "drop_unused");
        assert_eq!(
            written[0]["ddl_statement"],
            "DROP INDEX CONCURRENTLY IF EXISTS idx_orders_old_status;"
        );
        assert_eq!(written[0]["status"], "pending_review");
    }

    #[tokio::test]
    async fn bloat_needs_size_and_few_scans() {
        let stack = MockStack::new();
        let (deps, _bus) = deps(&stack);
        let out = detect_bloated(&deps, "p", "b").await.unwrap();
        // idx_orders_old_status is exactly 50 MB, so nothing qualifies
        assert_eq!(out["bloated_indexes_found"], 0);

        stack.db.set_rows(
            "pg_stat_user_indexes",
            json!([{"index_name": "idx_big", "table_name": "t", "idx_scan": 3, "index_size_bytes": 104857600}]),
        );
        let out = detect_bloated(&deps, "p", "b").await.unwrap();
        assert_eq!(out["bloated_indexes_found"], 1);
        assert_eq!(out["indexes"][0]["size_mb"], 100.0);
    }

    #[tokio::test]
    async fn full_analysis_scores_and_emits() {
        let stack = MockStack::new();
        let (deps, bus) = deps(&stack);
        let out = full_analysis(&deps, "p", "production").await.unwrap();
        // one unused, one duplicate pair, one unindexed FK
        assert_eq!(out["total_issues"], 3);
        assert_eq!(out["health_score"], 70);
        assert_eq!(out["duplicates"]["duplicates"][0]["index_b"], "idx_orders_cust_id_v2");
        assert_eq!(
            out["missing_fk"]["candidates"][0]["recommendation"],
            "CREATE INDEX CONCURRENTLY idx_orders_customer_id ON orders(customer_id);"
        );
        assert_eq!(stack.writer.records("index_recommendations").len(), 3);
        assert_eq!(event_types(&bus), vec![EventType::IndexRecommendation]);
    }

    #[tokio::test]
    async fn clean_database_scores_full_marks_silently() {
        let stack = MockStack::new();
        for view in ["unused_indexes", "pg_index", "pg_constraint"] {
            stack.db.set_rows(view, json!([]));
        }
        let (deps, bus) = deps(&stack);
        let out = full_analysis(&deps, "p", "b").await.unwrap();
        assert_eq!(out["health_score"], 100);
        assert!(bus.log().is_empty());
    }

    #[test]
    fn score_never_goes_negative() {
        assert_eq!(100u64.saturating_sub(12 * 10), 0);
    }
}
