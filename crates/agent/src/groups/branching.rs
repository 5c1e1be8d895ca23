//! Branch lifecycle: creation with TTLs, protection, TTL enforcement, branch
//! count monitoring, nightly resets and PR-driven CI branches.

use anyhow::Result;
use chrono::Utc;
use serde_json::{Value, json};
use tracing::info;

use lakeops_core::EventType;
use lakeops_services::{Alert, AlertSeverity, BranchInfo, BranchRequest};
use lakeops_tools::{RiskLevel, ToolArgs, ToolOutput, ToolRegistry};

use super::{ToolDeps, arg_or, done, short_id, tool};

/// Branch-name prefixes and their time-to-live in seconds.  `None` means
/// the branch never expires.  Checked in order; the first prefix wins.
pub const TTL_POLICIES: &[(&str, Option<u64>)] = &[
    ("ci", Some(14_400)),
    ("hotfix", Some(86_400)),
    ("perf", Some(172_800)),
    ("feat", Some(604_800)),
    ("dev", Some(604_800)),
    ("demo", Some(1_209_600)),
    ("qa", Some(1_209_600)),
    ("audit", Some(2_592_000)),
    ("ai-agent", Some(3_600)),
    ("production", None),
    ("staging", None),
];

/// Branches allowed per project before the platform refuses more.
pub const MAX_BRANCHES: i64 = 10;

pub fn ttl_for(branch_name: &str) -> Option<u64> {
    TTL_POLICIES
        .iter()
        .find(|(prefix, _)| branch_name.starts_with(prefix))
        .and_then(|(_, ttl)| *ttl)
}

pub fn ci_branch_name(pr_number: i64) -> String {
    format!("ci-pr-{pr_number}")
}

pub fn register(registry: &mut ToolRegistry, deps: &ToolDeps) {
    registry.register(tool(
        deps,
        "create_branch",
        "Create a branch with naming conventions and TTL",
        create_branch_tool,
    ));
    registry.register(
        tool(deps, "protect_branch", "Mark a branch as protected", protect_branch)
            .risk(RiskLevel::Medium),
    );
    registry.register(
        tool(
            deps,
            "enforce_ttl_policies",
            "Scan and delete branches exceeding TTL",
            enforce_ttl_policies,
        )
        .schedule("0 */6 * * *"),
    );
    registry.register(
        tool(
            deps,
            "monitor_branch_count",
            "Alert on branch count approaching limit",
            monitor_branch_count,
        )
        .schedule("0 */6 * * *"),
    );
    registry.register(
        tool(
            deps,
            "reset_branch_from_parent",
            "Sync branch from parent (nightly staging reset)",
            reset_branch_from_parent,
        )
        .schedule("0 2 * * *"),
    );
    registry.register(tool(
        deps,
        "create_branch_on_pr",
        "Create ephemeral branch when PR opened",
        create_branch_on_pr,
    ));
    registry.register(tool(
        deps,
        "delete_branch_on_pr_close",
        "Delete branch when PR closed/merged",
        delete_branch_on_pr_close,
    ));
}

#[allow(clippy::too_many_arguments)]
fn lifecycle_record(
    deps: &ToolDeps,
    project: &str,
    branch: &str,
    event_type: &str,
    source_branch: &str,
    ttl_seconds: Option<u64>,
    is_protected: bool,
    reason: String,
) -> Value {
    json!({
        "event_id": short_id(),
        "project_id": project,
        "branch_id": branch,
        "event_type": event_type,
        "source_branch": source_branch,
        "ttl_seconds": ttl_seconds,
        "is_protected": is_protected,
        "actor": deps.agent(),
        "reason": reason,
    })
}

/// Create `name` from `source`.  Without an explicit TTL the name's prefix
/// decides it.
pub(crate) async fn create_branch(
    deps: &ToolDeps,
    project: &str,
    name: &str,
    branch_type: &str,
    source: &str,
    ttl_seconds: Option<u64>,
) -> Result<BranchInfo> {
    let ttl = ttl_seconds.or_else(|| ttl_for(name));
    let request = BranchRequest::new(name, source).ttl(ttl);
    let info = deps.services.platform.create_branch(project, &request).await?;

    deps.record(
        "branch_lifecycle",
        vec![lifecycle_record(
            deps,
            project,
            name,
            "created",
            source,
            ttl,
            false,
            format!("Branch creation ({branch_type})"),
        )],
    )
    .await?;
    deps.emit(
        EventType::BranchCreated,
        json!({ "project_id": project, "branch_id": name, "branch_type": branch_type }),
    );
    Ok(info)
}

async fn create_branch_tool(deps: ToolDeps, args: ToolArgs) -> Result<ToolOutput> {
    let project = args.str("project_id")?;
    let name = args.str("branch_name")?;
    let ttl = args.i64("ttl_seconds").ok().and_then(|t| u64::try_from(t).ok());
    let info = create_branch(
        &deps,
        project,
        name,
        args.str_or("branch_type", "ephemeral"),
        args.str_or("source_branch", "development"),
        ttl,
    )
    .await?;
    done(serde_json::to_value(info)?)
}

async fn protect_branch(deps: ToolDeps, args: ToolArgs) -> Result<ToolOutput> {
    let project = args.str("project_id")?;
    let branch = args.str("branch_id")?;
    let protected = deps.services.platform.protect_branch(project, branch).await?;

    deps.record(
        "branch_lifecycle",
        vec![lifecycle_record(
            &deps,
            project,
            branch,
            "protected",
            "",
            None,
            true,
            "Branch protection applied".to_string(),
        )],
    )
    .await?;
    deps.emit(
        EventType::BranchProtected,
        json!({ "project_id": project, "branch_id": branch }),
    );
    done(json!({ "project_id": project, "branch_id": branch, "protected": protected }))
}

async fn enforce_ttl_policies(deps: ToolDeps, args: ToolArgs) -> Result<ToolOutput> {
    let project = args.str("project_id")?;
    let platform = &deps.services.platform;
    let now = Utc::now();

    let mut deleted = Vec::new();
    let mut kept = Vec::new();
    for branch in platform.list_branches(project).await? {
        let name = branch.short_name().to_string();
        let ttl = branch.ttl_seconds.or_else(|| ttl_for(&name));
        let expired = match (ttl, branch.age_seconds(now)) {
            (Some(ttl), Some(age)) => !branch.is_protected && age > ttl as i64,
            _ => false,
        };
        if !expired {
            kept.push(name);
            continue;
        }

        if platform.delete_branch(project, &name).await? {
            deps.record(
                "branch_lifecycle",
                vec![lifecycle_record(
                    &deps,
                    project,
                    &name,
                    "deleted",
                    branch.source_branch.as_deref().unwrap_or(""),
                    ttl,
                    false,
                    "TTL expired".to_string(),
                )],
            )
            .await?;
            deps.emit(
                EventType::BranchDeleted,
                json!({ "project_id": project, "branch_id": name, "reason": "ttl_expired" }),
            );
            deleted.push(name);
        }
    }

    info!(project, deleted = deleted.len(), kept = kept.len(), "TTL enforcement");
    done(json!({
        "project_id": project,
        "branches_deleted": deleted,
        "total_active": kept.len(),
        "branches_kept": kept,
    }))
}

async fn monitor_branch_count(deps: ToolDeps, args: ToolArgs) -> Result<ToolOutput> {
    let project = args.str("project_id")?;
    let max_limit = args.i64_or("max_limit", MAX_BRANCHES).max(1);
    let count = deps.services.platform.list_branches(project).await?.len() as i64;
    let utilization = count as f64 / max_limit as f64;
    let triggered = utilization >= 0.8;

    if triggered {
        let severity = if utilization >= 0.9 {
            AlertSeverity::Critical
        } else {
            AlertSeverity::Warning
        };
        deps.alert(
            Alert::new(
                severity,
                format!("Branch count at {count}/{max_limit}"),
                format!(
                    "Project {project} has {count} active branches ({:.0}% of limit)",
                    utilization * 100.0
                ),
            )
            .metric("branch_count", count as f64)
            .threshold(max_limit as f64)
            .scope(project, ""),
        )
        .await?;
    }

    done(json!({
        "project_id": project,
        "branch_count": count,
        "max_limit": max_limit,
        "utilization": format!("{:.0}%", utilization * 100.0),
        "alert_triggered": triggered,
    }))
}

async fn reset_branch_from_parent(deps: ToolDeps, args: ToolArgs) -> Result<ToolOutput> {
    let project = args.str("project_id")?;
    let branch = arg_or(&args, "branch_id", "staging");
    let reset = deps.services.platform.reset_branch(project, &branch).await?;

    deps.record(
        "branch_lifecycle",
        vec![lifecycle_record(
            &deps,
            project,
            &branch,
            "reset",
            "production",
            None,
            true,
            "Nightly staging reset from production".to_string(),
        )],
    )
    .await?;
    done(json!({ "project_id": project, "branch_id": branch, "reset": reset }))
}

async fn create_branch_on_pr(deps: ToolDeps, args: ToolArgs) -> Result<ToolOutput> {
    let project = args.str("project_id")?;
    let name = ci_branch_name(args.i64("pr_number")?);
    let info = create_branch(&deps, project, &name, "ci", "staging", ttl_for("ci")).await?;
    done(serde_json::to_value(info)?)
}

async fn delete_branch_on_pr_close(deps: ToolDeps, args: ToolArgs) -> Result<ToolOutput> {
    let project = args.str("project_id")?;
    let pr_number = args.i64("pr_number")?;
    let name = ci_branch_name(pr_number);
    let deleted = deps.services.platform.delete_branch(project, &name).await?;

    deps.record(
        "branch_lifecycle",
        vec![lifecycle_record(
            &deps,
            project,
            &name,
            "deleted",
            "",
            None,
            false,
            format!("PR #{pr_number} closed"),
        )],
    )
    .await?;
    deps.emit(
        EventType::BranchDeleted,
        json!({ "project_id": project, "branch_id": name }),
    );
    done(json!({ "branch": name, "deleted": deleted }))
}
