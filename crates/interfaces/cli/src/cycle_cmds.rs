use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::{error, info, warn};

use lakeops_agent::{CycleContext, standard_agents};
use lakeops_config::AppConfig;
use lakeops_core::Payload;
use lakeops_exec::{ExecutionPolicy, TaskExecutor};
use lakeops_runtime::{CycleReport, Framework, install_standard_subscriptions};
use lakeops_services::MockStack;

/// Command-line values that win over the context file.
#[derive(Debug, Default)]
pub(crate) struct Overrides {
    pub project: Option<String>,
    pub branches: Vec<String>,
}

impl Overrides {
    fn apply(self, ctx: &mut CycleContext) {
        if let Some(project) = self.project {
            ctx.insert("project_id", project);
        }
        if !self.branches.is_empty() {
            ctx.insert("branches", self.branches);
        }
    }
}

/// A framework with the standard agents wired to one set of mock collaborators.
pub(crate) struct Deployment {
    pub framework: Framework,
    pub stack: MockStack,
}

pub(crate) fn deploy(config: &AppConfig) -> Result<Deployment> {
    if !config.framework.mock_mode {
        bail!(
            "no live Lakebase client is available in this build; set framework.mock_mode = true or LAKEOPS_MOCK_MODE=1"
        );
    }
    let stack = MockStack::new();
    let executor = Arc::new(TaskExecutor::new(ExecutionPolicy::from_config(&config.executor)));
    let mut framework = Framework::new(config);
    for agent in standard_agents(&stack.services(), executor, config) {
        framework.register_agent(agent);
    }
    install_standard_subscriptions(&framework);
    Ok(Deployment { framework, stack })
}

pub(crate) fn load_context(config: &AppConfig, path: Option<&Path>) -> Result<CycleContext> {
    let values: Payload = match path {
        None => Payload::new(),
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("reading context file {}", path.display()))?;
            if path.extension().is_some_and(|ext| ext == "toml") {
                toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?
            } else {
                serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?
            }
        }
    };
    Ok(CycleContext::from_payload(values, config.cycle.clone()))
}

pub(crate) async fn run_once(
    config: &AppConfig,
    context: Option<&Path>,
    overrides: Overrides,
    json: bool,
) -> Result<()> {
    let deployment = deploy(config)?;
    let mut ctx = load_context(config, context)?;
    overrides.apply(&mut ctx);

    let report = deployment.framework.run_full_cycle(&ctx).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report, &deployment.stack);
    }
    Ok(())
}

pub(crate) async fn watch(config: &AppConfig, context: Option<&Path>, interval: Option<u64>) -> Result<()> {
    let deployment = deploy(config)?;
    let mut ctx = load_context(config, context)?;
    let every = interval
        .map(|secs| Duration::from_secs(secs.max(1)))
        .unwrap_or_else(|| config.cycle_interval());
    info!(interval_secs = every.as_secs(), "watching");

    let mut cycle = 0u64;
    loop {
        cycle += 1;
        match deployment.framework.run_full_cycle(&ctx).await {
            Ok(report) => {
                info!(
                    cycle,
                    tasks = report.total_tasks(),
                    failed = report.failed_tasks().count(),
                    events = report.events,
                    "cycle finished"
                );
                // the project exists from here on
                ctx.insert("is_new_project", false);
            }
            Err(err) => error!(cycle, "cycle aborted: {err:#}"),
        }

        tokio::select! {
            _ = tokio::time::sleep(every) => {}
            _ = shutdown_signal() => {
                info!(cycles = cycle, "shutdown requested");
                break;
            }
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("ctrl-c handler unavailable: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!("SIGTERM handler unavailable: {err}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

fn print_summary(report: &CycleReport, stack: &MockStack) {
    println!("── automation cycle ─────────────────────────────────");
    println!("  duration : {:.2}s", report.duration_seconds);
    println!("  events   : {}", report.events);
    for phase in &report.phases {
        println!(
            "  phase {:<20} {:.2}s  [{}]",
            phase.label,
            phase.duration_seconds,
            phase.agents.join(", ")
        );
    }

    println!("── agents ───────────────────────────────────────────");
    for summary in report.agent_summaries.values() {
        println!(
            "  {:<18} tasks {} ({} success, {} failed, {} skipped)  success rate {}",
            summary.agent,
            summary.total_tasks,
            summary.successful,
            summary.failed,
            summary.skipped,
            summary.success_rate_label()
        );
    }
    for failed in report.failed_tasks() {
        println!("  ✗ {failed}");
    }

    let alerts = stack.alerts.summary();
    println!("── alerts ───────────────────────────────────────────");
    println!("  total          : {}", alerts.total_alerts);
    for (severity, count) in &alerts.by_severity {
        println!("  {severity:<15}: {count}");
    }
    println!("  auto-remediated: {}", alerts.auto_remediated);

    let tables = stack.writer.table_counts();
    println!("── lakehouse writes ─────────────────────────────────");
    println!(
        "  {} records across {} tables",
        stack.writer.total_records(),
        tables.len()
    );
    for (table, count) in &tables {
        println!("  - {table}: {count}");
    }
}
