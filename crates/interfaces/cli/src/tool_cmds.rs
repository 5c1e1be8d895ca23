use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use lakeops_agent::Agent;
use lakeops_config::AppConfig;
use lakeops_runtime::Framework;
use lakeops_tools::next_runs;

use crate::cycle_cmds::deploy;

fn select<'a>(framework: &'a Framework, agent: Option<&str>) -> Result<Vec<&'a dyn Agent>> {
    match agent {
        None => Ok(framework.agents().collect()),
        Some(name) => {
            let found = framework.agent(name).with_context(|| {
                format!("unknown agent `{name}`; registered: {}", framework.agent_names().join(", "))
            })?;
            Ok(vec![found])
        }
    }
}

pub(crate) fn list_tools(config: &AppConfig, agent: Option<&str>) -> Result<()> {
    let deployment = deploy(config)?;
    let mut total = 0;
    for agent in select(&deployment.framework, agent)? {
        println!("── {} ({}) ──", agent.name(), agent.role());
        for spec in agent.tool_specs() {
            println!(
                "  {:<34} {:<14} {:<6} {}",
                spec.name,
                spec.schedule.as_deref().unwrap_or("-"),
                spec.risk_level.as_str(),
                if spec.requires_approval { "approval" } else { "" }
            );
            total += 1;
        }
    }
    println!("  ({total} tools total)");
    Ok(())
}

/// One scheduled tool and when it fires next.
#[derive(Debug)]
pub(crate) struct Job {
    pub agent: String,
    pub tool: String,
    pub cron: String,
    pub next: Vec<DateTime<Utc>>,
}

pub(crate) fn scheduled_jobs(framework: &Framework, after: DateTime<Utc>, count: usize) -> Result<Vec<Job>> {
    let mut jobs = Vec::new();
    for agent in framework.agents() {
        for spec in agent.core().registry().scheduled_specs() {
            let Some(cron) = spec.schedule else { continue };
            let next = next_runs(&cron, after, count)
                .with_context(|| format!("schedule of {}.{}", agent.name(), spec.name))?;
            jobs.push(Job {
                agent: agent.name().to_string(),
                tool: spec.name,
                cron,
                next,
            });
        }
    }
    Ok(jobs)
}

pub(crate) fn list_jobs(config: &AppConfig, count: usize) -> Result<()> {
    let deployment = deploy(config)?;
    let jobs = scheduled_jobs(&deployment.framework, Utc::now(), count)?;
    println!("── scheduled jobs ───────────────────────────────────");
    for job in &jobs {
        let next = job
            .next
            .iter()
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .collect::<Vec<_>>()
            .join(", ");
        println!("  {:<18} {:<34} {:<14} {next}", job.agent, job.tool, job.cron);
    }
    println!("  ({} jobs)", jobs.len());
    Ok(())
}
