use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use anyhow::{Context, Result};
use futures::future::try_join_all;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{info, instrument, warn};

use lakeops_agent::{Agent, AgentRole, CycleContext};
use lakeops_config::AppConfig;
use lakeops_core::{Event, EventType};
use lakeops_events::EventBus;

use crate::report::{CycleReport, PhaseReport};

const SEEDED_STATE: &[&str] = &["active_projects", "active_branches", "pending_approvals", "metrics_buffer"];

#[derive(Debug, Error)]
pub enum FrameworkError {
    #[error("agent `{0}` is already registered")]
    DuplicateAgent(String),
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owns the agents, the event bus and the shared state, and runs cycles.
pub struct Framework {
    agents: Vec<Box<dyn Agent>>,
    bus: Arc<EventBus>,
    shared: Mutex<HashMap<String, Value>>,
}

impl Framework {
    pub fn new(config: &AppConfig) -> Self {
        let shared = SEEDED_STATE
            .iter()
            .map(|key| {
                let empty = if *key == "pending_approvals" || *key == "metrics_buffer" {
                    json!([])
                } else {
                    json!({})
                };
                (key.to_string(), empty)
            })
            .collect();
        info!(mock = config.framework.mock_mode, host = %config.framework.workspace_host, "framework initialised");
        Self {
            agents: Vec::new(),
            bus: Arc::new(EventBus::new(config.events.log_capacity)),
            shared: Mutex::new(shared),
        }
    }

    // ── Agents ───────────────────────────────────────────────────────────────

    /// Attach `agent` to the bus, populate its tools and store it.  An agent
    /// with the same name is replaced in place.
    pub fn register_agent(&mut self, mut agent: Box<dyn Agent>) {
        agent.attach(self.bus.clone());
        agent.register_tools();
        let tools = agent.core().registry().len();
        match self.agents.iter().position(|a| a.name() == agent.name()) {
            Some(index) => {
                warn!(agent = agent.name(), "agent re-registered, replacing previous instance");
                self.agents[index] = agent;
            }
            None => {
                info!(agent = agent.name(), role = %agent.role(), tools, "agent registered");
                self.agents.push(agent);
            }
        }
    }

    pub fn try_register_agent(&mut self, agent: Box<dyn Agent>) -> Result<(), FrameworkError> {
        if self.agent(agent.name()).is_some() {
            return Err(FrameworkError::DuplicateAgent(agent.name().to_string()));
        }
        self.register_agent(agent);
        Ok(())
    }

    pub fn agent(&self, name: &str) -> Option<&dyn Agent> {
        self.agents.iter().find(|a| a.name() == name).map(|a| &**a)
    }

    /// Names in registration order.
    pub fn agent_names(&self) -> Vec<&str> {
        self.agents.iter().map(|a| a.name()).collect()
    }

    pub fn agents(&self) -> impl Iterator<Item = &dyn Agent> {
        self.agents.iter().map(|a| &**a)
    }

    // ── Events ───────────────────────────────────────────────────────────────

    pub fn subscribe<F>(&self, event_type: EventType, handler: F)
    where
        F: Fn(&Event) -> Result<()> + Send + Sync + 'static,
    {
        self.bus.subscribe(event_type, handler);
    }

    pub fn dispatch_event(&self, event: Event) {
        self.bus.dispatch(event);
    }

    pub fn event_log(&self) -> Vec<Event> {
        self.bus.log()
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    // ── Shared state ─────────────────────────────────────────────────────────

    pub fn get_shared_state(&self, key: &str) -> Option<Value> {
        lock(&self.shared).get(key).cloned()
    }

    pub fn set_shared_state(&self, key: impl Into<String>, value: impl Into<Value>) {
        lock(&self.shared).insert(key.into(), value.into());
    }

    // ── Cycle ────────────────────────────────────────────────────────────────

    /// One automation pass.
    ///
    /// Provisioning-role agents run first, one after another, in registration
    /// order.  Every other agent then runs concurrently.  An `Err` from any
    /// agent's own sequencing aborts the cycle; in the concurrent phase the
    /// sibling agents are dropped mid-run.
    #[instrument(skip_all, fields(project = %ctx.project_id()))]
    pub async fn run_full_cycle(&self, ctx: &CycleContext) -> Result<CycleReport> {
        let started = Instant::now();
        let events_before = self.bus.dispatched_total();
        let mut results = BTreeMap::new();
        let mut phases = Vec::new();
        info!(agents = self.agents.len(), "cycle started");

        let provisioning: Vec<&dyn Agent> = self
            .agents()
            .filter(|a| a.role() == AgentRole::Provisioning)
            .collect();
        if !provisioning.is_empty() {
            let phase_started = Instant::now();
            for agent in &provisioning {
                let out = agent
                    .run_cycle(ctx)
                    .await
                    .with_context(|| format!("agent {} aborted the cycle", agent.name()))?;
                results.insert(agent.name().to_string(), out);
            }
            phases.push(phase("provisioning", &provisioning, phase_started));
        }

        let concurrent: Vec<&dyn Agent> = self
            .agents()
            .filter(|a| a.role() != AgentRole::Provisioning)
            .collect();
        if !concurrent.is_empty() {
            let phase_started = Instant::now();
            let outputs = try_join_all(concurrent.iter().map(|agent| async move {
                let out = agent
                    .run_cycle(ctx)
                    .await
                    .with_context(|| format!("agent {} aborted the cycle", agent.name()))?;
                Ok::<_, anyhow::Error>((agent.name().to_string(), out))
            }))
            .await?;
            results.extend(outputs);
            let label = if concurrent.len() > 1 { "performance+health" } else { concurrent[0].role().as_str() };
            phases.push(phase(label, &concurrent, phase_started));
        }

        let agent_summaries: BTreeMap<_, _> = self
            .agents()
            .map(|a| (a.name().to_string(), a.results_summary()))
            .collect();
        let report = CycleReport {
            results,
            phases,
            duration_seconds: started.elapsed().as_secs_f64(),
            events: self.bus.dispatched_total() - events_before,
            agent_summaries,
        };
        for summary in report.agent_summaries.values() {
            info!(
                agent = %summary.agent,
                successful = summary.successful,
                total = summary.total_tasks,
                "agent summary"
            );
        }
        info!(
            duration_secs = report.duration_seconds,
            tasks = report.total_tasks(),
            events = report.events,
            "cycle complete"
        );
        Ok(report)
    }
}

fn phase(label: &str, agents: &[&dyn Agent], started: Instant) -> PhaseReport {
    PhaseReport {
        label: label.to_string(),
        agents: agents.iter().map(|a| a.name().to_string()).collect(),
        duration_seconds: started.elapsed().as_secs_f64(),
    }
}
