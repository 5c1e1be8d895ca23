//! Tool groups.  Each module exposes `register(&mut ToolRegistry, &ToolDeps)`
//! and an agent is assembled by calling the registrations it needs.

pub mod archival;
pub mod branching;
pub mod connections;
pub mod cost;
pub mod governance;
pub mod indexes;
pub mod maintenance;
pub mod metrics;
pub mod migration;
pub mod monitoring;
pub mod operations;
pub mod project;
pub mod sync;

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use serde_json::Value;

use lakeops_config::ThresholdsConfig;
use lakeops_core::{EventType, Payload, wrap_payload};
use lakeops_events::EventEmitter;
use lakeops_services::{Alert, Services, WriteReceipt};
use lakeops_tools::{Tool, ToolArgs, ToolHandler, ToolOutput};

/// What tool handlers capture: the collaborators, the owning agent's
/// emitter and the alert thresholds.
#[derive(Clone)]
pub struct ToolDeps {
    pub services: Services,
    pub emitter: EventEmitter,
    pub thresholds: Arc<ThresholdsConfig>,
}

impl ToolDeps {
    pub fn new(services: Services, emitter: EventEmitter, thresholds: ThresholdsConfig) -> Self {
        Self {
            services,
            emitter,
            thresholds: Arc::new(thresholds),
        }
    }

    /// Name of the agent the tools belong to.
    pub fn agent(&self) -> &str {
        self.emitter.source()
    }

    pub fn emit(&self, event_type: EventType, data: Value) {
        self.emitter.emit(event_type, wrap_payload(data));
    }

    /// Send an alert attributed to the owning agent.
    pub async fn alert(&self, alert: Alert) -> Result<Alert> {
        let alert = alert.source(self.agent());
        self.services.alerts.send_alert(alert).await
    }

    /// Append records to an ops table by logical key.
    pub async fn record(&self, table_key: &str, records: Vec<Value>) -> Result<WriteReceipt> {
        let records = records.into_iter().map(wrap_payload).collect();
        self.services.writer.write_metrics(table_key, records).await
    }

    pub async fn query(&self, project_id: &str, branch_id: &str, sql: &str) -> Result<Vec<Payload>> {
        self.services.db.execute_query(project_id, branch_id, sql).await
    }

    pub async fn statement(&self, project_id: &str, branch_id: &str, sql: &str) -> Result<u64> {
        self.services.db.execute_statement(project_id, branch_id, sql).await
    }
}

impl std::fmt::Debug for ToolDeps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDeps")
            .field("agent", &self.agent())
            .finish_non_exhaustive()
    }
}

/// A suspending tool whose handler receives its own clone of `deps`.
pub(crate) fn tool<F, Fut>(deps: &ToolDeps, name: &str, description: &str, handler: F) -> Tool
where
    F: Fn(ToolDeps, ToolArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ToolOutput>> + Send + 'static,
{
    let deps = deps.clone();
    Tool::new(
        name,
        description,
        ToolHandler::suspending(move |args| handler(deps.clone(), args)),
    )
}

pub(crate) fn done(value: Value) -> Result<ToolOutput> {
    Ok(ToolOutput::Completed(value))
}

/// Eight hex characters, for record and event ids.
pub(crate) fn short_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

pub(crate) fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

/// Argument, or the supplied default, as an owned string.
pub(crate) fn arg_or(args: &ToolArgs, key: &str, default: &str) -> String {
    args.str_or(key, default).to_string()
}
