//! Approval seam between the executor and whoever signs off on risky tools.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use lakeops_core::Payload;
use lakeops_tools::RiskLevel;

/// A request sent to the approver before a gated tool runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub agent_name: String,
    pub tool_name: String,
    pub risk_level: RiskLevel,
    pub args: Payload,
    pub risk_summary: String,
}

impl ApprovalRequest {
    pub fn new(agent_name: &str, tool_name: &str, risk_level: RiskLevel, args: Payload) -> Self {
        let mut detail: Vec<String> = args
            .iter()
            .take(2)
            .map(|(k, v)| {
                let rendered = v.to_string();
                let clipped: String = rendered.chars().take(60).collect();
                format!("{k}={clipped}")
            })
            .collect();
        if args.len() > 2 {
            detail.push(format!("(+{} more)", args.len() - 2));
        }
        let risk_summary = format!(
            "[{}] {agent_name}.{tool_name}: {}",
            risk_level.as_str().to_uppercase(),
            detail.join(", ")
        );
        Self {
            agent_name: agent_name.to_string(),
            tool_name: tool_name.to_string(),
            risk_level,
            args,
            risk_summary,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalDecision {
    Approve,
    Deny,
}

/// Decides whether a gated tool invocation may proceed.
#[async_trait]
pub trait ApprovalGate: Send + Sync {
    async fn review(&self, request: &ApprovalRequest) -> ApprovalDecision;
}

/// Approves everything.  The default gate.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

#[async_trait]
impl ApprovalGate for AutoApprove {
    async fn review(&self, _request: &ApprovalRequest) -> ApprovalDecision {
        ApprovalDecision::Approve
    }
}

pub type ApprovalSender = mpsc::Sender<(ApprovalRequest, oneshot::Sender<ApprovalDecision>)>;
pub type ApprovalReceiver = mpsc::Receiver<(ApprovalRequest, oneshot::Sender<ApprovalDecision>)>;

/// Create a new approval channel pair.
pub fn approval_channel() -> (ApprovalSender, ApprovalReceiver) {
    mpsc::channel(16)
}

/// Forwards each request over a channel and waits for the reply.
/// A closed channel or a dropped reply counts as a denial.
#[derive(Debug, Clone)]
pub struct ChannelApprovalGate {
    tx: ApprovalSender,
}

impl ChannelApprovalGate {
    pub fn new(tx: ApprovalSender) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl ApprovalGate for ChannelApprovalGate {
    async fn review(&self, request: &ApprovalRequest) -> ApprovalDecision {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send((request.clone(), reply_tx)).await.is_err() {
            warn!(tool = %request.tool_name, "approval channel closed; denying");
            return ApprovalDecision::Deny;
        }
        match reply_rx.await {
            Ok(decision) => decision,
            Err(_) => {
                warn!(tool = %request.tool_name, "approval response dropped; denying");
                ApprovalDecision::Deny
            }
        }
    }
}
