use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::{Mutex, PoisonError};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use lakeops_core::Payload;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }

    /// Delivery channels, most urgent first.
    pub fn channels(self) -> &'static [AlertChannel] {
        match self {
            Self::Critical => &[AlertChannel::Slack, AlertChannel::Pagerduty, AlertChannel::Log],
            Self::Warning => &[AlertChannel::Slack, AlertChannel::Log],
            Self::Info => &[AlertChannel::Log],
        }
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertChannel {
    Slack,
    Pagerduty,
    Email,
    Dbsql,
    Log,
}

impl AlertChannel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Slack => "slack",
            Self::Pagerduty => "pagerduty",
            Self::Email => "email",
            Self::Dbsql => "dbsql",
            Self::Log => "log",
        }
    }
}

// ── Alert ────────────────────────────────────────────────────────────────────

/// A metric breach or operational condition worth telling a human about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub alert_id: String,
    pub severity: AlertSeverity,
    pub title: String,
    pub message: String,
    pub source_agent: String,
    pub metric_name: String,
    pub metric_value: f64,
    pub threshold: Option<f64>,
    pub project_id: String,
    pub branch_id: String,
    /// Filled in by the sender.
    pub channels_sent: Vec<AlertChannel>,
    /// Standard operating procedure triggered by the alert, if any.
    pub sop_action: Option<String>,
    pub auto_remediated: bool,
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    pub fn new(severity: AlertSeverity, title: impl Into<String>, message: impl Into<String>) -> Self {
        let mut alert_id = uuid::Uuid::new_v4().simple().to_string();
        alert_id.truncate(8);
        Self {
            alert_id,
            severity,
            title: title.into(),
            message: message.into(),
            source_agent: String::new(),
            metric_name: String::new(),
            metric_value: 0.0,
            threshold: None,
            project_id: String::new(),
            branch_id: String::new(),
            channels_sent: Vec::new(),
            sop_action: None,
            auto_remediated: false,
            timestamp: Utc::now(),
        }
    }

    pub fn source(mut self, agent: impl Into<String>) -> Self {
        self.source_agent = agent.into();
        self
    }

    pub fn metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metric_name = name.into();
        self.metric_value = value;
        self
    }

    pub fn threshold(mut self, threshold: f64) -> Self {
        self.threshold = Some(threshold);
        self
    }

    pub fn scope(mut self, project_id: impl Into<String>, branch_id: impl Into<String>) -> Self {
        self.project_id = project_id.into();
        self.branch_id = branch_id.into();
        self
    }

    pub fn sop(mut self, action: impl Into<String>) -> Self {
        self.sop_action = Some(action.into());
        self
    }

    pub fn auto_remediated(mut self) -> Self {
        self.auto_remediated = true;
        self
    }

    pub fn to_payload(&self) -> Payload {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Payload::new(),
        }
    }
}

// ── Sender ───────────────────────────────────────────────────────────────────

#[async_trait]
pub trait AlertSender: Send + Sync {
    /// Deliver `alert` and return it with `channels_sent` filled in.
    async fn send_alert(&self, alert: Alert) -> Result<Alert>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertSummary {
    pub total_alerts: usize,
    pub by_severity: BTreeMap<String, usize>,
    pub auto_remediated: usize,
    /// Fraction of alerts that were auto-remediated; `None` with no alerts.
    pub auto_remediation_rate: Option<f64>,
}

/// Routes alerts to channels by severity and keeps a bounded history.
///
/// Channel delivery is a log line per channel; webhook and paging
/// integrations sit behind the same trait.
pub struct RoutingAlertSender {
    history: Mutex<VecDeque<Alert>>,
    capacity: usize,
}

impl RoutingAlertSender {
    pub fn new(capacity: usize) -> Self {
        Self {
            history: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    pub fn history(&self) -> Vec<Alert> {
        self.lock().iter().cloned().collect()
    }

    pub fn summary(&self) -> AlertSummary {
        let history = self.lock();
        let mut by_severity = BTreeMap::new();
        for alert in history.iter() {
            *by_severity.entry(alert.severity.as_str().to_string()).or_insert(0) += 1;
        }
        let total = history.len();
        let auto_remediated = history.iter().filter(|a| a.auto_remediated).count();
        AlertSummary {
            total_alerts: total,
            by_severity,
            auto_remediated,
            auto_remediation_rate: (total > 0).then(|| auto_remediated as f64 / total as f64),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Alert>> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for RoutingAlertSender {
    fn default() -> Self {
        Self::new(1_000)
    }
}

#[async_trait]
impl AlertSender for RoutingAlertSender {
    async fn send_alert(&self, mut alert: Alert) -> Result<Alert> {
        for channel in alert.severity.channels() {
            info!(channel = channel.as_str(), title = %alert.title, "{}", alert.message);
            alert.channels_sent.push(*channel);
        }
        let routed = alert
            .channels_sent
            .iter()
            .map(|c| c.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        info!(
            severity = %alert.severity,
            agent = %alert.source_agent,
            "[ALERT {}] {} -> {routed}",
            alert.severity.as_str().to_uppercase(),
            alert.title
        );

        let mut history = self.lock();
        if self.capacity > 0 && history.len() >= self.capacity {
            history.pop_front();
        }
        history.push_back(alert.clone());
        Ok(alert)
    }
}
