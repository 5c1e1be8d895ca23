use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Payload;

/// Closed set of inter-agent notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    BranchCreated,
    BranchDeleted,
    BranchProtected,
    SchemaMigrated,
    ThresholdBreached,
    VacuumCompleted,
    IndexRecommendation,
    SyncDriftDetected,
    ColdDataArchived,
    SelfHealExecuted,
    ProvisioningComplete,
}

impl EventType {
    pub const ALL: [EventType; 11] = [
        Self::BranchCreated,
        Self::BranchDeleted,
        Self::BranchProtected,
        Self::SchemaMigrated,
        Self::ThresholdBreached,
        Self::VacuumCompleted,
        Self::IndexRecommendation,
        Self::SyncDriftDetected,
        Self::ColdDataArchived,
        Self::SelfHealExecuted,
        Self::ProvisioningComplete,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::BranchCreated => "branch_created",
            Self::BranchDeleted => "branch_deleted",
            Self::BranchProtected => "branch_protected",
            Self::SchemaMigrated => "schema_migrated",
            Self::ThresholdBreached => "threshold_breached",
            Self::VacuumCompleted => "vacuum_completed",
            Self::IndexRecommendation => "index_recommendation",
            Self::SyncDriftDetected => "sync_drift_detected",
            Self::ColdDataArchived => "cold_data_archived",
            Self::SelfHealExecuted => "self_heal_executed",
            Self::ProvisioningComplete => "provisioning_complete",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_type: EventType,
    pub source_agent: String,
    #[serde(default)]
    pub data: Payload,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(event_type: EventType, source_agent: impl Into<String>, data: Payload) -> Self {
        Self {
            event_type,
            source_agent: source_agent.into(),
            data,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_names_match_as_str() {
        for ty in EventType::ALL {
            let json = serde_json::to_string(&ty).unwrap();
            assert_eq!(json, format!("\"{}\"", ty.as_str()));
        }
    }

    #[test]
    fn all_lists_every_variant_once() {
        let mut seen = EventType::ALL.to_vec();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 11);
    }

    #[test]
    fn new_event_is_stamped_now() {
        let before = Utc::now();
        let evt = Event::new(EventType::VacuumCompleted, "PerformanceAgent", Payload::new());
        let after = Utc::now();
        assert!(evt.timestamp >= before && evt.timestamp <= after);
        assert_eq!(evt.source_agent, "PerformanceAgent");
    }
}
