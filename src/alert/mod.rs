use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod rules;
pub mod store;

pub use rules::{AlertRule, RuleCondition, RuleError, RuleSet};
pub use store::{AlertFilter, AlertStatistics, AlertStore, DailyTrend, ResponseTimeStat, StoreError};

/// Monitored city domain. One detector and one monitoring room per module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CityModule {
    Traffic,
    Environment,
    Waste,
    Energy,
    Emergency,
}

impl CityModule {
    pub fn as_str(&self) -> &'static str {
        match self {
            CityModule::Traffic => "traffic",
            CityModule::Environment => "environment",
            CityModule::Waste => "waste",
            CityModule::Energy => "energy",
            CityModule::Emergency => "emergency",
        }
    }
}

impl std::fmt::Display for CityModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Alert severity. Immutable after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        write!(f, "{}", s)
    }
}

/// Alert lifecycle status. Transitions are monotonic in the ordering
/// `Active < Acknowledged < Resolved` (Acknowledged may be skipped).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Resolved,
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AlertStatus::Active => "active",
            AlertStatus::Acknowledged => "acknowledged",
            AlertStatus::Resolved => "resolved",
        };
        write!(f, "{}", s)
    }
}

/// Detector-produced alert awaiting store deduplication/creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateAlert {
    pub module: CityModule,
    pub alert_type: String,
    pub severity: Severity,
    pub message: String,
    /// Domain-specific identifier scoping deduplication (sensor id, grid id,
    /// bin id, intersection id, incident id).
    pub entity_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// The rule that produced this candidate, if any. Built-in severity
    /// bands carry no rule id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<Uuid>,
    /// `created_by` on the resulting alert; None for system-generated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    pub triggered_at: DateTime<Utc>,
}

/// The central alert entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// UUIDv7 identifier (time-ordered)
    pub id: Uuid,
    pub module: CityModule,
    pub alert_type: String,
    pub severity: Severity,
    pub message: String,
    pub entity_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub status: AlertStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<Uuid>,
    /// None for system-generated alerts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acknowledged_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Alert {
    fn from_candidate(candidate: CandidateAlert) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            module: candidate.module,
            alert_type: candidate.alert_type,
            severity: candidate.severity,
            message: candidate.message,
            entity_key: candidate.entity_key,
            threshold_value: candidate.threshold_value,
            current_value: candidate.current_value,
            location: candidate.location,
            status: AlertStatus::Active,
            rule_id: candidate.rule_id,
            created_by: candidate.created_by,
            acknowledged_by: None,
            acknowledged_at: None,
            resolved_by: None,
            resolved_at: None,
            resolution_notes: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Broadcast after every successful create/acknowledge/resolve. Consumed by
/// the room router and the notification dispatcher; emitted only once the
/// state change has been committed.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlertEvent {
    Created {
        alert: Alert,
    },
    Acknowledged {
        alert: Alert,
    },
    Resolved {
        alert: Alert,
    },
    /// One event per bulk operation; `alert_ids` are the ids actually changed.
    BulkAcknowledged {
        alert_ids: Vec<Uuid>,
        acknowledged_by: String,
        count: usize,
    },
}
