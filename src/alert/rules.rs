use super::{CityModule, Severity};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Comparison applied by a rule against the named metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleCondition {
    GreaterThan,
    LessThan,
    Equals,
    Contains,
}

/// Threshold a rule compares against. Numeric for the ordering conditions,
/// text for Contains (and Equals on string metrics).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Threshold {
    Number(f64),
    Text(String),
}

/// Operator-configured alert rule. Consumed only by threshold detectors;
/// the dispatcher reads `cooldown_minutes` and `notification_channels`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub module: CityModule,
    /// Metric this rule gates (e.g. "load_percent", "aqi", "fill_level").
    pub metric: String,
    pub condition: RuleCondition,
    pub threshold: Threshold,
    pub severity: Severity,
    pub enabled: bool,
    /// u64, so the cooldown invariant (≥ 0) holds by construction
    pub cooldown_minutes: u64,
    pub notification_channels: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields accepted when creating or updating a rule.
#[derive(Debug, Clone, Deserialize)]
pub struct RuleSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub module: CityModule,
    pub metric: String,
    pub condition: RuleCondition,
    pub threshold: Threshold,
    pub severity: Severity,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_cooldown")]
    pub cooldown_minutes: u64,
    #[serde(default = "default_channels")]
    pub notification_channels: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

fn default_cooldown() -> u64 {
    60
}

fn default_channels() -> Vec<String> {
    vec!["email".to_string()]
}

/// Rule configuration errors
#[derive(Debug, Clone, PartialEq)]
pub enum RuleError {
    NotFound,
    /// Malformed rule (empty name/metric, non-text Contains threshold, …)
    Invalid(String),
}

impl std::fmt::Display for RuleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuleError::NotFound => write!(f, "Alert rule not found"),
            RuleError::Invalid(msg) => write!(f, "Invalid alert rule: {}", msg),
        }
    }
}

impl std::error::Error for RuleError {}

/// Registry of configured alert rules.
///
/// Enabled rules with the same (module, condition, threshold) may coexist;
/// detectors evaluate them idempotently per breach, so order is irrelevant.
pub struct RuleSet {
    rules: Arc<DashMap<Uuid, AlertRule>>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self {
            rules: Arc::new(DashMap::new()),
        }
    }

    fn validate(spec: &RuleSpec) -> Result<(), RuleError> {
        if spec.name.trim().is_empty() {
            return Err(RuleError::Invalid("name must not be empty".to_string()));
        }
        if spec.metric.trim().is_empty() {
            return Err(RuleError::Invalid("metric must not be empty".to_string()));
        }
        match (&spec.condition, &spec.threshold) {
            (RuleCondition::GreaterThan | RuleCondition::LessThan, Threshold::Text(_)) => {
                Err(RuleError::Invalid(
                    "ordering conditions require a numeric threshold".to_string(),
                ))
            }
            (RuleCondition::Contains, Threshold::Number(_)) => Err(RuleError::Invalid(
                "contains requires a text threshold".to_string(),
            )),
            _ => Ok(()),
        }
    }

    pub fn create(&self, spec: RuleSpec, created_by: Option<String>) -> Result<AlertRule, RuleError> {
        Self::validate(&spec)?;
        let now = Utc::now();
        let rule = AlertRule {
            id: Uuid::now_v7(),
            name: spec.name,
            description: spec.description,
            module: spec.module,
            metric: spec.metric,
            condition: spec.condition,
            threshold: spec.threshold,
            severity: spec.severity,
            enabled: spec.enabled,
            cooldown_minutes: spec.cooldown_minutes,
            notification_channels: spec.notification_channels,
            created_by,
            created_at: now,
            updated_at: now,
        };
        self.rules.insert(rule.id, rule.clone());
        Ok(rule)
    }

    pub fn update(&self, id: Uuid, spec: RuleSpec) -> Result<AlertRule, RuleError> {
        Self::validate(&spec)?;
        let mut entry = self.rules.get_mut(&id).ok_or(RuleError::NotFound)?;
        entry.name = spec.name;
        entry.description = spec.description;
        entry.module = spec.module;
        entry.metric = spec.metric;
        entry.condition = spec.condition;
        entry.threshold = spec.threshold;
        entry.severity = spec.severity;
        entry.enabled = spec.enabled;
        entry.cooldown_minutes = spec.cooldown_minutes;
        entry.notification_channels = spec.notification_channels;
        entry.updated_at = Utc::now();
        Ok(entry.clone())
    }

    pub fn delete(&self, id: Uuid) -> Result<(), RuleError> {
        self.rules.remove(&id).map(|_| ()).ok_or(RuleError::NotFound)
    }

    pub fn get(&self, id: Uuid) -> Option<AlertRule> {
        self.rules.get(&id).map(|r| r.clone())
    }

    pub fn list(&self) -> Vec<AlertRule> {
        self.rules.iter().map(|r| r.clone()).collect()
    }

    /// Enabled rules for one module (the set a detector evaluates).
    pub fn enabled_for(&self, module: CityModule) -> Vec<AlertRule> {
        self.rules
            .iter()
            .filter(|r| r.enabled && r.module == module)
            .map(|r| r.clone())
            .collect()
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::new()
    }
}
