use crate::alert::rules::Threshold;
use crate::alert::{
    AlertRule, AlertStore, CandidateAlert, CityModule, RuleCondition, RuleSet, Severity,
    StoreError,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};


/// Traffic congestion level as reported by intersection sensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CongestionLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// One domain reading, tagged by module. Keyed by the entity it belongs to;
/// detectors never aggregate across entities.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "module", rename_all = "snake_case")]
pub enum Reading {
    Traffic {
        intersection_id: String,
        congestion_level: CongestionLevel,
        #[serde(skip_serializing_if = "Option::is_none")]
        vehicle_count: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        location: Option<String>,
    },
    Environment {
        sensor_id: String,
        air_quality_index: f64,
        noise_level: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        location: Option<String>,
    },
    Waste {
        bin_id: String,
        fill_level: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        location: Option<String>,
    },
    Energy {
        grid_id: String,
        current_load: f64,
        capacity: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        location: Option<String>,
    },
    Emergency {
        incident_id: String,
        response_minutes: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        location: Option<String>,
    },
}

/// Metric value exposed by a reading for rule evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Number(f64),
    Text(String),
}

impl Reading {
    pub fn module(&self) -> CityModule {
        match self {
            Reading::Traffic { .. } => CityModule::Traffic,
            Reading::Environment { .. } => CityModule::Environment,
            Reading::Waste { .. } => CityModule::Waste,
            Reading::Energy { .. } => CityModule::Energy,
            Reading::Emergency { .. } => CityModule::Emergency,
        }
    }

    /// Domain-specific identifier scoping alert deduplication.
    pub fn entity_key(&self) -> &str {
        match self {
            Reading::Traffic { intersection_id, .. } => intersection_id,
            Reading::Environment { sensor_id, .. } => sensor_id,
            Reading::Waste { bin_id, .. } => bin_id,
            Reading::Energy { grid_id, .. } => grid_id,
            Reading::Emergency { incident_id, .. } => incident_id,
        }
    }

    pub fn location(&self) -> Option<&str> {
        match self {
            Reading::Traffic { location, .. }
            | Reading::Environment { location, .. }
            | Reading::Waste { location, .. }
            | Reading::Energy { location, .. }
            | Reading::Emergency { location, .. } => location.as_deref(),
        }
    }

    /// Named metrics this reading exposes to configured rules.
    pub fn metrics(&self) -> Vec<(&'static str, MetricValue)> {
        match self {
            Reading::Traffic {
                congestion_level,
                vehicle_count,
                ..
            } => {
                let level = match congestion_level {
                    CongestionLevel::Low => "low",
                    CongestionLevel::Medium => "medium",
                    CongestionLevel::High => "high",
                    CongestionLevel::Critical => "critical",
                };
                let mut metrics = vec![(
                    "congestion_level",
                    MetricValue::Text(level.to_string()),
                )];
                if let Some(count) = vehicle_count {
                    metrics.push(("vehicle_count", MetricValue::Number(*count)));
                }
                metrics
            }
            Reading::Environment {
                air_quality_index,
                noise_level,
                ..
            } => vec![
                ("aqi", MetricValue::Number(*air_quality_index)),
                ("noise_level", MetricValue::Number(*noise_level)),
            ],
            Reading::Waste { fill_level, .. } => {
                vec![("fill_level", MetricValue::Number(*fill_level))]
            }
            Reading::Energy {
                current_load,
                capacity,
                ..
            } => {
                let mut metrics = vec![
                    ("current_load", MetricValue::Number(*current_load)),
                    ("capacity", MetricValue::Number(*capacity)),
                ];
                if *capacity > 0.0 {
                    metrics.push((
                        "load_percent",
                        MetricValue::Number(current_load / capacity * 100.0),
                    ));
                }
                metrics
            }
            Reading::Emergency {
                response_minutes, ..
            } => vec![("response_minutes", MetricValue::Number(*response_minutes))],
        }
    }
}

/// Built-in severity bands. Total and non-overlapping per metric; values
/// default to the city's policy numbers and can be overridden in config.
#[derive(Debug, Clone, Deserialize)]
pub struct DetectorThresholds {
    #[serde(default = "default_energy_critical")]
    pub energy_critical_load_percent: f64,
    #[serde(default = "default_energy_high")]
    pub energy_high_load_percent: f64,
    #[serde(default = "default_aqi_critical")]
    pub aqi_critical: f64,
    #[serde(default = "default_aqi_high")]
    pub aqi_high: f64,
    #[serde(default = "default_noise_high")]
    pub noise_high_db: f64,
    #[serde(default = "default_waste_high")]
    pub waste_high_fill_percent: f64,
    #[serde(default = "default_waste_medium")]
    pub waste_medium_fill_percent: f64,
    #[serde(default = "default_emergency_sla")]
    pub emergency_sla_minutes: f64,
}

fn default_energy_critical() -> f64 {
    95.0
}

fn default_energy_high() -> f64 {
    85.0
}

fn default_aqi_critical() -> f64 {
    300.0
}

fn default_aqi_high() -> f64 {
    200.0
}

fn default_noise_high() -> f64 {
    85.0
}

fn default_waste_high() -> f64 {
    95.0
}

fn default_waste_medium() -> f64 {
    80.0
}

fn default_emergency_sla() -> f64 {
    15.0
}

impl Default for DetectorThresholds {
    fn default() -> Self {
        Self {
            energy_critical_load_percent: default_energy_critical(),
            energy_high_load_percent: default_energy_high(),
            aqi_critical: default_aqi_critical(),
            aqi_high: default_aqi_high(),
            noise_high_db: default_noise_high(),
            waste_high_fill_percent: default_waste_high(),
            waste_medium_fill_percent: default_waste_medium(),
            emergency_sla_minutes: default_emergency_sla(),
        }
    }
}

/// Unified threshold detector over all five domains.
///
/// `evaluate` is pure with respect to (reading, rules): the same inputs
/// produce the same candidate set, apart from the embedded timestamp.
/// Exactly one candidate per (entity, metric) pair per call; when a built-in
/// band and one or more rules match the same metric, the highest severity
/// wins.
pub struct ThresholdDetector {
    thresholds: DetectorThresholds,
}

impl ThresholdDetector {
    pub fn new(thresholds: DetectorThresholds) -> Self {
        Self { thresholds }
    }

    pub fn evaluate(&self, reading: &Reading, rules: &RuleSet) -> Vec<CandidateAlert> {
        // metric name -> winning candidate
        let mut best: HashMap<&'static str, CandidateAlert> = HashMap::new();

        for (metric, candidate) in self.band_candidates(reading) {
            merge_candidate(&mut best, metric, candidate);
        }

        // Sorting by rule id keeps equal-severity merges deterministic even
        // though rule evaluation order is unspecified.
        let mut enabled = rules.enabled_for(reading.module());
        enabled.sort_by_key(|r| r.id);
        for rule in &enabled {
            if let Some(candidate) = self.rule_candidate(reading, rule) {
                // Rule metrics are caller-defined strings; intern against the
                // reading's metric list to merge with band candidates.
                let metric = reading
                    .metrics()
                    .into_iter()
                    .map(|(name, _)| name)
                    .find(|name| *name == rule.metric.as_str());
                match metric {
                    Some(name) => merge_candidate(&mut best, name, candidate),
                    None => {
                        debug!(
                            rule = %rule.name,
                            metric = %rule.metric,
                            "Rule metric not present on reading, skipping"
                        );
                    }
                }
            }
        }

        best.into_values().collect()
    }

    /// Built-in band evaluation per domain. Thresholds from the original
    /// city policy: these mirror the per-module checks the operators ran
    /// before rules were configurable.
    fn band_candidates(&self, reading: &Reading) -> Vec<(&'static str, CandidateAlert)> {
        let t = &self.thresholds;
        let mut out = Vec::new();

        match reading {
            Reading::Energy {
                grid_id,
                current_load,
                capacity,
                ..
            } => {
                if *capacity <= 0.0 {
                    warn!(grid_id = %grid_id, "Energy reading with non-positive capacity, skipping");
                    return out;
                }
                let load_percent = current_load / capacity * 100.0;
                if load_percent > t.energy_critical_load_percent {
                    out.push((
                        "load_percent",
                        self.candidate(
                            reading,
                            "overload",
                            Severity::Critical,
                            format!("Critical overload in {}", grid_id),
                            Some(t.energy_critical_load_percent),
                            Some(load_percent),
                        ),
                    ));
                } else if load_percent > t.energy_high_load_percent {
                    out.push((
                        "load_percent",
                        self.candidate(
                            reading,
                            "high_load",
                            Severity::High,
                            format!("High load in {}", grid_id),
                            Some(t.energy_high_load_percent),
                            Some(load_percent),
                        ),
                    ));
                }
            }
            Reading::Environment {
                sensor_id,
                air_quality_index,
                noise_level,
                ..
            } => {
                if *air_quality_index > t.aqi_critical {
                    out.push((
                        "aqi",
                        self.candidate(
                            reading,
                            "air_quality",
                            Severity::Critical,
                            format!("Hazardous air quality detected at {}", sensor_id),
                            Some(t.aqi_critical),
                            Some(*air_quality_index),
                        ),
                    ));
                } else if *air_quality_index > t.aqi_high {
                    out.push((
                        "aqi",
                        self.candidate(
                            reading,
                            "air_quality",
                            Severity::High,
                            format!("Very unhealthy air quality at {}", sensor_id),
                            Some(t.aqi_high),
                            Some(*air_quality_index),
                        ),
                    ));
                }
                if *noise_level > t.noise_high_db {
                    out.push((
                        "noise_level",
                        self.candidate(
                            reading,
                            "noise",
                            Severity::High,
                            format!("Excessive noise level at {}", sensor_id),
                            Some(t.noise_high_db),
                            Some(*noise_level),
                        ),
                    ));
                }
            }
            Reading::Waste {
                bin_id, fill_level, ..
            } => {
                if *fill_level >= t.waste_high_fill_percent {
                    out.push((
                        "fill_level",
                        self.candidate(
                            reading,
                            "bin_full",
                            Severity::High,
                            format!("Waste bin {} is nearly overflowing", bin_id),
                            Some(t.waste_high_fill_percent),
                            Some(*fill_level),
                        ),
                    ));
                } else if *fill_level >= t.waste_medium_fill_percent {
                    out.push((
                        "fill_level",
                        self.candidate(
                            reading,
                            "bin_full",
                            Severity::Medium,
                            format!("Waste bin {} needs collection", bin_id),
                            Some(t.waste_medium_fill_percent),
                            Some(*fill_level),
                        ),
                    ));
                }
            }
            Reading::Traffic {
                intersection_id,
                congestion_level,
                ..
            } => match congestion_level {
                CongestionLevel::Critical => out.push((
                    "congestion_level",
                    self.candidate(
                        reading,
                        "congestion",
                        Severity::Critical,
                        format!("Gridlock at intersection {}", intersection_id),
                        None,
                        None,
                    ),
                )),
                CongestionLevel::High => out.push((
                    "congestion_level",
                    self.candidate(
                        reading,
                        "congestion",
                        Severity::High,
                        format!("Heavy congestion at intersection {}", intersection_id),
                        None,
                        None,
                    ),
                )),
                CongestionLevel::Low | CongestionLevel::Medium => {}
            },
            Reading::Emergency {
                incident_id,
                response_minutes,
                ..
            } => {
                let sla = t.emergency_sla_minutes;
                if *response_minutes > sla * 2.0 {
                    out.push((
                        "response_minutes",
                        self.candidate(
                            reading,
                            "response_sla",
                            Severity::Critical,
                            format!("Response time far over SLA for incident {}", incident_id),
                            Some(sla),
                            Some(*response_minutes),
                        ),
                    ));
                } else if *response_minutes > sla {
                    out.push((
                        "response_minutes",
                        self.candidate(
                            reading,
                            "response_sla",
                            Severity::High,
                            format!("Response time over SLA for incident {}", incident_id),
                            Some(sla),
                            Some(*response_minutes),
                        ),
                    ));
                }
            }
        }

        out
    }

    fn rule_candidate(&self, reading: &Reading, rule: &AlertRule) -> Option<CandidateAlert> {
        let value = reading
            .metrics()
            .into_iter()
            .find(|(name, _)| *name == rule.metric.as_str())
            .map(|(_, v)| v)?;

        let breached = match (&rule.condition, &rule.threshold, &value) {
            (RuleCondition::GreaterThan, Threshold::Number(t), MetricValue::Number(v)) => v > t,
            (RuleCondition::LessThan, Threshold::Number(t), MetricValue::Number(v)) => v < t,
            (RuleCondition::Equals, Threshold::Number(t), MetricValue::Number(v)) => v == t,
            (RuleCondition::Equals, Threshold::Text(t), MetricValue::Text(v)) => v == t,
            (RuleCondition::Contains, Threshold::Text(t), MetricValue::Text(v)) => v.contains(t.as_str()),
            _ => false,
        };
        if !breached {
            return None;
        }

        let (threshold_value, current_value) = match (&rule.threshold, &value) {
            (Threshold::Number(t), MetricValue::Number(v)) => (Some(*t), Some(*v)),
            _ => (None, None),
        };

        Some(CandidateAlert {
            module: reading.module(),
            alert_type: rule.metric.clone(),
            severity: rule.severity,
            message: format!(
                "{}: {} breached on {}",
                rule.name,
                rule.metric,
                reading.entity_key()
            ),
            entity_key: reading.entity_key().to_string(),
            threshold_value,
            current_value,
            location: reading.location().map(|l| l.to_string()),
            rule_id: Some(rule.id),
            created_by: None,
            triggered_at: Utc::now(),
        })
    }

    fn candidate(
        &self,
        reading: &Reading,
        alert_type: &str,
        severity: Severity,
        message: String,
        threshold_value: Option<f64>,
        current_value: Option<f64>,
    ) -> CandidateAlert {
        CandidateAlert {
            module: reading.module(),
            alert_type: alert_type.to_string(),
            severity,
            message,
            entity_key: reading.entity_key().to_string(),
            threshold_value,
            current_value,
            location: reading.location().map(|l| l.to_string()),
            rule_id: None,
            created_by: None,
            triggered_at: Utc::now(),
        }
    }
}

impl Default for ThresholdDetector {
    fn default() -> Self {
        Self::new(DetectorThresholds::default())
    }
}

/// Keep at most one candidate per metric; ties resolve to the higher
/// severity band, first writer wins on equal severity.
fn merge_candidate(
    best: &mut HashMap<&'static str, CandidateAlert>,
    metric: &'static str,
    candidate: CandidateAlert,
) {
    match best.get(metric) {
        Some(existing) if existing.severity >= candidate.severity => {}
        _ => {
            best.insert(metric, candidate);
        }
    }
}

/// Outcome of one reading through the pipeline.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct IngestOutcome {
    /// Alerts created
    pub raised: usize,
    /// Candidates dropped because an active alert already covers them
    pub deduplicated: usize,
}

/// Reading → detector → alert store. One pipeline instance serves all
/// domains; a failure on one candidate never blocks the others.
pub struct AlertPipeline {
    detector: ThresholdDetector,
    rules: Arc<RuleSet>,
    store: Arc<AlertStore>,
}

impl AlertPipeline {
    pub fn new(detector: ThresholdDetector, rules: Arc<RuleSet>, store: Arc<AlertStore>) -> Self {
        Self {
            detector,
            rules,
            store,
        }
    }

    pub fn rules(&self) -> &Arc<RuleSet> {
        &self.rules
    }

    pub fn ingest(&self, reading: &Reading) -> IngestOutcome {
        let mut outcome = IngestOutcome::default();
        for candidate in self.detector.evaluate(reading, &self.rules) {
            match self.store.create(candidate) {
                Ok(alert) => {
                    outcome.raised += 1;
                    debug!(alert_id = %alert.id, module = %alert.module, "Pipeline raised alert");
                }
                Err(StoreError::DuplicateActiveAlert) => {
                    // Repeated breach of an unresolved condition; the store
                    // dedups, the detector does not.
                    outcome.deduplicated += 1;
                }
                Err(e) => {
                    warn!(error = %e, module = %reading.module(), "Pipeline failed to create alert");
                }
            }
        }
        outcome
    }
}
