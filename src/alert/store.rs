use super::{Alert, AlertEvent, AlertStatus, CandidateAlert, CityModule, Severity};
use crate::auth::Principal;
use chrono::{DateTime, NaiveDate, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

/// Alert store errors (all recoverable, returned to the caller)
#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    /// Alert identifier unknown
    NotFound,
    /// State-machine rule violated (mutation on a resolved alert)
    InvalidTransition {
        from: AlertStatus,
        operation: &'static str,
    },
    /// An active alert already exists for the same (module, type, entity)
    DuplicateActiveAlert,
    /// Malformed input to create
    Validation(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound => write!(f, "Alert not found"),
            StoreError::InvalidTransition { from, operation } => {
                write!(f, "Cannot {} an alert in status {}", operation, from)
            }
            StoreError::DuplicateActiveAlert => {
                write!(f, "An active alert already exists for this entity")
            }
            StoreError::Validation(msg) => write!(f, "Invalid alert: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

/// Listing filter for the alert query surface.
#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub status: Option<AlertStatus>,
    pub severity: Option<Severity>,
    pub module: Option<CityModule>,
    pub limit: Option<usize>,
}

/// Dedup key for active alerts.
type ActiveKey = (CityModule, String, String);

/// Owns the alert entity's lifecycle.
///
/// Concurrency: `create` holds the active-index shard entry while inserting
/// the alert record, making the uniqueness check atomic with the write.
/// Acknowledge/resolve mutate the alert under its shard guard, so racing
/// mutations on one alert serialize and the loser observes the idempotent
/// no-op or `InvalidTransition`. The guard is dropped before the active
/// index is touched and before any event is sent — no path holds the alerts
/// shard while waiting on the active shard, and no lock is held across
/// broadcast.
pub struct AlertStore {
    alerts: Arc<DashMap<Uuid, Alert>>,
    /// (module, alert_type, entity_key) -> id of the currently active alert
    active: Arc<DashMap<ActiveKey, Uuid>>,
    event_tx: broadcast::Sender<AlertEvent>,
}

impl AlertStore {
    pub fn new(event_capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(event_capacity);
        Self {
            alerts: Arc::new(DashMap::new()),
            active: Arc::new(DashMap::new()),
            event_tx,
        }
    }

    /// Subscribe to committed alert events.
    pub fn subscribe(&self) -> broadcast::Receiver<AlertEvent> {
        self.event_tx.subscribe()
    }

    /// Create an alert from a candidate.
    ///
    /// Fails with `DuplicateActiveAlert` if an active alert already exists
    /// for the same (module, type, entity) tuple. The check-and-insert is
    /// atomic: two racing creates on the same key resolve to exactly one
    /// record.
    pub fn create(&self, candidate: CandidateAlert) -> Result<Alert, StoreError> {
        if candidate.message.trim().is_empty() {
            return Err(StoreError::Validation("message must not be empty".to_string()));
        }
        if candidate.entity_key.trim().is_empty() {
            return Err(StoreError::Validation(
                "entity_key must not be empty".to_string(),
            ));
        }

        let key = (
            candidate.module,
            candidate.alert_type.clone(),
            candidate.entity_key.clone(),
        );

        let alert = match self.active.entry(key) {
            Entry::Occupied(_) => return Err(StoreError::DuplicateActiveAlert),
            Entry::Vacant(vacant) => {
                let alert = Alert::from_candidate(candidate);
                self.alerts.insert(alert.id, alert.clone());
                vacant.insert(alert.id);
                alert
            }
        };

        info!(
            alert_id = %alert.id,
            module = %alert.module,
            severity = %alert.severity,
            entity = %alert.entity_key,
            "Alert created"
        );
        let _ = self.event_tx.send(AlertEvent::Created {
            alert: alert.clone(),
        });
        Ok(alert)
    }

    /// Acknowledge an alert.
    ///
    /// Idempotent from Active and Acknowledged (re-acknowledging does not
    /// change `acknowledged_at`); `InvalidTransition` from Resolved.
    pub fn acknowledge(&self, alert_id: Uuid, principal: &Principal) -> Result<Alert, StoreError> {
        let (alert, changed) = {
            let mut entry = self.alerts.get_mut(&alert_id).ok_or(StoreError::NotFound)?;
            match entry.status {
                AlertStatus::Resolved => {
                    return Err(StoreError::InvalidTransition {
                        from: AlertStatus::Resolved,
                        operation: "acknowledge",
                    })
                }
                AlertStatus::Acknowledged => (entry.clone(), false),
                AlertStatus::Active => {
                    let now = Utc::now();
                    entry.status = AlertStatus::Acknowledged;
                    entry.acknowledged_by = Some(principal.id.clone());
                    entry.acknowledged_at = Some(now);
                    entry.updated_at = now;
                    (entry.clone(), true)
                }
            }
        };

        if changed {
            // Only active alerts block new candidates; free the key now that
            // this one has left Active.
            self.release_active_key(&alert);
            info!(alert_id = %alert.id, by = %principal.id, "Alert acknowledged");
            let _ = self.event_tx.send(AlertEvent::Acknowledged {
                alert: alert.clone(),
            });
        }
        Ok(alert)
    }

    /// Remove the active-index entry for this alert, if it still points at
    /// it. A newer active alert may have taken the key in the meantime.
    fn release_active_key(&self, alert: &Alert) {
        let key = (
            alert.module,
            alert.alert_type.clone(),
            alert.entity_key.clone(),
        );
        self.active.remove_if(&key, |_, id| *id == alert.id);
    }

    /// Resolve an alert. Valid from Active or Acknowledged; fails with
    /// `InvalidTransition` from Resolved.
    pub fn resolve(
        &self,
        alert_id: Uuid,
        principal: &Principal,
        notes: Option<String>,
    ) -> Result<Alert, StoreError> {
        let alert = {
            let mut entry = self.alerts.get_mut(&alert_id).ok_or(StoreError::NotFound)?;
            if entry.status == AlertStatus::Resolved {
                return Err(StoreError::InvalidTransition {
                    from: AlertStatus::Resolved,
                    operation: "resolve",
                });
            }
            let now = Utc::now();
            entry.status = AlertStatus::Resolved;
            entry.resolved_by = Some(principal.id.clone());
            entry.resolved_at = Some(now);
            entry.resolution_notes = notes;
            entry.updated_at = now;
            entry.clone()
        };

        // Guard dropped above; the key is free for new candidates from here.
        self.release_active_key(&alert);

        info!(alert_id = %alert.id, by = %principal.id, "Alert resolved");
        let _ = self.event_tx.send(AlertEvent::Resolved {
            alert: alert.clone(),
        });
        Ok(alert)
    }

    /// Acknowledge every currently-active alert in `alert_ids`.
    ///
    /// Silently skips unknown, acknowledged and resolved alerts; returns the
    /// count actually changed. Never errors on a partially-invalid batch.
    pub fn bulk_acknowledge(&self, alert_ids: &[Uuid], principal: &Principal) -> usize {
        let mut changed = Vec::new();
        for &alert_id in alert_ids {
            let snapshot = {
                let Some(mut entry) = self.alerts.get_mut(&alert_id) else {
                    debug!(alert_id = %alert_id, "Bulk acknowledge: alert not found, skipping");
                    continue;
                };
                if entry.status != AlertStatus::Active {
                    continue;
                }
                let now = Utc::now();
                entry.status = AlertStatus::Acknowledged;
                entry.acknowledged_by = Some(principal.id.clone());
                entry.acknowledged_at = Some(now);
                entry.updated_at = now;
                entry.clone()
            };
            self.release_active_key(&snapshot);
            changed.push(alert_id);
        }

        if !changed.is_empty() {
            info!(count = changed.len(), by = %principal.id, "Alerts bulk acknowledged");
            let _ = self.event_tx.send(AlertEvent::BulkAcknowledged {
                alert_ids: changed.clone(),
                acknowledged_by: principal.id.clone(),
                count: changed.len(),
            });
        }
        changed.len()
    }

    pub fn get(&self, alert_id: Uuid) -> Option<Alert> {
        self.alerts.get(&alert_id).map(|a| a.clone())
    }

    /// List alerts matching the filter, newest first.
    pub fn list(&self, filter: &AlertFilter) -> Vec<Alert> {
        let mut matched: Vec<Alert> = self
            .alerts
            .iter()
            .filter(|a| {
                filter.status.map_or(true, |s| a.status == s)
                    && filter.severity.map_or(true, |s| a.severity == s)
                    && filter.module.map_or(true, |m| a.module == m)
            })
            .map(|a| a.clone())
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            matched.truncate(limit);
        }
        matched
    }

    /// Number of alerts currently in Active status.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Aggregate counts, response times and daily trends over alerts
    /// created at or after `since`.
    pub fn statistics(&self, since: DateTime<Utc>) -> AlertStatistics {
        let mut status_distribution: BTreeMap<String, usize> = BTreeMap::new();
        let mut severity_distribution: BTreeMap<String, usize> = BTreeMap::new();
        let mut module_distribution: BTreeMap<String, usize> = BTreeMap::new();
        // severity -> (total response minutes, acknowledged count)
        let mut response: BTreeMap<String, (Severity, f64, usize)> = BTreeMap::new();
        let mut trends: BTreeMap<NaiveDate, DailyTrend> = BTreeMap::new();
        let mut total_alerts = 0usize;

        for alert in self.alerts.iter() {
            if alert.created_at < since {
                continue;
            }
            total_alerts += 1;
            *status_distribution
                .entry(alert.status.to_string())
                .or_insert(0) += 1;
            *severity_distribution
                .entry(alert.severity.to_string())
                .or_insert(0) += 1;
            *module_distribution
                .entry(alert.module.to_string())
                .or_insert(0) += 1;

            if let Some(acknowledged_at) = alert.acknowledged_at {
                let minutes =
                    (acknowledged_at - alert.created_at).num_milliseconds() as f64 / 60_000.0;
                let entry = response
                    .entry(alert.severity.to_string())
                    .or_insert((alert.severity, 0.0, 0));
                entry.1 += minutes;
                entry.2 += 1;
            }

            let day = trends
                .entry(alert.created_at.date_naive())
                .or_insert_with(|| DailyTrend {
                    date: alert.created_at.date_naive(),
                    total_alerts: 0,
                    critical_alerts: 0,
                    high_alerts: 0,
                });
            day.total_alerts += 1;
            match alert.severity {
                Severity::Critical => day.critical_alerts += 1,
                Severity::High => day.high_alerts += 1,
                _ => {}
            }
        }

        AlertStatistics {
            total_alerts,
            status_distribution,
            severity_distribution,
            module_distribution,
            response_times: response
                .into_values()
                .map(|(severity, total_minutes, count)| ResponseTimeStat {
                    severity,
                    avg_response_minutes: total_minutes / count as f64,
                    count,
                })
                .collect(),
            daily_trends: trends.into_values().collect(),
        }
    }
}

/// Aggregate view over alerts created within a reporting window.
#[derive(Debug, Clone, Serialize)]
pub struct AlertStatistics {
    pub total_alerts: usize,
    pub status_distribution: BTreeMap<String, usize>,
    pub severity_distribution: BTreeMap<String, usize>,
    pub module_distribution: BTreeMap<String, usize>,
    pub response_times: Vec<ResponseTimeStat>,
    /// One entry per calendar day with at least one alert, oldest first.
    pub daily_trends: Vec<DailyTrend>,
}

/// Average create-to-acknowledge latency for one severity level.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseTimeStat {
    pub severity: Severity,
    pub avg_response_minutes: f64,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DailyTrend {
    pub date: NaiveDate,
    pub total_alerts: usize,
    pub critical_alerts: usize,
    pub high_alerts: usize,
}
