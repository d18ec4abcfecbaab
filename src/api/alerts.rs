use crate::alert::{
    Alert, AlertFilter, AlertRule, AlertStatistics, AlertStatus, AlertStore, CandidateAlert,
    CityModule, RuleSet, Severity,
};
use crate::alert::rules::RuleSpec;
use crate::api::ApiError;
use crate::auth::{require_capability, PrincipalSource};
use crate::notify::{NotificationSettings, SettingsStore};
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, put},
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Shared application state for the alert endpoints
#[derive(Clone)]
pub struct AlertAppState {
    pub store: Arc<AlertStore>,
    pub rules: Arc<RuleSet>,
    pub settings: Arc<SettingsStore>,
    pub source: Arc<dyn PrincipalSource>,
}

/// Create API router with alert lifecycle, rule, and settings endpoints
pub fn create_alert_router(state: AlertAppState) -> Router {
    Router::new()
        .route("/api/alerts", get(list_alerts).post(create_alert))
        .route("/api/alerts/statistics", get(alert_statistics))
        .route("/api/alerts/bulk-acknowledge", put(bulk_acknowledge))
        .route("/api/alerts/:id/acknowledge", put(acknowledge_alert))
        .route("/api/alerts/:id/resolve", put(resolve_alert))
        .route("/api/alerts/rules", get(list_rules).post(create_rule))
        .route(
            "/api/alerts/rules/:id",
            put(update_rule).delete(delete_rule),
        )
        .route(
            "/api/alerts/notifications/settings",
            get(get_settings).put(update_settings),
        )
        .with_state(Arc::new(state))
}

#[derive(Deserialize)]
struct AlertListQuery {
    status: Option<AlertStatus>,
    severity: Option<Severity>,
    module: Option<CityModule>,
    limit: Option<usize>,
}

#[derive(Serialize)]
struct AlertListResponse {
    alerts: Vec<Alert>,
    count: usize,
}

/// GET /api/alerts - List alerts, newest first
async fn list_alerts(
    State(state): State<Arc<AlertAppState>>,
    headers: HeaderMap,
    Query(query): Query<AlertListQuery>,
) -> Result<Json<AlertListResponse>, ApiError> {
    require_capability(&headers, &state.source, "alerts.read")?;

    let alerts = state.store.list(&AlertFilter {
        status: query.status,
        severity: query.severity,
        module: query.module,
        limit: query.limit,
    });
    let count = alerts.len();
    Ok(Json(AlertListResponse { alerts, count }))
}

#[derive(Deserialize)]
struct StatisticsQuery {
    days: Option<i64>,
}

#[derive(Serialize)]
struct StatisticsResponse {
    period_days: i64,
    #[serde(flatten)]
    statistics: AlertStatistics,
    timestamp: chrono::DateTime<Utc>,
}

/// GET /api/alerts/statistics - Distributions, response times and daily
/// trends over alerts created in the last `days` days (default 30)
async fn alert_statistics(
    State(state): State<Arc<AlertAppState>>,
    headers: HeaderMap,
    Query(query): Query<StatisticsQuery>,
) -> Result<Json<StatisticsResponse>, ApiError> {
    require_capability(&headers, &state.source, "alerts.read")?;

    let days = query.days.unwrap_or(30);
    if days <= 0 {
        return Err(ApiError::ValidationError(
            "days must be positive".to_string(),
        ));
    }
    let since = Utc::now() - chrono::Duration::days(days);
    Ok(Json(StatisticsResponse {
        period_days: days,
        statistics: state.store.statistics(since),
        timestamp: Utc::now(),
    }))
}

/// Operator-raised alert. Same dedup and event path as detector alerts.
#[derive(Deserialize)]
struct ManualAlertRequest {
    module: CityModule,
    alert_type: String,
    severity: Severity,
    message: String,
    entity_key: String,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    threshold_value: Option<f64>,
    #[serde(default)]
    current_value: Option<f64>,
}

/// POST /api/alerts - Raise a manual alert
async fn create_alert(
    State(state): State<Arc<AlertAppState>>,
    headers: HeaderMap,
    Json(request): Json<ManualAlertRequest>,
) -> Result<(StatusCode, Json<Alert>), ApiError> {
    let principal = require_capability(&headers, &state.source, "alerts.write")?;

    let alert = state.store.create(CandidateAlert {
        module: request.module,
        alert_type: request.alert_type,
        severity: request.severity,
        message: request.message,
        entity_key: request.entity_key,
        threshold_value: request.threshold_value,
        current_value: request.current_value,
        location: request.location,
        rule_id: None,
        created_by: Some(principal.id.clone()),
        triggered_at: Utc::now(),
    })?;

    info!(
        alert_id = %alert.id,
        module = %alert.module,
        created_by = %principal.id,
        "Manual alert created"
    );
    Ok((StatusCode::CREATED, Json(alert)))
}

/// PUT /api/alerts/:id/acknowledge
async fn acknowledge_alert(
    State(state): State<Arc<AlertAppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<Alert>, ApiError> {
    let principal = require_capability(&headers, &state.source, "alerts.write")?;
    let alert = state.store.acknowledge(id, &principal)?;
    Ok(Json(alert))
}

#[derive(Deserialize)]
struct ResolveRequest {
    #[serde(default)]
    resolution_notes: Option<String>,
}

/// PUT /api/alerts/:id/resolve
async fn resolve_alert(
    State(state): State<Arc<AlertAppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(request): Json<ResolveRequest>,
) -> Result<Json<Alert>, ApiError> {
    let principal = require_capability(&headers, &state.source, "alerts.write")?;
    let alert = state
        .store
        .resolve(id, &principal, request.resolution_notes)?;
    Ok(Json(alert))
}

#[derive(Deserialize)]
struct BulkAcknowledgeRequest {
    alert_ids: Vec<Uuid>,
}

#[derive(Serialize)]
struct BulkAcknowledgeResponse {
    acknowledged: usize,
    requested: usize,
}

/// PUT /api/alerts/bulk-acknowledge - Acknowledge every listed alert that is
/// still active; others are skipped, not errors
async fn bulk_acknowledge(
    State(state): State<Arc<AlertAppState>>,
    headers: HeaderMap,
    Json(request): Json<BulkAcknowledgeRequest>,
) -> Result<Json<BulkAcknowledgeResponse>, ApiError> {
    let principal = require_capability(&headers, &state.source, "alerts.write")?;

    if request.alert_ids.is_empty() {
        return Err(ApiError::ValidationError(
            "alert_ids must contain at least one id".to_string(),
        ));
    }

    let acknowledged = state.store.bulk_acknowledge(&request.alert_ids, &principal);
    Ok(Json(BulkAcknowledgeResponse {
        acknowledged,
        requested: request.alert_ids.len(),
    }))
}

#[derive(Serialize)]
struct RuleListResponse {
    rules: Vec<AlertRule>,
    count: usize,
}

/// GET /api/alerts/rules
async fn list_rules(
    State(state): State<Arc<AlertAppState>>,
    headers: HeaderMap,
) -> Result<Json<RuleListResponse>, ApiError> {
    require_capability(&headers, &state.source, "alerts.read")?;
    let rules = state.rules.list();
    let count = rules.len();
    Ok(Json(RuleListResponse { rules, count }))
}

/// POST /api/alerts/rules
async fn create_rule(
    State(state): State<Arc<AlertAppState>>,
    headers: HeaderMap,
    Json(spec): Json<RuleSpec>,
) -> Result<(StatusCode, Json<AlertRule>), ApiError> {
    let principal = require_capability(&headers, &state.source, "alerts.write")?;
    let rule = state.rules.create(spec, Some(principal.id.clone()))?;
    info!(rule_id = %rule.id, name = %rule.name, created_by = %principal.id, "Alert rule created");
    Ok((StatusCode::CREATED, Json(rule)))
}

/// PUT /api/alerts/rules/:id
async fn update_rule(
    State(state): State<Arc<AlertAppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(spec): Json<RuleSpec>,
) -> Result<Json<AlertRule>, ApiError> {
    require_capability(&headers, &state.source, "alerts.write")?;
    let rule = state.rules.update(id, spec)?;
    Ok(Json(rule))
}

#[derive(Serialize)]
struct RuleDeleteResponse {
    deleted: Uuid,
}

/// DELETE /api/alerts/rules/:id
async fn delete_rule(
    State(state): State<Arc<AlertAppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<RuleDeleteResponse>, ApiError> {
    require_capability(&headers, &state.source, "alerts.write")?;
    state.rules.delete(id)?;
    Ok(Json(RuleDeleteResponse { deleted: id }))
}

/// GET /api/alerts/notifications/settings - The caller's own settings
async fn get_settings(
    State(state): State<Arc<AlertAppState>>,
    headers: HeaderMap,
) -> Result<Json<NotificationSettings>, ApiError> {
    let principal = require_capability(&headers, &state.source, "alerts.read")?;
    Ok(Json(state.settings.get(&principal.id)))
}

/// PUT /api/alerts/notifications/settings
async fn update_settings(
    State(state): State<Arc<AlertAppState>>,
    headers: HeaderMap,
    Json(settings): Json<NotificationSettings>,
) -> Result<Json<NotificationSettings>, ApiError> {
    let principal = require_capability(&headers, &state.source, "alerts.write")?;
    state.settings.update(&principal.id, settings.clone());
    info!(principal = %principal.id, "Notification settings updated");
    Ok(Json(settings))
}
