// Integration tests for the /api/alerts surface: auth enforcement, the
// lifecycle endpoints, rule CRUD, and notification settings.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use citypulse::alert::{AlertStore, RuleSet};
use citypulse::api::{create_alert_router, AlertAppState};
use citypulse::auth::{PrincipalSource, Role, TokenDirectory};
use citypulse::notify::SettingsStore;
use std::sync::Arc;
use tower::ServiceExt;

struct TestApp {
    router: Router,
    admin_token: String,
    coordinator_token: String,
    traffic_token: String,
}

fn make_app() -> TestApp {
    let directory = Arc::new(TokenDirectory::new());
    let admin_token = directory.register("admin", Role::Admin).token;
    let coordinator_token = directory
        .register("coordinator", Role::EmergencyCoordinator)
        .token;
    let traffic_token = directory.register("officer", Role::TrafficOfficer).token;

    let source: Arc<dyn PrincipalSource> = directory;
    let state = AlertAppState {
        store: Arc::new(AlertStore::new(64)),
        rules: Arc::new(RuleSet::new()),
        settings: Arc::new(SettingsStore::new()),
        source,
    };
    TestApp {
        router: create_alert_router(state),
        admin_token,
        coordinator_token,
        traffic_token,
    }
}

fn request(method: &str, uri: &str, token: Option<&str>, body: Option<serde_json::Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {}", token));
    }
    match body {
        Some(json) => builder
            .header("Content-Type", "application/json")
            .body(Body::from(serde_json::to_vec(&json).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn manual_alert(entity: &str) -> serde_json::Value {
    serde_json::json!({
        "module": "energy",
        "alert_type": "overload",
        "severity": "high",
        "message": "Grid load above threshold",
        "entity_key": entity,
    })
}

// ── Auth enforcement ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_list_without_token_returns_401() {
    let app = make_app();
    let resp = app
        .router
        .oneshot(request("GET", "/api/alerts", None, None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_unknown_token_returns_401() {
    let app = make_app();
    let resp = app
        .router
        .oneshot(request("GET", "/api/alerts", Some("bogus"), None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_traffic_officer_cannot_create_alert() {
    let app = make_app();
    let resp = app
        .router
        .oneshot(request(
            "POST",
            "/api/alerts",
            Some(&app.traffic_token),
            Some(manual_alert("grid-7")),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_traffic_officer_cannot_list_alerts() {
    // alerts.read is not in the traffic officer capability set
    let app = make_app();
    let resp = app
        .router
        .oneshot(request("GET", "/api/alerts", Some(&app.traffic_token), None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

// ── Lifecycle ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_create_acknowledge_resolve_flow() {
    let app = make_app();

    let resp = app
        .router
        .clone()
        .oneshot(request(
            "POST",
            "/api/alerts",
            Some(&app.coordinator_token),
            Some(manual_alert("grid-1")),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let alert = json_body(resp).await;
    assert_eq!(alert["status"], "active");
    assert_eq!(alert["created_by"], "coordinator");
    let id = alert["id"].as_str().unwrap().to_string();

    let resp = app
        .router
        .clone()
        .oneshot(request(
            "PUT",
            &format!("/api/alerts/{}/acknowledge", id),
            Some(&app.coordinator_token),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let acked = json_body(resp).await;
    assert_eq!(acked["status"], "acknowledged");
    assert_eq!(acked["acknowledged_by"], "coordinator");

    let resp = app
        .router
        .clone()
        .oneshot(request(
            "PUT",
            &format!("/api/alerts/{}/resolve", id),
            Some(&app.admin_token),
            Some(serde_json::json!({"resolution_notes": "rebalanced feeders"})),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let resolved = json_body(resp).await;
    assert_eq!(resolved["status"], "resolved");
    assert_eq!(resolved["resolved_by"], "admin");
    assert_eq!(resolved["resolution_notes"], "rebalanced feeders");
}

#[tokio::test]
async fn test_duplicate_active_alert_returns_409() {
    let app = make_app();
    let first = app
        .router
        .clone()
        .oneshot(request(
            "POST",
            "/api/alerts",
            Some(&app.coordinator_token),
            Some(manual_alert("grid-1")),
        ))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::CREATED);

    let second = app
        .router
        .clone()
        .oneshot(request(
            "POST",
            "/api/alerts",
            Some(&app.coordinator_token),
            Some(manual_alert("grid-1")),
        ))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_resolve_resolved_alert_returns_409() {
    let app = make_app();
    let resp = app
        .router
        .clone()
        .oneshot(request(
            "POST",
            "/api/alerts",
            Some(&app.coordinator_token),
            Some(manual_alert("grid-1")),
        ))
        .await
        .unwrap();
    let id = json_body(resp).await["id"].as_str().unwrap().to_string();

    for expected in [StatusCode::OK, StatusCode::CONFLICT] {
        let resp = app
            .router
            .clone()
            .oneshot(request(
                "PUT",
                &format!("/api/alerts/{}/resolve", id),
                Some(&app.coordinator_token),
                Some(serde_json::json!({})),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), expected);
    }
}

#[tokio::test]
async fn test_acknowledge_unknown_alert_returns_404() {
    let app = make_app();
    let resp = app
        .router
        .oneshot(request(
            "PUT",
            &format!("/api/alerts/{}/acknowledge", uuid::Uuid::now_v7()),
            Some(&app.coordinator_token),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_list_filters_by_status() {
    let app = make_app();
    for entity in ["grid-1", "grid-2"] {
        app.router
            .clone()
            .oneshot(request(
                "POST",
                "/api/alerts",
                Some(&app.coordinator_token),
                Some(manual_alert(entity)),
            ))
            .await
            .unwrap();
    }

    let resp = app
        .router
        .clone()
        .oneshot(request(
            "GET",
            "/api/alerts?status=active&module=energy",
            Some(&app.coordinator_token),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["count"], 2);

    let resp = app
        .router
        .oneshot(request(
            "GET",
            "/api/alerts?status=resolved",
            Some(&app.coordinator_token),
            None,
        ))
        .await
        .unwrap();
    let body = json_body(resp).await;
    assert_eq!(body["count"], 0);
}

#[tokio::test]
async fn test_bulk_acknowledge_counts_only_active() {
    let app = make_app();
    let mut ids = Vec::new();
    for entity in ["grid-1", "grid-2", "grid-3"] {
        let resp = app
            .router
            .clone()
            .oneshot(request(
                "POST",
                "/api/alerts",
                Some(&app.coordinator_token),
                Some(manual_alert(entity)),
            ))
            .await
            .unwrap();
        ids.push(json_body(resp).await["id"].as_str().unwrap().to_string());
    }

    // Resolve one first; bulk acknowledge must skip it
    app.router
        .clone()
        .oneshot(request(
            "PUT",
            &format!("/api/alerts/{}/resolve", ids[0]),
            Some(&app.coordinator_token),
            Some(serde_json::json!({})),
        ))
        .await
        .unwrap();

    let resp = app
        .router
        .oneshot(request(
            "PUT",
            "/api/alerts/bulk-acknowledge",
            Some(&app.coordinator_token),
            Some(serde_json::json!({ "alert_ids": ids })),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["acknowledged"], 2);
    assert_eq!(body["requested"], 3);
}

#[tokio::test]
async fn test_bulk_acknowledge_empty_returns_400() {
    let app = make_app();
    let resp = app
        .router
        .oneshot(request(
            "PUT",
            "/api/alerts/bulk-acknowledge",
            Some(&app.coordinator_token),
            Some(serde_json::json!({ "alert_ids": [] })),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// ── Statistics ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_statistics_reports_distributions_and_response_times() {
    let app = make_app();
    for entity in ["grid-1", "grid-2"] {
        app.router
            .clone()
            .oneshot(request(
                "POST",
                "/api/alerts",
                Some(&app.coordinator_token),
                Some(manual_alert(entity)),
            ))
            .await
            .unwrap();
    }
    let resp = app
        .router
        .clone()
        .oneshot(request(
            "POST",
            "/api/alerts",
            Some(&app.coordinator_token),
            Some(serde_json::json!({
                "module": "waste",
                "alert_type": "bin_full",
                "severity": "critical",
                "message": "Bin overflowing",
                "entity_key": "bin-7",
            })),
        ))
        .await
        .unwrap();
    let created = json_body(resp).await;

    app.router
        .clone()
        .oneshot(request(
            "PUT",
            &format!("/api/alerts/{}/acknowledge", created["id"].as_str().unwrap()),
            Some(&app.coordinator_token),
            None,
        ))
        .await
        .unwrap();

    let resp = app
        .router
        .clone()
        .oneshot(request(
            "GET",
            "/api/alerts/statistics",
            Some(&app.coordinator_token),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["period_days"], 30);
    assert_eq!(body["total_alerts"], 3);
    assert_eq!(body["status_distribution"]["active"], 2);
    assert_eq!(body["status_distribution"]["acknowledged"], 1);
    assert_eq!(body["severity_distribution"]["high"], 2);
    assert_eq!(body["severity_distribution"]["critical"], 1);
    assert_eq!(body["module_distribution"]["energy"], 2);
    assert_eq!(body["module_distribution"]["waste"], 1);
    assert_eq!(body["response_times"].as_array().unwrap().len(), 1);
    assert_eq!(body["response_times"][0]["severity"], "critical");
    assert_eq!(body["daily_trends"].as_array().unwrap().len(), 1);
    assert_eq!(body["daily_trends"][0]["total_alerts"], 3);
}

#[tokio::test]
async fn test_statistics_requires_alerts_read() {
    let app = make_app();
    let resp = app
        .router
        .oneshot(request(
            "GET",
            "/api/alerts/statistics",
            Some(&app.traffic_token),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_statistics_rejects_non_positive_window() {
    let app = make_app();
    let resp = app
        .router
        .oneshot(request(
            "GET",
            "/api/alerts/statistics?days=0",
            Some(&app.coordinator_token),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// ── Rules ─────────────────────────────────────────────────────────────────────

fn rule_spec() -> serde_json::Value {
    serde_json::json!({
        "name": "Grid overload watch",
        "module": "energy",
        "metric": "load_percent",
        "condition": "greater_than",
        "threshold": 90.0,
        "severity": "high",
    })
}

#[tokio::test]
async fn test_rule_crud() {
    let app = make_app();

    let resp = app
        .router
        .clone()
        .oneshot(request(
            "POST",
            "/api/alerts/rules",
            Some(&app.coordinator_token),
            Some(rule_spec()),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let rule = json_body(resp).await;
    // RuleSpec serde defaults
    assert_eq!(rule["enabled"], true);
    assert_eq!(rule["cooldown_minutes"], 60);
    assert_eq!(rule["created_by"], "coordinator");
    let id = rule["id"].as_str().unwrap().to_string();

    let mut updated_spec = rule_spec();
    updated_spec["severity"] = serde_json::json!("critical");
    let resp = app
        .router
        .clone()
        .oneshot(request(
            "PUT",
            &format!("/api/alerts/rules/{}", id),
            Some(&app.coordinator_token),
            Some(updated_spec),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json_body(resp).await["severity"], "critical");

    let resp = app
        .router
        .clone()
        .oneshot(request(
            "GET",
            "/api/alerts/rules",
            Some(&app.coordinator_token),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(json_body(resp).await["count"], 1);

    let resp = app
        .router
        .clone()
        .oneshot(request(
            "DELETE",
            &format!("/api/alerts/rules/{}", id),
            Some(&app.coordinator_token),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app
        .router
        .oneshot(request(
            "DELETE",
            &format!("/api/alerts/rules/{}", id),
            Some(&app.coordinator_token),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_rule_returns_400() {
    let app = make_app();
    let mut spec = rule_spec();
    spec["threshold"] = serde_json::json!("not a number");
    let resp = app
        .router
        .oneshot(request(
            "POST",
            "/api/alerts/rules",
            Some(&app.coordinator_token),
            Some(spec),
        ))
        .await
        .unwrap();
    // Ordering conditions require a numeric threshold
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// ── Notification settings ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_settings_round_trip_per_principal() {
    let app = make_app();

    let resp = app
        .router
        .clone()
        .oneshot(request(
            "GET",
            "/api/alerts/notifications/settings",
            Some(&app.coordinator_token),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let defaults = json_body(resp).await;
    assert_eq!(defaults["email_enabled"], true);
    assert_eq!(defaults["sms_enabled"], false);

    let resp = app
        .router
        .clone()
        .oneshot(request(
            "PUT",
            "/api/alerts/notifications/settings",
            Some(&app.coordinator_token),
            Some(serde_json::json!({
                "sms_enabled": true,
                "severity_filter": ["critical"],
            })),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app
        .router
        .clone()
        .oneshot(request(
            "GET",
            "/api/alerts/notifications/settings",
            Some(&app.coordinator_token),
            None,
        ))
        .await
        .unwrap();
    let updated = json_body(resp).await;
    assert_eq!(updated["sms_enabled"], true);
    assert_eq!(updated["severity_filter"], serde_json::json!(["critical"]));

    // Another principal still sees the defaults
    let resp = app
        .router
        .oneshot(request(
            "GET",
            "/api/alerts/notifications/settings",
            Some(&app.admin_token),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(json_body(resp).await["sms_enabled"], false);
}
