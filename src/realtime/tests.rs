use super::*;
use crate::alert::{AlertEvent, AlertStore, CandidateAlert, CityModule, Severity};
use crate::auth::{PrincipalSource, Role, TokenDirectory};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

fn setup() -> (Arc<TokenDirectory>, SessionRegistry) {
    let directory = Arc::new(TokenDirectory::new());
    let source: Arc<dyn PrincipalSource> = Arc::clone(&directory) as Arc<dyn PrincipalSource>;
    let registry = SessionRegistry::new(source);
    (directory, registry)
}

fn make_alert(store: &AlertStore, module: CityModule, severity: Severity) -> crate::alert::Alert {
    store
        .create(CandidateAlert {
            module,
            alert_type: "test_breach".to_string(),
            severity,
            message: "breach".to_string(),
            entity_key: format!("entity-{}", uuid::Uuid::new_v4()),
            threshold_value: None,
            current_value: None,
            location: None,
            rule_id: None,
            created_by: None,
            triggered_at: chrono::Utc::now(),
        })
        .unwrap()
}

fn drain(rx: &mut UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
    let mut out = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        out.push(msg);
    }
    out
}

#[test]
fn test_connect_auto_joins_entitled_rooms() {
    let (directory, registry) = setup();
    let issued = directory.register("officer-1", Role::TrafficOfficer);

    let (handle, _rx) = registry.connect(&issued.token).unwrap();
    assert!(handle.rooms.contains(&Room::AuthenticatedUsers));
    assert!(handle.rooms.contains(&Room::TrafficMonitoring));
    assert!(handle.rooms.contains(&Room::DashboardUpdates));
    assert!(!handle.rooms.contains(&Room::EnergyMonitoring));
    assert!(!handle.rooms.contains(&Room::Alerts));
    assert!(!handle.rooms.contains(&Room::Admin));
}

#[test]
fn test_admin_auto_joins_everything() {
    let (directory, registry) = setup();
    let issued = directory.register("admin-1", Role::Admin);

    let (handle, _rx) = registry.connect(&issued.token).unwrap();
    for room in [
        Room::TrafficMonitoring,
        Room::EnvironmentMonitoring,
        Room::WasteMonitoring,
        Room::EnergyMonitoring,
        Room::EmergencyResponse,
        Room::Alerts,
        Room::DashboardUpdates,
        Room::Admin,
        Room::AuthenticatedUsers,
    ] {
        assert!(handle.rooms.contains(&room), "admin missing {}", room);
    }
}

#[test]
fn test_connect_bad_token_creates_no_session() {
    let (_directory, registry) = setup();
    assert!(registry.connect("bogus").is_err());
    assert_eq!(registry.connected_count(), 0);
}

#[test]
fn test_join_room_permission_check() {
    // Scenario C: traffic officer may not join emergency_response but may
    // join traffic_monitoring.
    let (directory, registry) = setup();
    let issued = directory.register("officer-1", Role::TrafficOfficer);
    let (handle, _rx) = registry.connect(&issued.token).unwrap();

    let err = registry
        .join_room(handle.session_id, Room::EmergencyResponse)
        .unwrap_err();
    assert_eq!(err, RegistryError::PermissionDenied(Room::EmergencyResponse));

    assert!(registry
        .join_room(handle.session_id, Room::TrafficMonitoring)
        .is_ok());
}

#[test]
fn test_public_room_needs_no_capability() {
    let (directory, registry) = setup();
    let issued = directory.register("officer-1", Role::TrafficOfficer);
    let (handle, _rx) = registry.connect(&issued.token).unwrap();

    assert!(registry
        .join_room(handle.session_id, Room::PublicAlerts)
        .is_ok());
    assert!(registry.is_member(handle.session_id, Room::PublicAlerts));
}

#[test]
fn test_disconnect_removes_membership() {
    let (directory, registry) = setup();
    let issued = directory.register("officer-1", Role::TrafficOfficer);
    let (handle, _rx) = registry.connect(&issued.token).unwrap();

    registry.disconnect(handle.session_id);
    assert_eq!(registry.connected_count(), 0);
    assert!(!registry.is_member(handle.session_id, Room::TrafficMonitoring));
    assert_eq!(
        registry
            .join_room(handle.session_id, Room::PublicAlerts)
            .unwrap_err(),
        RegistryError::UnknownSession
    );
}

#[test]
fn test_authorization_precedes_preference() {
    // A session without energy.read never receives an energy alert, even
    // with a subscription filter asking for energy.
    let (directory, registry) = setup();
    let traffic = directory.register("officer-1", Role::TrafficOfficer);
    let (handle, mut rx) = registry.connect(&traffic.token).unwrap();
    registry
        .subscribe_alerts(
            handle.session_id,
            AlertSubscription {
                alert_types: Vec::new(),
                severity_levels: Vec::new(),
                modules: vec![CityModule::Energy],
            },
        )
        .unwrap();

    let store = AlertStore::new(16);
    let alert = make_alert(&store, CityModule::Energy, Severity::Critical);
    registry.route(&AlertEvent::Created { alert });

    assert!(drain(&mut rx).is_empty());
}

#[test]
fn test_route_module_room_and_filter() {
    // Scenario A: one session filters ["high","critical"] and surfaces the
    // critical energy alert; another filters ["low"], surfaces nothing, but
    // stays a room member.
    let (directory, registry) = setup();
    let a = directory.register("utility-1", Role::UtilityOfficer);
    let b = directory.register("utility-2", Role::UtilityOfficer);
    let (ha, mut rx_a) = registry.connect(&a.token).unwrap();
    let (hb, mut rx_b) = registry.connect(&b.token).unwrap();

    registry
        .subscribe_alerts(
            ha.session_id,
            AlertSubscription {
                severity_levels: vec![Severity::High, Severity::Critical],
                ..Default::default()
            },
        )
        .unwrap();
    registry
        .subscribe_alerts(
            hb.session_id,
            AlertSubscription {
                severity_levels: vec![Severity::Low],
                ..Default::default()
            },
        )
        .unwrap();

    let store = AlertStore::new(16);
    let alert = make_alert(&store, CityModule::Energy, Severity::Critical);
    registry.route(&AlertEvent::Created { alert });

    let received = drain(&mut rx_a);
    assert_eq!(received.len(), 1);
    assert!(matches!(received[0], ServerMessage::EnergyAlert { .. }));

    assert!(drain(&mut rx_b).is_empty());
    assert!(registry.is_member(hb.session_id, Room::EnergyMonitoring));
}

#[test]
fn test_alerts_room_gets_new_alert_event() {
    let (directory, registry) = setup();
    let issued = directory.register("coord-1", Role::EmergencyCoordinator);
    let (_handle, mut rx) = registry.connect(&issued.token).unwrap();

    let store = AlertStore::new(16);
    let alert = make_alert(&store, CityModule::Emergency, Severity::High);
    registry.route(&AlertEvent::Created { alert });

    let received = drain(&mut rx);
    // Coordinator is in both `alerts` and `emergency_response`
    assert_eq!(received.len(), 2);
    assert!(received
        .iter()
        .any(|m| matches!(m, ServerMessage::NewAlert { .. })));
    assert!(received
        .iter()
        .any(|m| matches!(m, ServerMessage::EmergencyAlert { .. })));
}

#[test]
fn test_lifecycle_updates_ignore_subscription_filter() {
    let (directory, registry) = setup();
    let issued = directory.register("coord-1", Role::EmergencyCoordinator);
    let (handle, mut rx) = registry.connect(&issued.token).unwrap();
    registry
        .subscribe_alerts(
            handle.session_id,
            AlertSubscription {
                severity_levels: vec![Severity::Low],
                ..Default::default()
            },
        )
        .unwrap();

    let store = AlertStore::new(16);
    let op = crate::auth::Principal {
        id: "coord-1".to_string(),
        role: Role::EmergencyCoordinator,
        active: true,
    };
    let alert = make_alert(&store, CityModule::Waste, Severity::High);
    let acked = store.acknowledge(alert.id, &op).unwrap();
    registry.route(&AlertEvent::Acknowledged { alert: acked });

    let received = drain(&mut rx);
    assert_eq!(received.len(), 1);
    assert!(matches!(
        received[0],
        ServerMessage::AlertAcknowledged { .. }
    ));
}

#[test]
fn test_send_direct_and_recipient_offline() {
    let (directory, registry) = setup();
    let sender = directory.register("officer-1", Role::TrafficOfficer);
    let recipient = directory.register("coord-1", Role::EmergencyCoordinator);

    let (hs, _rx_s) = registry.connect(&sender.token).unwrap();
    let (_hr, mut rx_r) = registry.connect(&recipient.token).unwrap();

    registry
        .send_direct(hs.session_id, "coord-1", "road closed on 5th", "text")
        .unwrap();
    let received = drain(&mut rx_r);
    assert_eq!(received.len(), 1);
    match &received[0] {
        ServerMessage::NewMessage {
            sender_id, message, ..
        } => {
            assert_eq!(sender_id, "officer-1");
            assert_eq!(message, "road closed on 5th");
        }
        other => panic!("unexpected message: {:?}", other),
    }

    assert_eq!(
        registry
            .send_direct(hs.session_id, "nobody-online", "hi", "text")
            .unwrap_err(),
        RegistryError::RecipientOffline
    );
}

#[test]
fn test_send_notification() {
    let (directory, registry) = setup();
    let issued = directory.register("coord-1", Role::EmergencyCoordinator);
    let (_handle, mut rx) = registry.connect(&issued.token).unwrap();

    assert!(registry.send_notification("coord-1", serde_json::json!({"alert_id": "x"})));
    assert!(!registry.send_notification("offline-user", serde_json::json!({})));

    let received = drain(&mut rx);
    assert_eq!(received.len(), 1);
    assert!(matches!(received[0], ServerMessage::Notification { .. }));
}

#[test]
fn test_connected_stats() {
    let (directory, registry) = setup();
    let a = directory.register("officer-1", Role::TrafficOfficer);
    let b = directory.register("officer-2", Role::TrafficOfficer);
    let c = directory.register("admin-1", Role::Admin);
    registry.connect(&a.token).unwrap();
    registry.connect(&b.token).unwrap();
    registry.connect(&c.token).unwrap();

    assert_eq!(registry.connected_count(), 3);
    let by_role = registry.connected_by_role();
    assert_eq!(by_role.get("traffic_officer"), Some(&2));
    assert_eq!(by_role.get("admin"), Some(&1));
}

#[test]
fn test_deactivated_principal_cannot_join_new_rooms() {
    let (directory, registry) = setup();
    let issued = directory.register("officer-1", Role::TrafficOfficer);
    let (handle, _rx) = registry.connect(&issued.token).unwrap();

    directory.deactivate("officer-1");

    // Join-time re-validation catches the deactivation; existing rooms stay.
    assert!(registry
        .join_room(handle.session_id, Room::PublicAlerts)
        .is_err());
    assert!(registry.is_member(handle.session_id, Room::TrafficMonitoring));
}
