use super::Room;
use crate::alert::{Alert, CityModule, Severity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Client → Server messages over the push channel.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    JoinRoom {
        room: Room,
    },
    LeaveRoom {
        room: Room,
    },
    SubscribeAlerts {
        #[serde(default)]
        alert_types: Vec<String>,
        #[serde(default)]
        severity_levels: Vec<Severity>,
        #[serde(default)]
        modules: Vec<CityModule>,
    },
    RequestRealTimeData {
        data_type: String,
    },
    SendMessage {
        recipient_id: String,
        message: String,
        #[serde(default = "default_message_type")]
        message_type: String,
    },
}

fn default_message_type() -> String {
    "text".to_string()
}

/// Server → Client messages.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Connected {
        principal_id: String,
        rooms: Vec<Room>,
        timestamp: DateTime<Utc>,
    },
    /// Recoverable error; the session stays connected.
    Error {
        message: String,
    },
    JoinedRoom {
        room: Room,
        timestamp: DateTime<Utc>,
    },
    LeftRoom {
        room: Room,
        timestamp: DateTime<Utc>,
    },
    SubscribedAlerts {
        alert_types: Vec<String>,
        severity_levels: Vec<Severity>,
        modules: Vec<CityModule>,
    },
    RealTimeData {
        data_type: String,
        data: Value,
        timestamp: DateTime<Utc>,
    },
    NewAlert {
        alert: Alert,
    },
    AlertAcknowledged {
        alert_id: Uuid,
        acknowledged_by: String,
        acknowledged_at: DateTime<Utc>,
    },
    AlertResolved {
        alert_id: Uuid,
        resolved_by: String,
        resolved_at: DateTime<Utc>,
    },
    AlertsBulkAcknowledged {
        alert_ids: Vec<Uuid>,
        acknowledged_by: String,
        count: usize,
    },
    // Module-specific breach notices for the monitoring rooms
    TrafficAlert {
        alert: Alert,
    },
    EnvironmentAlert {
        alert: Alert,
    },
    WasteAlert {
        alert: Alert,
    },
    EnergyAlert {
        alert: Alert,
    },
    EmergencyAlert {
        alert: Alert,
    },
    NewMessage {
        sender_id: String,
        message: String,
        message_type: String,
        timestamp: DateTime<Utc>,
    },
    MessageSent {
        recipient_id: String,
        timestamp: DateTime<Utc>,
    },
    Notification {
        payload: Value,
        timestamp: DateTime<Utc>,
    },
}

impl ServerMessage {
    /// The module-specific breach notice for an alert's monitoring room.
    pub fn module_alert(alert: Alert) -> ServerMessage {
        match alert.module {
            CityModule::Traffic => ServerMessage::TrafficAlert { alert },
            CityModule::Environment => ServerMessage::EnvironmentAlert { alert },
            CityModule::Waste => ServerMessage::WasteAlert { alert },
            CityModule::Energy => ServerMessage::EnergyAlert { alert },
            CityModule::Emergency => ServerMessage::EmergencyAlert { alert },
        }
    }
}
