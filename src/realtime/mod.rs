use crate::alert::CityModule;
use crate::auth::{Principal, Role};
use serde::{Deserialize, Serialize};

pub mod protocol;
pub mod registry;
#[cfg(test)]
mod tests;

pub use protocol::{ClientMessage, ServerMessage};
pub use registry::{AlertSubscription, RegistryError, SessionHandle, SessionRegistry};

/// Named broadcast topic. Membership in a room is the sole authorization
/// gate for receiving events on that topic; not persisted anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Room {
    TrafficMonitoring,
    EnvironmentMonitoring,
    WasteMonitoring,
    EnergyMonitoring,
    EmergencyResponse,
    Alerts,
    DashboardUpdates,
    Admin,
    PublicAlerts,
    AuthenticatedUsers,
}

/// What it takes to join a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomAccess {
    /// Principal must hold the named capability
    Capability(&'static str),
    /// Role must be admin
    AdminOnly,
    /// No capability required
    Public,
}

impl Room {
    pub fn access(&self) -> RoomAccess {
        match self {
            Room::TrafficMonitoring => RoomAccess::Capability("traffic.read"),
            Room::EnvironmentMonitoring => RoomAccess::Capability("environment.read"),
            Room::WasteMonitoring => RoomAccess::Capability("waste.read"),
            Room::EnergyMonitoring => RoomAccess::Capability("energy.read"),
            Room::EmergencyResponse => RoomAccess::Capability("emergency.read"),
            Room::Alerts => RoomAccess::Capability("alerts.read"),
            Room::DashboardUpdates => RoomAccess::Capability("dashboard.read"),
            Room::Admin => RoomAccess::AdminOnly,
            Room::PublicAlerts | Room::AuthenticatedUsers => RoomAccess::Public,
        }
    }

    /// May this principal join the room right now?
    pub fn permits(&self, principal: &Principal) -> bool {
        match self.access() {
            RoomAccess::Capability(cap) => principal.has_capability(cap),
            RoomAccess::AdminOnly => principal.role == Role::Admin,
            RoomAccess::Public => true,
        }
    }

    /// The monitoring room for a city module.
    pub fn for_module(module: CityModule) -> Room {
        match module {
            CityModule::Traffic => Room::TrafficMonitoring,
            CityModule::Environment => Room::EnvironmentMonitoring,
            CityModule::Waste => Room::WasteMonitoring,
            CityModule::Energy => Room::EnergyMonitoring,
            CityModule::Emergency => Room::EmergencyResponse,
        }
    }

    /// Rooms a principal is auto-joined to on connect: every capability room
    /// it is entitled to, the admin room for admins, and the universal
    /// authenticated_users room. public_alerts stays join-on-request.
    pub fn entitled(principal: &Principal) -> Vec<Room> {
        let mut rooms = vec![Room::AuthenticatedUsers];
        for room in [
            Room::TrafficMonitoring,
            Room::EnvironmentMonitoring,
            Room::WasteMonitoring,
            Room::EnergyMonitoring,
            Room::EmergencyResponse,
            Room::Alerts,
            Room::DashboardUpdates,
        ] {
            if room.permits(principal) {
                rooms.push(room);
            }
        }
        if principal.role == Role::Admin {
            rooms.push(Room::Admin);
        }
        rooms
    }
}

impl std::fmt::Display for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Room::TrafficMonitoring => "traffic_monitoring",
            Room::EnvironmentMonitoring => "environment_monitoring",
            Room::WasteMonitoring => "waste_monitoring",
            Room::EnergyMonitoring => "energy_monitoring",
            Room::EmergencyResponse => "emergency_response",
            Room::Alerts => "alerts",
            Room::DashboardUpdates => "dashboard_updates",
            Room::Admin => "admin",
            Room::PublicAlerts => "public_alerts",
            Room::AuthenticatedUsers => "authenticated_users",
        };
        write!(f, "{}", s)
    }
}

/// Capability required to read a real-time data snapshot of one data type.
pub fn data_capability(data_type: &str) -> Option<&'static str> {
    match data_type {
        "traffic" => Some("traffic.read"),
        "environment" => Some("environment.read"),
        "waste" => Some("waste.read"),
        "energy" => Some("energy.read"),
        "emergency" => Some("emergency.read"),
        "dashboard" => Some("dashboard.read"),
        _ => None,
    }
}

/// Collaborator serving `request_real_time_data` snapshots. The backing
/// store for raw readings is external; this core only needs a lookup.
pub trait SnapshotSource: Send + Sync {
    fn snapshot(&self, data_type: &str) -> serde_json::Value;
}

/// Snapshot source for deployments without a wired data store.
pub struct NullSnapshotSource;

impl SnapshotSource for NullSnapshotSource {
    fn snapshot(&self, _data_type: &str) -> serde_json::Value {
        serde_json::json!({})
    }
}
