use super::protocol::ServerMessage;
use super::Room;
use crate::alert::{Alert, AlertEvent, CityModule, Severity};
use crate::auth::{AuthError, PrincipalSource, Role};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Session registry errors
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryError {
    Auth(AuthError),
    /// Authenticated but not entitled to the room
    PermissionDenied(Room),
    /// Session id not registered (stale or already disconnected)
    UnknownSession,
    /// No live session is bound to the recipient principal
    RecipientOffline,
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::Auth(e) => write!(f, "{}", e),
            RegistryError::PermissionDenied(room) => {
                write!(f, "Permission denied for room {}", room)
            }
            RegistryError::UnknownSession => write!(f, "Session not registered"),
            RegistryError::RecipientOffline => write!(f, "Recipient not online"),
        }
    }
}

impl std::error::Error for RegistryError {}

/// Alert-forwarding filter. Purely advisory: it narrows what an authorized
/// session surfaces, never what it is authorized to receive. Empty lists
/// match everything.
#[derive(Debug, Clone, Default)]
pub struct AlertSubscription {
    pub alert_types: Vec<String>,
    pub severity_levels: Vec<Severity>,
    pub modules: Vec<CityModule>,
}

impl AlertSubscription {
    pub fn matches(&self, alert: &Alert) -> bool {
        (self.alert_types.is_empty() || self.alert_types.contains(&alert.alert_type))
            && (self.severity_levels.is_empty() || self.severity_levels.contains(&alert.severity))
            && (self.modules.is_empty() || self.modules.contains(&alert.module))
    }
}

/// A live connection. Created on connect, destroyed on disconnect; owned
/// exclusively by the registry.
struct Session {
    principal_id: String,
    role: Role,
    rooms: HashSet<Room>,
    subscription: AlertSubscription,
    outbound: mpsc::UnboundedSender<ServerMessage>,
    connected_at: DateTime<Utc>,
}

/// Handed to the transport layer after a successful handshake.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub session_id: Uuid,
    pub principal_id: String,
    pub rooms: Vec<Room>,
    pub connected_at: DateTime<Utc>,
}

/// Owns all live sessions and routes alert events to them.
///
/// One instance per process, passed by handle to collaborators (no ambient
/// global session map). Sessions live in a single DashMap: `route` reads a
/// session's room set under its shard read lock while join/leave take the
/// shard write lock, so routing observes full pre- or post-join membership,
/// never a partial room set. Disconnect removes the session and its rooms in
/// one map removal.
pub struct SessionRegistry {
    sessions: DashMap<Uuid, Session>,
    source: Arc<dyn PrincipalSource>,
}

impl SessionRegistry {
    pub fn new(source: Arc<dyn PrincipalSource>) -> Self {
        Self {
            sessions: DashMap::new(),
            source,
        }
    }

    /// Validate the handshake credential and create a session.
    ///
    /// On success the session is auto-joined to every room the principal is
    /// entitled to plus `authenticated_users`; the returned receiver is the
    /// session's outbound message queue. On failure no session is created.
    pub fn connect(
        &self,
        token: &str,
    ) -> Result<(SessionHandle, mpsc::UnboundedReceiver<ServerMessage>), AuthError> {
        let principal = self.source.authenticate(token)?;
        let rooms = Room::entitled(&principal);
        let (tx, rx) = mpsc::unbounded_channel();
        let session_id = Uuid::new_v4();
        let connected_at = Utc::now();

        self.sessions.insert(
            session_id,
            Session {
                principal_id: principal.id.clone(),
                role: principal.role,
                rooms: rooms.iter().copied().collect(),
                subscription: AlertSubscription::default(),
                outbound: tx,
                connected_at,
            },
        );

        info!(
            session_id = %session_id,
            principal = %principal.id,
            rooms = rooms.len(),
            "Session connected"
        );
        Ok((
            SessionHandle {
                session_id,
                principal_id: principal.id,
                rooms,
                connected_at,
            },
            rx,
        ))
    }

    /// Remove the session and all its room memberships atomically.
    pub fn disconnect(&self, session_id: Uuid) {
        if let Some((_, session)) = self.sessions.remove(&session_id) {
            info!(
                session_id = %session_id,
                principal = %session.principal_id,
                "Session disconnected"
            );
        }
    }

    /// Join a room, re-validating the capability at join time. Public rooms
    /// require none. A later permission downgrade does not evict already
    /// joined sessions.
    pub fn join_room(&self, session_id: Uuid, room: Room) -> Result<(), RegistryError> {
        let principal_id = {
            let session = self
                .sessions
                .get(&session_id)
                .ok_or(RegistryError::UnknownSession)?;
            session.principal_id.clone()
        };

        // Fresh lookup against the auth source, not the role captured at
        // connect time.
        let principal = self
            .source
            .find_by_id(&principal_id)
            .filter(|p| p.active)
            .ok_or(RegistryError::Auth(AuthError::UnknownToken))?;
        if !room.permits(&principal) {
            return Err(RegistryError::PermissionDenied(room));
        }

        let mut session = self
            .sessions
            .get_mut(&session_id)
            .ok_or(RegistryError::UnknownSession)?;
        session.rooms.insert(room);
        debug!(session_id = %session_id, room = %room, "Joined room");
        Ok(())
    }

    pub fn leave_room(&self, session_id: Uuid, room: Room) -> Result<(), RegistryError> {
        let mut session = self
            .sessions
            .get_mut(&session_id)
            .ok_or(RegistryError::UnknownSession)?;
        session.rooms.remove(&room);
        debug!(session_id = %session_id, room = %room, "Left room");
        Ok(())
    }

    /// Replace the session's alert-forwarding filter.
    pub fn subscribe_alerts(
        &self,
        session_id: Uuid,
        subscription: AlertSubscription,
    ) -> Result<(), RegistryError> {
        let mut session = self
            .sessions
            .get_mut(&session_id)
            .ok_or(RegistryError::UnknownSession)?;
        session.subscription = subscription;
        Ok(())
    }

    /// Fan an alert event out to authorized sessions.
    ///
    /// Room membership (authorization) is always checked here; the session's
    /// own subscription filter then decides whether a breach notice is
    /// surfaced. Authorization precedes preference. Lifecycle updates
    /// (acknowledged/resolved/bulk) are not subject to the filter.
    pub fn route(&self, event: &AlertEvent) {
        match event {
            AlertEvent::Created { alert } => {
                self.deliver(Room::Alerts, Some(alert), || ServerMessage::NewAlert {
                    alert: alert.clone(),
                });
                self.deliver(Room::for_module(alert.module), Some(alert), || {
                    ServerMessage::module_alert(alert.clone())
                });
            }
            AlertEvent::Acknowledged { alert } => {
                self.deliver(Room::Alerts, None, || ServerMessage::AlertAcknowledged {
                    alert_id: alert.id,
                    acknowledged_by: alert.acknowledged_by.clone().unwrap_or_default(),
                    acknowledged_at: alert.acknowledged_at.unwrap_or_else(Utc::now),
                });
            }
            AlertEvent::Resolved { alert } => {
                self.deliver(Room::Alerts, None, || ServerMessage::AlertResolved {
                    alert_id: alert.id,
                    resolved_by: alert.resolved_by.clone().unwrap_or_default(),
                    resolved_at: alert.resolved_at.unwrap_or_else(Utc::now),
                });
            }
            AlertEvent::BulkAcknowledged {
                alert_ids,
                acknowledged_by,
                count,
            } => {
                self.deliver(Room::Alerts, None, || {
                    ServerMessage::AlertsBulkAcknowledged {
                        alert_ids: alert_ids.clone(),
                        acknowledged_by: acknowledged_by.clone(),
                        count: *count,
                    }
                });
            }
        }
    }

    fn deliver<F>(&self, room: Room, filter_against: Option<&Alert>, make: F)
    where
        F: Fn() -> ServerMessage,
    {
        for session in self.sessions.iter() {
            if !session.rooms.contains(&room) {
                continue;
            }
            if let Some(alert) = filter_against {
                if !session.subscription.matches(alert) {
                    continue;
                }
            }
            if session.outbound.send(make()).is_err() {
                // Receiver side already dropped; disconnect will prune it.
                warn!(principal = %session.principal_id, "Dropped message for closed session");
            }
        }
    }

    /// Direct user-to-user message. At-most-once, no queuing for offline
    /// recipients.
    pub fn send_direct(
        &self,
        sender_session_id: Uuid,
        recipient_principal_id: &str,
        message: &str,
        message_type: &str,
    ) -> Result<(), RegistryError> {
        let sender_id = {
            let session = self
                .sessions
                .get(&sender_session_id)
                .ok_or(RegistryError::UnknownSession)?;
            session.principal_id.clone()
        };

        let mut delivered = false;
        for session in self.sessions.iter() {
            if session.principal_id == recipient_principal_id {
                let _ = session.outbound.send(ServerMessage::NewMessage {
                    sender_id: sender_id.clone(),
                    message: message.to_string(),
                    message_type: message_type.to_string(),
                    timestamp: Utc::now(),
                });
                delivered = true;
            }
        }
        if !delivered {
            return Err(RegistryError::RecipientOffline);
        }
        Ok(())
    }

    /// Push a notification payload to every live session of one principal.
    /// Returns true if at least one session received it.
    pub fn send_notification(&self, principal_id: &str, payload: serde_json::Value) -> bool {
        let mut delivered = false;
        for session in self.sessions.iter() {
            if session.principal_id == principal_id {
                let _ = session.outbound.send(ServerMessage::Notification {
                    payload: payload.clone(),
                    timestamp: Utc::now(),
                });
                delivered = true;
            }
        }
        delivered
    }

    pub fn connected_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn connected_by_role(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for session in self.sessions.iter() {
            *counts.entry(session.role.to_string()).or_insert(0) += 1;
        }
        counts
    }

    /// Snapshot of one live session, if registered.
    pub fn session(&self, session_id: Uuid) -> Option<SessionHandle> {
        self.sessions.get(&session_id).map(|s| SessionHandle {
            session_id,
            principal_id: s.principal_id.clone(),
            rooms: s.rooms.iter().copied().collect(),
            connected_at: s.connected_at,
        })
    }

    /// Is the session a member of the room? (test/diagnostic accessor)
    pub fn is_member(&self, session_id: Uuid, room: Room) -> bool {
        self.sessions
            .get(&session_id)
            .map(|s| s.rooms.contains(&room))
            .unwrap_or(false)
    }
}
