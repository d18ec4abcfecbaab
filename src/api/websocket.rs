use crate::auth::PrincipalSource;
use crate::realtime::{
    data_capability, ClientMessage, RegistryError, ServerMessage, SessionRegistry, SnapshotSource,
};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, Request, State,
    },
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Query parameters for WebSocket upgrade
#[derive(Deserialize)]
struct WsQuery {
    token: Option<String>,
}

/// Shared application state for the WebSocket handler
#[derive(Clone)]
pub struct WsAppState {
    pub registry: Arc<SessionRegistry>,
    pub source: Arc<dyn PrincipalSource>,
    pub snapshots: Arc<dyn SnapshotSource>,
}

/// Auth middleware: validates ?token= before the upgrade.
///
/// Runs as a tower layer BEFORE WebSocket upgrade extraction so a failed
/// handshake gets a clean 401 and no session is ever registered.
async fn ws_auth(
    State(state): State<Arc<WsAppState>>,
    Query(params): Query<WsQuery>,
    req: Request,
    next: Next,
) -> Response {
    let token = match params.token {
        Some(ref token) => token,
        None => return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response(),
    };
    if state.source.authenticate(token).is_err() {
        return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    }
    next.run(req).await
}

/// GET /api/ws - WebSocket upgrade handler (auth handled by ws_auth middleware)
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsQuery>,
    State(state): State<Arc<WsAppState>>,
) -> Response {
    info!("WebSocket upgrade request received");
    ws.on_upgrade(move |socket| handle_socket(socket, state, params.token.unwrap_or_default()))
}

/// Create WebSocket router with auth middleware applied
pub fn create_ws_router(state: Arc<WsAppState>) -> Router {
    Router::new()
        .route("/api/ws", get(ws_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), ws_auth))
        .route("/api/sessions/stats", get(session_stats))
        .with_state(state)
}

#[derive(Serialize)]
struct SessionStatsResponse {
    connected: usize,
    by_role: HashMap<String, usize>,
}

/// GET /api/sessions/stats - Live session counts for the dashboard
async fn session_stats(
    State(state): State<Arc<WsAppState>>,
    headers: HeaderMap,
) -> Result<Json<SessionStatsResponse>, crate::api::ApiError> {
    crate::auth::require_capability(&headers, &state.source, "dashboard.read")?;
    Ok(Json(SessionStatsResponse {
        connected: state.registry.connected_count(),
        by_role: state.registry.connected_by_role(),
    }))
}

/// Handle one WebSocket connection lifecycle: register the session, forward
/// routed events from its outbound queue, and service client commands until
/// the socket closes.
async fn handle_socket(mut socket: WebSocket, state: Arc<WsAppState>, token: String) {
    // The middleware already authenticated; a race with deactivation can
    // still fail here, in which case no session is created.
    let (handle, mut outbound) = match state.registry.connect(&token) {
        Ok(pair) => pair,
        Err(e) => {
            warn!(error = %e, "WebSocket handshake rejected after upgrade");
            let _ = socket.close().await;
            return;
        }
    };
    let session_id = handle.session_id;

    let connected = ServerMessage::Connected {
        principal_id: handle.principal_id.clone(),
        rooms: handle.rooms.clone(),
        timestamp: Utc::now(),
    };
    if send_message(&mut socket, &connected).await.is_err() {
        state.registry.disconnect(session_id);
        return;
    }

    loop {
        tokio::select! {
            // Client commands
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(e) = handle_client_message(&mut socket, &state, session_id, &text).await {
                            error!(error = %e, session_id = %session_id, "Error handling client message");
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!(session_id = %session_id, "WebSocket client disconnected");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {
                        // Ignore binary, pong messages
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, session_id = %session_id, "WebSocket error");
                        break;
                    }
                }
            }

            // Routed events for this session
            routed = outbound.recv() => {
                match routed {
                    Some(message) => {
                        if let Err(e) = send_message(&mut socket, &message).await {
                            error!(error = %e, session_id = %session_id, "Failed to send routed event");
                            break;
                        }
                    }
                    // Registry dropped the session's sender
                    None => break,
                }
            }
        }
    }

    state.registry.disconnect(session_id);
}

/// Serialize and send one server message
async fn send_message(socket: &mut WebSocket, message: &ServerMessage) -> anyhow::Result<()> {
    let json = serde_json::to_string(message)?;
    socket.send(Message::Text(json)).await?;
    Ok(())
}

/// Dispatch one client command. Command failures are reported back as
/// `error` events; the session stays connected.
async fn handle_client_message(
    socket: &mut WebSocket,
    state: &Arc<WsAppState>,
    session_id: Uuid,
    text: &str,
) -> anyhow::Result<()> {
    let msg: ClientMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            return send_error(socket, format!("Malformed message: {}", e)).await;
        }
    };

    match msg {
        ClientMessage::JoinRoom { room } => match state.registry.join_room(session_id, room) {
            Ok(()) => {
                info!(session_id = %session_id, room = %room, "Client joined room");
                send_message(
                    socket,
                    &ServerMessage::JoinedRoom {
                        room,
                        timestamp: Utc::now(),
                    },
                )
                .await
            }
            Err(e) => send_error(socket, registry_error_message(e)).await,
        },
        ClientMessage::LeaveRoom { room } => match state.registry.leave_room(session_id, room) {
            Ok(()) => {
                send_message(
                    socket,
                    &ServerMessage::LeftRoom {
                        room,
                        timestamp: Utc::now(),
                    },
                )
                .await
            }
            Err(e) => send_error(socket, registry_error_message(e)).await,
        },
        ClientMessage::SubscribeAlerts {
            alert_types,
            severity_levels,
            modules,
        } => {
            let subscription = crate::realtime::AlertSubscription {
                alert_types: alert_types.clone(),
                severity_levels: severity_levels.clone(),
                modules: modules.clone(),
            };
            match state.registry.subscribe_alerts(session_id, subscription) {
                Ok(()) => {
                    send_message(
                        socket,
                        &ServerMessage::SubscribedAlerts {
                            alert_types,
                            severity_levels,
                            modules,
                        },
                    )
                    .await
                }
                Err(e) => send_error(socket, registry_error_message(e)).await,
            }
        }
        ClientMessage::RequestRealTimeData { data_type } => {
            handle_data_request(socket, state, session_id, &data_type).await
        }
        ClientMessage::SendMessage {
            recipient_id,
            message,
            message_type,
        } => {
            match state
                .registry
                .send_direct(session_id, &recipient_id, &message, &message_type)
            {
                Ok(()) => {
                    send_message(
                        socket,
                        &ServerMessage::MessageSent {
                            recipient_id,
                            timestamp: Utc::now(),
                        },
                    )
                    .await
                }
                Err(e) => send_error(socket, registry_error_message(e)).await,
            }
        }
    }
}

/// Serve a permission-checked snapshot of one data type
async fn handle_data_request(
    socket: &mut WebSocket,
    state: &Arc<WsAppState>,
    session_id: Uuid,
    data_type: &str,
) -> anyhow::Result<()> {
    let capability = match data_capability(data_type) {
        Some(cap) => cap,
        None => {
            return send_error(socket, format!("Unknown data type: {}", data_type)).await;
        }
    };

    // Same freshness rule as room joins: re-resolve the principal so a
    // deactivated account stops receiving snapshots.
    let handle = match state.registry.session(session_id) {
        Some(handle) => handle,
        None => return send_error(socket, "Session not registered".to_string()).await,
    };
    let permitted = state
        .source
        .find_by_id(&handle.principal_id)
        .map(|p| p.active && p.has_capability(capability))
        .unwrap_or(false);
    if !permitted {
        return send_error(socket, format!("Permission {} required", capability)).await;
    }

    send_message(
        socket,
        &ServerMessage::RealTimeData {
            data_type: data_type.to_string(),
            data: state.snapshots.snapshot(data_type),
            timestamp: Utc::now(),
        },
    )
    .await
}

async fn send_error(socket: &mut WebSocket, message: String) -> anyhow::Result<()> {
    send_message(socket, &ServerMessage::Error { message }).await
}

fn registry_error_message(e: RegistryError) -> String {
    e.to_string()
}
