use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;


/// Municipal operator roles. Closed enumeration; the permission table below
/// is the single source of truth for what each role may do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    TrafficOfficer,
    EnvironmentOfficer,
    UtilityOfficer,
    EmergencyCoordinator,
}

impl Role {
    /// Explicit capability set for this role. Admin is handled separately in
    /// `has_capability` — it satisfies every capability regardless of this
    /// list.
    pub fn capabilities(&self) -> &'static [&'static str] {
        match self {
            Role::Admin => &["all"],
            Role::TrafficOfficer => &["traffic.read", "traffic.write", "dashboard.read"],
            Role::EnvironmentOfficer => {
                &["environment.read", "environment.write", "dashboard.read"]
            }
            Role::UtilityOfficer => &[
                "waste.read",
                "waste.write",
                "energy.read",
                "energy.write",
                "dashboard.read",
            ],
            Role::EmergencyCoordinator => &[
                "emergency.read",
                "emergency.write",
                "alerts.read",
                "alerts.write",
                "dashboard.read",
            ],
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Role::Admin => "admin",
            Role::TrafficOfficer => "traffic_officer",
            Role::EnvironmentOfficer => "environment_officer",
            Role::UtilityOfficer => "utility_officer",
            Role::EmergencyCoordinator => "emergency_coordinator",
        };
        write!(f, "{}", s)
    }
}

/// Authenticated actor. Owned by the external auth collaborator; read-only
/// to this core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    pub role: Role,
    pub active: bool,
}

impl Principal {
    /// `has_capability(principal, capability)` — the one operation of the
    /// permission model. Pure; unknown capabilities return false.
    pub fn has_capability(&self, capability: &str) -> bool {
        if self.role == Role::Admin {
            return true;
        }
        self.role.capabilities().contains(&capability)
    }
}

/// Authentication errors (handshake or request rejected, no state created)
#[derive(Debug, Clone, PartialEq)]
pub enum AuthError {
    /// Authorization header or token field not present
    MissingToken,
    /// Not "Bearer <token>" or non-string/empty token
    InvalidFormat,
    /// Token does not resolve to a principal
    UnknownToken,
    /// Principal exists but is deactivated
    Inactive,
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::MissingToken => write!(f, "Authorization token not provided"),
            AuthError::InvalidFormat => write!(f, "Invalid authorization token format"),
            AuthError::UnknownToken => write!(f, "Unknown or expired token"),
            AuthError::Inactive => write!(f, "Account is inactive"),
        }
    }
}

impl std::error::Error for AuthError {}

/// Source of truth for credential → principal resolution.
///
/// Credential storage and password hashing live in an external auth service;
/// this core only needs to turn a bearer token into an active `Principal`.
pub trait PrincipalSource: Send + Sync {
    fn authenticate(&self, token: &str) -> Result<Principal, AuthError>;

    /// Look up a principal by id (used for direct-message addressing and
    /// notification settings). Returns None if unknown.
    fn find_by_id(&self, principal_id: &str) -> Option<Principal>;
}

/// In-memory token directory implementing `PrincipalSource`.
///
/// Stands in for the external auth collaborator in the single-process
/// deployment and in tests. Tokens are UUIDv4 strings issued at
/// registration.
pub struct TokenDirectory {
    principals: Arc<DashMap<String, Principal>>,
    /// token -> principal id
    tokens: Arc<DashMap<String, String>>,
}

impl TokenDirectory {
    pub fn new() -> Self {
        Self {
            principals: Arc::new(DashMap::new()),
            tokens: Arc::new(DashMap::new()),
        }
    }

    /// Register a principal and issue a bearer token for it.
    pub fn register(&self, id: &str, role: Role) -> IssuedToken {
        let principal = Principal {
            id: id.to_string(),
            role,
            active: true,
        };
        let token = Uuid::new_v4().to_string();
        self.principals.insert(id.to_string(), principal);
        self.tokens.insert(token.clone(), id.to_string());
        IssuedToken {
            principal_id: id.to_string(),
            token,
            issued_at: Utc::now(),
        }
    }

    /// Deactivate a principal. Existing tokens resolve to `Inactive` from
    /// then on; already-joined rooms are not evicted (join-time checks only).
    pub fn deactivate(&self, principal_id: &str) {
        if let Some(mut p) = self.principals.get_mut(principal_id) {
            p.active = false;
        }
    }
}

impl Default for TokenDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl PrincipalSource for TokenDirectory {
    fn authenticate(&self, token: &str) -> Result<Principal, AuthError> {
        let principal_id = self
            .tokens
            .get(token)
            .map(|id| id.clone())
            .ok_or(AuthError::UnknownToken)?;
        let principal = self
            .principals
            .get(&principal_id)
            .map(|p| p.clone())
            .ok_or(AuthError::UnknownToken)?;
        if !principal.active {
            return Err(AuthError::Inactive);
        }
        Ok(principal)
    }

    fn find_by_id(&self, principal_id: &str) -> Option<Principal> {
        self.principals.get(principal_id).map(|p| p.clone())
    }
}

/// Token issued by the directory at registration time.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub principal_id: String,
    pub token: String,
    pub issued_at: DateTime<Utc>,
}

/// Extract bearer token from HTTP Authorization header.
///
/// Expected format: "Authorization: Bearer <token>"
pub fn extract_bearer_token(headers: &HeaderMap) -> Result<String, AuthError> {
    let auth_header = headers
        .get("authorization")
        .ok_or(AuthError::MissingToken)?
        .to_str()
        .map_err(|_| AuthError::InvalidFormat)?;

    parse_bearer_token(auth_header)
}

fn parse_bearer_token(header_value: &str) -> Result<String, AuthError> {
    let parts: Vec<&str> = header_value.splitn(2, ' ').collect();

    if parts.len() != 2 || !parts[0].eq_ignore_ascii_case("bearer") {
        return Err(AuthError::InvalidFormat);
    }

    let token = parts[1].trim();
    if token.is_empty() {
        return Err(AuthError::InvalidFormat);
    }

    Ok(token.to_string())
}

/// Authenticate an HTTP request and check one capability.
///
/// A single authorization step before business logic: handlers declare the
/// capability they need and call this once, instead of nesting wrappers.
pub fn require_capability(
    headers: &HeaderMap,
    source: &Arc<dyn PrincipalSource>,
    capability: &str,
) -> Result<Principal, AccessError> {
    let token = extract_bearer_token(headers).map_err(AccessError::Auth)?;
    let principal = source.authenticate(&token).map_err(AccessError::Auth)?;
    if !principal.has_capability(capability) {
        return Err(AccessError::PermissionDenied(capability.to_string()));
    }
    Ok(principal)
}

/// Outcome of the authenticate-then-authorize step.
#[derive(Debug, Clone, PartialEq)]
pub enum AccessError {
    Auth(AuthError),
    /// Authenticated but lacking the named capability
    PermissionDenied(String),
}

impl std::fmt::Display for AccessError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccessError::Auth(e) => write!(f, "{}", e),
            AccessError::PermissionDenied(cap) => {
                write!(f, "Permission {} required", cap)
            }
        }
    }
}

impl std::error::Error for AccessError {}
