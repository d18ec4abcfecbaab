// Roles, principals, and capability checks
pub mod auth;

// Alert entity, rules, and lifecycle store
pub mod alert;

// Threshold detectors and the reading ingestion pipeline
pub mod detect;

// Sessions, rooms, and event routing
pub mod realtime;

// Notification channels and dispatch
pub mod notify;

// HTTP and WebSocket APIs
pub mod api;

// TOML configuration
pub mod config;
