use serde::Deserialize;

pub use crate::detect::DetectorThresholds;

/// Complete CityPulse configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CityPulseConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub thresholds: DetectorThresholds,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub events: EventsConfig,
}

/// HTTP/WebSocket server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

/// Notification dispatcher configuration
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
    /// Cooldown applied to alerts with no rule-specific cooldown (minutes)
    #[serde(default = "default_cooldown_minutes")]
    pub default_cooldown_minutes: u64,
}

fn default_cooldown_minutes() -> u64 {
    60
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            default_cooldown_minutes: default_cooldown_minutes(),
        }
    }
}

/// Alert event fan-out configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EventsConfig {
    /// Broadcast channel capacity; slow consumers past this lag and skip
    #[serde(default = "default_event_capacity")]
    pub capacity: usize,
}

fn default_event_capacity() -> usize {
    1024
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            capacity: default_event_capacity(),
        }
    }
}

impl Default for CityPulseConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            thresholds: DetectorThresholds::default(),
            notifications: NotificationConfig::default(),
            events: EventsConfig::default(),
        }
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<CityPulseConfig, Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(path)?;
    let config: CityPulseConfig = toml::from_str(&contents)?;
    Ok(config)
}
