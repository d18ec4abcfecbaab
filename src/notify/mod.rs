use crate::alert::{Alert, AlertEvent, CityModule, RuleSet, Severity};
use chrono::{DateTime, Duration, NaiveTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};


/// Daily window during which non-critical notifications are suppressed.
/// May wrap midnight (22:00 → 06:00).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuietHours {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl QuietHours {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        let t = at.time();
        if self.start <= self.end {
            t >= self.start && t < self.end
        } else {
            t >= self.start || t < self.end
        }
    }
}

/// Per-principal notification preferences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationSettings {
    #[serde(default = "default_true")]
    pub email_enabled: bool,
    #[serde(default)]
    pub sms_enabled: bool,
    #[serde(default = "default_true")]
    pub push_enabled: bool,
    /// Empty means all severities
    #[serde(default = "default_severity_filter")]
    pub severity_filter: Vec<Severity>,
    /// Empty means all modules
    #[serde(default)]
    pub module_filter: Vec<CityModule>,
    #[serde(default = "default_quiet_hours")]
    pub quiet_hours: Option<QuietHours>,
}

fn default_true() -> bool {
    true
}

fn default_severity_filter() -> Vec<Severity> {
    vec![Severity::High, Severity::Critical]
}

fn default_quiet_hours() -> Option<QuietHours> {
    Some(QuietHours {
        start: NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
        end: NaiveTime::from_hms_opt(6, 0, 0).unwrap(),
    })
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            email_enabled: true,
            sms_enabled: false,
            push_enabled: true,
            severity_filter: default_severity_filter(),
            module_filter: Vec::new(),
            quiet_hours: default_quiet_hours(),
        }
    }
}

impl NotificationSettings {
    fn wants(&self, alert: &Alert) -> bool {
        (self.severity_filter.is_empty() || self.severity_filter.contains(&alert.severity))
            && (self.module_filter.is_empty() || self.module_filter.contains(&alert.module))
    }

    fn channel_enabled(&self, channel: &str) -> bool {
        match channel {
            "email" => self.email_enabled,
            "sms" => self.sms_enabled,
            "push" => self.push_enabled,
            _ => false,
        }
    }
}

/// Per-principal settings registry. Principals without an entry have no
/// notifications; `get` returns the defaults for display purposes only.
pub struct SettingsStore {
    settings: DashMap<String, NotificationSettings>,
}

impl SettingsStore {
    pub fn new() -> Self {
        Self {
            settings: DashMap::new(),
        }
    }

    pub fn get(&self, principal_id: &str) -> NotificationSettings {
        self.settings
            .get(principal_id)
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    pub fn update(&self, principal_id: &str, settings: NotificationSettings) {
        self.settings.insert(principal_id.to_string(), settings);
    }

    fn recipients(&self) -> Vec<(String, NotificationSettings)> {
        self.settings
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Outbound channel collaborator (email/SMS/push providers are external).
/// Send failures are logged by the dispatcher and never propagate.
pub trait ChannelTransport: Send + Sync {
    fn name(&self) -> &str;
    fn send(&self, recipient: &str, alert: &Alert) -> anyhow::Result<()>;
}

/// Transport that only logs. Used where no real provider is wired.
pub struct LogTransport {
    channel: String,
}

impl LogTransport {
    pub fn new(channel: &str) -> Self {
        Self {
            channel: channel.to_string(),
        }
    }
}

impl ChannelTransport for LogTransport {
    fn name(&self) -> &str {
        &self.channel
    }

    fn send(&self, recipient: &str, alert: &Alert) -> anyhow::Result<()> {
        info!(
            channel = %self.channel,
            recipient = %recipient,
            alert_id = %alert.id,
            severity = %alert.severity,
            "Notification sent"
        );
        Ok(())
    }
}

/// Last-dispatch bookkeeping per (rule-or-band, entity) key. In-memory only;
/// resets on restart, like the ingestion rate limiter it is modeled on.
struct CooldownTracker {
    last_sent: DashMap<(String, String), DateTime<Utc>>,
}

impl CooldownTracker {
    fn new() -> Self {
        Self {
            last_sent: DashMap::new(),
        }
    }

    /// True if the window has elapsed (or the key is new); marks the key on
    /// success. Entry access keeps the check-and-mark atomic per key.
    fn check_and_mark(&self, key: (String, String), window: Duration, now: DateTime<Utc>) -> bool {
        let mut entry = self.last_sent.entry(key).or_insert(DateTime::<Utc>::MIN_UTC);
        if now - *entry >= window {
            *entry = now;
            true
        } else {
            false
        }
    }
}

/// Routes severity-appropriate notifications to channel transports.
///
/// Runs independently of live-session routing so notifications fire even
/// with zero connected sessions. Consumes only `Created` events; lifecycle
/// updates are for live display.
pub struct NotificationDispatcher {
    settings: Arc<SettingsStore>,
    rules: Arc<RuleSet>,
    transports: Vec<Arc<dyn ChannelTransport>>,
    cooldowns: CooldownTracker,
    default_cooldown: Duration,
}

impl NotificationDispatcher {
    pub fn new(
        settings: Arc<SettingsStore>,
        rules: Arc<RuleSet>,
        transports: Vec<Arc<dyn ChannelTransport>>,
        default_cooldown_minutes: u64,
    ) -> Self {
        Self {
            settings,
            rules,
            transports,
            cooldowns: CooldownTracker::new(),
            default_cooldown: Duration::minutes(default_cooldown_minutes as i64),
        }
    }

    /// Process one event. Returns the number of channel sends attempted
    /// (diagnostic; callers normally ignore it).
    pub fn dispatch(&self, event: &AlertEvent) -> usize {
        self.dispatch_at(event, Utc::now())
    }

    fn dispatch_at(&self, event: &AlertEvent, now: DateTime<Utc>) -> usize {
        let AlertEvent::Created { alert } = event else {
            return 0;
        };

        // Only high/critical reach the channels; everything else is
        // live-display only.
        if alert.severity < Severity::High {
            return 0;
        }

        // Cooldown key is (rule, entity) — distinct from the store's
        // (module, type, entity) uniqueness key. Band-originated alerts have
        // no rule id and fall back to a module:type key.
        let (cooldown_key, window, rule_channels) = match alert.rule_id {
            Some(rule_id) => {
                let rule = self.rules.get(rule_id);
                let window = rule
                    .as_ref()
                    .map(|r| Duration::minutes(r.cooldown_minutes as i64))
                    .unwrap_or(self.default_cooldown);
                let channels = rule.map(|r| r.notification_channels);
                (rule_id.to_string(), window, channels)
            }
            None => (
                format!("{}:{}", alert.module, alert.alert_type),
                self.default_cooldown,
                None,
            ),
        };

        // Plan the sends first: a dispatch with no deliverable channel
        // (preferences, quiet hours) must not consume the cooldown window,
        // or the first post-quiet-hours breach of the same (rule, entity)
        // would be silenced.
        let mut planned: Vec<(String, &Arc<dyn ChannelTransport>)> = Vec::new();
        for (principal_id, settings) in self.settings.recipients() {
            if !settings.wants(alert) {
                continue;
            }

            // Quiet hours suppress all channels except a critical override.
            let quiet = settings
                .quiet_hours
                .map(|q| q.contains(now))
                .unwrap_or(false);
            if quiet && alert.severity != Severity::Critical {
                debug!(
                    recipient = %principal_id,
                    alert_id = %alert.id,
                    "Notification suppressed by quiet hours"
                );
                continue;
            }

            for transport in &self.transports {
                if !settings.channel_enabled(transport.name()) {
                    continue;
                }
                if let Some(channels) = &rule_channels {
                    if !channels.iter().any(|c| c == transport.name()) {
                        continue;
                    }
                }
                planned.push((principal_id.clone(), transport));
            }
        }
        if planned.is_empty() {
            return 0;
        }

        if !self
            .cooldowns
            .check_and_mark((cooldown_key, alert.entity_key.clone()), window, now)
        {
            debug!(
                alert_id = %alert.id,
                entity = %alert.entity_key,
                "Notification suppressed by cooldown"
            );
            return 0;
        }

        for (principal_id, transport) in &planned {
            if let Err(e) = transport.send(principal_id, alert) {
                // Fire-and-forget relative to the state machine: a failed
                // send never rolls back the alert.
                error!(
                    error = %e,
                    channel = %transport.name(),
                    recipient = %principal_id,
                    "Channel send failed"
                );
            }
        }
        planned.len()
    }

    /// Consume the alert event stream until the store is dropped.
    pub async fn run(self: Arc<Self>, mut events: broadcast::Receiver<AlertEvent>) {
        info!("Notification dispatcher started");
        loop {
            match events.recv().await {
                Ok(event) => {
                    self.dispatch(&event);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped = skipped, "Dispatcher lagged, skipped events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    warn!("Alert event channel closed, dispatcher stopping");
                    break;
                }
            }
        }
    }
}
