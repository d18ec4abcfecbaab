use anyhow::{Context, Result};
use citypulse::alert::{AlertStore, RuleSet};
use citypulse::api::{
    create_alert_router, create_readings_router, create_ws_router, AlertAppState, ReadingsAppState,
    WsAppState,
};
use citypulse::auth::{PrincipalSource, Role, TokenDirectory};
use citypulse::config::{load_config, CityPulseConfig};
use citypulse::detect::{AlertPipeline, ThresholdDetector};
use citypulse::notify::{ChannelTransport, LogTransport, NotificationDispatcher, SettingsStore};
use citypulse::realtime::{NullSnapshotSource, SessionRegistry};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "citypulse=info".into()),
        )
        .init();

    info!("CityPulse starting...");

    // Load configuration (optional file, defaults otherwise)
    let config = match std::env::var("CITYPULSE_CONFIG") {
        Ok(path) => match load_config(&path) {
            Ok(config) => {
                info!(path = %path, "Configuration loaded");
                config
            }
            Err(e) => {
                warn!(path = %path, error = %e, "Failed to load config, using defaults");
                CityPulseConfig::default()
            }
        },
        Err(_) => CityPulseConfig::default(),
    };

    // Core components
    let store = Arc::new(AlertStore::new(config.events.capacity));
    let rules = Arc::new(RuleSet::new());
    let directory = Arc::new(TokenDirectory::new());
    let source: Arc<dyn PrincipalSource> = directory.clone();
    let registry = Arc::new(SessionRegistry::new(Arc::clone(&source)));
    let settings = Arc::new(SettingsStore::new());

    let pipeline = Arc::new(AlertPipeline::new(
        ThresholdDetector::new(config.thresholds.clone()),
        Arc::clone(&rules),
        Arc::clone(&store),
    ));

    // Bootstrap admin principal. Operator accounts are provisioned by the
    // external auth service in a full deployment.
    let admin = directory.register("admin", Role::Admin);
    info!(principal = %admin.principal_id, token = %admin.token, "Bootstrap admin token issued");

    // Route alert events to live sessions
    let router_registry = Arc::clone(&registry);
    let mut router_events = store.subscribe();
    tokio::spawn(async move {
        loop {
            match router_events.recv().await {
                Ok(event) => router_registry.route(&event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped = skipped, "Event router lagged, skipped events");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // Dispatch channel notifications
    let transports: Vec<Arc<dyn ChannelTransport>> = vec![
        Arc::new(LogTransport::new("email")),
        Arc::new(LogTransport::new("sms")),
        Arc::new(LogTransport::new("push")),
    ];
    let dispatcher = Arc::new(NotificationDispatcher::new(
        Arc::clone(&settings),
        Arc::clone(&rules),
        transports,
        config.notifications.default_cooldown_minutes,
    ));
    tokio::spawn(dispatcher.run(store.subscribe()));

    // HTTP/WS surface
    let alert_router = create_alert_router(AlertAppState {
        store: Arc::clone(&store),
        rules: Arc::clone(&rules),
        settings: Arc::clone(&settings),
        source: Arc::clone(&source),
    });
    let readings_router = create_readings_router(ReadingsAppState {
        pipeline: Arc::clone(&pipeline),
        source: Arc::clone(&source),
    });
    let ws_router = create_ws_router(Arc::new(WsAppState {
        registry: Arc::clone(&registry),
        source: Arc::clone(&source),
        snapshots: Arc::new(NullSnapshotSource),
    }));

    let app = alert_router
        .merge(readings_router)
        .merge(ws_router)
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;
    info!(bind = %config.server.bind, "CityPulse listening");

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "Server error");
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    server_handle.abort();
    info!("CityPulse stopped");

    Ok(())
}
