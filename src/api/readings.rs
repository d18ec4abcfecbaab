use crate::api::ApiError;
use crate::auth::{require_capability, PrincipalSource};
use crate::detect::{AlertPipeline, Reading};
use axum::{
    extract::State,
    http::HeaderMap,
    response::Json,
    routing::post,
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// Shared application state for reading ingestion
#[derive(Clone)]
pub struct ReadingsAppState {
    pub pipeline: Arc<AlertPipeline>,
    pub source: Arc<dyn PrincipalSource>,
}

/// Create API router with the reading ingestion endpoint
pub fn create_readings_router(state: ReadingsAppState) -> Router {
    Router::new()
        .route("/api/readings", post(ingest_reading))
        .with_state(Arc::new(state))
}

#[derive(Serialize)]
struct IngestResponse {
    module: String,
    entity: String,
    alerts_raised: usize,
    deduplicated: usize,
}

/// POST /api/readings - Evaluate one sensor reading against the detectors.
///
/// Requires the write capability of the reading's module. The reading itself
/// is not persisted; only the alerts it raises survive.
async fn ingest_reading(
    State(state): State<Arc<ReadingsAppState>>,
    headers: HeaderMap,
    Json(reading): Json<Reading>,
) -> Result<Json<IngestResponse>, ApiError> {
    let capability = format!("{}.write", reading.module());
    let principal = require_capability(&headers, &state.source, &capability)?;

    let outcome = state.pipeline.ingest(&reading);
    info!(
        module = %reading.module(),
        entity = %reading.entity_key(),
        raised = outcome.raised,
        deduplicated = outcome.deduplicated,
        submitted_by = %principal.id,
        "Reading evaluated"
    );

    Ok(Json(IngestResponse {
        module: reading.module().to_string(),
        entity: reading.entity_key().to_string(),
        alerts_raised: outcome.raised,
        deduplicated: outcome.deduplicated,
    }))
}
