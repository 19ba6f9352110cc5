//! Inbound domain events.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use common::DomainEvent;
use projections::Outcome;
use serde::Serialize;

use crate::AppState;
use crate::error::ApiError;

#[derive(Debug, Serialize)]
pub struct EventResponse {
    pub outcome: Outcome,
}

/// POST /events — project one event delivered by the bus.
///
/// Stale, unknown and unsubscribed events succeed with the matching
/// outcome; redelivery is always safe.
pub async fn ingest(
    State(state): State<Arc<AppState>>,
    body: Result<Json<DomainEvent>, JsonRejection>,
) -> Result<Json<EventResponse>, ApiError> {
    let Json(event) = body?;
    let outcome = state
        .projections
        .handle_with_timeout(&event, state.projection_timeout)
        .await?;
    Ok(Json(EventResponse { outcome }))
}
