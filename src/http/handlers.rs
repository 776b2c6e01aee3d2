//! Route handlers.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Serialize;

use crate::envelope::{ClaimRequest, ClaimResponse, CreateRequest, CreateResponse};
use crate::http::request::request_id;
use crate::http::response::ApiError;
use crate::http::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub version: &'static str,
}

/// `GET /health`
pub async fn health() -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `POST /fund`: create an envelope.
pub async fn fund(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateRequest>,
) -> Result<(StatusCode, Json<CreateResponse>), ApiError> {
    tracing::debug!(
        request_id = %request_id(&headers),
        recipients = request.num_recipients,
        color = request.color,
        "Create envelope"
    );
    let created = state.lifecycle.handle_create(request).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// `POST /claim`: claim a share of an envelope.
pub async fn claim(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ClaimRequest>,
) -> Result<Json<ClaimResponse>, ApiError> {
    tracing::debug!(
        request_id = %request_id(&headers),
        envelope = %request.envelope_addr,
        claimant = %request.claimant_addr,
        "Claim envelope"
    );
    let claimed = state.lifecycle.handle_claim(request).await?;
    Ok(Json(claimed))
}
