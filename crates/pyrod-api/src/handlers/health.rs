//! Health endpoint

use crate::context::AppContext;
use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    #[schema(value_type = String, example = "2025-06-01T12:00:00Z")]
    pub timestamp: DateTime<Utc>,
    pub counts: HealthCounts,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthCounts {
    pub containers: usize,
    pub eggs: usize,
    pub images: usize,
}

/// Daemon health with engine-wide counts; engine counts degrade to zero
/// rather than failing the probe.
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Daemon is healthy", body = HealthResponse)),
    tag = "Health"
)]
pub async fn health(State(ctx): State<Arc<AppContext>>) -> Json<HealthResponse> {
    let containers = ctx.runtime.container_count().await.unwrap_or(0);
    let images = ctx.runtime.image_count().await.unwrap_or(0);
    let eggs = ctx.eggs.count().await;

    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: Utc::now(),
        counts: HealthCounts {
            containers,
            eggs,
            images,
        },
    })
}
