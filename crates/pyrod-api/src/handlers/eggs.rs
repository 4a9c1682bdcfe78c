//! Egg registry CRUD

use crate::context::AppContext;
use crate::error::ApiResult;
use axum::extract::{Path, State};
use axum::Json;
use pyrod_egg::Egg;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct DeletedResponse {
    pub deleted: String,
}

/// All known eggs, sorted by id
#[utoipa::path(
    get,
    path = "/api/eggs",
    responses((status = 200, description = "Egg descriptors")),
    tag = "Eggs"
)]
pub async fn list_eggs(State(ctx): State<Arc<AppContext>>) -> Json<Vec<Egg>> {
    Json(ctx.eggs.list().await)
}

/// One egg by id
#[utoipa::path(
    get,
    path = "/api/eggs/{id}",
    responses(
        (status = 200, description = "Egg descriptor"),
        (status = 404, description = "Unknown egg"),
    ),
    tag = "Eggs"
)]
pub async fn get_egg(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Egg>> {
    Ok(Json(ctx.eggs.get(&id).await?))
}

/// Create or replace an egg descriptor
#[utoipa::path(
    put,
    path = "/api/eggs",
    responses(
        (status = 200, description = "Descriptor persisted"),
        (status = 400, description = "Descriptor failed validation"),
    ),
    tag = "Eggs"
)]
pub async fn put_egg(
    State(ctx): State<Arc<AppContext>>,
    Json(egg): Json<Egg>,
) -> ApiResult<Json<Egg>> {
    ctx.eggs.put(egg.clone()).await?;
    Ok(Json(egg))
}

/// Remove an egg descriptor
#[utoipa::path(
    delete,
    path = "/api/eggs/{id}",
    responses(
        (status = 200, description = "Descriptor removed"),
        (status = 404, description = "Unknown egg"),
    ),
    tag = "Eggs"
)]
pub async fn delete_egg(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
) -> ApiResult<Json<DeletedResponse>> {
    ctx.eggs.delete(&id).await?;
    Ok(Json(DeletedResponse { deleted: id }))
}
