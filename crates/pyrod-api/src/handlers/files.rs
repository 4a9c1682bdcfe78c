//! Sandboxed file operations
//!
//! Thin wrappers over the agent's file service; every path in every payload
//! is re-validated by the sandbox underneath, so these handlers never touch
//! the filesystem themselves.

use crate::context::AppContext;
use crate::error::ApiResult;
use axum::extract::{Path, Query, State};
use axum::Json;
use pyrod_agent::{DirEntryInfo, Encoding};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct PathQuery {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub encoding: Encoding,
}

#[derive(Debug, Deserialize)]
pub struct WriteBody {
    pub path: String,
    pub content: String,
    #[serde(default)]
    pub encoding: Encoding,
}

#[derive(Debug, Deserialize)]
pub struct PathBody {
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct TwoPathBody {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Serialize)]
pub struct FileContent {
    pub path: String,
    pub content: String,
    pub encoding: Encoding,
}

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub ok: bool,
}

const OK: OkResponse = OkResponse { ok: true };

/// Directory listing, directories first
pub async fn list(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
    Query(query): Query<PathQuery>,
) -> ApiResult<Json<Vec<DirEntryInfo>>> {
    Ok(Json(ctx.files.list(&id, &query.path)?))
}

/// File content in the requested encoding
pub async fn read(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
    Query(query): Query<PathQuery>,
) -> ApiResult<Json<FileContent>> {
    let content = ctx.files.read(&id, &query.path, query.encoding)?;
    Ok(Json(FileContent {
        path: query.path,
        content,
        encoding: query.encoding,
    }))
}

/// Create or overwrite a file
pub async fn write(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
    Json(body): Json<WriteBody>,
) -> ApiResult<Json<OkResponse>> {
    ctx.files.write(&id, &body.path, &body.content, body.encoding)?;
    Ok(Json(OK))
}

/// Overwrite with a backup sibling of the previous content
pub async fn update(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
    Json(body): Json<WriteBody>,
) -> ApiResult<Json<OkResponse>> {
    ctx.files.update(&id, &body.path, &body.content, body.encoding)?;
    Ok(Json(OK))
}

/// Delete a file or directory tree
pub async fn delete(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
    Json(body): Json<PathBody>,
) -> ApiResult<Json<OkResponse>> {
    ctx.files.delete(&id, &body.path)?;
    Ok(Json(OK))
}

/// Copy a file or directory tree
pub async fn copy(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
    Json(body): Json<TwoPathBody>,
) -> ApiResult<Json<OkResponse>> {
    ctx.files.copy(&id, &body.from, &body.to)?;
    Ok(Json(OK))
}

/// Rename/move within the instance root
pub async fn rename(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
    Json(body): Json<TwoPathBody>,
) -> ApiResult<Json<OkResponse>> {
    ctx.files.rename(&id, &body.from, &body.to)?;
    Ok(Json(OK))
}
