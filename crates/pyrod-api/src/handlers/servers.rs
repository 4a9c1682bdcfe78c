//! Server configuration, lifecycle, stats, and logs

use crate::context::AppContext;
use crate::error::ApiResult;
use axum::extract::{Path, Query, State};
use axum::Json;
use pyrod_agent::{LogRecord, ServerState, StatsSample};
use pyrod_core::DaemonError;
use pyrod_egg::ServerConfig;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

const DEFAULT_LOG_TAIL: usize = 100;

#[derive(Debug, Serialize)]
pub struct ServerDetail {
    pub config: ServerConfig,
    pub state: ServerState,
}

#[derive(Debug, Serialize)]
pub struct LifecycleResponse {
    pub id: String,
    pub state: ServerState,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CommandRequest {
    pub command: String,
}

#[derive(Debug, Serialize)]
pub struct CommandResponse {
    pub sent: String,
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub lines: Option<usize>,
}

/// Persist an instance configuration and create its directory
#[utoipa::path(
    post,
    path = "/api/servers/{id}/configure",
    responses(
        (status = 200, description = "Configuration persisted"),
        (status = 400, description = "Validation failed"),
    ),
    tag = "Servers"
)]
pub async fn configure(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
    Json(cfg): Json<ServerConfig>,
) -> ApiResult<Json<ServerConfig>> {
    Ok(Json(ctx.store.upsert(&id, cfg).await?))
}

/// Configuration plus current lifecycle state
#[utoipa::path(
    get,
    path = "/api/servers/{id}",
    responses(
        (status = 200, description = "Server detail"),
        (status = 404, description = "Unknown server"),
    ),
    tag = "Servers"
)]
pub async fn get_server(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
) -> ApiResult<Json<ServerDetail>> {
    let config = ctx.store.get(&id).await?;
    let state = ctx.supervisor.state(&id).await;
    Ok(Json(ServerDetail { config, state }))
}

macro_rules! lifecycle_handler {
    ($name:ident, $method:ident, $path:literal, $desc:literal) => {
        #[doc = $desc]
        #[utoipa::path(
            post,
            path = $path,
            responses(
                (status = 200, description = $desc),
                (status = 404, description = "Unknown server"),
                (status = 409, description = "Illegal in the current state"),
            ),
            tag = "Servers"
        )]
        pub async fn $name(
            State(ctx): State<Arc<AppContext>>,
            Path(id): Path<String>,
        ) -> ApiResult<Json<LifecycleResponse>> {
            ctx.supervisor.$method(&id).await?;
            let state = ctx.supervisor.state(&id).await;
            Ok(Json(LifecycleResponse { id, state }))
        }
    };
}

lifecycle_handler!(install, install, "/api/servers/{id}/install", "Run the installer");
lifecycle_handler!(
    reinstall,
    reinstall,
    "/api/servers/{id}/reinstall",
    "Wipe and reinstall"
);
lifecycle_handler!(start, start, "/api/servers/{id}/start", "Start the server");
lifecycle_handler!(stop, stop, "/api/servers/{id}/stop", "Gracefully stop the server");
lifecycle_handler!(restart, restart, "/api/servers/{id}/restart", "Restart the server");
lifecycle_handler!(kill, kill, "/api/servers/{id}/kill", "Kill the server immediately");

/// Inject a console command into the running server
#[utoipa::path(
    post,
    path = "/api/servers/{id}/command",
    responses(
        (status = 200, description = "Command delivered"),
        (status = 409, description = "Server is not running"),
    ),
    tag = "Servers"
)]
pub async fn command(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
    Json(req): Json<CommandRequest>,
) -> ApiResult<Json<CommandResponse>> {
    ctx.supervisor.send_command(&id, &req.command).await?;
    Ok(Json(CommandResponse { sent: req.command }))
}

/// Last resource sample for a running server
#[utoipa::path(
    get,
    path = "/api/servers/{id}/stats",
    responses(
        (status = 200, description = "Last stats sample"),
        (status = 404, description = "No sample yet"),
    ),
    tag = "Servers"
)]
pub async fn stats(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
) -> ApiResult<Json<StatsSample>> {
    let sample = ctx
        .registry
        .last_stats(&id)
        .await
        .ok_or_else(|| DaemonError::NotFound(format!("no stats for server '{id}'")))?;
    Ok(Json(sample))
}

/// Recent log records from today's file (default 100)
#[utoipa::path(
    get,
    path = "/api/servers/{id}/logs",
    params(("lines" = Option<usize>, Query, description = "Tail count")),
    responses((status = 200, description = "Recent log records")),
    tag = "Servers"
)]
pub async fn logs(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> ApiResult<Json<Vec<LogRecord>>> {
    if !ctx.store.exists(&id).await {
        return Err(DaemonError::NotFound(format!("server '{id}'")).into());
    }
    let lines = query.lines.unwrap_or(DEFAULT_LOG_TAIL);
    let records = pyrod_agent::logs::tail_records(&ctx.config.logs_dir(), &id, lines);
    Ok(Json(records))
}
