//! API router construction

use crate::context::AppContext;
use crate::handlers;
use crate::openapi::ApiDoc;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

/// Build the daemon's router over a shared context
pub fn build_router(ctx: Arc<AppContext>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let egg_routes = Router::new()
        .route("/", get(handlers::eggs::list_eggs))
        .route("/", put(handlers::eggs::put_egg))
        .route("/{id}", get(handlers::eggs::get_egg))
        .route("/{id}", delete(handlers::eggs::delete_egg));

    let file_routes = Router::new()
        .route("/{id}/files", get(handlers::files::list))
        .route("/{id}/files/contents", get(handlers::files::read))
        .route("/{id}/files/write", post(handlers::files::write))
        .route("/{id}/files/update", post(handlers::files::update))
        .route("/{id}/files/delete", post(handlers::files::delete))
        .route("/{id}/files/copy", post(handlers::files::copy))
        .route("/{id}/files/rename", post(handlers::files::rename));

    let server_routes = Router::new()
        .route("/{id}", get(handlers::servers::get_server))
        .route("/{id}/configure", post(handlers::servers::configure))
        .route("/{id}/install", post(handlers::servers::install))
        .route("/{id}/reinstall", post(handlers::servers::reinstall))
        .route("/{id}/start", post(handlers::servers::start))
        .route("/{id}/stop", post(handlers::servers::stop))
        .route("/{id}/restart", post(handlers::servers::restart))
        .route("/{id}/kill", post(handlers::servers::kill))
        .route("/{id}/command", post(handlers::servers::command))
        .route("/{id}/stats", get(handlers::servers::stats))
        .route("/{id}/logs", get(handlers::servers::logs))
        .route("/{id}/ws", get(handlers::console::subscribe))
        .merge(file_routes);

    Router::new()
        .route("/health", get(handlers::health::health))
        .route(
            "/api-docs/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        )
        .nest("/api/eggs", egg_routes)
        .nest("/api/servers", server_routes)
        .with_state(ctx)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
