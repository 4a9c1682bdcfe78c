//! OpenAPI document
//!
//! Served as plain JSON from `/api-docs/openapi.json`; the interactive UI is
//! the control plane's concern, not the node daemon's.

use crate::handlers;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "pyrod",
        description = "Node-local game-server daemon API",
    ),
    paths(
        handlers::health::health,
        handlers::eggs::list_eggs,
        handlers::eggs::get_egg,
        handlers::eggs::put_egg,
        handlers::eggs::delete_egg,
        handlers::servers::configure,
        handlers::servers::get_server,
        handlers::servers::install,
        handlers::servers::reinstall,
        handlers::servers::start,
        handlers::servers::stop,
        handlers::servers::restart,
        handlers::servers::kill,
        handlers::servers::command,
        handlers::servers::stats,
        handlers::servers::logs,
    ),
    tags(
        (name = "Health", description = "Daemon health"),
        (name = "Eggs", description = "Egg descriptor registry"),
        (name = "Servers", description = "Instance configuration and lifecycle"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_builds_and_lists_paths() {
        let doc = ApiDoc::openapi();
        let json = serde_json::to_string(&doc).unwrap();
        assert!(json.contains("/api/servers/{id}/start"));
        assert!(json.contains("/api/eggs"));
    }
}
