//! Request-surface integration tests over the mock engine

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use pyrod_agent::{
    CommandInjector, ConfigStore, ContainerRegistry, EggRegistry, EventBus, FileService,
    MockRuntime, PanelClient, StatusPublisher, Supervisor,
};
use pyrod_api::{build_router, AppContext};
use pyrod_core::{DaemonConfig, Sandbox};
use std::sync::Arc;
use tower::ServiceExt;

fn router() -> (tempfile::TempDir, Router) {
    let tmp = tempfile::tempdir().unwrap();
    let config = DaemonConfig::default().with_data_dir(tmp.path());
    config.ensure_layout().unwrap();

    let runtime = Arc::new(MockRuntime::new());
    let eggs = Arc::new(EggRegistry::load(config.eggs_dir()).unwrap());
    let store = Arc::new(
        ConfigStore::load(config.configs_dir(), config.servers_dir(), Arc::clone(&eggs)).unwrap(),
    );
    let registry = Arc::new(ContainerRegistry::new());
    let bus = Arc::new(EventBus::new());
    let status = Arc::new(StatusPublisher::new(
        Arc::clone(&bus),
        Arc::new(PanelClient::disabled()),
    ));
    let console = Arc::new(CommandInjector::new(
        runtime.clone(),
        Arc::clone(&registry),
        Arc::clone(&bus),
        config.logs_dir(),
    ));
    let supervisor = Arc::new(Supervisor::new(
        runtime.clone(),
        Arc::clone(&store),
        Arc::clone(&registry),
        Arc::clone(&bus),
        status,
        Arc::clone(&console),
        config.clone(),
    ));

    let ctx = Arc::new(AppContext {
        files: FileService::new(Sandbox::new(config.servers_dir())),
        config,
        runtime,
        eggs,
        store,
        registry,
        supervisor,
        bus,
        console,
    });

    (tmp, build_router(ctx))
}

fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn empty_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn terraria_config() -> serde_json::Value {
    serde_json::json!({
        "id": "s1",
        "eggId": "terraria",
        "port": 7777,
        "plan": { "ram": 1, "cpu": 1, "disk": 5 },
        "location": "us-east",
        "name": "test",
        "game": "terraria",
        "variables": { "WORLD_NAME": "PyroWorld" }
    })
}

#[tokio::test]
async fn health_reports_counts() {
    let (_tmp, router) = router();
    let response = router.oneshot(empty_request("GET", "/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["counts"]["eggs"], 2);
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn eggs_listing_includes_seeds() {
    let (_tmp, router) = router();
    let response = router
        .oneshot(empty_request("GET", "/api/eggs"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    let ids: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["id"].as_str().unwrap())
        .collect();
    assert!(ids.contains(&"terraria"));
    assert!(ids.contains(&"minecraft-vanilla"));
}

#[tokio::test]
async fn configure_then_get_round_trips() {
    let (_tmp, router) = router();

    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/servers/s1/configure",
            terraria_config(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = router
        .oneshot(empty_request("GET", "/api/servers/s1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["config"]["port"], 7777);
    assert_eq!(body["config"]["egg"]["id"], "terraria");
    assert_eq!(body["state"], "offline");
}

#[tokio::test]
async fn configure_rejects_privileged_ports() {
    let (_tmp, router) = router();

    let mut cfg = terraria_config();
    cfg["port"] = serde_json::json!(1023);
    let response = router
        .oneshot(json_request("POST", "/api/servers/s1/configure", cfg))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn install_then_status_offline() {
    let (tmp, router) = router();

    router
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/servers/s1/configure",
            terraria_config(),
        ))
        .await
        .unwrap();

    let response = router
        .clone()
        .oneshot(empty_request("POST", "/api/servers/s1/install"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["state"], "offline");
    assert!(tmp.path().join("servers/s1/serverconfig.txt").exists());
}

#[tokio::test]
async fn lifecycle_conflicts_map_to_409() {
    let (_tmp, router) = router();
    router
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/servers/s1/configure",
            terraria_config(),
        ))
        .await
        .unwrap();

    // Stop before ever starting
    let response = router
        .oneshot(empty_request("POST", "/api/servers/s1/stop"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn unknown_server_maps_to_404() {
    let (_tmp, router) = router();
    let response = router
        .oneshot(empty_request("POST", "/api/servers/ghost/start"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn stats_before_any_sample_is_404() {
    let (_tmp, router) = router();
    router
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/servers/s1/configure",
            terraria_config(),
        ))
        .await
        .unwrap();

    let response = router
        .oneshot(empty_request("GET", "/api/servers/s1/stats"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn file_write_and_read_through_the_surface() {
    let (_tmp, router) = router();
    router
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/servers/s1/configure",
            terraria_config(),
        ))
        .await
        .unwrap();

    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/servers/s1/files/write",
            serde_json::json!({ "path": "motd.txt", "content": "hello" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = router
        .oneshot(empty_request(
            "GET",
            "/api/servers/s1/files/contents?path=motd.txt",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["content"], "hello");
}

#[tokio::test]
async fn path_escape_maps_to_400() {
    let (_tmp, router) = router();
    router
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/servers/s1/configure",
            terraria_config(),
        ))
        .await
        .unwrap();

    let response = router
        .oneshot(empty_request(
            "GET",
            "/api/servers/s1/files/contents?path=../../etc/passwd",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn logs_default_to_empty_tail() {
    let (_tmp, router) = router();
    router
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/servers/s1/configure",
            terraria_config(),
        ))
        .await
        .unwrap();

    let response = router
        .oneshot(empty_request("GET", "/api/servers/s1/logs"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, serde_json::json!([]));
}

#[tokio::test]
async fn openapi_document_is_served() {
    let (_tmp, router) = router();
    let response = router
        .oneshot(empty_request("GET", "/api-docs/openapi.json"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["paths"]["/api/servers/{id}/start"].is_object());
}
