//! End-to-end lifecycle scenarios against the mock engine:
//! configure -> install -> start -> online -> command -> stop, plus the
//! failure and conflict paths around them.

use pyrod_agent::{
    CommandInjector, ConfigStore, ContainerRegistry, EggRegistry, Event, EventBus, LogLevel,
    MockRuntime, PanelClient, Runtime, ServerState, StatusPublisher, Supervisor,
};
use pyrod_core::DaemonConfig;
use pyrod_egg::ServerConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

struct Harness {
    _tmp: tempfile::TempDir,
    runtime: Arc<MockRuntime>,
    store: Arc<ConfigStore>,
    bus: Arc<EventBus>,
    supervisor: Supervisor,
}

fn harness() -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let config = DaemonConfig::default().with_data_dir(tmp.path());
    config.ensure_layout().unwrap();

    let runtime = Arc::new(MockRuntime::new());
    let eggs = Arc::new(EggRegistry::load(config.eggs_dir()).unwrap());
    let store = Arc::new(
        ConfigStore::load(config.configs_dir(), config.servers_dir(), eggs).unwrap(),
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

    let supervisor = Supervisor::new(
        runtime.clone(),
        Arc::clone(&store),
        registry,
        Arc::clone(&bus),
        status,
        console,
        config,
    );

    Harness {
        _tmp: tmp,
        runtime,
        store,
        bus,
        supervisor,
    }
}

fn terraria_config() -> ServerConfig {
    serde_json::from_value(serde_json::json!({
        "id": "s1",
        "eggId": "terraria",
        "port": 7777,
        "plan": { "ram": 1, "cpu": 1, "disk": 5 },
        "location": "us-east",
        "name": "test server",
        "game": "terraria",
        "variables": {
            "WORLD_NAME": "PyroWorld",
            "MAX_PLAYERS": "8",
            "WORLD_SIZE": "2",
            "WORLD_DIFFICULTY": "0",
            "SERVER_MOTD": "hi",
            "WORLD_SEED": "",
            "PASSWORD": ""
        }
    }))
    .unwrap()
}

fn drain_statuses(rx: &mut broadcast::Receiver<Event>) -> Vec<ServerState> {
    let mut states = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let Event::ServerStatus { state } = event {
            states.push(state);
        }
    }
    states
}

async fn wait_for_state(h: &Harness, id: &str, expected: ServerState) {
    for _ in 0..100 {
        if h.supervisor.state(id).await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!(
        "server never reached {expected}, stuck at {}",
        h.supervisor.state(id).await
    );
}

#[tokio::test]
async fn configure_and_install_terraria() {
    let h = harness();
    let mut rx = h.bus.subscribe("s1").await;

    h.store.upsert("s1", terraria_config()).await.unwrap();
    h.supervisor.install("s1").await.unwrap();

    // serverconfig.txt materialized with the expanded instance values
    let content = std::fs::read_to_string(
        h._tmp.path().join("servers/s1/serverconfig.txt"),
    )
    .unwrap();
    assert!(content.contains("worldname=PyroWorld"));
    assert!(content.contains("port=7777"));
    assert!(content.contains("maxplayers=8"));

    assert_eq!(h.supervisor.state("s1").await, ServerState::Offline);
    assert_eq!(
        drain_statuses(&mut rx),
        vec![ServerState::Installing, ServerState::Offline]
    );
}

#[tokio::test]
async fn failed_install_parks_in_install_failed() {
    let h = harness();
    h.runtime.set_install_exit_code(1).await;
    h.store.upsert("s1", terraria_config()).await.unwrap();

    assert!(h.supervisor.install("s1").await.is_err());
    assert_eq!(h.supervisor.state("s1").await, ServerState::InstallFailed);
}

#[tokio::test]
async fn two_consecutive_installs_both_end_offline() {
    let h = harness();
    h.store.upsert("s1", terraria_config()).await.unwrap();

    h.supervisor.install("s1").await.unwrap();
    h.supervisor.install("s1").await.unwrap();
    assert_eq!(h.supervisor.state("s1").await, ServerState::Offline);
}

#[tokio::test]
async fn start_promotes_online_via_sentinel() {
    let h = harness();
    h.store.upsert("s1", terraria_config()).await.unwrap();
    h.supervisor.install("s1").await.unwrap();

    h.supervisor.start("s1").await.unwrap();
    assert_eq!(h.supervisor.state("s1").await, ServerState::Starting);

    // The sentinel line arrives on the container's log stream
    h.runtime
        .push_log(
            "pyro-server-s1",
            "Terraria Server v1.4.4.9\nType 'help' for a list of commands\n",
        )
        .await;

    wait_for_state(&h, "s1", ServerState::Online).await;
}

#[tokio::test]
async fn start_container_has_the_specified_shape() {
    let h = harness();
    h.store.upsert("s1", terraria_config()).await.unwrap();
    h.supervisor.install("s1").await.unwrap();
    h.supervisor.start("s1").await.unwrap();

    let opts = h.runtime.created_opts("pyro-server-s1").await.unwrap();
    assert!(opts.cmd[2].contains("cd /home/container"));
    assert!(opts.cmd[2].contains("exec "));
    assert!(opts.cmd[2].contains("-port 7777"));
    assert!(opts.binds[0].ends_with(":/home/container"));
    assert_eq!(opts.memory_bytes, Some(1024 * 1024 * 1024));
    assert_eq!(opts.nano_cpus, Some(1_000_000_000));
    assert!(opts.restart_unless_stopped);
    assert!(opts.drop_all_caps);
    assert!(opts.no_new_privileges);
    assert!(opts.tty_with_stdin);
    assert_eq!(opts.labels.get("pyro.server.id").unwrap(), "s1");
    assert!(opts.env.contains(&"P_SERVER_UUID=s1".to_string()));
    assert!(opts.env.contains(&"SERVER_PORT=7777".to_string()));

    let ports: Vec<(u16, &str)> = opts.ports.iter().map(|p| (p.port, p.protocol)).collect();
    assert!(ports.contains(&(7777, "tcp")));
    assert!(ports.contains(&(7777, "udp")));
}

#[tokio::test]
async fn start_while_running_is_a_conflict() {
    let h = harness();
    h.store.upsert("s1", terraria_config()).await.unwrap();
    h.supervisor.install("s1").await.unwrap();
    h.supervisor.start("s1").await.unwrap();

    match h.supervisor.start("s1").await {
        Err(pyrod_core::DaemonError::Conflict(_)) => {}
        other => panic!("expected Conflict, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn graceful_stop_delivers_console_exit_first() {
    let h = harness();
    h.store.upsert("s1", terraria_config()).await.unwrap();
    h.supervisor.install("s1").await.unwrap();
    h.supervisor.start("s1").await.unwrap();
    h.runtime
        .push_log("pyro-server-s1", "Type 'help' for a list of commands\n")
        .await;
    wait_for_state(&h, "s1", ServerState::Online).await;

    let mut rx = h.bus.subscribe("s1").await;
    h.supervisor.stop("s1").await.unwrap();

    // The terraria egg's stop command is a console string: "exit"
    let history = h.runtime.exec_history().await;
    assert!(
        history
            .iter()
            .any(|(c, argv)| c == "pyro-server-s1" && argv[2].contains("'exit'")),
        "stop command was not injected: {history:?}"
    );

    assert_eq!(h.supervisor.state("s1").await, ServerState::Offline);
    assert_eq!(
        drain_statuses(&mut rx),
        vec![ServerState::Stopping, ServerState::Offline]
    );

    // No container with the server's name remains
    assert!(!h.runtime.container_exists("pyro-server-s1").await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn restart_cycles_through_stop_and_start() {
    let h = harness();
    h.store.upsert("s1", terraria_config()).await.unwrap();
    h.supervisor.install("s1").await.unwrap();
    h.supervisor.start("s1").await.unwrap();
    h.runtime
        .push_log("pyro-server-s1", "Type 'help' for a list of commands\n")
        .await;
    wait_for_state(&h, "s1", ServerState::Online).await;

    h.supervisor.restart("s1").await.unwrap();
    assert_eq!(h.supervisor.state("s1").await, ServerState::Starting);

    h.runtime
        .push_log("pyro-server-s1", "Type 'help' for a list of commands\n")
        .await;
    wait_for_state(&h, "s1", ServerState::Online).await;
}

#[tokio::test]
async fn stop_when_not_running_is_a_conflict() {
    let h = harness();
    h.store.upsert("s1", terraria_config()).await.unwrap();
    assert!(matches!(
        h.supervisor.stop("s1").await,
        Err(pyrod_core::DaemonError::Conflict(_))
    ));
}

#[tokio::test]
async fn kill_is_immediate() {
    let h = harness();
    h.store.upsert("s1", terraria_config()).await.unwrap();
    h.supervisor.install("s1").await.unwrap();
    h.supervisor.start("s1").await.unwrap();

    h.supervisor.kill("s1").await.unwrap();
    assert_eq!(h.supervisor.state("s1").await, ServerState::Offline);
    assert!(!h.runtime.container_exists("pyro-server-s1").await.unwrap());
}

#[tokio::test]
async fn command_injection_reaches_running_server() {
    let h = harness();
    h.store.upsert("s1", terraria_config()).await.unwrap();
    h.supervisor.install("s1").await.unwrap();
    h.supervisor.start("s1").await.unwrap();

    let mut rx = h.bus.subscribe("s1").await;
    h.supervisor.send_command("s1", "say hello").await.unwrap();

    let history = h.runtime.exec_history().await;
    assert!(history[0].1[2].contains("/proc/1/fd/0"));

    // Subscribers see the echoed command
    let mut found = false;
    while let Ok(event) = rx.try_recv() {
        if let Event::ServerLog(rec) = event {
            if rec.message == "> say hello" {
                assert_eq!(rec.level, LogLevel::Info);
                found = true;
            }
        }
    }
    assert!(found);
}

#[tokio::test]
async fn command_to_stopped_server_errors() {
    let h = harness();
    h.store.upsert("s1", terraria_config()).await.unwrap();
    assert!(h.supervisor.send_command("s1", "help").await.is_err());
}

#[tokio::test]
async fn reinstall_clears_the_instance_directory() {
    let h = harness();
    h.store.upsert("s1", terraria_config()).await.unwrap();
    h.supervisor.install("s1").await.unwrap();

    let stray = h._tmp.path().join("servers/s1/stray.dat");
    std::fs::write(&stray, "junk").unwrap();

    h.supervisor.reinstall("s1").await.unwrap();

    assert!(!stray.exists());
    // Config files were re-materialized
    assert!(h
        ._tmp
        .path()
        .join("servers/s1/serverconfig.txt")
        .exists());
    assert_eq!(h.supervisor.state("s1").await, ServerState::Offline);
}

#[tokio::test]
async fn unknown_server_operations_are_not_found() {
    let h = harness();
    assert!(matches!(
        h.supervisor.install("ghost").await,
        Err(pyrod_core::DaemonError::NotFound(_))
    ));
    assert!(matches!(
        h.supervisor.start("ghost").await,
        Err(pyrod_core::DaemonError::NotFound(_))
    ));
}

#[tokio::test]
async fn adopt_running_reclaims_configured_containers() {
    let h = harness();
    h.store.upsert("s1", terraria_config()).await.unwrap();
    h.runtime.seed_container("pyro-server-s1", true).await;
    h.runtime.seed_container("pyro-server-ghost", true).await;

    h.supervisor.adopt_running().await;

    assert_eq!(h.supervisor.state("s1").await, ServerState::Online);
    // The unconfigured container was removed outright
    assert!(!h
        .runtime
        .container_exists("pyro-server-ghost")
        .await
        .unwrap());
}

#[tokio::test]
async fn shutdown_all_stops_everything() {
    let h = harness();
    h.store.upsert("s1", terraria_config()).await.unwrap();
    h.supervisor.install("s1").await.unwrap();
    h.supervisor.start("s1").await.unwrap();

    h.supervisor.shutdown_all().await;
    assert!(!h.runtime.container_exists("pyro-server-s1").await.unwrap());
}
