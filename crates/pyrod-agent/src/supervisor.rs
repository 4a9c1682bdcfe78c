//! Lifecycle supervisor
//!
//! Owns the per-server state machine and the container binding behind it.
//! Every lifecycle operation for one server is serialized through that
//! server's async mutex, and every transition goes through the status
//! publisher before the lock is released, so a second request always
//! observes the previous transition.
//!
//! ```text
//! absent ──configure──► offline
//! offline ──install──► installing ──ok──► offline
//!                               └─fail──► install_failed
//! offline ──start──► starting ──done sentinel──► online
//!                           └──exit──► offline / error
//! online ──stop──► stopping ──► offline
//! online ──kill──► offline
//! ```

use crate::console::CommandInjector;
use crate::events::EventBus;
use crate::image::ImageResolver;
use crate::installer::{self, Installer};
use crate::logs::{self, PipelineOptions};
use crate::registry::{ContainerHandle, ContainerRegistry};
use crate::runtime::{CreateOpts, PortMapping, Runtime};
use crate::status::{ServerState, StatusPublisher};
use crate::store::ConfigStore;
use crate::{server_container_name, SERVER_LABEL, SERVER_NAME_PREFIX};
use pyrod_core::{DaemonConfig, DaemonError, Result, Sandbox};
use pyrod_egg::{expand, Egg, ServerConfig};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

/// How long the server gets to exit after its stop command
const STOP_DRAIN: Duration = Duration::from_secs(10);

/// Grace passed to the engine's stop call
const ENGINE_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause between stop and start during a restart
const RESTART_PAUSE: Duration = Duration::from_secs(2);

/// Online promotion fallback when an egg declares no sentinel
const STARTUP_FALLBACK: Duration = Duration::from_secs(15);

/// Capabilities added back after dropping all of them
const RUNTIME_CAPS: [&str; 5] = ["CHOWN", "DAC_OVERRIDE", "FOWNER", "SETGID", "SETUID"];

/// Instance root mount point inside runtime containers
const RUNTIME_MOUNT: &str = "/home/container";

pub struct Supervisor {
    runtime: Arc<dyn Runtime>,
    store: Arc<ConfigStore>,
    registry: Arc<ContainerRegistry>,
    bus: Arc<EventBus>,
    status: Arc<StatusPublisher>,
    installer: Installer,
    images: ImageResolver,
    console: Arc<CommandInjector>,
    sandbox: Sandbox,
    logs_dir: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Supervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        runtime: Arc<dyn Runtime>,
        store: Arc<ConfigStore>,
        registry: Arc<ContainerRegistry>,
        bus: Arc<EventBus>,
        status: Arc<StatusPublisher>,
        console: Arc<CommandInjector>,
        config: DaemonConfig,
    ) -> Self {
        let sandbox = Sandbox::new(config.servers_dir());
        let installer = Installer::new(
            Arc::clone(&runtime),
            Arc::clone(&bus),
            sandbox.clone(),
            config.logs_dir(),
            config.install_image.clone(),
        );
        let images = ImageResolver::new(Arc::clone(&runtime), config.clone());

        Self {
            runtime,
            store,
            registry,
            bus,
            status,
            installer,
            images,
            console,
            sandbox,
            logs_dir: config.logs_dir(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Current lifecycle state
    pub async fn state(&self, id: &str) -> ServerState {
        self.status.get(id).await
    }

    /// Run the installer for a configured server
    pub async fn install(&self, id: &str) -> Result<()> {
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;
        self.install_locked(id).await
    }

    /// Wipe the instance directory and install from scratch
    pub async fn reinstall(&self, id: &str) -> Result<()> {
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;

        if self.status.get(id).await.is_running() {
            if let Err(e) = self.stop_locked(id).await {
                tracing::warn!(server = %id, error = %e, "pre-reinstall stop failed");
            }
        }

        let root = self.sandbox.root(id);
        if let Err(e) = std::fs::remove_dir_all(&root) {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(DaemonError::io(&root, e));
            }
        }
        std::fs::create_dir_all(&root).map_err(|e| DaemonError::io(&root, e))?;

        self.install_locked(id).await
    }

    pub async fn start(&self, id: &str) -> Result<()> {
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;
        self.start_locked(id).await
    }

    pub async fn stop(&self, id: &str) -> Result<()> {
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;
        self.stop_locked(id).await
    }

    /// Immediate engine kill, no stop command, no drain
    pub async fn kill(&self, id: &str) -> Result<()> {
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;

        let state = self.status.get(id).await;
        if !state.is_running() {
            return Err(DaemonError::Conflict(format!(
                "server '{id}' is not running (state: {state})"
            )));
        }

        let container = self
            .registry
            .container_name(id)
            .await
            .unwrap_or_else(|| server_container_name(id));

        if let Err(e) = self.runtime.signal_container(&container, "SIGKILL").await {
            tracing::warn!(server = %id, error = %e, "kill signal failed");
        }
        self.registry.evict(id).await;
        if let Err(e) = self.runtime.remove_container(&container).await {
            tracing::debug!(server = %id, error = %e, "post-kill remove failed");
        }

        self.status.transition(id, ServerState::Offline).await;
        Ok(())
    }

    /// Stop (when running), pause briefly, start again
    pub async fn restart(&self, id: &str) -> Result<()> {
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;

        if self.status.get(id).await.is_running() {
            self.stop_locked(id).await?;
        }
        tokio::time::sleep(RESTART_PAUSE).await;
        self.start_locked(id).await
    }

    /// Deliver a console command to a running server
    pub async fn send_command(&self, id: &str, command: &str) -> Result<()> {
        self.console.send(id, command).await
    }

    /// Reconcile persisted configs with engine reality after a daemon
    /// restart: re-adopt running containers, clear out stopped leftovers.
    pub async fn adopt_running(&self) {
        let names = match self.runtime.list_container_names(SERVER_NAME_PREFIX).await {
            Ok(names) => names,
            Err(e) => {
                tracing::warn!(error = %e, "startup adoption listing failed");
                return;
            }
        };

        for container in names {
            let id = container
                .strip_prefix(SERVER_NAME_PREFIX)
                .unwrap_or(&container)
                .to_string();

            if !self.store.exists(&id).await {
                tracing::info!(container = %container, "removing container without config");
                let _ = self
                    .runtime
                    .stop_container(&container, ENGINE_STOP_TIMEOUT)
                    .await;
                let _ = self.runtime.remove_container(&container).await;
                continue;
            }

            match self.runtime.is_running(&container).await {
                Ok(true) => {
                    tracing::info!(server = %id, "adopting running container");
                    let log_task = logs::spawn_pipeline(
                        Arc::clone(&self.runtime),
                        container.clone(),
                        id.clone(),
                        Arc::clone(&self.bus),
                        self.logs_dir.clone(),
                        PipelineOptions::default(),
                    );
                    self.registry
                        .register(
                            &id,
                            ContainerHandle {
                                container_name: container.clone(),
                                log_task: Some(log_task),
                                promotion_task: None,
                            },
                        )
                        .await;
                    self.status.seed(&id, ServerState::Online).await;
                }
                _ => {
                    tracing::info!(server = %id, "removing stopped leftover container");
                    let _ = self.runtime.remove_container(&container).await;
                }
            }
        }
    }

    /// Graceful daemon shutdown: stop and remove every supervised container
    pub async fn shutdown_all(&self) {
        for (id, container) in self.registry.entries().await {
            tracing::info!(server = %id, "stopping container for shutdown");
            if let Err(e) = self
                .runtime
                .stop_container(&container, ENGINE_STOP_TIMEOUT)
                .await
            {
                tracing::warn!(server = %id, error = %e, "shutdown stop failed");
            }
            let _ = self.runtime.remove_container(&container).await;
            self.registry.evict(&id).await;
        }
    }

    // ----- internals, called with the instance lock held -----

    async fn install_locked(&self, id: &str) -> Result<()> {
        let (egg, cfg) = self.hydrated(id).await?;

        let state = self.status.get(id).await;
        if state.is_running() || state == ServerState::Installing {
            return Err(DaemonError::Conflict(format!(
                "cannot install while server '{id}' is {state}"
            )));
        }

        self.status.transition(id, ServerState::Installing).await;

        match self.installer.run(&egg, &cfg).await {
            Ok(()) => {
                self.status.transition(id, ServerState::Offline).await;
                Ok(())
            }
            Err(e) => {
                self.status.transition(id, ServerState::InstallFailed).await;
                Err(e)
            }
        }
    }

    async fn start_locked(&self, id: &str) -> Result<()> {
        let (egg, cfg) = self.hydrated(id).await?;

        let state = self.status.get(id).await;
        if !matches!(state, ServerState::Offline | ServerState::InstallFailed) {
            return Err(DaemonError::Conflict(format!(
                "cannot start server '{id}' while {state}"
            )));
        }

        let container = server_container_name(id);
        if self.runtime.container_exists(&container).await? {
            tracing::info!(server = %id, "removing stale container before start");
            self.runtime.remove_container(&container).await?;
        }

        let root = self.sandbox.root(id);
        std::fs::create_dir_all(&root).map_err(|e| DaemonError::io(&root, e))?;
        let host_root = root.canonicalize().map_err(|e| DaemonError::io(&root, e))?;

        let image = self.images.ensure_runtime_image(&egg, &cfg, &root).await?;
        let startup = expand(&egg.startup, &egg, &cfg);

        let mut ports = vec![PortMapping::tcp(cfg.port), PortMapping::udp(cfg.port)];
        if cfg.game.eq_ignore_ascii_case("minecraft") {
            match cfg.port.checked_add(1000) {
                Some(rcon) => ports.push(PortMapping::tcp(rcon)),
                None => {
                    tracing::warn!(server = %id, port = cfg.port, "rcon port would overflow, skipping")
                }
            }
        }

        let opts = CreateOpts {
            name: container.clone(),
            image,
            env: runtime_env(&egg, &cfg),
            cmd: vec![
                "sh".to_string(),
                "-c".to_string(),
                format!("cd {RUNTIME_MOUNT} && exec {startup}"),
            ],
            working_dir: Some(RUNTIME_MOUNT.to_string()),
            binds: vec![format!("{}:{RUNTIME_MOUNT}", host_root.display())],
            ports,
            memory_bytes: Some(cfg.plan.memory_bytes()),
            nano_cpus: Some(cfg.plan.nano_cpus()),
            labels: HashMap::from([(SERVER_LABEL.to_string(), id.to_string())]),
            restart_unless_stopped: true,
            drop_all_caps: true,
            cap_add: RUNTIME_CAPS.iter().map(|c| c.to_string()).collect(),
            no_new_privileges: true,
            tty_with_stdin: true,
            auto_remove: false,
        };

        self.runtime.create_container(&opts).await?;
        if let Err(e) = self.runtime.start_container(&container).await {
            let _ = self.runtime.remove_container(&container).await;
            return Err(e);
        }

        let sentinel = egg.config.startup.done.clone();
        let (sentinel_tx, sentinel_rx) = mpsc::channel(1);

        let log_task = logs::spawn_pipeline(
            Arc::clone(&self.runtime),
            container.clone(),
            id.to_string(),
            Arc::clone(&self.bus),
            self.logs_dir.clone(),
            PipelineOptions {
                sentinel: sentinel.clone(),
                level_override: None,
                sentinel_tx: Some(sentinel_tx),
            },
        );

        let promotion_task = self.spawn_promotion(id, sentinel.is_some(), sentinel_rx);

        self.registry
            .register(
                id,
                ContainerHandle {
                    container_name: container,
                    log_task: Some(log_task),
                    promotion_task: Some(promotion_task),
                },
            )
            .await;

        self.status.transition(id, ServerState::Starting).await;
        Ok(())
    }

    /// Promote `starting -> online`, either on the sentinel firing or, when
    /// the egg declares none, on a coarse timer.
    fn spawn_promotion(
        &self,
        id: &str,
        has_sentinel: bool,
        mut sentinel_rx: mpsc::Receiver<()>,
    ) -> tokio::task::JoinHandle<()> {
        let status = Arc::clone(&self.status);
        let id = id.to_string();
        tokio::spawn(async move {
            if has_sentinel {
                if sentinel_rx.recv().await.is_none() {
                    return;
                }
            } else {
                tokio::time::sleep(STARTUP_FALLBACK).await;
            }

            if status.get(&id).await == ServerState::Starting {
                status.transition(&id, ServerState::Online).await;
            }
        })
    }

    async fn stop_locked(&self, id: &str) -> Result<()> {
        let cfg = self.store.get(id).await?;

        let state = self.status.get(id).await;
        if !matches!(state, ServerState::Online | ServerState::Starting) {
            return Err(DaemonError::Conflict(format!(
                "server '{id}' is not running (state: {state})"
            )));
        }

        self.status.transition(id, ServerState::Stopping).await;

        let container = self
            .registry
            .container_name(id)
            .await
            .unwrap_or_else(|| server_container_name(id));

        let stop_command = cfg.egg.as_ref().and_then(|egg| egg.config.stop.clone());
        match stop_command.as_deref() {
            Some(cmd) if cmd.starts_with('^') => {
                let signal = caret_signal(cmd);
                if let Err(e) = self.runtime.signal_container(&container, signal).await {
                    tracing::warn!(server = %id, signal = %signal, error = %e, "stop signal failed");
                }
            }
            Some(cmd) => {
                if let Err(e) = self.console.send(id, cmd).await {
                    tracing::warn!(server = %id, error = %e, "stop command delivery failed");
                }
            }
            None => {}
        }

        self.drain(&container).await;

        if let Err(e) = self
            .runtime
            .stop_container(&container, ENGINE_STOP_TIMEOUT)
            .await
        {
            tracing::debug!(server = %id, error = %e, "engine stop after drain failed");
        }

        self.registry.evict(id).await;
        if let Err(e) = self.runtime.remove_container(&container).await {
            tracing::debug!(server = %id, error = %e, "container remove failed");
        }

        self.status.transition(id, ServerState::Offline).await;
        Ok(())
    }

    /// Give the server up to the drain window to exit on its own
    async fn drain(&self, container: &str) {
        let deadline = tokio::time::Instant::now() + STOP_DRAIN;
        while tokio::time::Instant::now() < deadline {
            match self.runtime.is_running(container).await {
                Ok(true) => tokio::time::sleep(Duration::from_millis(500)).await,
                _ => return,
            }
        }
    }

    /// Config with its egg snapshot, or `BadRequest` when the egg is gone
    async fn hydrated(&self, id: &str) -> Result<(Egg, ServerConfig)> {
        let cfg = self.store.get(id).await?;
        let egg = cfg.egg.clone().ok_or_else(|| {
            DaemonError::BadRequest(format!(
                "egg '{}' for server '{id}' no longer exists",
                cfg.egg_id
            ))
        })?;
        Ok((egg, cfg))
    }

    async fn lock_for(&self, id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(
            locks
                .entry(id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }
}

/// Map a `^X` stop convention onto an engine signal
fn caret_signal(cmd: &str) -> &'static str {
    match cmd {
        "^C" => "SIGINT",
        "^Z" => "SIGTSTP",
        _ => "SIGTERM",
    }
}

/// Environment for runtime containers: the install set plus identity values
/// and the raw startup template for in-container reference.
fn runtime_env(egg: &Egg, cfg: &ServerConfig) -> Vec<String> {
    let mut env = installer::install_env(egg, cfg);
    env.push(format!("P_SERVER_UUID={}", cfg.id));
    env.push(format!("P_SERVER_LOCATION={}", cfg.location));
    env.push(format!("STARTUP={}", egg.startup));
    env
}
