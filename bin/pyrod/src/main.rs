//! pyrod - node-local game-server daemon
//!
//! Wires the agent together and serves the request surface: connect to the
//! container engine (fail fast when unreachable), load the egg and config
//! registries, adopt containers that survived a daemon restart, start the
//! background tickers, then serve HTTP until SIGTERM.
//!
//! SIGTERM stops every supervised container before exiting; SIGINT exits
//! immediately and leaves containers to the engine's own restart policy.

use pyrod_agent::{
    CommandInjector, ConfigStore, ContainerRegistry, DockerRuntime, EggRegistry, EventBus,
    FileService, PanelClient, Reconciler, Runtime, StatsSampler, StatusPublisher, Supervisor,
};
use pyrod_api::{ApiServer, AppContext};
use pyrod_core::{DaemonConfig, Sandbox};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = DaemonConfig::from_env();
    config.ensure_layout()?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        data_dir = %config.data_dir.display(),
        port = config.port,
        panel = config.panel_url.as_deref().unwrap_or("(disabled)"),
        "pyrod starting"
    );

    // Engine-unreachable at startup is the one fatal condition
    let runtime: Arc<dyn Runtime> = Arc::new(DockerRuntime::new().await?);

    let eggs = Arc::new(EggRegistry::load(config.eggs_dir())?);
    let store = Arc::new(ConfigStore::load(
        config.configs_dir(),
        config.servers_dir(),
        Arc::clone(&eggs),
    )?);
    let registry = Arc::new(ContainerRegistry::new());
    let bus = Arc::new(EventBus::new());
    let panel = Arc::new(PanelClient::new(config.panel_url.clone()));
    let status = Arc::new(StatusPublisher::new(Arc::clone(&bus), panel));
    let console = Arc::new(CommandInjector::new(
        Arc::clone(&runtime),
        Arc::clone(&registry),
        Arc::clone(&bus),
        config.logs_dir(),
    ));
    let supervisor = Arc::new(Supervisor::new(
        Arc::clone(&runtime),
        Arc::clone(&store),
        Arc::clone(&registry),
        Arc::clone(&bus),
        Arc::clone(&status),
        Arc::clone(&console),
        config.clone(),
    ));

    // Reconcile engine state left over from a previous daemon run
    supervisor.adopt_running().await;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let sampler = StatsSampler::new(Arc::clone(&runtime), Arc::clone(&registry), Arc::clone(&bus));
    let sampler_shutdown = shutdown_rx.clone();
    let sampler_task = tokio::spawn(async move { sampler.run(sampler_shutdown).await });

    let reconciler = Reconciler::new(
        Arc::clone(&runtime),
        Arc::clone(&registry),
        Arc::clone(&store),
        Arc::clone(&bus),
        Arc::clone(&status),
        config.logs_dir(),
    );
    let reconciler_shutdown = shutdown_rx.clone();
    let reconciler_task = tokio::spawn(async move { reconciler.run(reconciler_shutdown).await });

    let ctx = Arc::new(AppContext {
        files: FileService::new(Sandbox::new(config.servers_dir())),
        runtime,
        eggs,
        store,
        registry,
        supervisor: Arc::clone(&supervisor),
        bus,
        console,
        config: config.clone(),
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let server = ApiServer::new(addr, ctx);

    server.run_with_shutdown(wait_for_sigterm()).await?;

    // Graceful path: stop everything we supervise, then exit
    tracing::info!("draining supervised containers");
    let _ = shutdown_tx.send(true);
    supervisor.shutdown_all().await;
    sampler_task.abort();
    reconciler_task.abort();

    tracing::info!("pyrod stopped");
    Ok(())
}

/// Resolves on SIGTERM. SIGINT short-circuits the process instead:
/// containers keep running under their `unless-stopped` policy.
async fn wait_for_sigterm() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("SIGTERM received, shutting down gracefully");
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("SIGINT received, exiting immediately");
                std::process::exit(0);
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
