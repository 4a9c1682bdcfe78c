//! Reconciler & cleaner
//!
//! Three background sweeps keep memory, the engine, and the disk honest:
//! a fast pass that notices supervised containers which stopped behind the
//! daemon's back, a slow orphan sweep that removes engine containers whose
//! instance config is gone, and a daily retention pass over the log tree.
//! Per-tick errors are swallowed; a broken engine call must not kill the
//! loop or flood the logs.

use crate::events::{Event, EventBus};
use crate::logs::{self, LogLevel, LogRecord};
use crate::registry::ContainerRegistry;
use crate::runtime::Runtime;
use crate::status::{ServerState, StatusPublisher};
use crate::store::ConfigStore;
use crate::SERVER_NAME_PREFIX;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::watch;

const EXIT_CHECK_INTERVAL: Duration = Duration::from_secs(60);
const ORPHAN_SWEEP_INTERVAL: Duration = Duration::from_secs(6 * 60 * 60);
const RETENTION_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Log files older than this are deleted
const LOG_RETENTION: Duration = Duration::from_secs(30 * 24 * 60 * 60);

pub struct Reconciler {
    runtime: Arc<dyn Runtime>,
    registry: Arc<ContainerRegistry>,
    store: Arc<ConfigStore>,
    bus: Arc<EventBus>,
    status: Arc<StatusPublisher>,
    logs_dir: PathBuf,
}

impl Reconciler {
    pub fn new(
        runtime: Arc<dyn Runtime>,
        registry: Arc<ContainerRegistry>,
        store: Arc<ConfigStore>,
        bus: Arc<EventBus>,
        status: Arc<StatusPublisher>,
        logs_dir: PathBuf,
    ) -> Self {
        Self {
            runtime,
            registry,
            store,
            bus,
            status,
            logs_dir,
        }
    }

    /// Run all three sweeps until the shutdown flag flips
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut exit_check = tokio::time::interval(EXIT_CHECK_INTERVAL);
        // The long sweeps skip the immediate first tick
        let start = tokio::time::Instant::now();
        let mut orphan_sweep =
            tokio::time::interval_at(start + ORPHAN_SWEEP_INTERVAL, ORPHAN_SWEEP_INTERVAL);
        let mut retention =
            tokio::time::interval_at(start + RETENTION_INTERVAL, RETENTION_INTERVAL);

        tracing::info!("reconciler started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("reconciler shutting down");
                        break;
                    }
                }
                _ = exit_check.tick() => self.check_unexpected_exits().await,
                _ = orphan_sweep.tick() => self.remove_orphans().await,
                _ = retention.tick() => self.prune_old_logs(),
            }
        }
    }

    /// Detect supervised containers that are no longer running and fold the
    /// server back to offline with a warning record.
    pub async fn check_unexpected_exits(&self) {
        for (id, container) in self.registry.entries().await {
            match self.runtime.is_running(&container).await {
                Ok(true) => {}
                Ok(false) | Err(_) => {
                    // Inspect errors mean the container is gone too
                    if !self.registry.contains(&id).await {
                        continue;
                    }
                    tracing::warn!(server = %id, container = %container, "server exited unexpectedly");

                    self.registry.evict(&id).await;

                    let record =
                        LogRecord::now(LogLevel::Warning, "server exited unexpectedly");
                    self.bus.publish(&id, Event::ServerLog(record.clone())).await;
                    if let Err(e) = logs::append_record(&self.logs_dir, &id, &record) {
                        tracing::debug!(server = %id, error = %e, "failed to append exit record");
                    }

                    self.status.transition(&id, ServerState::Offline).await;
                    let _ = self.runtime.remove_container(&container).await;
                }
            }
        }
    }

    /// Remove engine containers carrying our name prefix whose instance
    /// config cannot be loaded anymore.
    pub async fn remove_orphans(&self) {
        let names = match self.runtime.list_container_names(SERVER_NAME_PREFIX).await {
            Ok(names) => names,
            Err(e) => {
                tracing::debug!(error = %e, "orphan sweep listing failed");
                return;
            }
        };

        for container in names {
            let id = container
                .strip_prefix(SERVER_NAME_PREFIX)
                .unwrap_or(&container);
            if self.store.exists(id).await {
                continue;
            }

            tracing::info!(container = %container, "removing orphan container");
            if matches!(self.runtime.is_running(&container).await, Ok(true)) {
                let _ = self
                    .runtime
                    .stop_container(&container, Duration::from_secs(10))
                    .await;
            }
            if let Err(e) = self.runtime.remove_container(&container).await {
                tracing::debug!(container = %container, error = %e, "orphan remove failed");
            }
        }
    }

    /// Delete log files whose mtime is past the retention window.
    /// Strictly best-effort.
    pub fn prune_old_logs(&self) {
        let cutoff = SystemTime::now() - LOG_RETENTION;

        let servers = match std::fs::read_dir(&self.logs_dir) {
            Ok(entries) => entries,
            Err(_) => return,
        };

        let mut removed = 0usize;
        for server_dir in servers.flatten() {
            let files = match std::fs::read_dir(server_dir.path()) {
                Ok(f) => f,
                Err(_) => continue,
            };
            for file in files.flatten() {
                let mtime = file
                    .metadata()
                    .and_then(|m| m.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                if mtime < cutoff && std::fs::remove_file(file.path()).is_ok() {
                    removed += 1;
                }
            }
        }

        if removed > 0 {
            tracing::info!(removed = removed, "pruned aged log files");
        }
    }
}
