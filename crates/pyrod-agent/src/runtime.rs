//! Abstract container engine interface
//!
//! Defines the `Runtime` trait the supervisor, installer, and background
//! tickers are written against, plus an in-memory `MockRuntime` that the
//! lifecycle tests drive. The only production implementation is the Docker
//! one in [`crate::runtimes`].

use futures_util::Stream;
use pyrod_core::{DaemonError, Result};
use std::collections::HashMap;
use std::path::Path;
use std::pin::Pin;
use std::time::Duration;

/// Raw log data as delivered by the engine: one multiplexed stdout+stderr
/// chunk, possibly spanning several lines, with engine timestamps intact.
pub type LogStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// One host:container port binding; the daemon always maps 1:1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortMapping {
    pub port: u16,
    pub protocol: &'static str,
}

impl PortMapping {
    pub fn tcp(port: u16) -> Self {
        Self {
            port,
            protocol: "tcp",
        }
    }

    pub fn udp(port: u16) -> Self {
        Self {
            port,
            protocol: "udp",
        }
    }
}

/// Everything needed to create one container
#[derive(Debug, Clone, Default)]
pub struct CreateOpts {
    pub name: String,
    pub image: String,
    /// `KEY=VALUE` pairs
    pub env: Vec<String>,
    /// Full command; empty means the image default
    pub cmd: Vec<String>,
    pub working_dir: Option<String>,
    /// `host:container[:mode]` bind specs
    pub binds: Vec<String>,
    /// 1:1 host:container bindings
    pub ports: Vec<PortMapping>,
    pub memory_bytes: Option<i64>,
    pub nano_cpus: Option<i64>,
    pub labels: HashMap<String, String>,
    /// Restart policy `unless-stopped` when set
    pub restart_unless_stopped: bool,
    /// Drop every capability, then add back only `cap_add`
    pub drop_all_caps: bool,
    pub cap_add: Vec<String>,
    pub no_new_privileges: bool,
    /// Allocate a tty and keep stdin open (interactive game consoles)
    pub tty_with_stdin: bool,
    /// Engine removes the container on exit (install containers)
    pub auto_remove: bool,
}

/// One raw resource sample as reported by the engine. Normalization into
/// user-facing percentages happens in [`crate::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub cpu_total: u64,
    pub cpu_system: u64,
    pub precpu_total: u64,
    pub precpu_system: u64,
    pub online_cpus: u32,
    pub memory_usage: u64,
    pub memory_limit: u64,
    pub network_rx: u64,
    pub network_tx: u64,
}

/// Abstract container engine
#[async_trait::async_trait]
pub trait Runtime: Send + Sync {
    /// Verify the engine is reachable
    async fn ping(&self) -> Result<()>;

    /// Whether an image is present in local storage
    async fn image_present(&self, image: &str) -> Result<bool>;

    /// Pull an image to local storage
    async fn pull_image(&self, image: &str) -> Result<()>;

    /// Build a local image from a Dockerfile directory context
    async fn build_image(&self, tag: &str, context_dir: &Path) -> Result<()>;

    /// Create a container
    async fn create_container(&self, opts: &CreateOpts) -> Result<()>;

    /// Start a created container
    async fn start_container(&self, name: &str) -> Result<()>;

    /// Stop a container, giving it `timeout` to exit before the engine kills it
    async fn stop_container(&self, name: &str, timeout: Duration) -> Result<()>;

    /// Deliver a signal (e.g. `SIGINT`, `SIGKILL`) to a container's init process
    async fn signal_container(&self, name: &str, signal: &str) -> Result<()>;

    /// Force-remove a container
    async fn remove_container(&self, name: &str) -> Result<()>;

    /// Whether a container with this name exists at all
    async fn container_exists(&self, name: &str) -> Result<bool>;

    /// Whether a container is currently running
    async fn is_running(&self, name: &str) -> Result<bool>;

    /// Block until the container exits; returns its exit code
    async fn wait_container(&self, name: &str) -> Result<i64>;

    /// Attach to the multiplexed stdout+stderr stream, engine timestamps on
    async fn attach_logs(&self, name: &str) -> Result<LogStream>;

    /// One-shot resource sample
    async fn stats_once(&self, name: &str) -> Result<EngineStats>;

    /// Run a command inside the container; returns (exit code, stdout, stderr)
    async fn exec(&self, name: &str, cmd: &[String]) -> Result<(i64, String, String)>;

    /// Names of all containers (running or not) whose name starts with `prefix`
    async fn list_container_names(&self, prefix: &str) -> Result<Vec<String>>;

    /// Total containers known to the engine
    async fn container_count(&self) -> Result<usize>;

    /// Total images in local storage
    async fn image_count(&self) -> Result<usize>;
}

// ---------------------------------------------------------------------------
// Mock runtime
// ---------------------------------------------------------------------------

use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};

struct MockContainer {
    running: bool,
    log_tx: Option<mpsc::UnboundedSender<String>>,
    log_rx: Option<mpsc::UnboundedReceiver<String>>,
    exit_tx: watch::Sender<Option<i64>>,
}

/// In-memory engine double for lifecycle tests.
///
/// Containers whose name carries the `pyro-install-` prefix behave like
/// run-to-completion workloads: `wait_container` finishes them immediately
/// with the configured exit code (default 0). Everything else stays running
/// until stopped, killed, or failed via [`MockRuntime::exit_container`];
/// tests feed the log stream with [`MockRuntime::push_log`].
pub struct MockRuntime {
    containers: Mutex<HashMap<String, MockContainer>>,
    creations: Mutex<HashMap<String, CreateOpts>>,
    images: Mutex<Vec<String>>,
    exec_history: Mutex<Vec<(String, Vec<String>)>>,
    install_exit_code: Mutex<i64>,
    fail_builds: bool,
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRuntime {
    pub fn new() -> Self {
        Self {
            containers: Mutex::new(HashMap::new()),
            creations: Mutex::new(HashMap::new()),
            images: Mutex::new(Vec::new()),
            exec_history: Mutex::new(Vec::new()),
            install_exit_code: Mutex::new(0),
            fail_builds: false,
        }
    }

    /// A mock whose `build_image` always fails (exercises image fallback)
    pub fn with_failing_builds() -> Self {
        Self {
            fail_builds: true,
            ..Self::new()
        }
    }

    /// Exit code install containers will report
    pub async fn set_install_exit_code(&self, code: i64) {
        *self.install_exit_code.lock().await = code;
    }

    /// Inject a raw log chunk into a container's stream
    pub async fn push_log(&self, name: &str, chunk: &str) {
        let containers = self.containers.lock().await;
        if let Some(c) = containers.get(name) {
            if let Some(tx) = &c.log_tx {
                let _ = tx.send(chunk.to_string());
            }
        }
    }

    /// Simulate the container exiting on its own (crash or clean exit)
    pub async fn exit_container(&self, name: &str, code: i64) {
        let mut containers = self.containers.lock().await;
        if let Some(c) = containers.get_mut(name) {
            c.running = false;
            c.log_tx = None;
            let _ = c.exit_tx.send(Some(code));
        }
    }

    /// Register a pre-existing container, as if another process created it
    pub async fn seed_container(&self, name: &str, running: bool) {
        let mut containers = self.containers.lock().await;
        let (log_tx, log_rx) = mpsc::unbounded_channel();
        let (exit_tx, _) = watch::channel(None);
        containers.insert(
            name.to_string(),
            MockContainer {
                running,
                log_tx: Some(log_tx),
                log_rx: Some(log_rx),
                exit_tx,
            },
        );
    }

    /// The `CreateOpts` a container was created with; survives removal so
    /// tests can assert on one-shot containers after they are gone
    pub async fn created_opts(&self, name: &str) -> Option<CreateOpts> {
        self.creations.lock().await.get(name).cloned()
    }

    /// Every exec issued so far, as (container, argv)
    pub async fn exec_history(&self) -> Vec<(String, Vec<String>)> {
        self.exec_history.lock().await.clone()
    }

    fn is_install(name: &str) -> bool {
        name.starts_with("pyro-install-")
    }
}

#[async_trait::async_trait]
impl Runtime for MockRuntime {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn image_present(&self, image: &str) -> Result<bool> {
        Ok(self.images.lock().await.iter().any(|i| i == image))
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        let mut images = self.images.lock().await;
        if !images.iter().any(|i| i == image) {
            images.push(image.to_string());
        }
        Ok(())
    }

    async fn build_image(&self, tag: &str, _context_dir: &Path) -> Result<()> {
        if self.fail_builds {
            return Err(DaemonError::engine("image.build", "mock build failure"));
        }
        self.pull_image(tag).await
    }

    async fn create_container(&self, opts: &CreateOpts) -> Result<()> {
        self.creations
            .lock()
            .await
            .insert(opts.name.clone(), opts.clone());
        let mut containers = self.containers.lock().await;
        let (log_tx, log_rx) = mpsc::unbounded_channel();
        let (exit_tx, _) = watch::channel(None);
        containers.insert(
            opts.name.clone(),
            MockContainer {
                running: false,
                log_tx: Some(log_tx),
                log_rx: Some(log_rx),
                exit_tx,
            },
        );
        Ok(())
    }

    async fn start_container(&self, name: &str) -> Result<()> {
        let mut containers = self.containers.lock().await;
        let c = containers
            .get_mut(name)
            .ok_or_else(|| DaemonError::NotFound(format!("container {name}")))?;
        c.running = true;
        Ok(())
    }

    async fn stop_container(&self, name: &str, _timeout: Duration) -> Result<()> {
        self.exit_container(name, 0).await;
        Ok(())
    }

    async fn signal_container(&self, name: &str, signal: &str) -> Result<()> {
        if signal == "SIGKILL" || signal == "SIGINT" {
            self.exit_container(name, 137).await;
        }
        Ok(())
    }

    async fn remove_container(&self, name: &str) -> Result<()> {
        self.containers.lock().await.remove(name);
        Ok(())
    }

    async fn container_exists(&self, name: &str) -> Result<bool> {
        Ok(self.containers.lock().await.contains_key(name))
    }

    async fn is_running(&self, name: &str) -> Result<bool> {
        let containers = self.containers.lock().await;
        containers
            .get(name)
            .map(|c| c.running)
            .ok_or_else(|| DaemonError::NotFound(format!("container {name}")))
    }

    async fn wait_container(&self, name: &str) -> Result<i64> {
        let mut exit_rx = {
            let mut containers = self.containers.lock().await;
            let c = containers
                .get_mut(name)
                .ok_or_else(|| DaemonError::NotFound(format!("container {name}")))?;

            if Self::is_install(name) {
                let code = *self.install_exit_code.lock().await;
                c.running = false;
                c.log_tx = None;
                let _ = c.exit_tx.send(Some(code));
                return Ok(code);
            }
            c.exit_tx.subscribe()
        };

        loop {
            if let Some(code) = *exit_rx.borrow() {
                return Ok(code);
            }
            if exit_rx.changed().await.is_err() {
                return Ok(0);
            }
        }
    }

    async fn attach_logs(&self, name: &str) -> Result<LogStream> {
        let mut containers = self.containers.lock().await;
        let c = containers
            .get_mut(name)
            .ok_or_else(|| DaemonError::NotFound(format!("container {name}")))?;
        let rx = c
            .log_rx
            .take()
            .ok_or_else(|| DaemonError::engine("logs.attach", "stream already attached"))?;

        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv()
                .await
                .map(|chunk| (Ok::<_, DaemonError>(chunk), rx))
        });
        Ok(Box::pin(stream))
    }

    async fn stats_once(&self, name: &str) -> Result<EngineStats> {
        let containers = self.containers.lock().await;
        let c = containers
            .get(name)
            .ok_or_else(|| DaemonError::NotFound(format!("container {name}")))?;
        if !c.running {
            return Err(DaemonError::NotFound(format!("container {name} not running")));
        }
        Ok(EngineStats {
            cpu_total: 2_000_000,
            cpu_system: 10_000_000,
            precpu_total: 1_000_000,
            precpu_system: 8_000_000,
            online_cpus: 2,
            memory_usage: 512 * 1024 * 1024,
            memory_limit: 1024 * 1024 * 1024,
            network_rx: 1500,
            network_tx: 800,
        })
    }

    async fn exec(&self, name: &str, cmd: &[String]) -> Result<(i64, String, String)> {
        {
            let containers = self.containers.lock().await;
            let c = containers
                .get(name)
                .ok_or_else(|| DaemonError::NotFound(format!("container {name}")))?;
            if !c.running {
                return Err(DaemonError::Conflict(format!(
                    "container {name} is not running"
                )));
            }
        }
        self.exec_history
            .lock()
            .await
            .push((name.to_string(), cmd.to_vec()));
        Ok((0, String::new(), String::new()))
    }

    async fn list_container_names(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .containers
            .lock()
            .await
            .keys()
            .filter(|n| n.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn container_count(&self) -> Result<usize> {
        Ok(self.containers.lock().await.len())
    }

    async fn image_count(&self) -> Result<usize> {
        Ok(self.images.lock().await.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn mock_container_lifecycle() {
        let rt = MockRuntime::new();
        let opts = CreateOpts {
            name: "pyro-server-s1".to_string(),
            image: "test:latest".to_string(),
            ..Default::default()
        };

        rt.create_container(&opts).await.unwrap();
        assert!(!rt.is_running("pyro-server-s1").await.unwrap());

        rt.start_container("pyro-server-s1").await.unwrap();
        assert!(rt.is_running("pyro-server-s1").await.unwrap());

        rt.stop_container("pyro-server-s1", Duration::from_secs(1))
            .await
            .unwrap();
        assert!(!rt.is_running("pyro-server-s1").await.unwrap());
    }

    #[tokio::test]
    async fn mock_logs_flow_through_stream() {
        let rt = MockRuntime::new();
        rt.seed_container("pyro-server-s1", true).await;

        let mut stream = rt.attach_logs("pyro-server-s1").await.unwrap();
        rt.push_log("pyro-server-s1", "hello world\n").await;

        let chunk = stream.next().await.unwrap().unwrap();
        assert_eq!(chunk, "hello world\n");
    }

    #[tokio::test]
    async fn mock_install_containers_run_to_completion() {
        let rt = MockRuntime::new();
        rt.set_install_exit_code(3).await;
        let opts = CreateOpts {
            name: "pyro-install-s1".to_string(),
            ..Default::default()
        };
        rt.create_container(&opts).await.unwrap();
        rt.start_container("pyro-install-s1").await.unwrap();

        assert_eq!(rt.wait_container("pyro-install-s1").await.unwrap(), 3);
        assert!(!rt.is_running("pyro-install-s1").await.unwrap());
    }

    #[tokio::test]
    async fn mock_wait_blocks_until_exit() {
        let rt = Arc::new(MockRuntime::new());
        rt.seed_container("pyro-server-s1", true).await;

        let waiter = {
            let rt = rt.clone();
            tokio::spawn(async move { rt.wait_container("pyro-server-s1").await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        rt.exit_container("pyro-server-s1", 7).await;

        assert_eq!(waiter.await.unwrap().unwrap(), 7);
    }
}
