//! Docker-based container engine using bollard
//!
//! Connects to the local Docker daemon and implements the [`Runtime`] trait
//! for game-server workloads: labeled, port-bound, capability-trimmed
//! containers with a tty and attached stdin, plus the one-shot install
//! containers the lifecycle gates on.

use crate::runtime::{CreateOpts, EngineStats, LogStream, Runtime};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::models::{ContainerCreateBody, HostConfig, PortBinding, RestartPolicy,
    RestartPolicyNameEnum};
use bollard::query_parameters::{
    BuildImageOptionsBuilder, CreateContainerOptions, CreateImageOptions,
    ListContainersOptionsBuilder, LogsOptions, RemoveContainerOptions, StartContainerOptions,
    StatsOptions, StopContainerOptions, WaitContainerOptions,
};
use bollard::Docker;
use futures_util::StreamExt;
use pyrod_core::{DaemonError, Result};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Docker engine behind the [`Runtime`] trait
pub struct DockerRuntime {
    docker: Docker,
}

impl std::fmt::Debug for DockerRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DockerRuntime").finish_non_exhaustive()
    }
}

impl DockerRuntime {
    /// Connect to the local Docker daemon and verify connectivity.
    ///
    /// # Errors
    ///
    /// Returns an error when the daemon is unreachable or the ping fails;
    /// the caller is expected to fail fast at startup in that case.
    pub async fn new() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| DaemonError::engine("engine.connect", e))?;

        docker
            .ping()
            .await
            .map_err(|e| DaemonError::engine("engine.ping", e))?;

        tracing::info!("connected to Docker daemon");
        Ok(Self { docker })
    }

    /// Wrap a pre-configured bollard client
    pub fn with_client(docker: Docker) -> Self {
        Self { docker }
    }
}

/// Parse an image reference into name and tag
fn parse_image_ref(image: &str) -> (&str, &str) {
    // Digest references (image@sha256:...) pull as-is
    if image.contains('@') {
        return (image, "");
    }

    if let Some((name, tag)) = image.rsplit_once(':') {
        // A '/' after the ':' means the colon belonged to a registry port
        if !tag.contains('/') {
            return (name, tag);
        }
    }

    (image, "latest")
}

/// Build the Docker host configuration from engine-agnostic create options
fn build_host_config(opts: &CreateOpts) -> HostConfig {
    let mut port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
    for mapping in &opts.ports {
        let key = format!("{}/{}", mapping.port, mapping.protocol);
        let binding = PortBinding {
            host_ip: Some("0.0.0.0".to_string()),
            host_port: Some(mapping.port.to_string()),
        };
        port_bindings.insert(key, Some(vec![binding]));
    }

    let restart_policy = opts.restart_unless_stopped.then(|| RestartPolicy {
        name: Some(RestartPolicyNameEnum::UNLESS_STOPPED),
        maximum_retry_count: None,
    });

    HostConfig {
        port_bindings: (!port_bindings.is_empty()).then_some(port_bindings),
        binds: (!opts.binds.is_empty()).then(|| opts.binds.clone()),
        memory: opts.memory_bytes,
        nano_cpus: opts.nano_cpus,
        restart_policy,
        cap_drop: opts.drop_all_caps.then(|| vec!["ALL".to_string()]),
        cap_add: (!opts.cap_add.is_empty()).then(|| opts.cap_add.clone()),
        security_opt: opts
            .no_new_privileges
            .then(|| vec!["no-new-privileges".to_string()]),
        auto_remove: opts.auto_remove.then_some(true),
        ..Default::default()
    }
}

/// Produce a gzipped tar of a directory for use as a build context
fn tar_context(context_dir: &Path) -> Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    builder
        .append_dir_all(".", context_dir)
        .map_err(|e| DaemonError::io(context_dir, e))?;
    builder
        .into_inner()
        .map_err(|e| DaemonError::io(context_dir, e))
}

#[async_trait::async_trait]
impl Runtime for DockerRuntime {
    async fn ping(&self) -> Result<()> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| DaemonError::engine("engine.ping", e))
    }

    async fn image_present(&self, image: &str) -> Result<bool> {
        Ok(self.docker.inspect_image(image).await.is_ok())
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        let (name, tag) = parse_image_ref(image);

        tracing::info!(image = %image, "pulling image");

        let options = CreateImageOptions {
            from_image: Some(name.to_string()),
            tag: if tag.is_empty() {
                None
            } else {
                Some(tag.to_string())
            },
            ..Default::default()
        };

        let mut stream = self.docker.create_image(Some(options), None, None);

        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(status) = info.status {
                        tracing::debug!(status = %status, "pull progress");
                    }
                }
                Err(e) => {
                    return Err(DaemonError::engine("image.pull", e));
                }
            }
        }

        tracing::info!(image = %image, "image pulled");
        Ok(())
    }

    async fn build_image(&self, tag: &str, context_dir: &Path) -> Result<()> {
        let context = tar_context(context_dir)?;

        tracing::info!(tag = %tag, context = %context_dir.display(), "building image");

        let options = BuildImageOptionsBuilder::default()
            .dockerfile("Dockerfile")
            .t(tag)
            .rm(true)
            .build();

        let mut stream =
            self.docker
                .build_image(options, None, Some(bollard::body_full(context.into())));

        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(stream_line) = info.stream {
                        let line = stream_line.trim_end();
                        if !line.is_empty() {
                            tracing::debug!(line = %line, "build progress");
                        }
                    }
                    if let Some(detail) = info.error_detail {
                        return Err(DaemonError::engine(
                            "image.build",
                            detail.message.unwrap_or_else(|| "build failed".to_string()),
                        ));
                    }
                }
                Err(e) => {
                    return Err(DaemonError::engine("image.build", e));
                }
            }
        }

        tracing::info!(tag = %tag, "image built");
        Ok(())
    }

    async fn create_container(&self, opts: &CreateOpts) -> Result<()> {
        let env = opts.env.clone();
        let exposed_ports: Vec<String> = opts
            .ports
            .iter()
            .map(|m| format!("{}/{}", m.port, m.protocol))
            .collect();

        let config = ContainerCreateBody {
            image: Some(opts.image.clone()),
            env: if env.is_empty() { None } else { Some(env) },
            cmd: (!opts.cmd.is_empty()).then(|| opts.cmd.clone()),
            working_dir: opts.working_dir.clone(),
            exposed_ports: (!exposed_ports.is_empty()).then(|| {
                exposed_ports
                    .into_iter()
                    .map(|p| (p, std::collections::HashMap::new()))
                    .collect()
            }),
            labels: (!opts.labels.is_empty()).then(|| opts.labels.clone()),
            tty: opts.tty_with_stdin.then_some(true),
            open_stdin: opts.tty_with_stdin.then_some(true),
            host_config: Some(build_host_config(opts)),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: Some(opts.name.clone()),
            platform: String::new(),
        };

        tracing::info!(container = %opts.name, image = %opts.image, "creating container");

        self.docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| DaemonError::engine("container.create", e))?;

        Ok(())
    }

    async fn start_container(&self, name: &str) -> Result<()> {
        tracing::info!(container = %name, "starting container");

        self.docker
            .start_container(name, None::<StartContainerOptions>)
            .await
            .map_err(|e| DaemonError::engine("container.start", e))
    }

    async fn stop_container(&self, name: &str, timeout: Duration) -> Result<()> {
        tracing::info!(container = %name, timeout = ?timeout, "stopping container");

        let options = StopContainerOptions {
            t: Some(timeout.as_secs() as i32),
            signal: None,
        };

        self.docker
            .stop_container(name, Some(options))
            .await
            .map_err(|e| DaemonError::engine("container.stop", e))
    }

    async fn signal_container(&self, name: &str, signal: &str) -> Result<()> {
        tracing::info!(container = %name, signal = %signal, "signalling container");

        // The stop endpoint carries an optional signal; grace is zero for
        // SIGKILL and ten seconds for anything gentler.
        let grace = if signal == "SIGKILL" { 0 } else { 10 };
        let options = StopContainerOptions {
            t: Some(grace),
            signal: Some(signal.to_string()),
        };

        self.docker
            .stop_container(name, Some(options))
            .await
            .map_err(|e| DaemonError::engine("container.signal", e))
    }

    async fn remove_container(&self, name: &str) -> Result<()> {
        tracing::info!(container = %name, "removing container");

        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };

        self.docker
            .remove_container(name, Some(options))
            .await
            .map_err(|e| DaemonError::engine("container.remove", e))
    }

    async fn container_exists(&self, name: &str) -> Result<bool> {
        Ok(self
            .docker
            .inspect_container(name, None::<bollard::query_parameters::InspectContainerOptions>)
            .await
            .is_ok())
    }

    async fn is_running(&self, name: &str) -> Result<bool> {
        let inspect = self
            .docker
            .inspect_container(name, None::<bollard::query_parameters::InspectContainerOptions>)
            .await
            .map_err(|e| DaemonError::engine("container.inspect", e))?;

        Ok(inspect
            .state
            .and_then(|s| s.running)
            .unwrap_or(false))
    }

    async fn wait_container(&self, name: &str) -> Result<i64> {
        tracing::debug!(container = %name, "waiting for container to exit");

        let options = WaitContainerOptions {
            condition: "not-running".to_string(),
        };

        let mut stream = self.docker.wait_container(name, Some(options));

        let response = stream
            .next()
            .await
            .ok_or_else(|| DaemonError::engine("container.wait", "wait stream closed"))?;

        // Auto-removed containers race their own wait; a 404/conflict after
        // the stream opened still means the container is gone.
        let exit_code = match response {
            Ok(body) => body.status_code,
            Err(bollard::errors::Error::DockerContainerWaitError { code, .. }) => code,
            Err(e) => return Err(DaemonError::engine("container.wait", e)),
        };

        tracing::info!(container = %name, exit_code = exit_code, "container exited");
        Ok(exit_code)
    }

    async fn attach_logs(&self, name: &str) -> Result<LogStream> {
        let options = LogsOptions {
            stdout: true,
            stderr: true,
            follow: true,
            timestamps: true,
            tail: "all".to_string(),
            ..Default::default()
        };

        let stream = self.docker.logs(name, Some(options)).map(|result| {
            result
                .map(|output| output.to_string())
                .map_err(|e| DaemonError::engine("logs.attach", e))
        });

        Ok(Box::pin(stream))
    }

    async fn stats_once(&self, name: &str) -> Result<EngineStats> {
        let options = StatsOptions {
            stream: false,
            one_shot: true,
        };

        let mut stream = self.docker.stats(name, Some(options));

        let stats = stream
            .next()
            .await
            .ok_or_else(|| DaemonError::NotFound(format!("no stats for {name}")))?
            .map_err(|e| DaemonError::engine("container.stats", e))?;

        let cpu_total = stats
            .cpu_stats
            .as_ref()
            .and_then(|s| s.cpu_usage.as_ref())
            .and_then(|u| u.total_usage)
            .unwrap_or(0);
        let cpu_system = stats
            .cpu_stats
            .as_ref()
            .and_then(|s| s.system_cpu_usage)
            .unwrap_or(0);
        let online_cpus = stats
            .cpu_stats
            .as_ref()
            .and_then(|s| s.online_cpus)
            .unwrap_or(0);
        let precpu_total = stats
            .precpu_stats
            .as_ref()
            .and_then(|s| s.cpu_usage.as_ref())
            .and_then(|u| u.total_usage)
            .unwrap_or(0);
        let precpu_system = stats
            .precpu_stats
            .as_ref()
            .and_then(|s| s.system_cpu_usage)
            .unwrap_or(0);

        let memory_usage = stats
            .memory_stats
            .as_ref()
            .and_then(|s| s.usage)
            .unwrap_or(0);
        let memory_limit = stats
            .memory_stats
            .as_ref()
            .and_then(|s| s.limit)
            .unwrap_or(0);

        // First interface, typically eth0; cumulative byte counters
        let (network_rx, network_tx) = stats
            .networks
            .as_ref()
            .and_then(|nets| {
                let mut keys: Vec<&String> = nets.keys().collect();
                keys.sort();
                keys.first().map(|k| {
                    let net = &nets[*k];
                    (
                        net.rx_bytes.unwrap_or(0),
                        net.tx_bytes.unwrap_or(0),
                    )
                })
            })
            .unwrap_or((0, 0));

        Ok(EngineStats {
            cpu_total,
            cpu_system,
            precpu_total,
            precpu_system,
            online_cpus: online_cpus as u32,
            memory_usage,
            memory_limit,
            network_rx,
            network_tx,
        })
    }

    async fn exec(&self, name: &str, cmd: &[String]) -> Result<(i64, String, String)> {
        let exec_options = CreateExecOptions {
            cmd: Some(cmd.to_vec()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let exec_created = self
            .docker
            .create_exec(name, exec_options)
            .await
            .map_err(|e| DaemonError::engine("container.exec", e))?;

        let start_result = self
            .docker
            .start_exec(&exec_created.id, None)
            .await
            .map_err(|e| DaemonError::engine("container.exec", e))?;

        let mut stdout = String::new();
        let mut stderr = String::new();

        match start_result {
            StartExecResults::Attached { mut output, .. } => {
                while let Some(result) = output.next().await {
                    match result {
                        Ok(bollard::container::LogOutput::StdOut { message }) => {
                            stdout.push_str(&String::from_utf8_lossy(&message));
                        }
                        Ok(bollard::container::LogOutput::StdErr { message }) => {
                            stderr.push_str(&String::from_utf8_lossy(&message));
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!(error = %e, "error reading exec output");
                        }
                    }
                }
            }
            StartExecResults::Detached => {
                tracing::warn!("exec started in detached mode unexpectedly");
            }
        }

        let exec_inspect = self
            .docker
            .inspect_exec(&exec_created.id)
            .await
            .map_err(|e| DaemonError::engine("container.exec", e))?;

        let exit_code = exec_inspect.exit_code.unwrap_or(0);

        tracing::debug!(
            container = %name,
            exit_code = exit_code,
            "exec completed"
        );

        Ok((exit_code, stdout, stderr))
    }

    async fn list_container_names(&self, prefix: &str) -> Result<Vec<String>> {
        let options = ListContainersOptionsBuilder::default().all(true).build();

        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| DaemonError::engine("container.list", e))?;

        let mut names = Vec::new();
        for summary in containers {
            for raw in summary.names.unwrap_or_default() {
                // The engine reports names with a leading slash
                let name = raw.trim_start_matches('/');
                if name.starts_with(prefix) {
                    names.push(name.to_string());
                    break;
                }
            }
        }
        Ok(names)
    }

    async fn container_count(&self) -> Result<usize> {
        let options = ListContainersOptionsBuilder::default().all(true).build();
        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| DaemonError::engine("container.list", e))?;
        Ok(containers.len())
    }

    async fn image_count(&self) -> Result<usize> {
        let images = self
            .docker
            .list_images(None::<bollard::query_parameters::ListImagesOptions>)
            .await
            .map_err(|e| DaemonError::engine("image.list", e))?;
        Ok(images.len())
    }
}
