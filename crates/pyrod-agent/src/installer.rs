//! One-shot installation
//!
//! Installation materializes the egg's declared config files into the
//! instance directory, then (when the egg ships an install script) runs a
//! disposable container with the instance directory mounted at
//! `/mnt/server`. The script's exit code gates the lifecycle: zero means the
//! server may start, anything else parks it in `install_failed`.

use crate::logs::{self, LogLevel, PipelineOptions};
use crate::runtime::{CreateOpts, Runtime};
use crate::{events::EventBus, install_container_name, SERVER_LABEL};
use pyrod_core::{DaemonError, Result, Sandbox};
use pyrod_egg::{expand, Egg, FindSpec, ParserKind, ServerConfig};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Memory cap for install containers
const INSTALL_MEMORY_BYTES: i64 = 2 * 1024 * 1024 * 1024;

/// Where the instance directory is mounted inside install containers
const INSTALL_MOUNT: &str = "/mnt/server";

pub struct Installer {
    runtime: Arc<dyn Runtime>,
    bus: Arc<EventBus>,
    sandbox: Sandbox,
    logs_dir: PathBuf,
    fallback_image: String,
}

impl Installer {
    pub fn new(
        runtime: Arc<dyn Runtime>,
        bus: Arc<EventBus>,
        sandbox: Sandbox,
        logs_dir: PathBuf,
        fallback_image: String,
    ) -> Self {
        Self {
            runtime,
            bus,
            sandbox,
            logs_dir,
            fallback_image,
        }
    }

    /// Run a full install for a configured server. The caller owns the
    /// surrounding state transitions; this returns `InstallFailed` whenever
    /// the script exits non-zero or anything before the exit breaks.
    pub async fn run(&self, egg: &Egg, cfg: &ServerConfig) -> Result<()> {
        let id = cfg.id.as_str();
        let root = self.sandbox.root(id);
        std::fs::create_dir_all(&root).map_err(|e| DaemonError::io(&root, e))?;

        self.materialize_files(egg, cfg)?;

        let install = match &egg.scripts.installation {
            Some(install) => install,
            None => {
                tracing::info!(server = %id, "egg has no install script, files only");
                return Ok(());
            }
        };

        let script_path = self.sandbox.resolve(id, "install.sh")?;
        std::fs::write(&script_path, install.script.as_bytes())
            .map_err(|e| DaemonError::io(&script_path, e))?;
        set_executable(&script_path)?;

        let image = if install.container.trim().is_empty() {
            self.fallback_image.clone()
        } else {
            install.container.clone()
        };
        if !self.runtime.image_present(&image).await? {
            self.runtime.pull_image(&image).await?;
        }

        // Bind mounts need the absolute host path
        let host_root = root.canonicalize().map_err(|e| DaemonError::io(&root, e))?;

        let container = install_container_name(id);
        if self.runtime.container_exists(&container).await? {
            let _ = self.runtime.remove_container(&container).await;
        }

        let opts = CreateOpts {
            name: container.clone(),
            image,
            env: install_env(egg, cfg),
            cmd: vec![
                install.entrypoint.clone(),
                format!("{INSTALL_MOUNT}/install.sh"),
            ],
            binds: vec![format!("{}:{INSTALL_MOUNT}", host_root.display())],
            memory_bytes: Some(INSTALL_MEMORY_BYTES),
            labels: HashMap::from([(SERVER_LABEL.to_string(), id.to_string())]),
            auto_remove: true,
            ..Default::default()
        };

        self.runtime.create_container(&opts).await?;
        self.runtime.start_container(&container).await?;

        // Every install line reaches subscribers and the daily file as info
        let pump = logs::spawn_pipeline(
            Arc::clone(&self.runtime),
            container.clone(),
            id.to_string(),
            Arc::clone(&self.bus),
            self.logs_dir.clone(),
            PipelineOptions {
                level_override: Some(LogLevel::Info),
                ..Default::default()
            },
        );

        let code = self.runtime.wait_container(&container).await?;
        pump.abort();

        // Auto-remove usually beat us to it
        if self.runtime.container_exists(&container).await.unwrap_or(false) {
            let _ = self.runtime.remove_container(&container).await;
        }

        if code == 0 {
            tracing::info!(server = %id, "install completed");
            Ok(())
        } else {
            tracing::warn!(server = %id, exit_code = code, "install script failed");
            Err(DaemonError::InstallFailed {
                id: id.to_string(),
                code,
            })
        }
    }

    /// Write every egg-declared config file with placeholders expanded
    pub fn materialize_files(&self, egg: &Egg, cfg: &ServerConfig) -> Result<()> {
        for (rel, parser) in &egg.config.files {
            let path = self.sandbox.resolve(&cfg.id, rel)?;
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| DaemonError::io(parent, e))?;
            }

            match (parser.parser, &parser.find) {
                (ParserKind::File, FindSpec::Content(content)) => {
                    let expanded = expand(content, egg, cfg);
                    std::fs::write(&path, expanded).map_err(|e| DaemonError::io(&path, e))?;
                }
                (ParserKind::Properties, FindSpec::Map(find)) => {
                    let expanded: Vec<(String, String)> = find
                        .iter()
                        .map(|(k, v)| (k.clone(), expand(v, egg, cfg)))
                        .collect();
                    merge_properties(&path, &expanded)?;
                }
                (ParserKind::Yaml, FindSpec::Map(find)) => {
                    let expanded: Vec<(String, String)> = find
                        .iter()
                        .map(|(k, v)| (k.clone(), expand(v, egg, cfg)))
                        .collect();
                    merge_yaml(&path, &expanded)?;
                }
                (kind, _) => {
                    return Err(DaemonError::BadRequest(format!(
                        "egg '{}' config file '{rel}' has a mismatched {kind:?} find payload",
                        egg.id
                    )));
                }
            }

            tracing::debug!(server = %cfg.id, file = %rel, "materialized config file");
        }
        Ok(())
    }
}

/// Environment for install containers: every egg variable (expanded, with
/// instance overrides) plus the system pair.
pub(crate) fn install_env(egg: &Egg, cfg: &ServerConfig) -> Vec<String> {
    let mut env: Vec<String> = egg
        .variables
        .iter()
        .map(|var| {
            let value = expand(egg.variable_value(var, cfg), egg, cfg);
            format!("{}={}", var.env_variable, value)
        })
        .collect();
    env.push(format!("SERVER_PORT={}", cfg.port));
    env.push(format!("SERVER_MEMORY={}", cfg.plan.memory_mib()));
    env
}

/// Update `key=value` lines in place, preserving unrelated lines and
/// appending keys the file does not have yet.
fn merge_properties(path: &Path, pairs: &[(String, String)]) -> Result<()> {
    let existing = std::fs::read_to_string(path).unwrap_or_default();

    let mut remaining: Vec<&(String, String)> = pairs.iter().collect();
    let mut out = Vec::new();

    for line in existing.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with('#') || !trimmed.contains('=') {
            out.push(line.to_string());
            continue;
        }
        let key = trimmed.split('=').next().unwrap_or_default().trim();
        if let Some(pos) = remaining.iter().position(|(k, _)| k == key) {
            let (k, v) = remaining.remove(pos);
            out.push(format!("{k}={v}"));
        } else {
            out.push(line.to_string());
        }
    }

    for (k, v) in remaining {
        out.push(format!("{k}={v}"));
    }

    let mut content = out.join("\n");
    content.push('\n');
    std::fs::write(path, content).map_err(|e| DaemonError::io(path, e))
}

/// Apply dotted-path assignments into a YAML document, creating intermediate
/// mappings as needed. Values are coerced to bool/int when they parse.
fn merge_yaml(path: &Path, pairs: &[(String, String)]) -> Result<()> {
    let mut doc: serde_yaml::Value = match std::fs::read_to_string(path) {
        Ok(content) => serde_yaml::from_str(&content)
            .map_err(|e| DaemonError::BadRequest(format!("{}: {e}", path.display())))?,
        Err(_) => serde_yaml::Value::Mapping(serde_yaml::Mapping::new()),
    };

    if !doc.is_mapping() {
        doc = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());
    }

    for (dotted, value) in pairs {
        let mut node = &mut doc;
        let mut parts = dotted.split('.').peekable();
        while let Some(part) = parts.next() {
            let key = serde_yaml::Value::String(part.to_string());
            let map = node
                .as_mapping_mut()
                .ok_or_else(|| {
                    DaemonError::BadRequest(format!("'{dotted}' crosses a non-mapping node"))
                })?;
            if parts.peek().is_none() {
                map.insert(key, coerce_yaml(value));
                break;
            }
            node = map
                .entry(key)
                .or_insert_with(|| serde_yaml::Value::Mapping(serde_yaml::Mapping::new()));
            if !node.is_mapping() {
                *node = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());
            }
        }
    }

    let content = serde_yaml::to_string(&doc)
        .map_err(|e| DaemonError::Internal(format!("yaml serialize: {e}")))?;
    std::fs::write(path, content).map_err(|e| DaemonError::io(path, e))
}

fn coerce_yaml(value: &str) -> serde_yaml::Value {
    if let Ok(b) = value.parse::<bool>() {
        return serde_yaml::Value::Bool(b);
    }
    if let Ok(n) = value.parse::<i64>() {
        return serde_yaml::Value::Number(n.into());
    }
    serde_yaml::Value::String(value.to_string())
}

fn set_executable(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
            .map_err(|e| DaemonError::io(path, e))?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}
