//! Instance configuration store
//!
//! One JSON document per managed server under `configs/`. Every create or
//! update validates the document against its egg: the egg must resolve, the
//! port must be unprivileged, the plan complete, and every declared variable
//! rule must pass over the effective value. Configuring a server also brings
//! its on-disk directory into existence, which keeps the invariant that a
//! config implies a directory.

use crate::eggs::EggRegistry;
use crate::persist::write_json_atomic;
use pyrod_core::{DaemonError, Result};
use pyrod_egg::{validate::validate_config_variables, ServerConfig};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use validator::Validate;

pub struct ConfigStore {
    dir: PathBuf,
    servers_dir: PathBuf,
    eggs: Arc<EggRegistry>,
    configs: RwLock<HashMap<String, ServerConfig>>,
}

impl ConfigStore {
    /// Load every persisted config; egg snapshots are rehydrated from the
    /// registry, and configs whose egg no longer exists load with a warning
    /// (they surface errors at operation time instead of being dropped).
    pub fn load(
        dir: impl Into<PathBuf>,
        servers_dir: impl Into<PathBuf>,
        eggs: Arc<EggRegistry>,
    ) -> Result<Self> {
        let dir = dir.into();
        let servers_dir = servers_dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| DaemonError::io(&dir, e))?;
        std::fs::create_dir_all(&servers_dir).map_err(|e| DaemonError::io(&servers_dir, e))?;

        let mut configs = HashMap::new();
        let entries = std::fs::read_dir(&dir).map_err(|e| DaemonError::io(&dir, e))?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_config(&path) {
                Ok(cfg) => {
                    configs.insert(cfg.id.clone(), cfg);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping server config");
                }
            }
        }

        tracing::info!(count = configs.len(), dir = %dir.display(), "config store loaded");

        Ok(Self {
            dir,
            servers_dir,
            eggs,
            configs: RwLock::new(configs),
        })
    }

    /// Create-or-update one instance configuration
    pub async fn upsert(&self, id: &str, mut cfg: ServerConfig) -> Result<ServerConfig> {
        if !valid_id(id) {
            return Err(DaemonError::BadRequest(format!("invalid server id '{id}'")));
        }
        if cfg.id.is_empty() {
            cfg.id = id.to_string();
        }
        if cfg.id != id {
            return Err(DaemonError::BadRequest(format!(
                "config id '{}' does not match path id '{id}'",
                cfg.id
            )));
        }

        cfg.validate()
            .map_err(|e| DaemonError::BadRequest(flatten_validation(&e)))?;

        let egg = self.eggs.get(&cfg.egg_id).await.map_err(|_| {
            DaemonError::BadRequest(format!("egg '{}' does not exist", cfg.egg_id))
        })?;

        validate_config_variables(&egg, &cfg)
            .map_err(|e| DaemonError::BadRequest(e.to_string()))?;

        let instance_dir = self.servers_dir.join(id);
        std::fs::create_dir_all(&instance_dir).map_err(|e| DaemonError::io(&instance_dir, e))?;

        // Persist without the derived snapshot; hand back with it attached
        cfg.egg = None;
        write_json_atomic(&self.config_path(id), &cfg)?;

        cfg.egg = Some(egg);
        self.configs.write().await.insert(id.to_string(), cfg.clone());
        Ok(cfg)
    }

    /// Fetch a config with its egg snapshot freshly rehydrated
    pub async fn get(&self, id: &str) -> Result<ServerConfig> {
        let mut cfg = self
            .configs
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| DaemonError::NotFound(format!("server '{id}'")))?;

        match self.eggs.get(&cfg.egg_id).await {
            Ok(egg) => cfg.egg = Some(egg),
            Err(_) => cfg.egg = None,
        }
        Ok(cfg)
    }

    pub async fn exists(&self, id: &str) -> bool {
        self.configs.read().await.contains_key(id)
    }

    pub async fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.configs.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn config_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }
}

/// Server ids become directory and container names; keep them boring
fn valid_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn read_config(path: &Path) -> Result<ServerConfig> {
    let bytes = std::fs::read(path).map_err(|e| DaemonError::io(path, e))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| DaemonError::BadRequest(format!("malformed config: {e}")))
}

fn flatten_validation(errors: &validator::ValidationErrors) -> String {
    let mut parts = Vec::new();
    for (field, errs) in errors.field_errors() {
        for err in errs {
            match &err.message {
                Some(msg) => parts.push(format!("{field}: {msg}")),
                None => parts.push(format!("{field}: invalid")),
            }
        }
    }
    if parts.is_empty() {
        "invalid configuration".to_string()
    } else {
        parts.join("; ")
    }
}
