//! Egg registry
//!
//! Loads every descriptor from the eggs directory at startup, indexes by id,
//! and owns the only write path back to disk. Descriptors that fail to parse
//! are skipped with a warning; an empty directory is seeded with the
//! built-in default set.

use crate::persist::write_json_atomic;
use crate::seed::default_eggs;
use pyrod_core::{DaemonError, Result};
use pyrod_egg::{validate_egg, Egg};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

pub struct EggRegistry {
    dir: PathBuf,
    eggs: RwLock<HashMap<String, Egg>>,
}

impl EggRegistry {
    /// Load the registry, creating and seeding the directory when needed
    pub fn load(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| DaemonError::io(&dir, e))?;

        let mut eggs = HashMap::new();
        let entries = std::fs::read_dir(&dir).map_err(|e| DaemonError::io(&dir, e))?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_descriptor(&path) {
                Ok(egg) => {
                    eggs.insert(egg.id.clone(), egg);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping egg descriptor");
                }
            }
        }

        if eggs.is_empty() {
            tracing::info!("eggs directory empty, seeding built-in defaults");
            for egg in default_eggs() {
                write_json_atomic(&descriptor_path(&dir, &egg.id), &egg)?;
                eggs.insert(egg.id.clone(), egg);
            }
        }

        tracing::info!(count = eggs.len(), dir = %dir.display(), "egg registry loaded");

        Ok(Self {
            dir,
            eggs: RwLock::new(eggs),
        })
    }

    pub async fn list(&self) -> Vec<Egg> {
        let mut eggs: Vec<Egg> = self.eggs.read().await.values().cloned().collect();
        eggs.sort_by(|a, b| a.id.cmp(&b.id));
        eggs
    }

    pub async fn get(&self, id: &str) -> Result<Egg> {
        self.eggs
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| DaemonError::NotFound(format!("egg '{id}'")))
    }

    /// Create-or-update; the descriptor file is rewritten atomically
    pub async fn put(&self, egg: Egg) -> Result<()> {
        validate_egg(&egg).map_err(|e| DaemonError::BadRequest(e.to_string()))?;
        write_json_atomic(&descriptor_path(&self.dir, &egg.id), &egg)?;
        self.eggs.write().await.insert(egg.id.clone(), egg);
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let removed = self.eggs.write().await.remove(id);
        if removed.is_none() {
            return Err(DaemonError::NotFound(format!("egg '{id}'")));
        }
        let path = descriptor_path(&self.dir, id);
        if let Err(e) = std::fs::remove_file(&path) {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove egg descriptor");
        }
        Ok(())
    }

    pub async fn count(&self) -> usize {
        self.eggs.read().await.len()
    }
}

fn descriptor_path(dir: &Path, id: &str) -> PathBuf {
    dir.join(format!("{id}.json"))
}

fn read_descriptor(path: &Path) -> Result<Egg> {
    let bytes = std::fs::read(path).map_err(|e| DaemonError::io(path, e))?;
    let egg: Egg = serde_json::from_slice(&bytes)
        .map_err(|e| DaemonError::BadRequest(format!("malformed egg: {e}")))?;
    validate_egg(&egg).map_err(|e| DaemonError::BadRequest(e.to_string()))?;
    Ok(egg)
}
