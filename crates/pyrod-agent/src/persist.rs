//! Atomic JSON document persistence
//!
//! Every persisted document (egg descriptors, instance configs) is rewritten
//! by serializing to a temp file in the same directory and renaming it over
//! the target, so a crash mid-write never leaves a torn document behind.

use pyrod_core::{DaemonError, Result};
use serde::Serialize;
use std::path::Path;

pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| DaemonError::Internal(format!("no parent for {}", path.display())))?;
    std::fs::create_dir_all(parent).map_err(|e| DaemonError::io(parent, e))?;

    let json = serde_json::to_vec_pretty(value)
        .map_err(|e| DaemonError::Internal(format!("serialize {}: {e}", path.display())))?;

    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json).map_err(|e| DaemonError::io(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| DaemonError::io(path, e))?;
    Ok(())
}
