//! Path sandbox
//!
//! Every per-instance filesystem path the daemon touches on behalf of a
//! caller is resolved here: joined under the instance root, lexically
//! normalized, and prefix-checked. When the target already exists it is
//! additionally canonicalized so a symlink cannot carry an operation outside
//! the root. File service operations, template file emission, and bind-mount
//! sources all go through `resolve`.

use crate::error::{DaemonError, Result};
use std::path::{Component, Path, PathBuf};

/// Resolves relative paths inside per-instance roots
#[derive(Debug, Clone)]
pub struct Sandbox {
    servers_dir: PathBuf,
}

impl Sandbox {
    pub fn new(servers_dir: impl Into<PathBuf>) -> Self {
        Self {
            servers_dir: servers_dir.into(),
        }
    }

    /// The root directory of one instance
    pub fn root(&self, id: &str) -> PathBuf {
        self.servers_dir.join(id)
    }

    /// Join `relative` under the instance root and verify it cannot escape.
    ///
    /// The check is lexical first (`..` components may never traverse above
    /// the root), then physical: the deepest existing ancestor of the result
    /// is canonicalized and must still live under the canonicalized root.
    pub fn resolve(&self, id: &str, relative: &str) -> Result<PathBuf> {
        if id.is_empty() || id.contains(['/', '\\']) || id == "." || id == ".." {
            return Err(DaemonError::BadRequest(format!(
                "invalid server id '{id}'"
            )));
        }

        let rel = Path::new(relative);
        if rel.is_absolute() {
            return Err(DaemonError::BadRequest(
                "path must be relative to the server root".to_string(),
            ));
        }

        let root = self.root(id);
        let mut resolved = root.clone();
        for component in rel.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    if !resolved.pop() || !resolved.starts_with(&root) {
                        return Err(DaemonError::BadRequest(
                            "path escapes server root".to_string(),
                        ));
                    }
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(DaemonError::BadRequest(
                        "path must be relative to the server root".to_string(),
                    ));
                }
            }
        }

        if !resolved.starts_with(&root) {
            return Err(DaemonError::BadRequest(
                "path escapes server root".to_string(),
            ));
        }

        self.check_symlinks(&root, &resolved)?;
        Ok(resolved)
    }

    /// Canonicalize the deepest existing ancestor of `resolved` and require
    /// it to stay under the canonicalized root. Catches symlinked
    /// directories pointing outside the instance tree.
    fn check_symlinks(&self, root: &Path, resolved: &Path) -> Result<()> {
        let canonical_root = match root.canonicalize() {
            Ok(p) => p,
            // Root not created yet: nothing on disk can be symlinked either.
            Err(_) => return Ok(()),
        };

        let mut probe = resolved.to_path_buf();
        loop {
            match probe.canonicalize() {
                Ok(real) => {
                    if real.starts_with(&canonical_root) {
                        return Ok(());
                    }
                    return Err(DaemonError::BadRequest(
                        "path escapes server root".to_string(),
                    ));
                }
                Err(_) => {
                    if !probe.pop() || !probe.starts_with(root) {
                        return Ok(());
                    }
                }
            }
        }
    }
}
