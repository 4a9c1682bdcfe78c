//! Sandboxed per-instance file service
//!
//! Every operation takes `(instance id, relative path)` and resolves through
//! the path sandbox before touching disk, so nothing here can reach outside
//! `servers/<id>/`. Writes are atomic (temp + rename); updates drop a
//! best-effort `.backup.<unixMs>` sibling first.

use base64::Engine as _;
use chrono::{DateTime, Utc};
use pyrod_core::{DaemonError, Result, Sandbox};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Refuse to serve files larger than this through the request surface
const MAX_READ_BYTES: u64 = 8 * 1024 * 1024;

/// Content encoding for read/write payloads
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    #[default]
    Utf8,
    Base64,
}

/// One directory listing entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirEntryInfo {
    pub name: String,
    pub directory: bool,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
    /// Octal permission bits, e.g. "755"
    pub mode: String,
}

pub struct FileService {
    sandbox: Sandbox,
}

impl FileService {
    pub fn new(sandbox: Sandbox) -> Self {
        Self { sandbox }
    }

    /// List a directory: directories first, then name collation
    pub fn list(&self, id: &str, relative: &str) -> Result<Vec<DirEntryInfo>> {
        let dir = self.sandbox.resolve(id, relative)?;
        let entries = std::fs::read_dir(&dir).map_err(|e| map_io(&dir, e))?;

        let mut listing = Vec::new();
        for entry in entries.flatten() {
            let meta = match entry.metadata() {
                Ok(m) => m,
                Err(_) => continue,
            };
            listing.push(DirEntryInfo {
                name: entry.file_name().to_string_lossy().into_owned(),
                directory: meta.is_dir(),
                size: meta.len(),
                modified: meta.modified().ok().map(DateTime::<Utc>::from),
                mode: mode_octal(&meta),
            });
        }

        listing.sort_by(|a, b| {
            b.directory
                .cmp(&a.directory)
                .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        });
        Ok(listing)
    }

    /// Read a file's content in the requested encoding
    pub fn read(&self, id: &str, relative: &str, encoding: Encoding) -> Result<String> {
        let path = self.sandbox.resolve(id, relative)?;
        let meta = std::fs::metadata(&path).map_err(|e| map_io(&path, e))?;
        if !meta.is_file() {
            return Err(DaemonError::BadRequest(format!(
                "'{relative}' is not a file"
            )));
        }
        if meta.len() > MAX_READ_BYTES {
            return Err(DaemonError::BadRequest(format!(
                "'{relative}' exceeds the {MAX_READ_BYTES} byte read limit"
            )));
        }

        let bytes = std::fs::read(&path).map_err(|e| map_io(&path, e))?;
        match encoding {
            Encoding::Utf8 => String::from_utf8(bytes).map_err(|_| {
                DaemonError::BadRequest(format!(
                    "'{relative}' is not valid UTF-8; request base64 instead"
                ))
            }),
            Encoding::Base64 => Ok(base64::engine::general_purpose::STANDARD.encode(bytes)),
        }
    }

    /// Write a file, creating parent directories; atomic replace
    pub fn write(&self, id: &str, relative: &str, content: &str, encoding: Encoding) -> Result<()> {
        let path = self.sandbox.resolve(id, relative)?;
        let bytes = decode(content, encoding)?;
        write_atomic(&path, &bytes)
    }

    /// Write with a `.backup.<unixMs>` sibling of the previous content.
    /// Backup failure is logged, never fatal.
    pub fn update(&self, id: &str, relative: &str, content: &str, encoding: Encoding) -> Result<()> {
        let path = self.sandbox.resolve(id, relative)?;

        if path.is_file() {
            let backup = path.with_file_name(format!(
                "{}.backup.{}",
                path.file_name().unwrap_or_default().to_string_lossy(),
                Utc::now().timestamp_millis()
            ));
            if let Err(e) = std::fs::copy(&path, &backup) {
                tracing::warn!(path = %path.display(), error = %e, "failed to write backup");
            }
        }

        let bytes = decode(content, encoding)?;
        write_atomic(&path, &bytes)
    }

    /// Remove a file or recursively remove a directory
    pub fn delete(&self, id: &str, relative: &str) -> Result<()> {
        if relative.trim_matches('/').is_empty() {
            return Err(DaemonError::BadRequest(
                "refusing to delete the server root".to_string(),
            ));
        }
        let path = self.sandbox.resolve(id, relative)?;
        let meta = std::fs::symlink_metadata(&path).map_err(|e| map_io(&path, e))?;
        if meta.is_dir() {
            std::fs::remove_dir_all(&path).map_err(|e| map_io(&path, e))
        } else {
            std::fs::remove_file(&path).map_err(|e| map_io(&path, e))
        }
    }

    /// Copy a file or directory tree; both endpoints are sandbox-validated
    pub fn copy(&self, id: &str, from: &str, to: &str) -> Result<()> {
        let src = self.sandbox.resolve(id, from)?;
        let dst = self.sandbox.resolve(id, to)?;
        if src == dst {
            return Err(DaemonError::BadRequest(
                "source and destination are the same path".to_string(),
            ));
        }

        let meta = std::fs::metadata(&src).map_err(|e| map_io(&src, e))?;
        if meta.is_dir() {
            copy_tree(&src, &dst)
        } else {
            if let Some(parent) = dst.parent() {
                std::fs::create_dir_all(parent).map_err(|e| map_io(parent, e))?;
            }
            std::fs::copy(&src, &dst)
                .map(|_| ())
                .map_err(|e| map_io(&src, e))
        }
    }

    /// Rename/move within the instance root
    pub fn rename(&self, id: &str, from: &str, to: &str) -> Result<()> {
        let src = self.sandbox.resolve(id, from)?;
        let dst = self.sandbox.resolve(id, to)?;
        if let Some(parent) = dst.parent() {
            std::fs::create_dir_all(parent).map_err(|e| map_io(parent, e))?;
        }
        std::fs::rename(&src, &dst).map_err(|e| map_io(&src, e))
    }
}

fn decode(content: &str, encoding: Encoding) -> Result<Vec<u8>> {
    match encoding {
        Encoding::Utf8 => Ok(content.as_bytes().to_vec()),
        Encoding::Base64 => base64::engine::general_purpose::STANDARD
            .decode(content)
            .map_err(|e| DaemonError::BadRequest(format!("invalid base64 payload: {e}"))),
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| DaemonError::BadRequest("path has no parent".to_string()))?;
    std::fs::create_dir_all(parent).map_err(|e| map_io(parent, e))?;

    let tmp = path.with_file_name(format!(
        ".{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy()
    ));
    std::fs::write(&tmp, bytes).map_err(|e| map_io(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| map_io(path, e))
}

fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    std::fs::create_dir_all(dst).map_err(|e| map_io(dst, e))?;
    let entries = std::fs::read_dir(src).map_err(|e| map_io(src, e))?;
    for entry in entries.flatten() {
        let from = entry.path();
        let to = dst.join(entry.file_name());
        let meta = std::fs::symlink_metadata(&from).map_err(|e| map_io(&from, e))?;
        if meta.is_dir() {
            copy_tree(&from, &to)?;
        } else if meta.is_file() {
            std::fs::copy(&from, &to).map_err(|e| map_io(&from, e))?;
        }
        // Symlinks are deliberately not copied
    }
    Ok(())
}

fn mode_octal(meta: &std::fs::Metadata) -> String {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        format!("{:o}", meta.permissions().mode() & 0o777)
    }
    #[cfg(not(unix))]
    {
        let _ = meta;
        "644".to_string()
    }
}

fn map_io(path: &Path, e: std::io::Error) -> DaemonError {
    if e.kind() == std::io::ErrorKind::NotFound {
        DaemonError::NotFound(format!("{}", path.display()))
    } else {
        DaemonError::io(path, e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> (tempfile::TempDir, FileService) {
        let tmp = tempfile::tempdir().unwrap();
        let servers = tmp.path().join("servers");
        std::fs::create_dir_all(servers.join("s1")).unwrap();
        let svc = FileService::new(Sandbox::new(servers));
        (tmp, svc)
    }

    #[test]
    fn write_then_read_utf8() {
        let (_tmp, svc) = service();
        svc.write("s1", "config/motd.txt", "hello world", Encoding::Utf8)
            .unwrap();
        let content = svc.read("s1", "config/motd.txt", Encoding::Utf8).unwrap();
        assert_eq!(content, "hello world");
    }

    #[test]
    fn write_then_read_base64() {
        let (_tmp, svc) = service();
        let payload = base64::engine::general_purpose::STANDARD.encode([0u8, 159, 146, 150]);
        svc.write("s1", "blob.bin", &payload, Encoding::Base64)
            .unwrap();
        let back = svc.read("s1", "blob.bin", Encoding::Base64).unwrap();
        assert_eq!(back, payload);

        // Binary content refuses utf8 reads
        assert!(svc.read("s1", "blob.bin", Encoding::Utf8).is_err());
    }

    #[test]
    fn path_escape_is_rejected_everywhere() {
        let (_tmp, svc) = service();
        assert!(svc.read("s1", "../../etc/passwd", Encoding::Utf8).is_err());
        assert!(svc
            .write("s1", "../../tmp/evil", "x", Encoding::Utf8)
            .is_err());
        assert!(svc.delete("s1", "../other").is_err());
        assert!(svc.copy("s1", "a.txt", "../../b.txt").is_err());
        assert!(svc.rename("s1", "../a.txt", "b.txt").is_err());
        assert!(svc.list("s1", "..").is_err());
    }

    #[test]
    fn listing_sorts_directories_first() {
        let (_tmp, svc) = service();
        svc.write("s1", "zeta.txt", "z", Encoding::Utf8).unwrap();
        svc.write("s1", "alpha/inner.txt", "a", Encoding::Utf8)
            .unwrap();
        svc.write("s1", "Beta.txt", "b", Encoding::Utf8).unwrap();

        let listing = svc.list("s1", "").unwrap();
        let names: Vec<&str> = listing.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "Beta.txt", "zeta.txt"]);
        assert!(listing[0].directory);
        assert!(!listing[0].mode.is_empty());
    }

    #[test]
    fn update_leaves_a_backup_sibling() {
        let (_tmp, svc) = service();
        svc.write("s1", "server.properties", "a=1", Encoding::Utf8)
            .unwrap();
        svc.update("s1", "server.properties", "a=2", Encoding::Utf8)
            .unwrap();

        assert_eq!(
            svc.read("s1", "server.properties", Encoding::Utf8).unwrap(),
            "a=2"
        );
        let backups: Vec<_> = svc
            .list("s1", "")
            .unwrap()
            .into_iter()
            .filter(|e| e.name.starts_with("server.properties.backup."))
            .collect();
        assert_eq!(backups.len(), 1);
    }

    #[test]
    fn update_without_existing_file_just_writes() {
        let (_tmp, svc) = service();
        svc.update("s1", "fresh.txt", "content", Encoding::Utf8)
            .unwrap();
        assert_eq!(
            svc.read("s1", "fresh.txt", Encoding::Utf8).unwrap(),
            "content"
        );
    }

    #[test]
    fn delete_recurses_into_directories() {
        let (_tmp, svc) = service();
        svc.write("s1", "world/a/b.txt", "x", Encoding::Utf8).unwrap();
        svc.delete("s1", "world").unwrap();
        assert!(svc.list("s1", "world").is_err());
    }

    #[test]
    fn delete_refuses_the_root() {
        let (_tmp, svc) = service();
        assert!(svc.delete("s1", "").is_err());
        assert!(svc.delete("s1", "/").is_err());
    }

    #[test]
    fn copy_and_rename_round_trip() {
        let (_tmp, svc) = service();
        svc.write("s1", "a/one.txt", "1", Encoding::Utf8).unwrap();

        svc.copy("s1", "a", "b").unwrap();
        assert_eq!(svc.read("s1", "b/one.txt", Encoding::Utf8).unwrap(), "1");
        assert_eq!(svc.read("s1", "a/one.txt", Encoding::Utf8).unwrap(), "1");

        svc.rename("s1", "b/one.txt", "c/two.txt").unwrap();
        assert!(svc.read("s1", "b/one.txt", Encoding::Utf8).is_err());
        assert_eq!(svc.read("s1", "c/two.txt", Encoding::Utf8).unwrap(), "1");
    }

    #[test]
    fn missing_files_are_not_found() {
        let (_tmp, svc) = service();
        assert!(matches!(
            svc.read("s1", "nope.txt", Encoding::Utf8),
            Err(DaemonError::NotFound(_))
        ));
    }
}
