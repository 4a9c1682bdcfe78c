//! Environment-driven daemon configuration
//!
//! The daemon is configured entirely through the environment; every value
//! has a default so a bare `pyrod` in an empty directory comes up working.
//! Directory layout is derived from one data root: `eggs/`, `configs/`,
//! `servers/` (bind-mounted into containers), and `logs/`.

use std::path::{Path, PathBuf};

/// Canonical Java runtime image for Minecraft-class workloads
const DEFAULT_JAVA_IMAGE: &str = "eclipse-temurin:21-jre-jammy";

/// Fallback image for install containers when an egg names none
const DEFAULT_INSTALL_IMAGE: &str = "debian:bookworm-slim";

/// Daemon-wide configuration
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// HTTP listen port (`PORT`)
    pub port: u16,

    /// Control-plane base URL (`PANEL_URL`); empty disables notifications
    pub panel_url: Option<String>,

    /// Data root (`PYROD_DATA_DIR`), default: working directory
    pub data_dir: PathBuf,

    /// Canonical Java image (`DOCKER_IMAGES_JAVA`)
    pub java_image: String,

    /// Fallback install container image (`DOCKER_IMAGES_INSTALL`)
    pub install_image: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            panel_url: None,
            data_dir: PathBuf::from("."),
            java_image: DEFAULT_JAVA_IMAGE.to_string(),
            install_image: DEFAULT_INSTALL_IMAGE.to_string(),
        }
    }
}

impl DaemonConfig {
    /// Build the configuration from the process environment
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let port = std::env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.port);

        let panel_url = std::env::var("PANEL_URL")
            .ok()
            .map(|v| v.trim_end_matches('/').to_string())
            .filter(|v| !v.is_empty());

        let data_dir = std::env::var("PYROD_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);

        let java_image = std::env::var("DOCKER_IMAGES_JAVA").unwrap_or(defaults.java_image);
        let install_image =
            std::env::var("DOCKER_IMAGES_INSTALL").unwrap_or(defaults.install_image);

        Self {
            port,
            panel_url,
            data_dir,
            java_image,
            install_image,
        }
    }

    /// Egg descriptor directory
    pub fn eggs_dir(&self) -> PathBuf {
        self.data_dir.join("eggs")
    }

    /// Instance configuration directory
    pub fn configs_dir(&self) -> PathBuf {
        self.data_dir.join("configs")
    }

    /// Root holding every per-instance directory
    pub fn servers_dir(&self) -> PathBuf {
        self.data_dir.join("servers")
    }

    /// One instance's directory
    pub fn server_dir(&self, id: &str) -> PathBuf {
        self.servers_dir().join(id)
    }

    /// Daily log file root
    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    /// Create every directory the daemon persists into
    pub fn ensure_layout(&self) -> std::io::Result<()> {
        for dir in [
            self.eggs_dir(),
            self.configs_dir(),
            self.servers_dir(),
            self.logs_dir(),
        ] {
            std::fs::create_dir_all(&dir)?;
        }
        Ok(())
    }

    /// Override the data root, mainly for tests
    pub fn with_data_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.data_dir = dir.as_ref().to_path_buf();
        self
    }
}
