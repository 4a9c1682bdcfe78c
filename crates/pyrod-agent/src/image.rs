//! Image resolution
//!
//! Chooses the runtime image for an (egg, instance) pair and makes sure it
//! exists locally before a container is created. Minecraft-class workloads
//! get the canonical Java runtime; when a `Dockerfile` is present in the
//! daemon's working directory a local image is built instead, falling back
//! to the canonical image (and repairing instance-directory ownership) when
//! the build fails.

use crate::runtime::Runtime;
use pyrod_core::{DaemonConfig, Result};
use pyrod_egg::{Egg, ServerConfig};
use std::path::Path;
use std::sync::Arc;

/// Tag given to the locally built Java image
const LOCAL_JAVA_TAG: &str = "pyrod-java:local";

/// Docker image labels preferred when an egg offers several
const PREFERRED_LABELS: [&str; 2] = ["Java 17", "Java 21"];

/// Uid/gid the canonical runtime images run the server process as
const RUNTIME_UID: u32 = 1000;
const RUNTIME_GID: u32 = 1000;

pub struct ImageResolver {
    runtime: Arc<dyn Runtime>,
    config: DaemonConfig,
}

impl ImageResolver {
    pub fn new(runtime: Arc<dyn Runtime>, config: DaemonConfig) -> Self {
        Self { runtime, config }
    }

    /// Pick the image reference for this egg and instance
    pub fn choose_image(&self, egg: &Egg, cfg: &ServerConfig) -> String {
        if cfg.game.eq_ignore_ascii_case("minecraft") {
            return self.config.java_image.clone();
        }

        for label in PREFERRED_LABELS {
            if let Some(image) = egg.docker_images.get(label) {
                return image.clone();
            }
        }

        // Registry validation guarantees at least one entry
        egg.docker_images
            .values()
            .next()
            .cloned()
            .unwrap_or_else(|| self.config.install_image.clone())
    }

    /// Probe local storage and pull when the image is absent
    pub async fn ensure_image(&self, image: &str) -> Result<()> {
        if self.runtime.image_present(image).await? {
            tracing::debug!(image = %image, "image already present");
            return Ok(());
        }
        self.runtime.pull_image(image).await
    }

    /// Resolve and ensure the runtime image for a start operation.
    ///
    /// For Minecraft-class workloads with a local `Dockerfile`, attempt a
    /// local build; a failed build falls back to the canonical image and
    /// chowns the instance directory to the runtime uid/gid so the fallback
    /// image can write there.
    pub async fn ensure_runtime_image(
        &self,
        egg: &Egg,
        cfg: &ServerConfig,
        instance_dir: &Path,
    ) -> Result<String> {
        let canonical = self.choose_image(egg, cfg);

        if cfg.game.eq_ignore_ascii_case("minecraft") && Path::new("Dockerfile").is_file() {
            match self
                .runtime
                .build_image(LOCAL_JAVA_TAG, Path::new("."))
                .await
            {
                Ok(()) => return Ok(LOCAL_JAVA_TAG.to_string()),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        fallback = %canonical,
                        "local image build failed, falling back to canonical image"
                    );
                    repair_ownership(instance_dir);
                }
            }
        }

        self.ensure_image(&canonical).await?;
        Ok(canonical)
    }
}

/// Recursively chown the instance directory to the runtime user so a
/// pre-built image whose entrypoint does not run as root can still write.
/// Best-effort: failures are logged and never abort a start.
fn repair_ownership(dir: &Path) {
    #[cfg(unix)]
    {
        fn walk(path: &Path) -> std::io::Result<()> {
            std::os::unix::fs::chown(path, Some(RUNTIME_UID), Some(RUNTIME_GID))?;
            if path.is_dir() {
                for entry in std::fs::read_dir(path)?.flatten() {
                    walk(&entry.path())?;
                }
            }
            Ok(())
        }

        if let Err(e) = walk(dir) {
            tracing::warn!(dir = %dir.display(), error = %e, "failed to repair ownership");
        }
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
    }
}
