//! Console command injection
//!
//! Game servers read their admin console from stdin. The daemon delivers a
//! command by exec'ing a shell inside the container that writes the command
//! plus newline to pid 1's stdin. The sent command is also echoed as a
//! `> command` log record so every subscriber sees what was issued.

use crate::events::EventBus;
use crate::logs::{self, LogLevel, LogRecord};
use crate::registry::ContainerRegistry;
use crate::runtime::Runtime;
use pyrod_core::{DaemonError, Result};
use std::path::PathBuf;
use std::sync::Arc;

pub struct CommandInjector {
    runtime: Arc<dyn Runtime>,
    registry: Arc<ContainerRegistry>,
    bus: Arc<EventBus>,
    logs_dir: PathBuf,
}

impl CommandInjector {
    pub fn new(
        runtime: Arc<dyn Runtime>,
        registry: Arc<ContainerRegistry>,
        bus: Arc<EventBus>,
        logs_dir: PathBuf,
    ) -> Self {
        Self {
            runtime,
            registry,
            bus,
            logs_dir,
        }
    }

    /// Deliver a console command to a running server
    pub async fn send(&self, id: &str, command: &str) -> Result<()> {
        let command = command.trim();
        if command.is_empty() {
            return Err(DaemonError::BadRequest("command is empty".to_string()));
        }

        let container = self
            .registry
            .container_name(id)
            .await
            .ok_or_else(|| DaemonError::Conflict(format!("server '{id}' is not running")))?;

        let argv = vec![
            "sh".to_string(),
            "-c".to_string(),
            format!("printf '%s\\n' {} > /proc/1/fd/0", shell_quote(command)),
        ];

        let (code, _stdout, stderr) = self.runtime.exec(&container, &argv).await?;
        if code != 0 {
            return Err(DaemonError::engine(
                "console.send",
                format!("exec exited {code}: {}", stderr.trim()),
            ));
        }

        // Echo what was sent so subscribers see the command in the stream
        let record = LogRecord::now(LogLevel::Info, format!("> {command}"));
        self.bus
            .publish(id, crate::events::Event::ServerLog(record.clone()))
            .await;
        if let Err(e) = logs::append_record(&self.logs_dir, id, &record) {
            tracing::warn!(server = %id, error = %e, "failed to append command echo");
        }

        tracing::info!(server = %id, command = %command, "console command delivered");
        Ok(())
    }
}

/// Single-quote a string for POSIX sh
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ContainerHandle;
    use crate::runtime::MockRuntime;

    async fn injector() -> (tempfile::TempDir, Arc<MockRuntime>, CommandInjector) {
        let tmp = tempfile::tempdir().unwrap();
        let runtime = Arc::new(MockRuntime::new());
        runtime.seed_container("pyro-server-s1", true).await;

        let registry = Arc::new(ContainerRegistry::new());
        registry
            .register(
                "s1",
                ContainerHandle {
                    container_name: "pyro-server-s1".to_string(),
                    log_task: None,
                    promotion_task: None,
                },
            )
            .await;

        let bus = Arc::new(EventBus::new());
        let injector = CommandInjector::new(
            runtime.clone(),
            registry,
            bus,
            tmp.path().to_path_buf(),
        );
        (tmp, runtime, injector)
    }

    #[tokio::test]
    async fn command_is_written_to_pid_one_stdin() {
        let (_tmp, runtime, injector) = injector().await;
        injector.send("s1", "say hello").await.unwrap();

        let history = runtime.exec_history().await;
        assert_eq!(history.len(), 1);
        let (container, argv) = &history[0];
        assert_eq!(container, "pyro-server-s1");
        assert_eq!(argv[0], "sh");
        assert!(argv[2].contains("/proc/1/fd/0"));
        assert!(argv[2].contains("'say hello'"));
    }

    #[tokio::test]
    async fn command_echo_appears_in_logs() {
        let (tmp, _runtime, injector) = injector().await;
        injector.send("s1", "stop").await.unwrap();

        let records = logs::tail_records(tmp.path(), "s1", 10);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].message, "> stop");
    }

    #[tokio::test]
    async fn not_running_is_a_conflict() {
        let (_tmp, _runtime, injector) = injector().await;
        assert!(matches!(
            injector.send("ghost", "help").await,
            Err(DaemonError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn empty_commands_rejected() {
        let (_tmp, _runtime, injector) = injector().await;
        assert!(matches!(
            injector.send("s1", "   ").await,
            Err(DaemonError::BadRequest(_))
        ));
    }

    #[test]
    fn shell_quoting_survives_quotes() {
        assert_eq!(shell_quote("say it's fine"), r"'say it'\''s fine'");
        assert_eq!(shell_quote("plain"), "'plain'");
    }
}
