//! Server lifecycle states and the shared status publisher
//!
//! The status publisher is the single place a state transition becomes
//! visible: it updates the in-memory table, publishes exactly one
//! `server-status` event on the instance's room, and fires the best-effort
//! panel notification for the transitions the control plane cares about.
//! Both the supervisor and the reconciler go through it, which is what keeps
//! property "one publication per transition, in causal order" true.

use crate::events::{Event, EventBus};
use crate::panel::PanelClient;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Lifecycle state of a managed server. A server with no configuration is
/// absent, which is represented by the id simply not being in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerState {
    Installing,
    InstallFailed,
    Offline,
    Starting,
    Online,
    Stopping,
    Error,
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ServerState::Installing => "installing",
            ServerState::InstallFailed => "install_failed",
            ServerState::Offline => "offline",
            ServerState::Starting => "starting",
            ServerState::Online => "online",
            ServerState::Stopping => "stopping",
            ServerState::Error => "error",
        };
        f.write_str(s)
    }
}

impl ServerState {
    /// States during which a container handle exists
    pub fn is_running(self) -> bool {
        matches!(
            self,
            ServerState::Starting | ServerState::Online | ServerState::Stopping
        )
    }

    /// Transitions the control plane is notified about
    fn notifies_panel(self) -> bool {
        matches!(
            self,
            ServerState::Online | ServerState::Offline | ServerState::InstallFailed
        )
    }
}

/// Owns the state table and fans every transition out to the bus and panel
pub struct StatusPublisher {
    states: RwLock<HashMap<String, ServerState>>,
    bus: Arc<EventBus>,
    panel: Arc<PanelClient>,
}

impl StatusPublisher {
    pub fn new(bus: Arc<EventBus>, panel: Arc<PanelClient>) -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
            bus,
            panel,
        }
    }

    /// Current state; configured-but-never-touched servers are offline
    pub async fn get(&self, id: &str) -> ServerState {
        self.states
            .read()
            .await
            .get(id)
            .copied()
            .unwrap_or(ServerState::Offline)
    }

    /// Record a transition and publish it. The bus publish completes before
    /// this returns, so a caller holding the instance lock guarantees
    /// ordering for the next operation.
    pub async fn transition(&self, id: &str, state: ServerState) {
        {
            let mut states = self.states.write().await;
            states.insert(id.to_string(), state);
        }

        tracing::info!(server = %id, state = %state, "server state transition");
        self.bus.publish(id, Event::ServerStatus { state }).await;

        if state.notifies_panel() {
            let panel = Arc::clone(&self.panel);
            let id = id.to_string();
            tokio::spawn(async move {
                panel.notify_status(&id, state).await;
            });
        }
    }

    /// Seed a state without publishing (startup adoption)
    pub async fn seed(&self, id: &str, state: ServerState) {
        self.states.write().await.insert(id.to_string(), state);
    }

    /// Forget a server entirely (config deleted)
    pub async fn forget(&self, id: &str) {
        self.states.write().await.remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_serialize_snake_case() {
        assert_eq!(
            serde_json::to_string(&ServerState::InstallFailed).unwrap(),
            "\"install_failed\""
        );
        assert_eq!(ServerState::Online.to_string(), "online");
    }

    #[tokio::test]
    async fn transition_publishes_exactly_once() {
        let bus = Arc::new(EventBus::new());
        let panel = Arc::new(PanelClient::disabled());
        let publisher = StatusPublisher::new(Arc::clone(&bus), panel);

        let mut rx = bus.subscribe("s1").await;
        publisher.transition("s1", ServerState::Starting).await;

        match rx.try_recv().unwrap() {
            Event::ServerStatus { state } => assert_eq!(state, ServerState::Starting),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(rx.try_recv().is_err());
        assert_eq!(publisher.get("s1").await, ServerState::Starting);
    }

    #[tokio::test]
    async fn unknown_servers_read_offline() {
        let bus = Arc::new(EventBus::new());
        let publisher = StatusPublisher::new(bus, Arc::new(PanelClient::disabled()));
        assert_eq!(publisher.get("ghost").await, ServerState::Offline);
    }
}
