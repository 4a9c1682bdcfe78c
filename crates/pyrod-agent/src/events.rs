//! Per-instance event rooms
//!
//! One broadcast channel per server id carries status transitions, log
//! records, stats samples, and command results to however many subscribers
//! are watching that instance. Buffers are bounded; a subscriber that falls
//! behind loses the oldest messages (broadcast lag) rather than stalling
//! producers.

use crate::logs::LogRecord;
use crate::stats::StatsSample;
use crate::status::ServerState;
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::{broadcast, RwLock};

/// Messages delivered to room subscribers, serialized with the wire names
/// the control plane and consoles expect.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum Event {
    ServerStatus { state: ServerState },
    ServerLog(LogRecord),
    ServerStats(StatsSample),
    CommandOutput {
        command: String,
        output: String,
        status: CommandStatus,
    },
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Success,
    Error,
}

/// Messages buffered per subscriber before lag kicks in
const ROOM_CAPACITY: usize = 256;

/// Rooms keyed by server id
pub struct EventBus {
    rooms: RwLock<HashMap<String, broadcast::Sender<Event>>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
        }
    }

    /// Join an instance's room
    pub async fn subscribe(&self, id: &str) -> broadcast::Receiver<Event> {
        let mut rooms = self.rooms.write().await;
        rooms
            .entry(id.to_string())
            .or_insert_with(|| broadcast::channel(ROOM_CAPACITY).0)
            .subscribe()
    }

    /// Publish to an instance's room. Publishing into a room with no
    /// subscribers is a no-op, not an error.
    pub async fn publish(&self, id: &str, event: Event) {
        let sender = {
            let mut rooms = self.rooms.write().await;
            rooms
                .entry(id.to_string())
                .or_insert_with(|| broadcast::channel(ROOM_CAPACITY).0)
                .clone()
        };
        let _ = sender.send(event);
    }

    /// Drop a room and disconnect its subscribers (instance deleted)
    pub async fn drop_room(&self, id: &str) {
        self.rooms.write().await.remove(id);
    }
}
