//! Shared handler context
//!
//! One context object carries references to every collaborator a handler
//! can need. Handlers receive it via axum state; nothing in the API layer
//! reaches for globals.

use pyrod_agent::{
    CommandInjector, ConfigStore, ContainerRegistry, EggRegistry, EventBus, FileService, Runtime,
    Supervisor,
};
use pyrod_core::DaemonConfig;
use std::sync::Arc;

pub struct AppContext {
    pub config: DaemonConfig,
    pub runtime: Arc<dyn Runtime>,
    pub eggs: Arc<EggRegistry>,
    pub store: Arc<ConfigStore>,
    pub registry: Arc<ContainerRegistry>,
    pub supervisor: Arc<Supervisor>,
    pub files: FileService,
    pub bus: Arc<EventBus>,
    pub console: Arc<CommandInjector>,
}
