//! pyrod agent - server lifecycle & container supervision engine
//!
//! Everything between a control-plane request and the container engine lives
//! here: egg and config registries, template-driven container invocation,
//! the one-shot installer, the lifecycle supervisor and its state machine,
//! log and stats pipelines, the reconciler, the sandboxed file service, the
//! per-instance event bus, and the console command injector.

pub mod console;
pub mod events;
pub mod eggs;
pub mod files;
pub mod image;
pub mod installer;
pub mod logs;
pub mod panel;
mod persist;
pub mod reconciler;
pub mod registry;
pub mod runtime;
pub mod runtimes;
pub mod seed;
pub mod stats;
pub mod status;
pub mod store;
pub mod supervisor;

pub use console::CommandInjector;
pub use eggs::EggRegistry;
pub use events::{Event, EventBus};
pub use files::{DirEntryInfo, Encoding, FileService};
pub use image::ImageResolver;
pub use installer::Installer;
pub use logs::{LogLevel, LogRecord};
pub use panel::PanelClient;
pub use reconciler::Reconciler;
pub use registry::{ContainerHandle, ContainerRegistry};
pub use runtime::{CreateOpts, EngineStats, LogStream, MockRuntime, PortMapping, Runtime};
pub use runtimes::DockerRuntime;
pub use stats::{StatsSample, StatsSampler};
pub use status::{ServerState, StatusPublisher};
pub use store::ConfigStore;
pub use supervisor::Supervisor;

/// Name of the container backing a server instance
pub fn server_container_name(id: &str) -> String {
    format!("pyro-server-{id}")
}

/// Name of the one-shot install container for a server instance
pub fn install_container_name(id: &str) -> String {
    format!("pyro-install-{id}")
}

/// Label key carried by every managed container, used for reconciliation
pub const SERVER_LABEL: &str = "pyro.server.id";

/// Prefix shared by every managed runtime container name
pub const SERVER_NAME_PREFIX: &str = "pyro-server-";
