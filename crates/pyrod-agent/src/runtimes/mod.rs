//! Concrete container engine implementations

mod docker;

pub use docker::DockerRuntime;
