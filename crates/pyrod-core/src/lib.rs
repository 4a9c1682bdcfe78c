//! Core types shared by every pyrod crate
//!
//! The daemon-wide error hierarchy, the environment-driven configuration,
//! and the path sandbox that confines every per-instance filesystem access
//! to that instance's directory.

pub mod config;
pub mod error;
pub mod sandbox;

pub use config::DaemonConfig;
pub use error::{DaemonError, Result};
pub use sandbox::Sandbox;
