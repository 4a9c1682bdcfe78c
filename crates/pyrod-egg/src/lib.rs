//! Egg descriptors and instance configurations
//!
//! An *egg* is a declarative template describing how to install, configure,
//! and run one class of game server. An *instance config* binds an egg to a
//! concrete server: a port, a resource plan, and per-instance variable
//! overrides. This crate also owns the variable validation DSL and the
//! `{{PLACEHOLDER}}` template expansion used everywhere an egg value meets an
//! instance.

pub mod template;
pub mod types;
pub mod validate;

pub use template::expand;
pub use types::{
    Egg, EggConfig, EggScripts, EggVariable, FileParser, FindSpec, InstallScript, ParserKind,
    Plan, ServerConfig, StartupDetection,
};
pub use validate::{validate_egg, validate_rules, EggError, RuleViolation};
