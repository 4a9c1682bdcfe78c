//! Egg and instance configuration types
//!
//! These are the two persisted document shapes of the daemon: egg descriptors
//! under `eggs/<id>.json` and instance configurations under
//! `configs/<id>.json`. Both are treated as data, never code: they are
//! validated on load and on every write path.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;
use validator::Validate;

/// Declarative template for a class of game server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct Egg {
    /// Stable identifier, doubles as the descriptor file name
    pub id: String,

    /// Human-readable name
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub author: String,

    /// Human label -> image reference; at least one entry
    pub docker_images: BTreeMap<String, String>,

    /// Startup command template for the main container's entrypoint
    pub startup: String,

    #[serde(default)]
    pub config: EggConfig,

    #[serde(default)]
    pub scripts: EggScripts,

    /// Declared variables, in declaration order
    #[serde(default)]
    pub variables: Vec<EggVariable>,
}

impl Egg {
    /// Effective value of a variable for a given instance: the instance
    /// override when present, otherwise the egg default.
    pub fn variable_value<'a>(&'a self, var: &'a EggVariable, cfg: &'a ServerConfig) -> &'a str {
        cfg.variables
            .get(&var.env_variable)
            .map(String::as_str)
            .unwrap_or(&var.default_value)
    }
}

/// Egg-level runtime configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct EggConfig {
    /// Files materialized into the instance root before install/start,
    /// keyed by path relative to the instance root
    #[serde(default)]
    pub files: BTreeMap<String, FileParser>,

    #[serde(default)]
    pub startup: StartupDetection,

    /// Console command (or `^`-prefixed signal) delivered on graceful stop
    #[serde(default)]
    pub stop: Option<String>,
}

/// How the daemon detects that a server has finished starting
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct StartupDetection {
    /// Sentinel substring; its appearance in the log stream marks the
    /// server as online. When absent, a coarse timer promotes instead.
    #[serde(default)]
    pub done: Option<String>,
}

/// Parser descriptor for one egg-declared config file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct FileParser {
    pub parser: ParserKind,

    /// Key/value pairs for `properties`/`yaml`, literal content for `file`.
    /// Values are template-expanded against the instance before writing.
    pub find: FindSpec,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ParserKind {
    /// `key=value` lines, merged by key into any existing file
    Properties,
    /// Whole-file literal content
    File,
    /// Dotted-path assignments into a YAML document
    Yaml,
}

/// `find` payload: a map for key/value parsers, a scalar for `file`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(untagged)]
pub enum FindSpec {
    Map(BTreeMap<String, String>),
    Content(String),
}

/// Install scripts attached to an egg
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct EggScripts {
    #[serde(default)]
    pub installation: Option<InstallScript>,
}

/// One-shot installation: `container` may differ from the runtime image
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct InstallScript {
    pub script: String,
    pub container: String,
    pub entrypoint: String,
}

/// A variable declared by an egg
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct EggVariable {
    pub name: String,

    /// Key used both as container env var and as template placeholder
    pub env_variable: String,

    #[serde(default)]
    pub default_value: String,

    #[serde(default = "default_true")]
    pub user_viewable: bool,

    #[serde(default = "default_true")]
    pub user_editable: bool,

    /// Pipe-separated validation DSL, e.g. `required|numeric|between:1024,65535`
    #[serde(default)]
    pub rules: String,
}

fn default_true() -> bool {
    true
}

/// Per-instance configuration, persisted as `configs/<id>.json`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Validate, ToSchema)]
pub struct ServerConfig {
    /// Stable identifier, matches the instance directory name
    pub id: String,

    #[serde(rename = "eggId")]
    pub egg_id: String,

    /// Primary port, bound host:container on both tcp and udp
    #[validate(custom(function = "crate::validate::validate_port_wrapper"))]
    pub port: u16,

    #[validate(custom(function = "crate::validate::validate_plan_wrapper"))]
    pub plan: Plan,

    #[serde(default)]
    pub location: String,

    pub name: String,

    /// Workload family hint (e.g. "minecraft"), used for image selection
    #[serde(default)]
    pub game: String,

    /// env_variable -> value overrides; unset keys fall back to egg defaults
    #[serde(default)]
    pub variables: BTreeMap<String, String>,

    /// Inline egg snapshot; rehydrated from the registry at load time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub egg: Option<Egg>,
}

/// Resource plan: ram and disk in GiB, cpu in cores
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct Plan {
    pub ram: u32,
    pub cpu: u32,
    pub disk: u32,
}

impl Plan {
    /// Container memory limit in bytes
    pub fn memory_bytes(&self) -> i64 {
        i64::from(self.ram) * 1024 * 1024 * 1024
    }

    /// `SERVER_MEMORY` value: plan ram expressed in MiB
    pub fn memory_mib(&self) -> u64 {
        u64::from(self.ram) * 1024
    }

    /// Docker nano-CPU quota (1 core = 1e9)
    pub fn nano_cpus(&self) -> i64 {
        i64::from(self.cpu) * 1_000_000_000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terraria_egg_json() -> &'static str {
        r#"{
            "id": "terraria",
            "name": "Terraria (TShock)",
            "docker_images": { "Mono": "ghcr.io/pyrohost/images:mono" },
            "startup": "mono TerrariaServer.exe -port {{SERVER_PORT}} -world {{WORLD_NAME}}",
            "config": {
                "files": {
                    "serverconfig.txt": {
                        "parser": "properties",
                        "find": { "port": "{{SERVER_PORT}}", "worldname": "{{WORLD_NAME}}" }
                    }
                },
                "startup": { "done": "Type 'help' for a list of commands" },
                "stop": "exit"
            },
            "variables": [
                {
                    "name": "World Name",
                    "env_variable": "WORLD_NAME",
                    "default_value": "World",
                    "rules": "required|string|max:64"
                }
            ]
        }"#
    }

    #[test]
    fn egg_round_trips_through_json() {
        let egg: Egg = serde_json::from_str(terraria_egg_json()).unwrap();
        assert_eq!(egg.id, "terraria");
        assert_eq!(egg.config.stop.as_deref(), Some("exit"));
        assert_eq!(
            egg.config.startup.done.as_deref(),
            Some("Type 'help' for a list of commands")
        );

        let json = serde_json::to_string(&egg).unwrap();
        let back: Egg = serde_json::from_str(&json).unwrap();
        assert_eq!(egg, back);
    }

    #[test]
    fn file_parser_accepts_map_and_scalar_find() {
        let egg: Egg = serde_json::from_str(terraria_egg_json()).unwrap();
        let parser = &egg.config.files["serverconfig.txt"];
        assert_eq!(parser.parser, ParserKind::Properties);
        assert!(matches!(parser.find, FindSpec::Map(_)));

        let scalar: FileParser = serde_json::from_str(
            r#"{ "parser": "file", "find": "motd={{SERVER_MOTD}}" }"#,
        )
        .unwrap();
        assert!(matches!(scalar.find, FindSpec::Content(_)));
    }

    #[test]
    fn variable_defaults_apply() {
        let var: EggVariable = serde_json::from_str(
            r#"{ "name": "Max Players", "env_variable": "MAX_PLAYERS" }"#,
        )
        .unwrap();
        assert!(var.user_viewable);
        assert!(var.user_editable);
        assert_eq!(var.default_value, "");
        assert_eq!(var.rules, "");
    }

    #[test]
    fn variable_value_prefers_instance_override() {
        let egg: Egg = serde_json::from_str(terraria_egg_json()).unwrap();
        let mut cfg = test_config();
        let var = &egg.variables[0];

        assert_eq!(egg.variable_value(var, &cfg), "World");

        cfg.variables
            .insert("WORLD_NAME".to_string(), "PyroWorld".to_string());
        assert_eq!(egg.variable_value(var, &cfg), "PyroWorld");
    }

    #[test]
    fn plan_unit_conversions() {
        let plan = Plan {
            ram: 2,
            cpu: 3,
            disk: 10,
        };
        assert_eq!(plan.memory_bytes(), 2 * 1024 * 1024 * 1024);
        assert_eq!(plan.memory_mib(), 2048);
        assert_eq!(plan.nano_cpus(), 3_000_000_000);
    }

    #[test]
    fn config_uses_egg_id_wire_name() {
        let cfg = test_config();
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(json.contains("\"eggId\":\"terraria\""));
        assert!(!json.contains("egg_id"));
    }

    fn test_config() -> ServerConfig {
        ServerConfig {
            id: "s1".to_string(),
            egg_id: "terraria".to_string(),
            port: 7777,
            plan: Plan {
                ram: 1,
                cpu: 1,
                disk: 5,
            },
            location: "us-east".to_string(),
            name: "my server".to_string(),
            game: "terraria".to_string(),
            variables: BTreeMap::new(),
            egg: None,
        }
    }
}
