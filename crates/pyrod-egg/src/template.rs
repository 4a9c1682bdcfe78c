//! Template expansion for startup commands, environments, and config files
//!
//! A single pure function substitutes `{{PLACEHOLDER}}` occurrences against
//! an (egg, instance) pair. Substitution is literal and strictly one pass:
//! the scanner walks the input once and never rescans substituted text, so a
//! variable value containing `{{...}}` comes out verbatim.
//!
//! Resolution order for each placeholder key:
//! 1. egg variables, under both vocabularies (`server.build.env.KEY` and
//!    bare `KEY`), instance override first then egg default;
//! 2. system values: `server.build.default.port`, `SERVER_PORT`,
//!    `SERVER_MEMORY` (plan ram in MiB);
//! 3. any remaining key present in the instance variable map.
//!
//! Unresolvable placeholders are left untouched.

use crate::types::{Egg, ServerConfig};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([A-Za-z0-9_.]+)\s*\}\}").expect("placeholder regex"));

const ENV_PREFIX: &str = "server.build.env.";

/// Expand every placeholder in `template` against `egg` and `cfg`.
///
/// Text with no placeholders passes through byte-identical, which also makes
/// the function idempotent on its own output whenever every placeholder
/// resolved.
pub fn expand(template: &str, egg: &Egg, cfg: &ServerConfig) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| {
            let key = &caps[1];
            resolve(key, egg, cfg).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

fn resolve(key: &str, egg: &Egg, cfg: &ServerConfig) -> Option<String> {
    let bare = key.strip_prefix(ENV_PREFIX).unwrap_or(key);

    if let Some(var) = egg.variables.iter().find(|v| v.env_variable == bare) {
        return Some(egg.variable_value(var, cfg).to_string());
    }

    match key {
        "server.build.default.port" | "SERVER_PORT" => return Some(cfg.port.to_string()),
        "SERVER_MEMORY" => return Some(cfg.plan.memory_mib().to_string()),
        _ => {}
    }

    cfg.variables.get(bare).cloned()
}
